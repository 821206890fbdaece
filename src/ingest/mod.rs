//! Ingestion of reporter status
//!
//! Reports arrive either whole ([`Ingestor::report_status`]) or as a chunk
//! stream ([`Ingestor::stream_status`]). Both paths converge on the same
//! processing: validate the reporter, refresh its cached status, persist
//! first contacts immediately and everything else through the write-back
//! buffer, then fire recovery and registry side effects.

pub mod assembler;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::Stream;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, trace, warn};

use crate::alerts::AlertManager;
use crate::buffer::PendingWriteBuffer;
use crate::cache::StatusCache;
use crate::config::Config;
use crate::events::{EventPublisher, LifecycleEvent};
use crate::registry::{AllowList, Registry, ReporterContact};
use crate::storage::StorageError;
use crate::util::normalize_host_ip;
use crate::{Report, ReportAck, ReportChunk, ReporterStatus};

pub use assembler::{ChunkAssembler, INCREMENTAL_SERVICE_TYPE, MergeStrategy};

/// Payloads above this size are logged at info level.
const LARGE_PAYLOAD_BYTES: usize = 1024 * 1024;

/// Errors returned to a reporting client
#[derive(Debug)]
pub enum IngestError {
    /// The report (or every chunk of a stream) lacks a reporter ID
    EmptyReporterId,

    /// A chunk violates the stream framing
    MalformedChunk(String),

    /// The stream exceeded the configured chunk limit
    TooManyChunks(usize),

    /// The underlying stream failed
    Transport(String),

    /// Reading or writing reporter status failed
    Storage(StorageError),
}

impl IngestError {
    /// Errors caused by the client rather than the hub.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            IngestError::EmptyReporterId
                | IngestError::MalformedChunk(_)
                | IngestError::TooManyChunks(_)
        )
    }
}

impl fmt::Display for IngestError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IngestError::EmptyReporterId => write!(f, "reporter ID is required"),
            IngestError::MalformedChunk(msg) => write!(f, "malformed chunk: {}", msg),
            IngestError::TooManyChunks(max) => {
                write!(f, "stream exceeded the limit of {} chunks", max)
            }
            IngestError::Transport(msg) => write!(f, "stream failed: {}", msg),
            IngestError::Storage(err) => write!(f, "{}", err),
        }
    }
}

impl std::error::Error for IngestError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            IngestError::Storage(err) => Some(err),
            _ => None,
        }
    }
}

impl From<StorageError> for IngestError {
    fn from(err: StorageError) -> Self {
        IngestError::Storage(err)
    }
}

#[derive(Debug, Clone)]
pub struct IngestSettings {
    /// Upper bound for a detached heartbeat/registration call
    pub registration_timeout: Duration,
    pub max_stream_chunks: usize,
}

impl IngestSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            registration_timeout: config.registration_timeout(),
            max_stream_chunks: config.max_stream_chunks,
        }
    }
}

impl Default for IngestSettings {
    fn default() -> Self {
        Self {
            registration_timeout: Duration::from_secs(10),
            max_stream_chunks: 4096,
        }
    }
}

pub struct Ingestor {
    allow_list: Arc<AllowList>,
    cache: Arc<StatusCache>,
    buffer: Arc<PendingWriteBuffer>,
    alerts: AlertManager,
    events: EventPublisher,
    settings: IngestSettings,
}

impl Ingestor {
    pub fn new(
        allow_list: Arc<AllowList>,
        cache: Arc<StatusCache>,
        buffer: Arc<PendingWriteBuffer>,
        alerts: AlertManager,
        events: EventPublisher,
        settings: IngestSettings,
    ) -> Self {
        Self {
            allow_list,
            cache,
            buffer,
            alerts,
            events,
            settings,
        }
    }

    /// Handle a complete report.
    pub async fn report_status(&self, report: Report) -> Result<ReportAck, IngestError> {
        self.process_report(report, Utc::now()).await
    }

    /// Assemble a chunked report and handle it like a complete one.
    pub async fn stream_status<S, E>(&self, chunks: S) -> Result<ReportAck, IngestError>
    where
        S: Stream<Item = Result<ReportChunk, E>>,
        E: fmt::Display,
    {
        let report = assembler::assemble(chunks, self.settings.max_stream_chunks).await?;
        self.process_report(report, Utc::now()).await
    }

    /// Handle a report received at `now`.
    ///
    /// Reports from unknown reporters are acknowledged and dropped.
    #[instrument(skip_all, fields(reporter = %report.reporter_id))]
    pub async fn process_report(
        &self,
        report: Report,
        now: DateTime<Utc>,
    ) -> Result<ReportAck, IngestError> {
        if report.reporter_id.is_empty() {
            return Err(IngestError::EmptyReporterId);
        }

        log_payload_summary(&report);

        let id = report.reporter_id.as_str();
        if !self.allow_list.is_known(id).await {
            warn!("ignoring report from unknown reporter '{}'", id);
            return Ok(ReportAck { received: true });
        }

        let reported_at = report.reported_at(now);
        let host_ip = normalize_host_ip(&report.source_address);
        if host_ip.is_none() && !report.source_address.is_empty() {
            debug!("{}: unusable source address '{}'", id, report.source_address);
        }

        let contact = match (&host_ip, report.partition.is_empty()) {
            (Some(source_ip), false) => Some(ReporterContact {
                reporter_id: id.to_string(),
                agent_id: report.agent_id().map(str::to_string),
                partition: report.partition.clone(),
                source_ip: source_ip.clone(),
                seen_at: reported_at,
            }),
            _ => {
                warn!(
                    "{}: report without partition or source address, skipping registration",
                    id
                );
                None
            }
        };

        let stored = match self.cache.lookup(id).await {
            Some(cached) => Some(cached),
            None => match self.cache.store().get(id).await {
                Ok(stored) => Some(stored),
                Err(e) if e.is_not_found() => None,
                Err(e) => {
                    error!("{}: failed to read stored status: {}", id, e);
                    return Err(e.into());
                }
            },
        };

        let first_contact = stored.is_none();
        if first_contact {
            // Persisted right away so a crash cannot lose a brand new reporter.
            let status = ReporterStatus::first_contact(id, reported_at, host_ip.clone());
            if let Err(e) = self.cache.store().put(&status).await {
                error!("{}: failed to persist first contact: {}", id, e);
                return Err(e.into());
            }
            info!("{}: first report", id);
        }

        // held until the recovery (if any) has been announced
        let _transition = self.cache.lock_transitions(id).await;

        let (previous, updated) = self
            .cache
            .upsert_with(id, |current| match current.or(stored.as_ref()) {
                Some(prior) => ReporterStatus {
                    id: id.to_string(),
                    is_healthy: true,
                    // first_seen is fixed at first contact; an older report
                    // counts as seen at that point
                    first_seen: prior.first_seen,
                    last_seen: reported_at.max(prior.first_seen),
                    host_ip: host_ip.clone().or_else(|| prior.host_ip.clone()),
                    last_evaluated: prior.last_evaluated,
                    alert_sent: false,
                },
                None => ReporterStatus::first_contact(id, reported_at, host_ip.clone()),
            })
            .await;

        if !first_contact {
            self.buffer.enqueue(updated.persisted(), now).await;
        }

        let recovered = previous
            .as_ref()
            .or(stored.as_ref())
            .is_some_and(|prior| !prior.is_healthy);

        if recovered {
            info!("{}: reporting again after being offline", id);
            self.alerts
                .dispatch(self.alerts.recovery_alert(id, report.services.len(), now))
                .await;
            self.events
                .recovery(self.lifecycle(&updated, &report.partition, now))
                .await;
        } else if first_contact {
            self.events
                .first_seen(self.lifecycle(&updated, &report.partition, now))
                .await;
        }

        self.events.reported(id, true, updated.last_seen);

        if let (Some(registry), Some(contact)) = (self.allow_list.registry(), contact) {
            spawn_registration(
                registry.clone(),
                contact,
                first_contact,
                self.settings.registration_timeout,
            );
        }

        Ok(ReportAck { received: true })
    }

    fn lifecycle(&self, status: &ReporterStatus, partition: &str, now: DateTime<Utc>) -> LifecycleEvent {
        LifecycleEvent {
            kind: self.alerts.kind(),
            reporter_id: status.id.clone(),
            source_ip: status.host_ip.clone(),
            partition: (!partition.is_empty()).then(|| partition.to_string()),
            timestamp: now,
        }
    }
}

/// Heartbeat (and on first contact, register) a reporter in the background.
///
/// The task is bounded by `timeout` and outlives the request that started it.
pub fn spawn_registration(
    registry: Arc<dyn Registry>,
    contact: ReporterContact,
    first_contact: bool,
    timeout: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let id = contact.reporter_id.clone();
        let work = async {
            if let Err(e) = registry.record_heartbeat(&contact).await {
                warn!("{}: heartbeat failed: {:#}", id, e);
            }

            if first_contact {
                match registry.register(&contact).await {
                    Ok(()) => debug!("{}: registered", id),
                    Err(e) => warn!("{}: registration failed: {:#}", id, e),
                }
            }
        };

        if tokio::time::timeout(timeout, work).await.is_err() {
            warn!("{}: registry call timed out after {:?}", id, timeout);
        }
    })
}

fn log_payload_summary(report: &Report) {
    let bytes = report.payload_bytes();
    let incremental = report
        .services
        .iter()
        .filter(|s| s.service_type == INCREMENTAL_SERVICE_TYPE)
        .count();

    if bytes > LARGE_PAYLOAD_BYTES {
        info!(
            "{}: large report with {} services ({} incremental, {} bytes)",
            report.reporter_id,
            report.services.len(),
            incremental,
            bytes
        );
    } else {
        trace!(
            "{}: report with {} services ({} incremental, {} bytes)",
            report.reporter_id,
            report.services.len(),
            incremental,
            bytes
        );
    }
}
