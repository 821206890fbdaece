//! Wiring of the liveness core
//!
//! [`Hub::start`] builds the cache, write buffer, ingestor and both actors
//! from a [`Config`] plus the external collaborators, and returns a
//! [`HubHandle`] that owns them until shutdown.

use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::actors::evaluator::{EvaluatorHandle, EvaluatorSettings, HealthEvaluator};
use crate::actors::writer::WriterHandle;
use crate::alerts::{Alert, AlertError, AlertLog, AlertManager, AlertSink};
use crate::buffer::PendingWriteBuffer;
use crate::cache::StatusCache;
use crate::config::Config;
use crate::events::{EventPublisher, EventSink, StatusEvent};
use crate::ingest::{IngestSettings, Ingestor};
use crate::registry::{AllowList, Registry};
use crate::storage::StatusStore;

/// Capacity of the live status broadcast channel
const STATUS_CHANNEL_CAPACITY: usize = 1024;

/// Optional external collaborators of the hub
#[derive(Default, Clone)]
pub struct Collaborators {
    /// Alerts always land in the hub's [`AlertLog`]; this sink receives
    /// them as well.
    pub alert_sink: Option<Arc<dyn AlertSink>>,
    pub event_sink: Option<Arc<dyn EventSink>>,
    pub registry: Option<Arc<dyn Registry>>,
}

pub struct Hub;

impl Hub {
    /// Build every component and spawn the actors. Must be called from
    /// within a tokio runtime.
    pub fn start(
        config: &Config,
        store: Arc<dyn StatusStore>,
        collaborators: Collaborators,
    ) -> anyhow::Result<HubHandle> {
        let Collaborators {
            alert_sink,
            event_sink,
            registry,
        } = collaborators;

        let allow_list = Arc::new(
            AllowList::new(
                config.known_reporters.clone(),
                config.reporter_patterns.clone(),
                registry,
            )
            .context("invalid reporter pattern")?,
        );

        if !allow_list.has_static_entries()
            && allow_list.patterns().is_empty()
            && allow_list.registry().is_none()
        {
            warn!("no reporters are allowed: configure known_reporters, reporter_patterns or a registry");
        }

        let cache = Arc::new(StatusCache::new(
            store.clone(),
            config.reporter_patterns.clone(),
            config.cache_ttl(),
        ));
        let buffer = Arc::new(PendingWriteBuffer::new());

        let alert_log = Arc::new(AlertLog::default());
        let sink: Arc<dyn AlertSink> = match alert_sink {
            Some(external) => Arc::new(RecordingSink {
                log: alert_log.clone(),
                external,
            }),
            None => alert_log.clone(),
        };
        let alerts = AlertManager::new(config.reporter_kind, sink);

        let (status_tx, _) = broadcast::channel(STATUS_CHANNEL_CAPACITY);
        let events = EventPublisher::new(event_sink, status_tx.clone());

        let ingestor = Arc::new(Ingestor::new(
            allow_list.clone(),
            cache.clone(),
            buffer.clone(),
            alerts.clone(),
            events.clone(),
            IngestSettings::from_config(config),
        ));

        let writer = WriterHandle::spawn(buffer.clone(), store.clone(), config.flush_interval());

        let evaluator = EvaluatorHandle::spawn(Arc::new(HealthEvaluator::new(
            cache.clone(),
            buffer.clone(),
            alerts,
            events,
            allow_list,
            EvaluatorSettings::from_config(config),
        )));

        info!(
            "{} liveness hub started ({} known reporters, {} patterns)",
            config.reporter_kind,
            config.known_reporters.len(),
            config.reporter_patterns.len()
        );

        Ok(HubHandle {
            ingestor,
            cache,
            buffer,
            alert_log,
            status_tx,
            evaluator,
            writer,
            store,
        })
    }
}

/// Running hub
pub struct HubHandle {
    pub ingestor: Arc<Ingestor>,
    pub cache: Arc<StatusCache>,
    pub buffer: Arc<PendingWriteBuffer>,
    pub alert_log: Arc<AlertLog>,
    pub status_tx: broadcast::Sender<StatusEvent>,
    pub evaluator: EvaluatorHandle,
    pub writer: WriterHandle,
    store: Arc<dyn StatusStore>,
}

impl HubHandle {
    pub fn subscribe(&self) -> broadcast::Receiver<StatusEvent> {
        self.status_tx.subscribe()
    }

    pub fn store(&self) -> &Arc<dyn StatusStore> {
        &self.store
    }

    #[cfg(feature = "api")]
    pub fn api_state(&self) -> crate::api::ApiState {
        crate::api::ApiState::new(
            self.ingestor.clone(),
            self.cache.clone(),
            self.alert_log.clone(),
            self.status_tx.clone(),
        )
        .with_actors(self.evaluator.clone(), self.writer.clone())
    }

    /// Stop the evaluator, then flush and stop the writer, then close the
    /// store.
    pub async fn shutdown(self) {
        debug!("stopping evaluator");
        self.evaluator.shutdown().await;

        debug!("stopping writer");
        self.writer.shutdown().await;

        if let Err(e) = self.store.close().await {
            warn!("failed to close status store: {}", e);
        }

        info!("hub stopped");
    }
}

/// Keeps delivered alerts in the log and forwards them to an external sink.
struct RecordingSink {
    log: Arc<AlertLog>,
    external: Arc<dyn AlertSink>,
}

#[async_trait]
impl AlertSink for RecordingSink {
    async fn send(&self, alert: &Alert) -> Result<(), AlertError> {
        let result = self.external.send(alert).await;

        if !matches!(result, Err(AlertError::Cooldown)) {
            let _ = self.log.send(alert).await;
        }

        result
    }
}
