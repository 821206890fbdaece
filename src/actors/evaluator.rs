//! EvaluatorActor - periodic liveness evaluation
//!
//! ## Schedule
//!
//! - One pass immediately on startup, then one per monitor tick
//! - A one-time never-reported sweep shortly after startup
//! - Allow-list cleanup on a much slower ticker
//!
//! Each pass reads a snapshot from the [`StatusCache`] and writes any
//! transition back through the cache and the [`PendingWriteBuffer`].

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, error, info, instrument, trace, warn};

use super::messages::{EvaluationSummary, EvaluatorCommand, EvaluatorStats};
use crate::ReporterStatus;
use crate::alerts::AlertManager;
use crate::buffer::PendingWriteBuffer;
use crate::cache::StatusCache;
use crate::config::Config;
use crate::events::{EventPublisher, LifecycleEvent};
use crate::monitors::liveness::{LivenessEvaluation, due_for_evaluation};
use crate::registry::AllowList;

#[derive(Debug, Clone)]
pub struct EvaluatorSettings {
    pub alert_threshold: chrono::Duration,
    pub skip_interval: chrono::Duration,
    pub monitor_interval: Duration,
    pub cleanup_interval: Duration,
    pub evaluation_timeout: Duration,
    pub never_reported_delay: Duration,
}

impl EvaluatorSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            alert_threshold: config.alert_threshold(),
            skip_interval: config.evaluation_skip_interval(),
            monitor_interval: config.monitor_interval(),
            cleanup_interval: config.cleanup_interval(),
            evaluation_timeout: config.evaluation_timeout(),
            never_reported_delay: config.never_reported_delay(),
        }
    }
}

impl Default for EvaluatorSettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Visit {
    Throttled,
    Unchanged,
    WentOffline,
    Recovered,
}

/// The liveness state machine driven over every cached reporter.
pub struct HealthEvaluator {
    cache: Arc<StatusCache>,
    buffer: Arc<PendingWriteBuffer>,
    alerts: AlertManager,
    events: EventPublisher,
    allow_list: Arc<AllowList>,
    settings: EvaluatorSettings,
}

impl HealthEvaluator {
    pub fn new(
        cache: Arc<StatusCache>,
        buffer: Arc<PendingWriteBuffer>,
        alerts: AlertManager,
        events: EventPublisher,
        allow_list: Arc<AllowList>,
        settings: EvaluatorSettings,
    ) -> Self {
        Self {
            cache,
            buffer,
            alerts,
            events,
            allow_list,
            settings,
        }
    }

    pub fn settings(&self) -> &EvaluatorSettings {
        &self.settings
    }

    /// Evaluate every cached reporter as of `now`.
    ///
    /// Failing to read the cache fails the whole pass; a failure for a
    /// single reporter is logged and the pass moves on.
    pub async fn evaluate_all(&self, now: DateTime<Utc>) -> anyhow::Result<EvaluationSummary> {
        self.evaluate_until(now, None).await
    }

    /// [`Self::evaluate_all`] bounded by the configured timeout.
    ///
    /// The deadline is checked between reporters: the reporter in progress
    /// is always finished, including its alerts, and the rest wait for the
    /// next tick.
    pub async fn evaluate_with_timeout(
        &self,
        now: DateTime<Utc>,
    ) -> anyhow::Result<EvaluationSummary> {
        let deadline = Instant::now() + self.settings.evaluation_timeout;
        self.evaluate_until(now, Some(deadline)).await
    }

    #[instrument(skip(self))]
    async fn evaluate_until(
        &self,
        now: DateTime<Utc>,
        deadline: Option<Instant>,
    ) -> anyhow::Result<EvaluationSummary> {
        let load = self.cache.get(false);
        let snapshot = match deadline {
            Some(deadline) => time::timeout_at(deadline, load)
                .await
                .context("timed out loading reporter status")?,
            None => load.await,
        }
        .context("failed to load reporter status")?;

        let mut ids: Vec<&String> = snapshot.keys().collect();
        ids.sort();

        let mut summary = EvaluationSummary::default();

        for (position, id) in ids.iter().enumerate() {
            if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
                warn!(
                    "evaluation pass exceeded {:?}, {} reporters deferred to next tick",
                    self.settings.evaluation_timeout,
                    ids.len() - position
                );
                summary.timed_out = true;
                break;
            }

            match self.visit(&snapshot[*id], now).await {
                Ok(Visit::Throttled) => summary.throttled += 1,
                Ok(Visit::Unchanged) => summary.evaluated += 1,
                Ok(Visit::WentOffline) => {
                    summary.evaluated += 1;
                    summary.went_offline += 1;
                }
                Ok(Visit::Recovered) => {
                    summary.evaluated += 1;
                    summary.recovered += 1;
                }
                Err(e) => {
                    warn!("{id}: evaluation failed: {e:#}");
                    summary.failed += 1;
                }
            }
        }

        trace!("evaluation pass complete: {summary:?}");
        Ok(summary)
    }

    async fn visit(&self, snapshot: &ReporterStatus, now: DateTime<Utc>) -> anyhow::Result<Visit> {
        if !due_for_evaluation(snapshot, now, self.settings.skip_interval) {
            return Ok(Visit::Throttled);
        }

        let evaluation = LivenessEvaluation::of(snapshot, now, self.settings.alert_threshold);
        trace!("{}: {evaluation:?}", snapshot.id);

        // held until the transition has been announced
        let _transition = if evaluation.is_transition() {
            Some(self.cache.lock_transitions(&snapshot.id).await)
        } else {
            None
        };

        // Apply the transition to the live entry, unless a report changed it
        // since the snapshot was taken.
        let transitioned = self
            .cache
            .update(&snapshot.id, |entry| {
                entry.last_evaluated = Some(now);

                let unchanged = entry.last_seen == snapshot.last_seen
                    && entry.is_healthy == snapshot.is_healthy
                    && entry.alert_sent == snapshot.alert_sent;
                if !unchanged {
                    return None;
                }

                match evaluation {
                    LivenessEvaluation::GoesOffline => {
                        entry.is_healthy = false;
                        entry.alert_sent = true;
                        Some(entry.clone())
                    }
                    LivenessEvaluation::BackOnline => {
                        entry.is_healthy = true;
                        entry.alert_sent = false;
                        Some(entry.clone())
                    }
                    LivenessEvaluation::Ok | LivenessEvaluation::StillOffline => None,
                }
            })
            .await
            .with_context(|| format!("{} vanished from the cache", snapshot.id))?;

        let Some(status) = transitioned else {
            return Ok(Visit::Unchanged);
        };

        self.buffer.enqueue(status.persisted(), now).await;

        match evaluation {
            LivenessEvaluation::GoesOffline => {
                warn!(
                    "{}: no report for {}, marking offline",
                    status.id,
                    crate::alerts::format_duration(now - status.last_seen)
                );
                self.alerts
                    .dispatch(self.alerts.offline_alert(&status, now))
                    .await;
                self.events.offline(self.lifecycle(&status, now)).await;
                Ok(Visit::WentOffline)
            }
            _ => {
                info!("{}: reporting again, marking recovered", status.id);
                self.alerts
                    .dispatch(self.alerts.recovery_alert(&status.id, 0, now))
                    .await;
                self.events.recovery(self.lifecycle(&status, now)).await;
                Ok(Visit::Recovered)
            }
        }
    }

    fn lifecycle(&self, status: &ReporterStatus, now: DateTime<Utc>) -> LifecycleEvent {
        LifecycleEvent {
            kind: self.alerts.kind(),
            reporter_id: status.id.clone(),
            source_ip: status.host_ip.clone(),
            partition: None,
            timestamp: now,
        }
    }

    /// Log every reporter that is already offline when the hub starts.
    pub async fn log_initial_state(&self, now: DateTime<Utc>) {
        let snapshot = match self.cache.get(true).await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                error!("failed to load initial reporter state: {e}");
                return;
            }
        };

        let threshold = self.settings.alert_threshold;
        let mut offline: Vec<&ReporterStatus> = snapshot
            .values()
            .filter(|s| !s.is_healthy || now - s.last_seen > threshold)
            .collect();
        offline.sort_by(|a, b| a.id.cmp(&b.id));

        for status in &offline {
            info!(
                "{} '{}' offline at startup (last seen {})",
                self.alerts.kind(),
                status.id,
                status.last_seen.to_rfc3339()
            );
        }

        debug!(
            "initial state: {} reporters, {} offline",
            snapshot.len(),
            offline.len()
        );
    }

    /// Find allow-listed reporters that never sent a report and raise one
    /// alert for all of them.
    #[instrument(skip(self))]
    pub async fn check_never_reported(&self, now: DateTime<Utc>) -> anyhow::Result<Vec<String>> {
        let store = self.cache.store();
        let mut never: BTreeSet<String> = BTreeSet::new();

        let patterns = self.allow_list.patterns();
        if !patterns.is_empty() {
            never.extend(
                store
                    .list_never_reported(patterns)
                    .await
                    .context("failed to query never-reported reporters")?,
            );
        }

        for id in self.allow_list.static_ids() {
            match store.get(id).await {
                Ok(status) if status.first_seen == status.last_seen => {
                    never.insert(id.to_string());
                }
                Ok(_) => {}
                Err(e) if e.is_not_found() => {
                    never.insert(id.to_string());
                }
                Err(e) => return Err(e).context(format!("failed to look up {id}")),
            }
        }

        let never: Vec<String> = never.into_iter().collect();
        if never.is_empty() {
            debug!("every known reporter has reported");
            return Ok(never);
        }

        info!("{} reporters never reported: {:?}", never.len(), never);
        self.alerts
            .dispatch(self.alerts.never_reported_alert(&never, now))
            .await;

        Ok(never)
    }

    /// Delete stored reporters that are no longer allow-listed.
    #[instrument(skip(self))]
    pub async fn cleanup_unknown(&self) -> anyhow::Result<usize> {
        if !self.allow_list.has_static_entries() && self.allow_list.patterns().is_empty() {
            debug!("no allow-list configured, skipping cleanup");
            return Ok(0);
        }

        let store = self.cache.store();
        let stored = store
            .list_matching(&[])
            .await
            .context("failed to list stored reporters")?;

        let mut removed = 0;
        for status in stored {
            if self.allow_list.is_known(&status.id).await {
                continue;
            }

            match store.delete(&status.id).await {
                Ok(()) => {
                    self.cache.remove(&status.id).await;
                    info!("{}: removed, no longer allow-listed", status.id);
                    removed += 1;
                }
                Err(e) => error!("{}: failed to remove: {e}", status.id),
            }
        }

        Ok(removed)
    }
}

pub struct EvaluatorActor {
    evaluator: Arc<HealthEvaluator>,
    command_rx: mpsc::Receiver<EvaluatorCommand>,
    stats: EvaluatorStats,
}

impl EvaluatorActor {
    pub fn new(evaluator: Arc<HealthEvaluator>, command_rx: mpsc::Receiver<EvaluatorCommand>) -> Self {
        Self {
            evaluator,
            command_rx,
            stats: EvaluatorStats::default(),
        }
    }

    /// Run the actor's main loop
    #[instrument(skip(self))]
    pub async fn run(mut self) {
        let settings = self.evaluator.settings().clone();
        debug!(
            "starting evaluator (tick {:?}, threshold {}s)",
            settings.monitor_interval,
            settings.alert_threshold.num_seconds()
        );

        self.evaluator.log_initial_state(Utc::now()).await;
        let _ = self.run_pass(Utc::now()).await;

        let never_reported = time::sleep(settings.never_reported_delay);
        tokio::pin!(never_reported);

        let mut monitor_interval = time::interval(settings.monitor_interval);
        monitor_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        monitor_interval.tick().await;

        let mut cleanup_interval = time::interval(settings.cleanup_interval);
        cleanup_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        cleanup_interval.tick().await;

        loop {
            tokio::select! {
                _ = &mut never_reported, if !self.stats.never_reported_checked => {
                    self.stats.never_reported_checked = true;
                    if let Err(e) = self.evaluator.check_never_reported(Utc::now()).await {
                        error!("never-reported check failed: {e:#}");
                    }
                }

                _ = monitor_interval.tick() => {
                    let _ = self.run_pass(Utc::now()).await;
                }

                _ = cleanup_interval.tick() => {
                    debug!("allow-list cleanup triggered");
                    match self.evaluator.cleanup_unknown().await {
                        Ok(removed) => debug!("cleanup removed {removed} reporters"),
                        Err(e) => error!("cleanup failed: {e:#}"),
                    }
                }

                Some(cmd) = self.command_rx.recv() => {
                    if !self.handle_command(cmd).await {
                        break;
                    }
                }

                else => {
                    warn!("command channel closed, shutting down");
                    break;
                }
            }
        }

        debug!("evaluator stopped");
    }

    async fn run_pass(&mut self, now: DateTime<Utc>) -> anyhow::Result<EvaluationSummary> {
        let result = self.evaluator.evaluate_with_timeout(now).await;

        self.stats.passes += 1;
        self.stats.last_pass = Some(now);

        match &result {
            Ok(summary) => {
                self.stats.offline_transitions += summary.went_offline as u64;
                self.stats.recoveries += summary.recovered as u64;
            }
            Err(e) => {
                // the next tick retries
                error!("evaluation pass failed: {e:#}");
                self.stats.failed_passes += 1;
            }
        }

        result
    }

    /// Returns `false` when the actor should stop.
    async fn handle_command(&mut self, cmd: EvaluatorCommand) -> bool {
        match cmd {
            EvaluatorCommand::EvaluateNow { now, respond_to } => {
                let result = self.run_pass(now.unwrap_or_else(Utc::now)).await;
                let _ = respond_to.send(result);
            }
            EvaluatorCommand::CheckNeverReported { respond_to } => {
                let result = self.evaluator.check_never_reported(Utc::now()).await;
                let _ = respond_to.send(result);
            }
            EvaluatorCommand::Cleanup { respond_to } => {
                let _ = respond_to.send(self.evaluator.cleanup_unknown().await);
            }
            EvaluatorCommand::GetStats { respond_to } => {
                let _ = respond_to.send(self.stats.clone());
            }
            EvaluatorCommand::Shutdown => {
                debug!("shutdown requested");
                return false;
            }
        }

        true
    }
}

/// Handle for controlling the EvaluatorActor
#[derive(Clone)]
pub struct EvaluatorHandle {
    sender: mpsc::Sender<EvaluatorCommand>,
}

impl EvaluatorHandle {
    pub fn spawn(evaluator: Arc<HealthEvaluator>) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::channel(32);

        let actor = EvaluatorActor::new(evaluator, cmd_rx);
        tokio::spawn(actor.run());

        Self { sender: cmd_tx }
    }

    /// Run an evaluation pass now (or as of `now`, if given)
    pub async fn evaluate_now(
        &self,
        now: Option<DateTime<Utc>>,
    ) -> anyhow::Result<EvaluationSummary> {
        let (tx, rx) = tokio::sync::oneshot::channel();
        self.sender
            .send(EvaluatorCommand::EvaluateNow {
                now,
                respond_to: tx,
            })
            .await?;

        rx.await?
    }

    pub async fn check_never_reported(&self) -> anyhow::Result<Vec<String>> {
        let (tx, rx) = tokio::sync::oneshot::channel();
        self.sender
            .send(EvaluatorCommand::CheckNeverReported { respond_to: tx })
            .await?;

        rx.await?
    }

    pub async fn cleanup(&self) -> anyhow::Result<usize> {
        let (tx, rx) = tokio::sync::oneshot::channel();
        self.sender
            .send(EvaluatorCommand::Cleanup { respond_to: tx })
            .await?;

        rx.await?
    }

    pub async fn get_stats(&self) -> Option<EvaluatorStats> {
        let (tx, rx) = tokio::sync::oneshot::channel();
        self.sender
            .send(EvaluatorCommand::GetStats { respond_to: tx })
            .await
            .ok()?;

        rx.await.ok()
    }

    pub async fn shutdown(&self) {
        let _ = self.sender.send(EvaluatorCommand::Shutdown).await;
        self.sender.closed().await;
    }
}
