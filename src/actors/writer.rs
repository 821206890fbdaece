//! WriterActor - flushes the pending write buffer to the status store
//!
//! Status updates from ingestion and evaluation land in the
//! [`PendingWriteBuffer`]; this actor persists them on a fixed interval,
//! on demand, and once more on shutdown.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, error, instrument, trace, warn};

use super::messages::{WriterCommand, WriterStats};
use crate::buffer::{FlushOutcome, PendingWriteBuffer};
use crate::storage::StatusStore;

pub struct WriterActor {
    buffer: Arc<PendingWriteBuffer>,
    store: Arc<dyn StatusStore>,
    flush_interval: Duration,
    command_rx: mpsc::Receiver<WriterCommand>,
    stats: WriterStats,
}

impl WriterActor {
    pub fn new(
        buffer: Arc<PendingWriteBuffer>,
        store: Arc<dyn StatusStore>,
        flush_interval: Duration,
        command_rx: mpsc::Receiver<WriterCommand>,
    ) -> Self {
        Self {
            buffer,
            store,
            flush_interval,
            command_rx,
            stats: WriterStats::default(),
        }
    }

    /// Run the actor's main loop
    #[instrument(skip(self))]
    pub async fn run(mut self) {
        debug!(
            "starting writer actor (flush every {:?})",
            self.flush_interval
        );

        let mut flush_interval = time::interval(self.flush_interval);
        flush_interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = flush_interval.tick() => {
                    self.flush().await;
                }

                Some(cmd) = self.command_rx.recv() => {
                    match cmd {
                        WriterCommand::Flush { respond_to } => {
                            debug!("manual flush requested");
                            let outcome = self.flush().await;
                            let _ = respond_to.send(outcome);
                        }
                        WriterCommand::GetStats { respond_to } => {
                            let _ = respond_to.send(self.stats().await);
                        }
                        WriterCommand::Shutdown => {
                            debug!("shutdown requested");
                            break;
                        }
                    }
                }

                else => {
                    warn!("command channel closed, shutting down");
                    break;
                }
            }
        }

        let pending = self.buffer.len().await;
        if pending > 0 {
            debug!("final flush before shutdown ({pending} updates)");
            let outcome = self.flush().await;
            if outcome.failed > 0 {
                error!("{} status updates lost on shutdown", outcome.failed);
            }
        }

        debug!("writer actor stopped");
    }

    async fn flush(&mut self) -> FlushOutcome {
        let outcome = self.buffer.flush(self.store.as_ref()).await;

        if outcome != FlushOutcome::default() {
            self.stats.flush_count += 1;
            self.stats.persisted_total += outcome.persisted as u64;
            self.stats.failed_total += outcome.failed as u64;
            trace!(
                "flush #{} complete ({} persisted, {} failed)",
                self.stats.flush_count, outcome.persisted, outcome.failed
            );
        }

        outcome
    }

    async fn stats(&self) -> WriterStats {
        WriterStats {
            pending: self.buffer.len().await,
            ..self.stats.clone()
        }
    }
}

/// Handle for controlling the WriterActor
#[derive(Clone)]
pub struct WriterHandle {
    sender: mpsc::Sender<WriterCommand>,
}

impl WriterHandle {
    pub fn spawn(
        buffer: Arc<PendingWriteBuffer>,
        store: Arc<dyn StatusStore>,
        flush_interval: Duration,
    ) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::channel(32);

        let actor = WriterActor::new(buffer, store, flush_interval, cmd_rx);
        tokio::spawn(actor.run());

        Self { sender: cmd_tx }
    }

    /// Manually flush the write buffer
    pub async fn flush(&self) -> anyhow::Result<FlushOutcome> {
        let (tx, rx) = tokio::sync::oneshot::channel();
        self.sender
            .send(WriterCommand::Flush { respond_to: tx })
            .await?;

        Ok(rx.await?)
    }

    /// Get writer statistics
    pub async fn get_stats(&self) -> Option<WriterStats> {
        let (tx, rx) = tokio::sync::oneshot::channel();
        self.sender
            .send(WriterCommand::GetStats { respond_to: tx })
            .await
            .ok()?;

        rx.await.ok()
    }

    /// Stop the actor and wait for its final flush
    pub async fn shutdown(&self) {
        let _ = self.sender.send(WriterCommand::Shutdown).await;
        self.sender.closed().await;
    }
}
