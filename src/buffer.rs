//! PendingWriteBuffer - debounced write-back of reporter status
//!
//! Producers overwrite the pending entry for a reporter (last writer wins).
//! A flush swaps the whole map for an empty one under the lock and persists
//! the detached copy without holding it, so producers never wait on storage.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tracing::{debug, error, trace, warn};

use crate::ReporterStatus;
use crate::storage::StatusStore;

/// Result of one flush
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushOutcome {
    pub persisted: usize,
    pub failed: usize,
}

#[derive(Debug, Default)]
pub struct PendingWriteBuffer {
    pending: Mutex<HashMap<String, ReporterStatus>>,
}

impl PendingWriteBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue `status` for the next flush, replacing any pending entry for
    /// the same reporter.
    pub async fn enqueue(&self, status: ReporterStatus, now: DateTime<Utc>) {
        let status = sanitize(status, now);
        trace!("{}: queued status update", status.id);
        self.pending.lock().await.insert(status.id.clone(), status);
    }

    /// Detach everything pending.
    pub async fn take(&self) -> HashMap<String, ReporterStatus> {
        std::mem::take(&mut *self.pending.lock().await)
    }

    pub async fn len(&self) -> usize {
        self.pending.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.pending.lock().await.is_empty()
    }

    /// Persist everything pending.
    ///
    /// Entries that fail to persist are queued again unless a newer update
    /// for the same reporter arrived in the meantime.
    pub async fn flush(&self, store: &dyn StatusStore) -> FlushOutcome {
        let batch = self.take().await;
        if batch.is_empty() {
            return FlushOutcome::default();
        }

        debug!("flushing {} pending status updates", batch.len());

        let mut outcome = FlushOutcome::default();
        let mut retry = Vec::new();

        for (reporter_id, status) in batch {
            match store.put(&status).await {
                Ok(()) => outcome.persisted += 1,
                Err(e) => {
                    error!("{reporter_id}: failed to persist status: {e}");
                    outcome.failed += 1;
                    retry.push(status);
                }
            }
        }

        if !retry.is_empty() {
            warn!("re-queueing {} failed status updates", retry.len());
            let mut pending = self.pending.lock().await;
            for status in retry {
                pending.entry(status.id.clone()).or_insert(status);
            }
        }

        outcome
    }
}

/// Repair timestamps before they reach storage: an unset `last_seen`
/// becomes `now`, an unset `first_seen` becomes `last_seen`, and
/// `first_seen` never trails `last_seen`.
fn sanitize(mut status: ReporterStatus, now: DateTime<Utc>) -> ReporterStatus {
    if status.last_seen.timestamp() <= 0 {
        warn!("{}: invalid last_seen, using current time", status.id);
        status.last_seen = now;
    }

    if status.first_seen.timestamp() <= 0 {
        warn!("{}: invalid first_seen, using last_seen", status.id);
        status.first_seen = status.last_seen;
    }

    if status.first_seen > status.last_seen {
        status.first_seen = status.last_seen;
    }

    status
}
