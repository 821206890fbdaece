//! API shared state

use std::sync::Arc;
use tokio::sync::broadcast;

use crate::actors::{evaluator::EvaluatorHandle, writer::WriterHandle};
use crate::alerts::AlertLog;
use crate::cache::StatusCache;
use crate::events::StatusEvent;
use crate::ingest::Ingestor;

/// Shared state passed to all API handlers
#[derive(Clone)]
pub struct ApiState {
    /// Entry point for submitted reports
    pub ingestor: Arc<Ingestor>,

    /// Reporter status, also the way to reach the status store
    pub cache: Arc<StatusCache>,

    /// Recent alerts
    pub alert_log: Arc<AlertLog>,

    /// Broadcast sender for status events (for WebSocket streaming)
    pub status_tx: broadcast::Sender<StatusEvent>,

    pub evaluator: Option<EvaluatorHandle>,

    pub writer: Option<WriterHandle>,
}

impl ApiState {
    pub fn new(
        ingestor: Arc<Ingestor>,
        cache: Arc<StatusCache>,
        alert_log: Arc<AlertLog>,
        status_tx: broadcast::Sender<StatusEvent>,
    ) -> Self {
        Self {
            ingestor,
            cache,
            alert_log,
            status_tx,
            evaluator: None,
            writer: None,
        }
    }

    /// Attach actor handles so `/health` can report their statistics.
    pub fn with_actors(mut self, evaluator: EvaluatorHandle, writer: WriterHandle) -> Self {
        self.evaluator = Some(evaluator);
        self.writer = Some(writer);
        self
    }
}
