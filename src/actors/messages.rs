//! Message types for actor communication
//!
//! ## Design Principles
//!
//! 1. **Commands**: Request/response messages sent to specific actors via mpsc
//! 2. **Events**: Broadcast notifications live in [`crate::events`]
//! 3. **Replies**: Every query carries its own oneshot channel

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;

use crate::buffer::FlushOutcome;

/// Commands that can be sent to the WriterActor
#[derive(Debug)]
pub enum WriterCommand {
    /// Flush the pending write buffer right away
    Flush {
        respond_to: oneshot::Sender<FlushOutcome>,
    },

    /// Get writer statistics
    GetStats {
        respond_to: oneshot::Sender<WriterStats>,
    },

    /// Flush one last time and stop
    Shutdown,
}

/// Write-back statistics
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WriterStats {
    /// Number of flushes that had something to write
    pub flush_count: u64,

    /// Status rows written since startup
    pub persisted_total: u64,

    /// Status rows that failed to persist (and were re-queued)
    pub failed_total: u64,

    /// Updates currently waiting in the buffer
    pub pending: usize,
}

/// Commands that can be sent to the EvaluatorActor
#[derive(Debug)]
pub enum EvaluatorCommand {
    /// Run an evaluation pass immediately, as of `now` (defaults to the
    /// current time)
    EvaluateNow {
        now: Option<DateTime<Utc>>,
        respond_to: oneshot::Sender<anyhow::Result<EvaluationSummary>>,
    },

    /// Run the never-reported sweep immediately
    CheckNeverReported {
        respond_to: oneshot::Sender<anyhow::Result<Vec<String>>>,
    },

    /// Run the allow-list cleanup immediately
    Cleanup {
        respond_to: oneshot::Sender<anyhow::Result<usize>>,
    },

    /// Get evaluator statistics
    GetStats {
        respond_to: oneshot::Sender<EvaluatorStats>,
    },

    /// Gracefully shut down the evaluator
    Shutdown,
}

/// Outcome of one evaluation pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvaluationSummary {
    /// Reporters whose state was checked
    pub evaluated: usize,

    /// Reporters skipped because they were evaluated recently
    pub throttled: usize,

    pub went_offline: usize,

    pub recovered: usize,

    /// Reporters whose handling failed
    pub failed: usize,

    /// The pass ran out of time before visiting every reporter
    pub timed_out: bool,
}

/// Evaluator statistics
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EvaluatorStats {
    pub passes: u64,
    pub failed_passes: u64,
    pub offline_transitions: u64,
    pub recoveries: u64,
    pub last_pass: Option<DateTime<Utc>>,
    pub never_reported_checked: bool,
}
