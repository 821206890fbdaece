use chrono::{DateTime, Duration, Utc};

use crate::ReporterStatus;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LivenessEvaluation {
    /// Healthy and reporting inside the window
    Ok,
    /// Offline, already alerted, still silent
    StillOffline,
    /// Healthy until now but silent for longer than the threshold
    GoesOffline,
    /// Marked offline with an alert out, but reporting again
    BackOnline,
}

impl LivenessEvaluation {
    pub fn evaluate(
        is_healthy: bool,
        alert_sent: bool,
        silence: Duration,
        threshold: Duration,
    ) -> LivenessEvaluation {
        let within_window = silence <= threshold;

        if is_healthy {
            // an alert is only ever raised once per offline period
            if !within_window && !alert_sent {
                return LivenessEvaluation::GoesOffline;
            }
            return LivenessEvaluation::Ok;
        }

        if within_window && alert_sent {
            return LivenessEvaluation::BackOnline;
        }

        LivenessEvaluation::StillOffline
    }

    pub fn of(status: &ReporterStatus, now: DateTime<Utc>, threshold: Duration) -> Self {
        Self::evaluate(
            status.is_healthy,
            status.alert_sent,
            now - status.last_seen,
            threshold,
        )
    }

    pub fn is_transition(self) -> bool {
        matches!(
            self,
            LivenessEvaluation::GoesOffline | LivenessEvaluation::BackOnline
        )
    }
}

/// Whether `status` is due for another evaluation at `now`.
pub fn due_for_evaluation(status: &ReporterStatus, now: DateTime<Utc>, skip: Duration) -> bool {
    match status.last_evaluated {
        Some(last) => now - last >= skip,
        None => true,
    }
}
