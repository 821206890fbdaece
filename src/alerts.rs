use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::Mutex;
use tracing::{debug, error, info, instrument, warn};

use crate::{ReporterKind, ReporterStatus, util};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertLevel {
    Info,
    Warning,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub level: AlertLevel,
    pub title: String,
    pub message: String,
    pub subject_id: String,
    pub timestamp: DateTime<Utc>,
    pub details: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AlertError {
    /// The sink suppressed the alert because a similar one went out recently.
    Cooldown,
    Delivery(String),
}

impl fmt::Display for AlertError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AlertError::Cooldown => write!(f, "alert suppressed by cooldown"),
            AlertError::Delivery(msg) => write!(f, "alert delivery failed: {msg}"),
        }
    }
}

impl std::error::Error for AlertError {}

/// Destination for alerts. Rate limiting is the sink's business and is
/// signalled back as [`AlertError::Cooldown`].
#[async_trait]
pub trait AlertSink: Send + Sync {
    async fn send(&self, alert: &Alert) -> Result<(), AlertError>;
}

/// Sink that logs every alert and keeps the most recent ones for the API.
#[derive(Debug)]
pub struct AlertLog {
    capacity: usize,
    recent: Mutex<VecDeque<Alert>>,
}

impl AlertLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            recent: Mutex::new(VecDeque::with_capacity(capacity)),
        }
    }

    /// Recent alerts, oldest first.
    pub async fn recent(&self) -> Vec<Alert> {
        self.recent.lock().await.iter().cloned().collect()
    }
}

impl Default for AlertLog {
    fn default() -> Self {
        Self::new(256)
    }
}

#[async_trait]
impl AlertSink for AlertLog {
    async fn send(&self, alert: &Alert) -> Result<(), AlertError> {
        match alert.level {
            AlertLevel::Error => error!("[{}] {}: {}", alert.subject_id, alert.title, alert.message),
            AlertLevel::Warning => warn!("[{}] {}: {}", alert.subject_id, alert.title, alert.message),
            AlertLevel::Info => info!("[{}] {}: {}", alert.subject_id, alert.title, alert.message),
        }

        let mut recent = self.recent.lock().await;
        recent.push_back(alert.clone());
        while recent.len() > self.capacity {
            recent.pop_front();
        }

        Ok(())
    }
}

/// Builds liveness alerts and hands them to a sink.
#[derive(Clone)]
pub struct AlertManager {
    kind: ReporterKind,
    hostname: String,
    sink: Arc<dyn AlertSink>,
}

impl AlertManager {
    pub fn new(kind: ReporterKind, sink: Arc<dyn AlertSink>) -> Self {
        Self {
            kind,
            hostname: util::hostname(),
            sink,
        }
    }

    pub fn with_hostname(mut self, hostname: impl Into<String>) -> Self {
        self.hostname = hostname.into();
        self
    }

    pub fn kind(&self) -> ReporterKind {
        self.kind
    }

    pub fn offline_alert(&self, status: &ReporterStatus, now: DateTime<Utc>) -> Alert {
        Alert {
            level: AlertLevel::Error,
            title: format!("{} Offline", self.kind),
            message: format!("{} '{}' is offline", self.kind, status.id),
            subject_id: status.id.clone(),
            timestamp: status.last_seen,
            details: json!({
                "hostname": self.hostname,
                "duration": format_duration(now - status.last_seen),
            }),
        }
    }

    pub fn recovery_alert(&self, reporter_id: &str, services: usize, now: DateTime<Utc>) -> Alert {
        Alert {
            level: AlertLevel::Info,
            title: format!("{} Recovered", self.kind),
            message: format!("{} '{}' is back online", self.kind, reporter_id),
            subject_id: reporter_id.to_string(),
            timestamp: now,
            details: json!({
                "hostname": self.hostname,
                "recovery_time": now.to_rfc3339(),
                "services": services,
            }),
        }
    }

    pub fn never_reported_alert(&self, reporter_ids: &[String], now: DateTime<Utc>) -> Alert {
        Alert {
            level: AlertLevel::Warning,
            title: format!("{}s Never Reported", self.kind),
            message: format!(
                "{} {}(s) have not reported since startup: {}",
                reporter_ids.len(),
                self.kind.to_string().to_lowercase(),
                reporter_ids.join(", ")
            ),
            subject_id: "core".to_string(),
            timestamp: now,
            details: json!({
                "hostname": self.hostname,
                "reporter_ids": reporter_ids,
                "reporter_count": reporter_ids.len(),
            }),
        }
    }

    /// Send `alert`; returns whether it was delivered. Cooldowns and
    /// delivery failures never propagate.
    #[instrument(skip_all, fields(subject = %alert.subject_id, title = %alert.title))]
    pub async fn dispatch(&self, alert: Alert) -> bool {
        match self.sink.send(&alert).await {
            Ok(()) => true,
            Err(AlertError::Cooldown) => {
                debug!("alert skipped due to cooldown");
                false
            }
            Err(e) => {
                error!("failed to send alert: {e}");
                false
            }
        }
    }
}

/// Render a duration as e.g. `1h2m3s`.
pub fn format_duration(duration: Duration) -> String {
    let total = duration.num_seconds().max(0);
    let (hours, minutes, seconds) = (total / 3600, (total % 3600) / 60, total % 60);

    match (hours, minutes) {
        (0, 0) => format!("{seconds}s"),
        (0, _) => format!("{minutes}m{seconds}s"),
        _ => format!("{hours}h{minutes}m{seconds}s"),
    }
}
