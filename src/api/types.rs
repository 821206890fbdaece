//! API response types
//!
//! Shared by the handlers and by API clients (tests, dashboards), so the
//! wire format lives in one place.

use serde::{Deserialize, Serialize};

use crate::ReporterStatus;
use crate::actors::messages::{EvaluatorStats, WriterStats};
use crate::alerts::Alert;

// ============================================================================
// Status Enums
// ============================================================================

/// Liveness of a reporter as seen by the hub
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ReporterState {
    Online,
    Offline,
}

impl std::fmt::Display for ReporterState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl ReporterState {
    /// Get the string representation (lowercase)
    ///
    /// This matches the serde serialization format.
    pub fn as_str(&self) -> &'static str {
        match self {
            ReporterState::Online => "online",
            ReporterState::Offline => "offline",
        }
    }
}

// ============================================================================
// Domain Types
// ============================================================================

/// Returned by GET /api/v1/reporters and GET /api/v1/reporters/:id
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReporterInfo {
    pub id: String,

    pub state: ReporterState,

    /// First report (RFC 3339 timestamp)
    pub first_seen: String,

    /// Latest report (RFC 3339 timestamp)
    pub last_seen: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub host_ip: Option<String>,

    /// An offline alert is outstanding
    pub alert_sent: bool,

    /// Registered but never reported after its first contact
    pub never_reported: bool,
}

impl From<&ReporterStatus> for ReporterInfo {
    fn from(status: &ReporterStatus) -> Self {
        Self {
            id: status.id.clone(),
            state: if status.is_healthy {
                ReporterState::Online
            } else {
                ReporterState::Offline
            },
            first_seen: status.first_seen.to_rfc3339(),
            last_seen: status.last_seen.to_rfc3339(),
            host_ip: status.host_ip.clone(),
            alert_sent: status.alert_sent,
            never_reported: status.first_seen == status.last_seen,
        }
    }
}

// ============================================================================
// API Response Types
// ============================================================================

/// Response for GET /api/v1/reporters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportersResponse {
    pub reporters: Vec<ReporterInfo>,
    pub count: usize,
    pub offline: usize,
}

/// Response for GET /api/v1/alerts
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertsResponse {
    pub alerts: Vec<Alert>,
    pub count: usize,
}

/// Response for GET /api/v1/health
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    /// "ok" or "degraded"
    pub status: String,
    pub timestamp: String,
    pub storage: StorageHealth,
    pub reporters: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub writer: Option<WriterStats>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub evaluator: Option<EvaluatorStats>,
}

/// Storage subset of the health response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageHealth {
    pub healthy: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}
