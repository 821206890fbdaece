pub mod actors;
pub mod alerts;
pub mod api;
pub mod buffer;
pub mod cache;
pub mod config;
pub mod events;
pub mod hub;
pub mod ingest;
pub mod monitors;
pub mod registry;
pub mod storage;
pub mod util;

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The kind of entity that pushes reports into the hub.
///
/// Both kinds run through the same liveness state machine; the kind only
/// changes how reporters are named in alerts and events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReporterKind {
    #[default]
    Gateway,
    Poller,
}

impl fmt::Display for ReporterKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReporterKind::Gateway => write!(f, "Gateway"),
            ReporterKind::Poller => write!(f, "Poller"),
        }
    }
}

/// Liveness state of one reporter.
///
/// `last_evaluated` and `alert_sent` only live in the status cache and are
/// never written to a [`storage::StatusStore`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReporterStatus {
    pub id: String,
    pub is_healthy: bool,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host_ip: Option<String>,

    #[serde(skip)]
    pub last_evaluated: Option<DateTime<Utc>>,
    #[serde(skip)]
    pub alert_sent: bool,
}

impl ReporterStatus {
    /// Status for a reporter that has never been seen before.
    pub fn first_contact(id: impl Into<String>, at: DateTime<Utc>, host_ip: Option<String>) -> Self {
        Self {
            id: id.into(),
            is_healthy: true,
            first_seen: at,
            last_seen: at,
            host_ip,
            last_evaluated: None,
            alert_sent: false,
        }
    }

    /// Copy of this status with the cache-only bookkeeping reset, as it
    /// would be read back from storage.
    pub fn persisted(&self) -> Self {
        Self {
            last_evaluated: None,
            alert_sent: false,
            ..self.clone()
        }
    }
}

/// One service observed by a reporter.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ServiceObservation {
    pub name: String,
    #[serde(rename = "type")]
    pub service_type: String,
    pub available: bool,
    #[serde(default)]
    pub response_time_ms: u64,
    #[serde(default, with = "payload")]
    pub message: Vec<u8>,
    #[serde(default)]
    pub agent_id: String,
}

/// A complete status report from one reporter.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Report {
    pub reporter_id: String,
    /// Unix seconds; `0` means "use the time of receipt".
    #[serde(default)]
    pub timestamp: i64,
    #[serde(default)]
    pub partition: String,
    #[serde(default)]
    pub source_address: String,
    #[serde(default)]
    pub agent_id: String,
    #[serde(default)]
    pub services: Vec<ServiceObservation>,
}

impl Report {
    /// Report time, falling back to `now` for a missing or out of range timestamp.
    pub fn reported_at(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        if self.timestamp <= 0 {
            return now;
        }

        DateTime::from_timestamp(self.timestamp, 0).unwrap_or(now)
    }

    /// The agent this report came from: the report's own agent ID, or the
    /// first non-empty one among its services.
    pub fn agent_id(&self) -> Option<&str> {
        if !self.agent_id.is_empty() {
            return Some(&self.agent_id);
        }

        self.services
            .iter()
            .map(|service| service.agent_id.as_str())
            .find(|id| !id.is_empty())
    }

    pub fn payload_bytes(&self) -> usize {
        self.services.iter().map(|s| s.message.len()).sum()
    }
}

/// One fragment of a streamed report.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ReportChunk {
    #[serde(default)]
    pub reporter_id: String,
    #[serde(default)]
    pub timestamp: i64,
    #[serde(default)]
    pub partition: String,
    #[serde(default)]
    pub source_address: String,
    #[serde(default)]
    pub agent_id: String,
    #[serde(default)]
    pub services: Vec<ServiceObservation>,
    #[serde(default)]
    pub chunk_index: u32,
    #[serde(default)]
    pub total_chunks: u32,
    #[serde(default)]
    pub is_final: bool,
}

/// Acknowledgement returned to a reporter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportAck {
    pub received: bool,
}

/// Service payloads travel as text on the wire and as raw bytes in memory.
///
/// Bytes that are not valid UTF-8 are replaced with U+FFFD when serialized,
/// so a payload fragment must not end inside a multi-byte character.
mod payload {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&String::from_utf8_lossy(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        String::deserialize(deserializer).map(String::into_bytes)
    }
}
