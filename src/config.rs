use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use tracing::trace;

use crate::ReporterKind;

/// Storage backend configuration
#[derive(Debug, Clone, PartialEq, serde::Deserialize)]
#[serde(tag = "backend", rename_all = "lowercase")]
pub enum StorageConfig {
    /// In-memory storage (no persistence)
    #[serde(rename = "none")]
    None,

    /// SQLite database
    Sqlite {
        /// Path to the SQLite database file
        #[serde(default = "default_sqlite_path")]
        path: PathBuf,
    },
}

impl Default for StorageConfig {
    fn default() -> Self {
        StorageConfig::None
    }
}

fn default_sqlite_path() -> PathBuf {
    PathBuf::from("./fleetwatch.db")
}

/// Settings for the HTTP/WebSocket surface
#[derive(Debug, Clone, PartialEq, serde::Deserialize)]
pub struct ApiSettings {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: SocketAddr,
    pub auth_token: Option<String>,
    #[serde(default = "default_enable_cors")]
    pub enable_cors: bool,
}

fn default_bind_addr() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 8080))
}

fn default_enable_cors() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, serde::Deserialize)]
pub struct Config {
    #[serde(default)]
    pub reporter_kind: ReporterKind,

    /// Static allow-list of reporter IDs
    #[serde(default)]
    pub known_reporters: Vec<String>,

    /// SQL LIKE patterns selecting the reporters the hub tracks
    #[serde(default)]
    pub reporter_patterns: Vec<String>,

    #[serde(default = "default_alert_threshold")]
    pub alert_threshold_secs: u64,

    #[serde(default = "default_cache_ttl")]
    pub cache_ttl_secs: u64,

    #[serde(default = "default_skip_interval")]
    pub evaluation_skip_interval_secs: u64,

    #[serde(default = "default_flush_interval")]
    pub write_buffer_flush_interval_secs: u64,

    #[serde(default = "default_monitor_interval")]
    pub monitor_interval_secs: u64,

    #[serde(default = "default_cleanup_interval")]
    pub cleanup_interval_secs: u64,

    #[serde(default = "default_evaluation_timeout")]
    pub evaluation_timeout_secs: u64,

    #[serde(default = "default_never_reported_delay")]
    pub never_reported_delay_secs: u64,

    #[serde(default = "default_registration_timeout")]
    pub registration_timeout_secs: u64,

    #[serde(default = "default_max_stream_chunks")]
    pub max_stream_chunks: usize,

    /// Storage configuration (optional - defaults to in-memory)
    #[serde(default)]
    pub storage: StorageConfig,

    pub api: Option<ApiSettings>,
}

fn default_alert_threshold() -> u64 {
    5 * 60
}

fn default_cache_ttl() -> u64 {
    30
}

fn default_skip_interval() -> u64 {
    5 * 60
}

fn default_flush_interval() -> u64 {
    5
}

fn default_monitor_interval() -> u64 {
    30
}

fn default_cleanup_interval() -> u64 {
    24 * 60 * 60
}

fn default_evaluation_timeout() -> u64 {
    30
}

fn default_never_reported_delay() -> u64 {
    30
}

fn default_registration_timeout() -> u64 {
    10
}

fn default_max_stream_chunks() -> usize {
    4096
}

impl Default for Config {
    fn default() -> Self {
        Self {
            reporter_kind: ReporterKind::default(),
            known_reporters: vec![],
            reporter_patterns: vec![],
            alert_threshold_secs: default_alert_threshold(),
            cache_ttl_secs: default_cache_ttl(),
            evaluation_skip_interval_secs: default_skip_interval(),
            write_buffer_flush_interval_secs: default_flush_interval(),
            monitor_interval_secs: default_monitor_interval(),
            cleanup_interval_secs: default_cleanup_interval(),
            evaluation_timeout_secs: default_evaluation_timeout(),
            never_reported_delay_secs: default_never_reported_delay(),
            registration_timeout_secs: default_registration_timeout(),
            max_stream_chunks: default_max_stream_chunks(),
            storage: StorageConfig::default(),
            api: None,
        }
    }
}

impl Config {
    pub fn alert_threshold(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.alert_threshold_secs as i64)
    }

    pub fn evaluation_skip_interval(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.evaluation_skip_interval_secs as i64)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    pub fn flush_interval(&self) -> Duration {
        Duration::from_secs(self.write_buffer_flush_interval_secs.max(1))
    }

    pub fn monitor_interval(&self) -> Duration {
        Duration::from_secs(self.monitor_interval_secs.max(1))
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs.max(1))
    }

    pub fn evaluation_timeout(&self) -> Duration {
        Duration::from_secs(self.evaluation_timeout_secs)
    }

    pub fn never_reported_delay(&self) -> Duration {
        Duration::from_secs(self.never_reported_delay_secs)
    }

    pub fn registration_timeout(&self) -> Duration {
        Duration::from_secs(self.registration_timeout_secs)
    }
}

pub fn read_config_file(path: &str) -> anyhow::Result<Config> {
    let file_content = std::fs::read_to_string(path)?;
    serde_json::from_str(&file_content)
        .map_err(|e| anyhow::anyhow!("Invalid configuration file provided: {e}"))
        .inspect(|config| trace!("loaded config: {config:?}"))
}
