//! In-memory status store (no persistence)
//!
//! Used when no storage backend is configured and in tests.
//!
//! ## Limitations
//!
//! - **No persistence**: All data lost on restart

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::debug;

use super::backend::{HealthStatus, StatusStore};
use super::error::{StorageError, StorageResult};
use crate::ReporterStatus;
use crate::registry::{compile_patterns, matches_any};

#[derive(Debug, Default)]
pub struct MemoryStatusStore {
    statuses: RwLock<HashMap<String, ReporterStatus>>,
}

impl MemoryStatusStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.statuses.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.statuses.read().await.is_empty()
    }
}

#[async_trait]
impl StatusStore for MemoryStatusStore {
    async fn get(&self, reporter_id: &str) -> StorageResult<ReporterStatus> {
        self.statuses
            .read()
            .await
            .get(reporter_id)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(reporter_id.to_string()))
    }

    async fn put(&self, status: &ReporterStatus) -> StorageResult<()> {
        let mut statuses = self.statuses.write().await;
        let mut row = status.persisted();

        if let Some(existing) = statuses.get(&status.id) {
            row.first_seen = existing.first_seen.min(row.first_seen);
            if row.host_ip.is_none() {
                row.host_ip = existing.host_ip.clone();
            }
        }

        statuses.insert(row.id.clone(), row);
        Ok(())
    }

    async fn list_matching(&self, patterns: &[String]) -> StorageResult<Vec<ReporterStatus>> {
        let compiled = compile_patterns(patterns)?;
        let statuses = self.statuses.read().await;

        let mut matching: Vec<ReporterStatus> = statuses
            .values()
            .filter(|status| matches_any(&compiled, &status.id))
            .cloned()
            .collect();
        matching.sort_by(|a, b| a.id.cmp(&b.id));

        debug!("in-memory store: {} reporters match", matching.len());
        Ok(matching)
    }

    async fn list_never_reported(&self, patterns: &[String]) -> StorageResult<Vec<String>> {
        let compiled = compile_patterns(patterns)?;
        let statuses = self.statuses.read().await;

        let mut ids: Vec<String> = statuses
            .values()
            .filter(|status| matches_any(&compiled, &status.id))
            .filter(|status| status.first_seen == status.last_seen)
            .map(|status| status.id.clone())
            .collect();
        ids.sort();

        Ok(ids)
    }

    async fn delete(&self, reporter_id: &str) -> StorageResult<()> {
        self.statuses.write().await.remove(reporter_id);
        Ok(())
    }

    async fn health_check(&self) -> StorageResult<HealthStatus> {
        Ok(HealthStatus {
            healthy: true,
            message: "In-memory storage operational".to_string(),
            metadata: HashMap::from([
                ("backend".to_string(), "memory".to_string()),
                ("reporters".to_string(), self.len().await.to_string()),
            ]),
        })
    }
}
