//! Status store trait definition
//!
//! This module defines the `StatusStore` trait through which the hub reads
//! and writes durable reporter status.

use std::collections::HashMap;

use async_trait::async_trait;

use super::error::StorageResult;
use crate::ReporterStatus;

/// Health status of the storage backend
#[derive(Debug, Clone)]
pub struct HealthStatus {
    /// Is the backend operational?
    pub healthy: bool,

    /// Human-readable status message
    pub message: String,

    /// Additional backend-specific metadata
    pub metadata: HashMap<String, String>,
}

/// Durable storage for reporter status.
///
/// Only the persisted fields of [`ReporterStatus`] are stored; the
/// cache-only bookkeeping is always returned reset.
///
/// ## Patterns
///
/// `patterns` are SQL `LIKE` patterns. An empty slice selects every
/// reporter.
///
/// ## Thread Safety
///
/// Implementations must be `Send + Sync` as they are shared between the
/// ingestion path, the evaluator and the write-back flusher.
#[async_trait]
pub trait StatusStore: Send + Sync {
    /// Fetch one reporter, or [`StorageError::NotFound`](super::StorageError::NotFound).
    async fn get(&self, reporter_id: &str) -> StorageResult<ReporterStatus>;

    /// Insert or update a reporter's status.
    ///
    /// An existing `first_seen` is never moved forward.
    async fn put(&self, status: &ReporterStatus) -> StorageResult<()>;

    /// All reporters whose ID matches one of `patterns`.
    async fn list_matching(&self, patterns: &[String]) -> StorageResult<Vec<ReporterStatus>>;

    /// IDs of matching reporters that were registered but never sent a
    /// report after their first contact.
    async fn list_never_reported(&self, patterns: &[String]) -> StorageResult<Vec<String>>;

    /// Remove a reporter; deleting an unknown ID is not an error.
    async fn delete(&self, reporter_id: &str) -> StorageResult<()>;

    /// Check backend health
    async fn health_check(&self) -> StorageResult<HealthStatus>;

    /// Close the backend gracefully
    async fn close(&self) -> StorageResult<()> {
        Ok(())
    }
}
