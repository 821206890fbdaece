//! Durable reporter status
//!
//! This module provides a trait-based abstraction for persisting reporter
//! liveness state.
//!
//! ## Backends
//!
//! - **SQLite** (feature `storage-sqlite`): Embedded database
//! - **In-Memory** (fallback): No persistence, for testing or single-run hubs
//!
//! ## Usage
//!
//! ```no_run
//! use fleetwatch::storage::{StatusStore, sqlite::SqliteStatusStore};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let store = SqliteStatusStore::new("./fleetwatch.db").await?;
//!     let reporters = store.list_matching(&[]).await?;
//!     println!("{} reporters", reporters.len());
//!     Ok(())
//! }
//! ```

pub mod backend;
pub mod error;
pub mod memory;
#[cfg(feature = "storage-sqlite")]
pub mod sqlite;

use std::sync::Arc;

use tracing::info;

pub use backend::{HealthStatus, StatusStore};
pub use error::{StorageError, StorageResult};
pub use memory::MemoryStatusStore;

use crate::config::StorageConfig;

/// Open the store selected by `config`.
pub async fn open(config: &StorageConfig) -> StorageResult<Arc<dyn StatusStore>> {
    match config {
        StorageConfig::None => {
            info!("using in-memory status store (no persistence)");
            Ok(Arc::new(MemoryStatusStore::new()))
        }
        #[cfg(feature = "storage-sqlite")]
        StorageConfig::Sqlite { path } => {
            let store = sqlite::SqliteStatusStore::new(path).await?;
            Ok(Arc::new(store))
        }
        #[cfg(not(feature = "storage-sqlite"))]
        StorageConfig::Sqlite { .. } => Err(StorageError::InvalidConfig(
            "built without the storage-sqlite feature".to_string(),
        )),
    }
}
