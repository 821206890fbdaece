//! Integration tests for storage persistence
//!
//! These tests verify that:
//! - Reporter status survives a hub restart on SQLite
//! - Offline state is restored into the cache and recovers on the next report
//! - Pattern filtering and never-reported queries agree with the memory store

use std::sync::Arc;
use std::time::Duration;

use fleetwatch::config::{Config, StorageConfig};
use fleetwatch::hub::{Collaborators, Hub};
use fleetwatch::storage::{self, MemoryStatusStore, StatusStore, sqlite::SqliteStatusStore};
use fleetwatch::{Report, ReporterStatus};
use pretty_assertions::assert_eq;
use tempfile::tempdir;

use crate::helpers::*;

fn hub_config(path: std::path::PathBuf) -> Config {
    Config {
        known_reporters: vec!["r1".to_string()],
        storage: StorageConfig::Sqlite { path },
        ..Config::default()
    }
}

#[tokio::test]
async fn test_status_survives_restart() {
    let temp_dir = tempdir().unwrap();
    let config = hub_config(temp_dir.path().join("status.db"));

    {
        let store = storage::open(&config.storage).await.unwrap();
        let hub = Hub::start(&config, store, Collaborators::default()).unwrap();

        hub.ingestor
            .report_status(Report {
                reporter_id: "r1".to_string(),
                source_address: "10.2.0.1".to_string(),
                ..Default::default()
            })
            .await
            .unwrap();

        hub.shutdown().await;
    }

    let store = storage::open(&config.storage).await.unwrap();
    let status = store.get("r1").await.unwrap();
    assert!(status.is_healthy);
    assert_eq!(status.host_ip.as_deref(), Some("10.2.0.1"));
    assert!(!status.alert_sent);
    store.close().await.unwrap();
}

#[tokio::test]
async fn test_offline_state_restored_and_recovered() {
    let temp_dir = tempdir().unwrap();
    let config = hub_config(temp_dir.path().join("status.db"));

    let seed = SqliteStatusStore::new(temp_dir.path().join("status.db"))
        .await
        .unwrap();
    seed.put(&ReporterStatus {
        is_healthy: false,
        ..ReporterStatus::first_contact("r1", at(0), None)
    })
    .await
    .unwrap();
    seed.close().await.unwrap();

    let store = storage::open(&config.storage).await.unwrap();
    let hub = Hub::start(&config, store, Collaborators::default()).unwrap();

    let snapshot = hub.cache.get(true).await.unwrap();
    assert!(!snapshot["r1"].is_healthy);

    hub.ingestor
        .report_status(Report {
            reporter_id: "r1".to_string(),
            ..Default::default()
        })
        .await
        .unwrap();

    let alerts = hub.alert_log.recent().await;
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].title, "Gateway Recovered");

    hub.shutdown().await;

    // the writer flushed the recovery before stopping
    let reopened = SqliteStatusStore::new(temp_dir.path().join("status.db"))
        .await
        .unwrap();
    assert!(reopened.get("r1").await.unwrap().is_healthy);
}

#[tokio::test]
async fn test_sqlite_and_memory_agree() {
    let temp_dir = tempdir().unwrap();
    let sqlite: Arc<dyn StatusStore> = Arc::new(
        SqliteStatusStore::new(temp_dir.path().join("agree.db"))
            .await
            .unwrap(),
    );
    let memory: Arc<dyn StatusStore> = Arc::new(MemoryStatusStore::new());

    let rows = vec![
        ReporterStatus::first_contact("edge-1", at(0), None),
        ReporterStatus {
            last_seen: at(30),
            ..ReporterStatus::first_contact("edge-2", at(0), Some("10.0.0.2".to_string()))
        },
        ReporterStatus::first_contact("core_1", at(0), None),
        ReporterStatus::first_contact("coreX1", at(5), None),
    ];

    for store in [&sqlite, &memory] {
        for row in &rows {
            store.put(row).await.unwrap();
        }
    }

    for patterns in [vec![], vec!["edge-%".to_string()], vec!["core_1".to_string()]] {
        let mut from_sqlite: Vec<String> = sqlite
            .list_matching(&patterns)
            .await
            .unwrap()
            .into_iter()
            .map(|s| s.id)
            .collect();
        let mut from_memory: Vec<String> = memory
            .list_matching(&patterns)
            .await
            .unwrap()
            .into_iter()
            .map(|s| s.id)
            .collect();
        from_sqlite.sort();
        from_memory.sort();
        assert_eq!(from_sqlite, from_memory, "patterns {patterns:?}");

        assert_eq!(
            sqlite.list_never_reported(&patterns).await.unwrap(),
            memory.list_never_reported(&patterns).await.unwrap(),
            "patterns {patterns:?}"
        );
    }
}

#[tokio::test]
async fn test_periodic_flush_reaches_sqlite() {
    let temp_dir = tempdir().unwrap();
    let mut config = hub_config(temp_dir.path().join("status.db"));
    config.write_buffer_flush_interval_secs = 1;

    let store = storage::open(&config.storage).await.unwrap();
    let hub = Hub::start(&config, store.clone(), Collaborators::default()).unwrap();

    let first = at(0);
    hub.ingestor
        .process_report(report("r1", first), first)
        .await
        .unwrap();
    let later = at(120);
    hub.ingestor
        .process_report(report("r1", later), later)
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(1_500)).await;
    assert_eq!(store.get("r1").await.unwrap().last_seen, later);

    hub.shutdown().await;
}
