//! Integration tests for report ingestion
//!
//! These tests verify that:
//! - Unknown reporters are acknowledged without touching storage
//! - Registry side effects run detached and only with full location data
//! - Only the reporter's own first-contact write failure is surfaced
//! - Sink failures never fail a report

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::{Duration, Instant};

use assert_matches::assert_matches;
use fleetwatch::ReporterStatus;
use fleetwatch::ingest::IngestError;
use fleetwatch::storage::StatusStore;
use pretty_assertions::assert_eq;

use crate::helpers::*;

#[tokio::test]
async fn test_unknown_reporter_never_written() {
    let core = TestCoreBuilder::new(&["r1"]).build();

    let ack = core
        .ingestor
        .process_report(report("intruder", at(0)), at(0))
        .await
        .unwrap();

    assert!(ack.received);
    assert_eq!(core.store.puts(), 0);
    assert!(core.buffer.is_empty().await);
    assert!(core.alerts.alerts().await.is_empty());
    assert!(core.events.kinds().await.is_empty());
}

#[tokio::test]
async fn test_pattern_allow_list() {
    let core = TestCoreBuilder::new(&[]).patterns(&["edge-%"]).build();

    core.ingestor
        .process_report(report("edge-01", at(0)), at(0))
        .await
        .unwrap();
    core.ingestor
        .process_report(report("core-01", at(0)), at(0))
        .await
        .unwrap();

    assert!(core.cache.lookup("edge-01").await.is_some());
    assert!(core.cache.lookup("core-01").await.is_none());
}

#[tokio::test]
async fn test_first_seen_never_after_last_seen() {
    let core = TestCoreBuilder::new(&["r1"]).build();

    for (ts, received) in [(100, 100), (50, 101), (0, 102), (400, 103), (10, 104)] {
        let mut r = report("r1", at(ts));
        if ts == 0 {
            r.timestamp = 0;
        }
        core.ingestor.process_report(r, at(received)).await.unwrap();

        let cached = core.cache.lookup("r1").await.unwrap();
        assert!(cached.first_seen <= cached.last_seen);
    }

    // fixed at first contact, older reports clamp last_seen instead
    let cached = core.cache.lookup("r1").await.unwrap();
    assert_eq!(cached.first_seen, at(100));
    assert_eq!(cached.last_seen, at(100));

    core.buffer.flush(core.store.as_ref()).await;
    let stored = core.store.get("r1").await.unwrap();
    assert!(stored.first_seen <= stored.last_seen);
}

#[tokio::test]
async fn test_registry_known_reporter_is_registered() {
    let registry = Arc::new(RecordingRegistry::with_known(&["dyn-1"]));
    let core = TestCoreBuilder::new(&[]).registry(registry.clone()).build();

    core.ingestor
        .process_report(report("dyn-1", at(0)), at(0))
        .await
        .unwrap();
    core.ingestor
        .process_report(report("dyn-1", at(30)), at(30))
        .await
        .unwrap();

    assert!(eventually(|| async { registry.heartbeats().await.len() == 2 }).await);
    assert!(eventually(|| async { registry.registrations().await.len() == 1 }).await);

    let registration = &registry.registrations().await[0];
    assert_eq!(registration.reporter_id, "dyn-1");
    assert_eq!(registration.agent_id.as_deref(), Some("agent-1"));
    assert_eq!(registration.partition, "default");
    assert_eq!(registration.source_ip, "192.168.1.20");
}

#[tokio::test]
async fn test_missing_location_skips_registry() {
    let registry = Arc::new(RecordingRegistry::default());
    let core = TestCoreBuilder::new(&["r1"]).registry(registry.clone()).build();

    let mut r = report("r1", at(0));
    r.partition.clear();
    core.ingestor.process_report(r, at(0)).await.unwrap();

    let mut r = report("r1", at(10));
    r.source_address = "not-an-address".to_string();
    core.ingestor.process_report(r, at(10)).await.unwrap();

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(registry.heartbeats().await.is_empty());
    assert!(registry.registrations().await.is_empty());

    // the reports themselves were still accepted
    assert_eq!(core.cache.lookup("r1").await.unwrap().last_seen, at(10));
}

#[tokio::test]
async fn test_slow_registry_does_not_delay_ack() {
    let registry = Arc::new(RecordingRegistry::default());
    registry.delay_ms.store(2_000, Ordering::SeqCst);
    let core = TestCoreBuilder::new(&["r1"])
        .registry(registry.clone())
        .registration_timeout(Duration::from_millis(100))
        .build();

    let started = Instant::now();
    core.ingestor
        .process_report(report("r1", at(0)), at(0))
        .await
        .unwrap();
    assert!(started.elapsed() < Duration::from_millis(500));

    // the detached call is cut off by its own timeout
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(registry.heartbeats().await.is_empty());
}

#[tokio::test]
async fn test_first_contact_write_failure_is_surfaced() {
    let core = TestCoreBuilder::new(&["r1"]).build();
    core.store.set_fail_puts(true);

    let result = core
        .ingestor
        .process_report(report("r1", at(0)), at(0))
        .await;

    assert_matches!(result, Err(IngestError::Storage(_)));
    assert!(core.cache.lookup("r1").await.is_none());
}

#[tokio::test]
async fn test_later_write_failure_is_retried_not_surfaced() {
    let core = TestCoreBuilder::new(&["r1"]).build();
    core.ingestor
        .process_report(report("r1", at(0)), at(0))
        .await
        .unwrap();

    core.store.set_fail_puts(true);
    core.ingestor
        .process_report(report("r1", at(30)), at(30))
        .await
        .unwrap();

    let outcome = core.buffer.flush(core.store.as_ref()).await;
    assert_eq!(outcome.failed, 1);
    assert_eq!(core.buffer.len().await, 1);

    core.store.set_fail_puts(false);
    let outcome = core.buffer.flush(core.store.as_ref()).await;
    assert_eq!(outcome.persisted, 1);
    assert_eq!(core.store.get("r1").await.unwrap().last_seen, at(30));
}

#[tokio::test]
async fn test_store_read_failure_is_surfaced() {
    let core = TestCoreBuilder::new(&["r1"]).build();
    core.store.set_fail_reads(true);

    let result = core
        .ingestor
        .process_report(report("r1", at(0)), at(0))
        .await;

    assert_matches!(result, Err(IngestError::Storage(_)));
    assert_eq!(core.store.puts(), 0);
}

#[tokio::test]
async fn test_event_sink_failure_is_not_fatal() {
    let core = TestCoreBuilder::new(&["r1"]).build();
    core.events.fail.store(true, Ordering::SeqCst);

    let ack = core
        .ingestor
        .process_report(report("r1", at(0)), at(0))
        .await
        .unwrap();

    assert!(ack.received);
    assert!(core.store.get("r1").await.is_ok());
}

#[tokio::test]
async fn test_first_seen_event_carries_location() {
    let core = TestCoreBuilder::new(&["r1"]).build();
    core.ingestor
        .process_report(report("r1", at(0)), at(0))
        .await
        .unwrap();

    let events = core.events.events().await;
    assert_eq!(events.len(), 1);

    let (kind, event) = &events[0];
    assert_eq!(*kind, "first_seen");
    assert_eq!(event.reporter_id, "r1");
    assert_eq!(event.source_ip.as_deref(), Some("192.168.1.20"));
    assert_eq!(event.partition.as_deref(), Some("default"));
}

#[tokio::test]
async fn test_recovery_of_stored_offline_reporter_after_restart() {
    let store = Arc::new(CountingStore::new());
    store
        .seed(ReporterStatus {
            is_healthy: false,
            ..ReporterStatus::first_contact("r1", at(0), Some("10.0.0.9".to_string()))
        })
        .await;
    let core = TestCoreBuilder::new(&["r1"]).store(store).build();

    core.ingestor
        .process_report(report("r1", at(900)), at(900))
        .await
        .unwrap();

    assert_eq!(core.alerts.titles().await, vec!["Gateway Recovered".to_string()]);
    assert_eq!(core.events.kinds().await, vec!["recovery"]);

    let cached = core.cache.lookup("r1").await.unwrap();
    assert_eq!(cached.first_seen, at(0));
    assert_eq!(cached.host_ip.as_deref(), Some("192.168.1.20"));
}
