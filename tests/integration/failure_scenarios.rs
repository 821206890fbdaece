//! Failure and housekeeping tests for the background actors
//!
//! These tests verify that the system handles failures gracefully:
//! - A failing store fails one pass, not the evaluator
//! - The writer keeps failed updates and flushes on shutdown
//! - The never-reported sweep and allow-list cleanup

use std::sync::Arc;
use std::time::Duration;

use fleetwatch::ReporterStatus;
use fleetwatch::actors::evaluator::EvaluatorHandle;
use fleetwatch::actors::writer::WriterHandle;
use fleetwatch::alerts::AlertLevel;
use fleetwatch::storage::StatusStore;
use pretty_assertions::assert_eq;

use crate::helpers::*;

#[tokio::test]
async fn test_failed_refresh_fails_only_that_pass() {
    let core = TestCoreBuilder::new(&["r1"]).build();
    core.store.set_fail_reads(true);

    assert!(core.evaluator.evaluate_all(at(0)).await.is_err());

    core.store.set_fail_reads(false);
    let summary = core.evaluator.evaluate_all(at(0)).await.unwrap();
    assert_eq!(summary.failed, 0);
}

#[tokio::test]
async fn test_evaluator_actor_survives_failed_pass() {
    let core = TestCoreBuilder::new(&["r1"]).build();
    core.store.set_fail_reads(true);

    let TestCore {
        store, evaluator, ..
    } = core;
    let handle = EvaluatorHandle::spawn(Arc::new(evaluator));

    assert!(handle.evaluate_now(Some(at(0))).await.is_err());

    store.set_fail_reads(false);
    assert!(handle.evaluate_now(Some(at(0))).await.is_ok());

    let stats = handle.get_stats().await.unwrap();
    assert!(stats.failed_passes >= 1);

    handle.shutdown().await;
}

#[tokio::test]
async fn test_writer_retries_and_flushes_on_shutdown() {
    let core = TestCoreBuilder::new(&["r1"]).build();
    core.ingestor
        .process_report(report("r1", at(0)), at(0))
        .await
        .unwrap();

    let writer = WriterHandle::spawn(
        core.buffer.clone(),
        core.store.clone(),
        Duration::from_secs(3600),
    );

    core.store.set_fail_puts(true);
    core.ingestor
        .process_report(report("r1", at(60)), at(60))
        .await
        .unwrap();

    let outcome = writer.flush().await.unwrap();
    assert_eq!(outcome.failed, 1);

    core.store.set_fail_puts(false);
    writer.shutdown().await;

    assert!(core.buffer.is_empty().await);
    assert_eq!(core.store.get("r1").await.unwrap().last_seen, at(60));
}

#[tokio::test]
async fn test_never_reported_sweep_raises_one_alert() {
    let store = Arc::new(CountingStore::new());
    // registered once through a pattern, never reported again
    store
        .seed(ReporterStatus::first_contact("edge-2", at(0), None))
        .await;
    // reported after first contact
    store
        .seed(ReporterStatus {
            last_seen: at(60),
            ..ReporterStatus::first_contact("edge-3", at(0), None)
        })
        .await;

    let core = TestCoreBuilder::new(&["static-1"])
        .patterns(&["edge-%"])
        .store(store)
        .build();

    let never = core.evaluator.check_never_reported(at(120)).await.unwrap();
    assert_eq!(never, vec!["edge-2".to_string(), "static-1".to_string()]);

    let alerts = core.alerts.alerts().await;
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].level, AlertLevel::Warning);
    assert_eq!(alerts[0].title, "Gateways Never Reported");
    assert_eq!(alerts[0].subject_id, "core");
    assert_eq!(alerts[0].details["reporter_count"], 2);
}

#[tokio::test]
async fn test_cleanup_removes_reporters_no_longer_allowed() {
    let store = Arc::new(CountingStore::new());
    for id in ["keep", "drop-1", "drop-2"] {
        store
            .seed(ReporterStatus::first_contact(id, at(0), None))
            .await;
    }

    let core = TestCoreBuilder::new(&["keep"]).store(store.clone()).build();
    core.cache.get(true).await.unwrap();
    assert_eq!(core.cache.len().await, 3);

    let removed = core.evaluator.cleanup_unknown().await.unwrap();

    assert_eq!(removed, 2);
    assert_eq!(core.cache.len().await, 1);
    assert!(store.get("keep").await.is_ok());
    assert!(store.get("drop-1").await.is_err());
}

#[tokio::test]
async fn test_cleanup_skipped_without_allow_list() {
    let store = Arc::new(CountingStore::new());
    store
        .seed(ReporterStatus::first_contact("anyone", at(0), None))
        .await;

    let registry = Arc::new(RecordingRegistry::default());
    let core = TestCoreBuilder::new(&[])
        .registry(registry)
        .store(store.clone())
        .build();

    assert_eq!(core.evaluator.cleanup_unknown().await.unwrap(), 0);
    assert!(store.get("anyone").await.is_ok());
}
