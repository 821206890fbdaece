//! Helper functions and test doubles for integration tests

#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fleetwatch::{
    Report, ReporterKind, ReporterStatus, ServiceObservation,
    actors::evaluator::{EvaluatorSettings, HealthEvaluator},
    alerts::{Alert, AlertError, AlertLevel, AlertManager, AlertSink},
    buffer::PendingWriteBuffer,
    cache::StatusCache,
    events::{EventPublisher, EventSink, LifecycleEvent, StatusEvent},
    ingest::{IngestSettings, Ingestor},
    registry::{AllowList, Registry, ReporterContact},
    storage::{HealthStatus, MemoryStatusStore, StatusStore, StorageError, StorageResult},
};
use tokio::sync::{Mutex, broadcast};

pub const THRESHOLD_SECS: i64 = 300;

/// A fixed point in time `secs` seconds after the test epoch.
pub fn at(secs: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(1_700_000_000 + secs, 0).unwrap()
}

pub fn report(reporter_id: &str, when: DateTime<Utc>) -> Report {
    Report {
        reporter_id: reporter_id.to_string(),
        timestamp: when.timestamp(),
        partition: "default".to_string(),
        source_address: "192.168.1.20:50051".to_string(),
        agent_id: "agent-1".to_string(),
        services: vec![ServiceObservation {
            name: "icmp".to_string(),
            service_type: "icmp".to_string(),
            available: true,
            response_time_ms: 3,
            message: b"ok".to_vec(),
            agent_id: String::new(),
        }],
    }
}

// ============================================================================
// StatusStore double
// ============================================================================

/// In-memory store that counts calls and can be told to fail.
#[derive(Default)]
pub struct CountingStore {
    inner: MemoryStatusStore,
    pub gets: AtomicUsize,
    pub puts: AtomicUsize,
    pub lists: AtomicUsize,
    pub fail_puts: AtomicBool,
    pub fail_reads: AtomicBool,
    /// Artificial latency for list queries, in milliseconds
    pub list_delay_ms: AtomicUsize,
}

impl CountingStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn puts(&self) -> usize {
        self.puts.load(Ordering::SeqCst)
    }

    pub fn lists(&self) -> usize {
        self.lists.load(Ordering::SeqCst)
    }

    pub fn set_fail_puts(&self, fail: bool) {
        self.fail_puts.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    /// Seed a row without counting it as a put.
    pub async fn seed(&self, status: ReporterStatus) {
        self.inner.put(&status).await.unwrap();
    }

    fn check_reads(&self) -> StorageResult<()> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(StorageError::QueryFailed("injected read failure".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl StatusStore for CountingStore {
    async fn get(&self, reporter_id: &str) -> StorageResult<ReporterStatus> {
        self.gets.fetch_add(1, Ordering::SeqCst);
        self.check_reads()?;
        self.inner.get(reporter_id).await
    }

    async fn put(&self, status: &ReporterStatus) -> StorageResult<()> {
        self.puts.fetch_add(1, Ordering::SeqCst);
        if self.fail_puts.load(Ordering::SeqCst) {
            return Err(StorageError::QueryFailed("injected write failure".to_string()));
        }
        self.inner.put(status).await
    }

    async fn list_matching(&self, patterns: &[String]) -> StorageResult<Vec<ReporterStatus>> {
        self.lists.fetch_add(1, Ordering::SeqCst);
        let delay = self.list_delay_ms.load(Ordering::SeqCst) as u64;
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        self.check_reads()?;
        self.inner.list_matching(patterns).await
    }

    async fn list_never_reported(&self, patterns: &[String]) -> StorageResult<Vec<String>> {
        self.check_reads()?;
        self.inner.list_never_reported(patterns).await
    }

    async fn delete(&self, reporter_id: &str) -> StorageResult<()> {
        self.inner.delete(reporter_id).await
    }

    async fn health_check(&self) -> StorageResult<HealthStatus> {
        self.inner.health_check().await
    }
}

// ============================================================================
// Sink doubles
// ============================================================================

#[derive(Default)]
pub struct RecordingAlertSink {
    alerts: Mutex<Vec<Alert>>,
    /// Answer every send with a cooldown instead of recording it
    pub cooldown: AtomicBool,
    /// Hold offline alerts back this long before recording them
    pub offline_delay_ms: AtomicU64,
}

impl RecordingAlertSink {
    pub async fn alerts(&self) -> Vec<Alert> {
        self.alerts.lock().await.clone()
    }

    pub async fn titles(&self) -> Vec<String> {
        self.alerts.lock().await.iter().map(|a| a.title.clone()).collect()
    }
}

#[async_trait]
impl AlertSink for RecordingAlertSink {
    async fn send(&self, alert: &Alert) -> Result<(), AlertError> {
        if self.cooldown.load(Ordering::SeqCst) {
            return Err(AlertError::Cooldown);
        }
        let delay = self.offline_delay_ms.load(Ordering::SeqCst);
        if delay > 0 && alert.level == AlertLevel::Error {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        self.alerts.lock().await.push(alert.clone());
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingEventSink {
    events: Mutex<Vec<(&'static str, LifecycleEvent)>>,
    pub fail: AtomicBool,
}

impl RecordingEventSink {
    pub async fn kinds(&self) -> Vec<&'static str> {
        self.events.lock().await.iter().map(|(kind, _)| *kind).collect()
    }

    pub async fn events(&self) -> Vec<(&'static str, LifecycleEvent)> {
        self.events.lock().await.clone()
    }

    async fn record(&self, kind: &'static str, event: &LifecycleEvent) -> anyhow::Result<()> {
        if self.fail.load(Ordering::SeqCst) {
            anyhow::bail!("event bus unavailable");
        }
        self.events.lock().await.push((kind, event.clone()));
        Ok(())
    }
}

#[async_trait]
impl EventSink for RecordingEventSink {
    async fn publish_offline(&self, event: &LifecycleEvent) -> anyhow::Result<()> {
        self.record("offline", event).await
    }

    async fn publish_recovery(&self, event: &LifecycleEvent) -> anyhow::Result<()> {
        self.record("recovery", event).await
    }

    async fn publish_first_seen(&self, event: &LifecycleEvent) -> anyhow::Result<()> {
        self.record("first_seen", event).await
    }
}

// ============================================================================
// Registry double
// ============================================================================

#[derive(Default)]
pub struct RecordingRegistry {
    known: HashSet<String>,
    heartbeats: Mutex<Vec<ReporterContact>>,
    registrations: Mutex<Vec<ReporterContact>>,
    /// Artificial latency for heartbeat/register calls, in milliseconds
    pub delay_ms: AtomicUsize,
}

impl RecordingRegistry {
    pub fn with_known(ids: &[&str]) -> Self {
        Self {
            known: ids.iter().map(|id| id.to_string()).collect(),
            ..Default::default()
        }
    }

    pub async fn heartbeats(&self) -> Vec<ReporterContact> {
        self.heartbeats.lock().await.clone()
    }

    pub async fn registrations(&self) -> Vec<ReporterContact> {
        self.registrations.lock().await.clone()
    }

    async fn delay(&self) {
        let delay = self.delay_ms.load(Ordering::SeqCst) as u64;
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
    }
}

#[async_trait]
impl Registry for RecordingRegistry {
    async fn is_known(&self, reporter_id: &str) -> bool {
        self.known.contains(reporter_id)
    }

    async fn record_heartbeat(&self, contact: &ReporterContact) -> anyhow::Result<()> {
        self.delay().await;
        self.heartbeats.lock().await.push(contact.clone());
        Ok(())
    }

    async fn register(&self, contact: &ReporterContact) -> anyhow::Result<()> {
        self.delay().await;
        self.registrations.lock().await.push(contact.clone());
        Ok(())
    }
}

// ============================================================================
// Assembled core without background actors
// ============================================================================

pub struct TestCore {
    pub store: Arc<CountingStore>,
    pub cache: Arc<StatusCache>,
    pub buffer: Arc<PendingWriteBuffer>,
    pub alerts: Arc<RecordingAlertSink>,
    pub events: Arc<RecordingEventSink>,
    pub registry: Option<Arc<RecordingRegistry>>,
    pub status_tx: broadcast::Sender<StatusEvent>,
    pub ingestor: Ingestor,
    pub evaluator: HealthEvaluator,
}

pub struct TestCoreBuilder {
    known: Vec<String>,
    patterns: Vec<String>,
    registry: Option<Arc<RecordingRegistry>>,
    store: Arc<CountingStore>,
    settings: EvaluatorSettings,
    ingest_settings: IngestSettings,
}

impl TestCoreBuilder {
    pub fn new(known: &[&str]) -> Self {
        Self {
            known: known.iter().map(|id| id.to_string()).collect(),
            patterns: Vec::new(),
            registry: None,
            store: Arc::new(CountingStore::new()),
            settings: EvaluatorSettings {
                alert_threshold: chrono::Duration::seconds(THRESHOLD_SECS),
                skip_interval: chrono::Duration::zero(),
                ..EvaluatorSettings::default()
            },
            ingest_settings: IngestSettings::default(),
        }
    }

    pub fn patterns(mut self, patterns: &[&str]) -> Self {
        self.patterns = patterns.iter().map(|p| p.to_string()).collect();
        self
    }

    pub fn registry(mut self, registry: Arc<RecordingRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn store(mut self, store: Arc<CountingStore>) -> Self {
        self.store = store;
        self
    }

    pub fn skip_interval(mut self, skip: chrono::Duration) -> Self {
        self.settings.skip_interval = skip;
        self
    }

    pub fn evaluation_timeout(mut self, timeout: Duration) -> Self {
        self.settings.evaluation_timeout = timeout;
        self
    }

    pub fn max_stream_chunks(mut self, max: usize) -> Self {
        self.ingest_settings.max_stream_chunks = max;
        self
    }

    pub fn registration_timeout(mut self, timeout: Duration) -> Self {
        self.ingest_settings.registration_timeout = timeout;
        self
    }

    pub fn build(self) -> TestCore {
        let cache = Arc::new(StatusCache::new(
            self.store.clone(),
            self.patterns.clone(),
            Duration::from_secs(30),
        ));
        let buffer = Arc::new(PendingWriteBuffer::new());
        let alerts = Arc::new(RecordingAlertSink::default());
        let events = Arc::new(RecordingEventSink::default());
        let (status_tx, _) = broadcast::channel(256);

        let allow_list = Arc::new(
            AllowList::new(
                self.known,
                self.patterns,
                self.registry.clone().map(|r| r as Arc<dyn Registry>),
            )
            .unwrap(),
        );

        let manager = AlertManager::new(ReporterKind::Gateway, alerts.clone()).with_hostname("test-hub");
        let publisher = EventPublisher::new(
            Some(events.clone() as Arc<dyn EventSink>),
            status_tx.clone(),
        );

        let ingestor = Ingestor::new(
            allow_list.clone(),
            cache.clone(),
            buffer.clone(),
            manager.clone(),
            publisher.clone(),
            self.ingest_settings,
        );

        let evaluator = HealthEvaluator::new(
            cache.clone(),
            buffer.clone(),
            manager,
            publisher,
            allow_list,
            self.settings,
        );

        TestCore {
            store: self.store,
            cache,
            buffer,
            alerts,
            events,
            registry: self.registry,
            status_tx,
            ingestor,
            evaluator,
        }
    }
}

/// Poll `condition` until it holds or a second has passed.
pub async fn eventually<F, Fut>(mut condition: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for _ in 0..100 {
        if condition().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}
