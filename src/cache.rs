//! StatusCache - TTL-bounded mirror of the status store
//!
//! ## Locking
//!
//! One `RwLock` guards the whole map. Reads take the shared lock and hand
//! out copies. A refresh takes the exclusive lock and re-checks staleness
//! before querying, so concurrent callers that all found the cache stale
//! produce a single store query.
//!
//! ## Refresh is a merge
//!
//! Rows read from the store are merged into the existing entries by ID:
//! the evaluation bookkeeping (`last_evaluated`, `alert_sent`) is carried
//! forward, and an entry whose `last_seen` is at least as recent as the
//! stored row is kept as-is because its write is still pending.
//!
//! ## Transitions
//!
//! Health transitions of one reporter (offline, recovery) are serialized
//! through [`StatusCache::lock_transitions`]. The guard is held from the
//! cache update until the alerts announcing it went out, so alerts for a
//! reporter are delivered in the order its state changed.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};
use tracing::{debug, instrument, trace};

use crate::ReporterStatus;
use crate::storage::{StatusStore, StorageResult};

#[derive(Debug, Default)]
struct CacheState {
    entries: HashMap<String, ReporterStatus>,
    last_refreshed: Option<Instant>,
    refresh_count: u64,
}

impl CacheState {
    fn is_fresh(&self, ttl: Duration) -> bool {
        self.last_refreshed.is_some_and(|at| at.elapsed() < ttl)
    }

    fn refreshed_after(&self, instant: Instant) -> bool {
        self.last_refreshed.is_some_and(|at| at > instant)
    }

    fn merge(&mut self, rows: Vec<ReporterStatus>) {
        let mut previous = std::mem::take(&mut self.entries);

        for row in rows {
            let merged = match previous.remove(&row.id) {
                Some(prior) if prior.last_seen >= row.last_seen => prior,
                Some(prior) => ReporterStatus {
                    last_evaluated: prior.last_evaluated,
                    alert_sent: prior.alert_sent && !row.is_healthy,
                    ..row
                },
                None => row,
            };
            self.entries.insert(merged.id.clone(), merged);
        }

        if !previous.is_empty() {
            trace!("dropped {} reporters no longer in storage", previous.len());
        }
    }
}

pub struct StatusCache {
    store: Arc<dyn StatusStore>,
    patterns: Vec<String>,
    ttl: Duration,
    state: RwLock<CacheState>,
    transitions: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl StatusCache {
    pub fn new(store: Arc<dyn StatusStore>, patterns: Vec<String>, ttl: Duration) -> Self {
        Self {
            store,
            patterns,
            ttl,
            state: RwLock::new(CacheState::default()),
            transitions: Mutex::new(HashMap::new()),
        }
    }

    /// Snapshot of all cached reporters, refreshed from the store if the
    /// cache is older than its TTL or `force_refresh` is set.
    ///
    /// A store error is returned to the caller and the cached entries stay
    /// untouched.
    #[instrument(skip(self))]
    pub async fn get(&self, force_refresh: bool) -> StorageResult<HashMap<String, ReporterStatus>> {
        let requested_at = Instant::now();

        if !force_refresh {
            let state = self.state.read().await;
            if state.is_fresh(self.ttl) {
                trace!("cache hit ({} reporters)", state.entries.len());
                return Ok(state.entries.clone());
            }
        }

        let mut state = self.state.write().await;

        if state.refreshed_after(requested_at) || (!force_refresh && state.is_fresh(self.ttl)) {
            trace!("cache refreshed by a concurrent caller");
            return Ok(state.entries.clone());
        }

        let rows = self.store.list_matching(&self.patterns).await?;
        debug!("refreshing cache with {} stored reporters", rows.len());

        state.merge(rows);
        state.last_refreshed = Some(Instant::now());
        state.refresh_count += 1;

        Ok(state.entries.clone())
    }

    /// Copy of one cached entry, without touching the store.
    pub async fn lookup(&self, reporter_id: &str) -> Option<ReporterStatus> {
        self.state.read().await.entries.get(reporter_id).cloned()
    }

    /// Replace an entry with the result of `f`, which sees the current
    /// entry (if any). Returns the previous and the new entry.
    pub async fn upsert_with<F>(
        &self,
        reporter_id: &str,
        f: F,
    ) -> (Option<ReporterStatus>, ReporterStatus)
    where
        F: FnOnce(Option<&ReporterStatus>) -> ReporterStatus,
    {
        let mut state = self.state.write().await;
        let previous = state.entries.get(reporter_id).cloned();
        let next = f(previous.as_ref());

        state.entries.insert(reporter_id.to_string(), next.clone());
        (previous, next)
    }

    /// Mutate an existing entry in place; `None` if the reporter is not cached.
    pub async fn update<F, T>(&self, reporter_id: &str, f: F) -> Option<T>
    where
        F: FnOnce(&mut ReporterStatus) -> T,
    {
        let mut state = self.state.write().await;
        state.entries.get_mut(reporter_id).map(f)
    }

    pub async fn remove(&self, reporter_id: &str) -> Option<ReporterStatus> {
        self.transitions.lock().await.remove(reporter_id);
        self.state.write().await.entries.remove(reporter_id)
    }

    /// Exclusive right to change the health of `reporter_id` and announce it.
    ///
    /// Take this before [`Self::upsert_with`] or [`Self::update`], never
    /// while holding a cache entry.
    pub async fn lock_transitions(&self, reporter_id: &str) -> OwnedMutexGuard<()> {
        let lock = self
            .transitions
            .lock()
            .await
            .entry(reporter_id.to_string())
            .or_default()
            .clone();

        lock.lock_owned().await
    }

    pub async fn len(&self) -> usize {
        self.state.read().await.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.state.read().await.entries.is_empty()
    }

    /// Number of store queries performed by refreshes so far.
    pub async fn refresh_count(&self) -> u64 {
        self.state.read().await.refresh_count
    }

    pub fn store(&self) -> &Arc<dyn StatusStore> {
        &self.store
    }
}
