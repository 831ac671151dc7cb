//! Entity cache with fetch-and-cache semantics.
//!
//! Holds the latest known snapshot of each entity, routes syncs through the
//! freshness rules and notifies subscribers after every observable mutation.

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use orchard_core::{
    CacheError, CacheableEntity, Clock, ConfigError, EntityId, OrchardResult, SystemClock,
    Timestamp,
};
use serde_json::Value;

use super::freshness::{CacheRead, Freshness, ReadOrigin};
use super::record::CacheRecord;
use super::registry::{SubscriberHandle, SubscriberRegistry};
use super::traits::{CacheStats, RemoteSource};
use crate::constants::{
    DEFAULT_FETCH_TIMEOUT_MS, DEFAULT_PUBLIC_STATUS, DEFAULT_RATE_LIMIT_WINDOW_MS,
    DEFAULT_STALENESS_THRESHOLD_SECS,
};

/// Configuration for the entity cache.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheConfig {
    /// A plain `sync` serves cached data if the last successful sync is
    /// younger than this.
    pub rate_limit_window: Duration,
    /// Records not accessed for longer than this are evicted by cleanup.
    pub staleness_threshold: Duration,
    /// Upper bound on a single remote fetch. `None` waits forever.
    pub fetch_timeout: Option<Duration>,
    /// Status selecting the public entity set in `refresh_all`.
    pub public_status: String,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            rate_limit_window: Duration::from_millis(DEFAULT_RATE_LIMIT_WINDOW_MS),
            staleness_threshold: Duration::from_secs(DEFAULT_STALENESS_THRESHOLD_SECS),
            fetch_timeout: Some(Duration::from_millis(DEFAULT_FETCH_TIMEOUT_MS)),
            public_status: DEFAULT_PUBLIC_STATUS.to_string(),
        }
    }
}

impl CacheConfig {
    /// Create a new cache config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create CacheConfig from environment variables.
    ///
    /// - `ORCHARD_CACHE_RATE_LIMIT_MS`: rate-limit window (default: 5000)
    /// - `ORCHARD_CACHE_STALENESS_SECS`: eviction threshold (default: 600)
    /// - `ORCHARD_CACHE_FETCH_TIMEOUT_MS`: fetch timeout, `0` disables (default: 30000)
    /// - `ORCHARD_CACHE_PUBLIC_STATUS`: public set status (default: "active")
    pub fn from_env() -> Self {
        let rate_limit_window = Duration::from_millis(
            std::env::var("ORCHARD_CACHE_RATE_LIMIT_MS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_RATE_LIMIT_WINDOW_MS),
        );

        let staleness_threshold = Duration::from_secs(
            std::env::var("ORCHARD_CACHE_STALENESS_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_STALENESS_THRESHOLD_SECS),
        );

        let fetch_timeout_ms: u64 = std::env::var("ORCHARD_CACHE_FETCH_TIMEOUT_MS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_FETCH_TIMEOUT_MS);
        let fetch_timeout = (fetch_timeout_ms > 0).then(|| Duration::from_millis(fetch_timeout_ms));

        let public_status = std::env::var("ORCHARD_CACHE_PUBLIC_STATUS")
            .ok()
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_PUBLIC_STATUS.to_string());

        Self {
            rate_limit_window,
            staleness_threshold,
            fetch_timeout,
            public_status,
        }
    }

    /// Set the rate-limit window.
    pub fn with_rate_limit_window(mut self, window: Duration) -> Self {
        self.rate_limit_window = window;
        self
    }

    /// Set the eviction threshold.
    pub fn with_staleness_threshold(mut self, threshold: Duration) -> Self {
        self.staleness_threshold = threshold;
        self
    }

    /// Set or disable the fetch timeout.
    pub fn with_fetch_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.fetch_timeout = timeout;
        self
    }

    /// Set the status selecting the public set.
    pub fn with_public_status(mut self, status: impl Into<String>) -> Self {
        self.public_status = status.into();
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.staleness_threshold.is_zero() {
            return Err(ConfigError::InvalidValue {
                field: "staleness_threshold".to_string(),
                value: "0".to_string(),
                reason: "must be > 0".to_string(),
            });
        }
        if self.fetch_timeout.is_some_and(|t| t.is_zero()) {
            return Err(ConfigError::InvalidValue {
                field: "fetch_timeout".to_string(),
                value: "0".to_string(),
                reason: "must be > 0 when set".to_string(),
            });
        }
        if self.public_status.trim().is_empty() {
            return Err(ConfigError::MissingRequired {
                field: "public_status".to_string(),
            });
        }
        Ok(())
    }
}

struct CacheState<T> {
    records: HashMap<EntityId, CacheRecord<T>>,
    /// Fetches in flight. Kept apart from `records` so removing or
    /// replacing a record never releases the single-flight slot.
    in_flight: HashMap<EntityId, Flight>,
    next_ticket: u64,
    version: u64,
}

#[derive(Debug, Clone, Copy)]
struct Flight {
    ticket: u64,
    /// Cleared when the record is removed or overwritten mid-fetch.
    current: bool,
}

impl<T> CacheState<T> {
    fn bump(&mut self) -> u64 {
        self.version += 1;
        self.version
    }

    /// The record for `id`, created empty if absent. A new record's
    /// `loading` mirrors the in-flight table.
    fn record_mut(&mut self, id: &EntityId, now: Timestamp) -> &mut CacheRecord<T> {
        let loading = self.in_flight.contains_key(id);
        self.records.entry(id.clone()).or_insert_with(|| CacheRecord {
            loading,
            ..CacheRecord::empty(id.clone(), now)
        })
    }

    fn begin_flight(&mut self, id: &EntityId) -> u64 {
        self.next_ticket += 1;
        let ticket = self.next_ticket;
        self.in_flight.insert(
            id.clone(),
            Flight {
                ticket,
                current: true,
            },
        );
        ticket
    }

    /// Mark the fetch for `id`, if any, as no longer wanted.
    fn supersede(&mut self, id: &EntityId) {
        if let Some(flight) = self.in_flight.get_mut(id) {
            flight.current = false;
        }
    }

    /// Release the flight for `id` if `ticket` owns it.
    ///
    /// Returns `Some(true)` when the fetch result should be applied,
    /// `Some(false)` when the record changed underneath it, and `None` when
    /// `ticket` does not own the slot.
    fn end_flight(&mut self, id: &EntityId, ticket: u64) -> Option<bool> {
        let flight = *self.in_flight.get(id)?;
        if flight.ticket != ticket {
            return None;
        }
        self.in_flight.remove(id);
        if let Some(record) = self.records.get_mut(id) {
            record.loading = false;
        }
        Some(flight.current)
    }
}

#[derive(Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    failures: AtomicU64,
    evictions: AtomicU64,
}

/// Entity cache over a [`RemoteSource`].
///
/// Construct once and share through `Arc`. The state lock is never held
/// across a remote fetch; subscribers run after it is released.
///
/// # Example
///
/// ```ignore
/// let cache = Arc::new(EntityCache::new(remote, CacheConfig::default()));
/// let _sub = cache.subscribe(|id, version| println!("{id} changed at v{version}"));
///
/// if let Some(read) = cache.sync(&EntityId::from("A")).await {
///     println!("{:?} via {:?}", read.value(), read.origin());
/// }
/// ```
pub struct EntityCache<S: RemoteSource> {
    remote: S,
    config: CacheConfig,
    clock: Arc<dyn Clock>,
    state: RwLock<CacheState<S::Entity>>,
    subscribers: SubscriberRegistry,
    counters: Counters,
}

impl<S: RemoteSource> EntityCache<S> {
    /// Create a new cache backed by the system clock.
    pub fn new(remote: S, config: CacheConfig) -> Self {
        Self::with_clock(remote, config, Arc::new(SystemClock))
    }

    /// Create a new cache with default configuration.
    pub fn with_defaults(remote: S) -> Self {
        Self::new(remote, CacheConfig::default())
    }

    /// Create a new cache reading time from `clock`.
    pub fn with_clock(remote: S, config: CacheConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            remote,
            config,
            clock,
            state: RwLock::new(CacheState {
                records: HashMap::new(),
                in_flight: HashMap::new(),
                next_ticket: 0,
                version: 0,
            }),
            subscribers: SubscriberRegistry::new(),
            counters: Counters::default(),
        }
    }

    /// Get the cache configuration.
    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Get a reference to the remote source.
    pub fn remote(&self) -> &S {
        &self.remote
    }

    /// Current version. Strictly increases with every observable mutation.
    pub fn version(&self) -> u64 {
        self.read_state().version
    }

    pub fn len(&self) -> usize {
        self.read_state().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Ids of every record currently held.
    pub fn ids(&self) -> Vec<EntityId> {
        self.read_state().records.keys().cloned().collect()
    }

    /// Register a mutation listener.
    pub fn subscribe<F>(&self, callback: F) -> SubscriberHandle
    where
        F: Fn(&EntityId, u64) + Send + Sync + 'static,
    {
        self.subscribers.subscribe(callback)
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    /// Get the record for `id`, creating an empty one if absent.
    ///
    /// Marks the record as accessed. Creating the record is not an
    /// observable mutation and does not bump the version.
    pub fn get(&self, id: &EntityId) -> CacheRecord<S::Entity> {
        let now = self.clock.now();
        let mut state = self.write_state();
        let record = state.record_mut(id, now);
        record.last_accessed = now;
        record.clone()
    }

    /// Look at the record for `id` without creating it or touching its
    /// access time.
    pub fn peek(&self, id: &EntityId) -> Option<CacheRecord<S::Entity>> {
        self.read_state().records.get(id).cloned()
    }

    /// Sync `id` with the default rate limit.
    pub async fn sync(&self, id: &EntityId) -> Option<CacheRead<S::Entity>> {
        self.sync_with(id, Freshness::best_effort(self.config.rate_limit_window))
            .await
    }

    /// Fetch fresh data for `id` unless `freshness` lets the cache answer.
    ///
    /// Returns `None` when `id` is empty, or when no data is available
    /// after the attempt. Fetch errors are recorded on the record; prior
    /// data is kept and returned with [`ReadOrigin::StaleOnError`].
    ///
    /// At most one fetch per id runs at a time, even across invalidation.
    /// If the record is invalidated, written or refreshed while the fetch
    /// runs, the fetched value is dropped in favour of the newer contents.
    pub async fn sync_with(
        &self,
        id: &EntityId,
        freshness: Freshness,
    ) -> Option<CacheRead<S::Entity>> {
        if id.is_empty() {
            tracing::warn!(error = %CacheError::MissingId, "Sync skipped");
            return None;
        }

        let now = self.clock.now();
        let ticket = {
            let mut state = self.write_state();
            let in_flight = state.in_flight.contains_key(id);
            let record = state.record_mut(id, now);
            record.last_accessed = now;

            if in_flight {
                self.counters.hits.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(entity_id = %id, "Sync already in flight, serving cached data");
                return record
                    .data
                    .clone()
                    .map(|data| CacheRead::new(data, record.last_synced, ReadOrigin::InFlight));
            }

            if let (Some(data), Some(synced_at)) = (&record.data, record.last_synced) {
                if freshness.accepts(synced_at, now) {
                    self.counters.hits.fetch_add(1, Ordering::Relaxed);
                    tracing::trace!(entity_id = %id, "Sync rate limited");
                    return Some(CacheRead::new(
                        data.clone(),
                        Some(synced_at),
                        ReadOrigin::RateLimited,
                    ));
                }
            }

            record.loading = true;
            state.begin_flight(id)
        };

        self.counters.misses.fetch_add(1, Ordering::Relaxed);
        let mut guard = InFlightGuard {
            cache: self,
            id,
            ticket,
            armed: true,
        };
        let result = self.fetch(id).await;
        guard.armed = false;

        let completed_at = self.clock.now();
        let (read, version) = {
            let mut state = self.write_state();
            if state.end_flight(id, ticket) != Some(true) {
                tracing::debug!(entity_id = %id, "Sync result discarded, record changed while fetching");
                return state.records.get(id).and_then(|record| {
                    record.data.clone().map(|data| {
                        CacheRead::new(data, record.last_synced, ReadOrigin::Superseded)
                    })
                });
            }
            let version = state.bump();
            let record = state.record_mut(id, completed_at);

            let read = match result {
                Ok(entity) => {
                    record.data = Some(entity.clone());
                    record.error = None;
                    record.last_synced = Some(completed_at);
                    Some(CacheRead::new(entity, Some(completed_at), ReadOrigin::Remote))
                }
                Err(err) => {
                    self.counters.failures.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!(entity_id = %id, error = %err, "Sync failed");
                    record.error = Some(err.to_string());
                    record.data.clone().map(|data| {
                        CacheRead::new(data, record.last_synced, ReadOrigin::StaleOnError)
                    })
                }
            };
            (read, version)
        };

        self.subscribers.notify(id, version);
        read
    }

    async fn fetch(&self, id: &EntityId) -> OrchardResult<S::Entity> {
        let fetch = self.remote.fetch_entity(id);
        let fetched = match self.config.fetch_timeout {
            Some(timeout) => match tokio::time::timeout(timeout, fetch).await {
                Ok(result) => result?,
                Err(_) => {
                    return Err(CacheError::FetchTimeout {
                        id: id.clone(),
                        timeout,
                    }
                    .into())
                }
            },
            None => fetch.await?,
        };
        fetched.ok_or_else(|| CacheError::NotFound { id: id.clone() }.into())
    }

    /// Remove the record for `id`. A fetch already running for it will not
    /// write its result back.
    ///
    /// Returns false, without bumping the version, if nothing was cached.
    pub fn invalidate(&self, id: &EntityId) -> bool {
        let version = {
            let mut state = self.write_state();
            state.supersede(id);
            if state.records.remove(id).is_none() {
                return false;
            }
            state.bump()
        };
        tracing::debug!(entity_id = %id, version, "Cache record invalidated");
        self.subscribers.notify(id, version);
        true
    }

    /// Merge a JSON patch into the cached data of `id` in place.
    ///
    /// Returns `Ok(false)` when `id` has no cached data.
    pub fn merge(&self, id: &EntityId, patch: &Value) -> OrchardResult<bool> {
        let now = self.clock.now();
        let version = {
            let mut state = self.write_state();
            let Some(current) = state.records.get(id).and_then(|r| r.data.as_ref()) else {
                return Ok(false);
            };
            let merged = current.merged(patch).map_err(|e| CacheError::MergeFailed {
                id: id.clone(),
                reason: e.to_string(),
            })?;
            let version = state.bump();
            state.supersede(id);
            if let Some(record) = state.records.get_mut(id) {
                record.data = Some(merged);
                record.error = None;
                record.last_synced = Some(now);
            }
            version
        };
        self.subscribers.notify(id, version);
        Ok(true)
    }

    /// Store a known-current snapshot, e.g. after a local write.
    pub fn put(&self, entity: S::Entity) -> EntityId {
        let id = entity.entity_id();
        let now = self.clock.now();
        let version = {
            let mut state = self.write_state();
            let version = state.bump();
            state.supersede(&id);
            let record = state.record_mut(&id, now);
            record.data = Some(entity);
            record.error = None;
            record.last_synced = Some(now);
            version
        };
        self.subscribers.notify(&id, version);
        id
    }

    /// Evict records idle for longer than the staleness threshold.
    ///
    /// Records with a fetch in flight are kept. Returns the number evicted.
    pub fn cleanup(&self) -> usize {
        let now = self.clock.now();
        let threshold = self.config.staleness_threshold;
        let (evicted, version) = {
            let mut state = self.write_state();
            let evicted: Vec<EntityId> = state
                .records
                .values()
                .filter(|record| {
                    record.is_evictable(now, threshold) && !state.in_flight.contains_key(&record.id)
                })
                .map(|record| record.id.clone())
                .collect();
            if evicted.is_empty() {
                return 0;
            }
            for id in &evicted {
                state.records.remove(id);
            }
            (evicted, state.bump())
        };

        self.counters
            .evictions
            .fetch_add(evicted.len() as u64, Ordering::Relaxed);
        tracing::debug!(evicted = evicted.len(), version, "Cache cleanup evicted idle records");
        for id in &evicted {
            self.subscribers.notify(id, version);
        }
        evicted.len()
    }

    /// Replace the whole cache with the owner-scoped and public sets.
    ///
    /// Owner entries are loaded first; public entries only fill ids the
    /// owner set did not populate. If either query fails the cache is left
    /// untouched. Returns the number of records loaded.
    pub async fn refresh_all(&self, owner_id: Option<&str>) -> OrchardResult<usize> {
        let owned = match owner_id {
            Some(owner) => self.remote.fetch_entities_by_owner(owner).await?,
            None => Vec::new(),
        };
        let public = self
            .remote
            .fetch_entities_by_status(&self.config.public_status)
            .await?;

        let now = self.clock.now();
        let (affected, loaded, version) = {
            let mut state = self.write_state();
            let state = &mut *state;
            let mut affected: BTreeSet<EntityId> = state.records.keys().cloned().collect();
            state.records.clear();
            for flight in state.in_flight.values_mut() {
                flight.current = false;
            }

            for entity in owned {
                let id = entity.entity_id();
                affected.insert(id.clone());
                state.records.insert(id.clone(), CacheRecord::synced(id, entity, now));
            }
            for entity in public {
                let id = entity.entity_id();
                let populated = state.records.get(&id).is_some_and(|r| r.has_data());
                if !populated {
                    affected.insert(id.clone());
                    state.records.insert(id.clone(), CacheRecord::synced(id, entity, now));
                }
            }
            for id in state.in_flight.keys() {
                if let Some(record) = state.records.get_mut(id) {
                    record.loading = true;
                }
            }
            let loaded = state.records.len();
            (affected, loaded, state.bump())
        };

        tracing::info!(
            owner_id = owner_id.unwrap_or("-"),
            loaded,
            version,
            "Cache refreshed"
        );
        for id in &affected {
            self.subscribers.notify(id, version);
        }
        Ok(loaded)
    }

    /// Snapshot of the usage counters.
    pub fn stats(&self) -> CacheStats {
        let (entry_count, version) = {
            let state = self.read_state();
            (state.records.len() as u64, state.version)
        };
        CacheStats {
            hits: self.counters.hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            failures: self.counters.failures.load(Ordering::Relaxed),
            evictions: self.counters.evictions.load(Ordering::Relaxed),
            entry_count,
            version,
        }
    }

    fn read_state(&self) -> RwLockReadGuard<'_, CacheState<S::Entity>> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_state(&self) -> RwLockWriteGuard<'_, CacheState<S::Entity>> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<S: RemoteSource> std::fmt::Debug for EntityCache<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntityCache")
            .field("config", &self.config)
            .field("stats", &self.stats())
            .finish()
    }
}

/// Clears the loading flag if a sync is dropped mid-fetch.
struct InFlightGuard<'a, S: RemoteSource> {
    cache: &'a EntityCache<S>,
    id: &'a EntityId,
    ticket: u64,
    armed: bool,
}

impl<S: RemoteSource> Drop for InFlightGuard<'_, S> {
    fn drop(&mut self) {
        if self.armed {
            self.cache.write_state().end_flight(self.id, self.ticket);
            tracing::debug!(entity_id = %self.id, "Sync cancelled before completion");
        }
    }
}
