//! Freshness contracts for cache syncs.
//!
//! Callers state how stale a cached snapshot may be before `sync` goes back
//! to the remote source, and every sync result says where its value came
//! from.

use orchard_core::{elapsed_between, Timestamp};
use std::time::Duration;

/// Freshness requirement for a sync.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
    /// Serve cached data if the last successful sync is younger than
    /// `max_staleness`; fetch otherwise.
    ///
    /// This is the rate limit applied by a plain `sync`.
    BestEffort {
        /// Maximum acceptable age of the last successful sync.
        max_staleness: Duration,
    },

    /// Always fetch, unless a fetch for the same id is already in flight.
    ///
    /// Used when something is known to have changed remotely, e.g. a child
    /// row referencing the entity was written.
    Consistent,
}

impl Freshness {
    /// Create a BestEffort freshness with the given max staleness.
    pub fn best_effort(max_staleness: Duration) -> Self {
        Self::BestEffort { max_staleness }
    }

    /// Create a Consistent freshness requirement.
    pub fn consistent() -> Self {
        Self::Consistent
    }

    /// Returns true if this is a Consistent freshness.
    pub fn is_consistent(&self) -> bool {
        matches!(self, Self::Consistent)
    }

    /// Get the max staleness for BestEffort, or zero for Consistent.
    pub fn max_staleness(&self) -> Duration {
        match self {
            Self::BestEffort { max_staleness } => *max_staleness,
            Self::Consistent => Duration::ZERO,
        }
    }

    /// Whether a snapshot last synced at `synced_at` may be served at `now`.
    pub fn accepts(&self, synced_at: Timestamp, now: Timestamp) -> bool {
        match self {
            Self::BestEffort { max_staleness } => elapsed_between(synced_at, now) < *max_staleness,
            Self::Consistent => false,
        }
    }
}

/// Where the value of a [`CacheRead`] came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadOrigin {
    /// Fetched from the remote source by this sync.
    Remote,
    /// Served from cache because the last sync is inside the freshness window.
    RateLimited,
    /// Served from cache because another sync for the id is in flight.
    InFlight,
    /// Served from cache after the fetch failed.
    StaleOnError,
    /// The record was replaced or removed while the fetch ran; the fetched
    /// value was discarded and the current cache contents served.
    Superseded,
}

/// Result of a sync, carrying freshness metadata.
#[derive(Debug, Clone)]
pub struct CacheRead<T> {
    value: T,
    synced_at: Option<Timestamp>,
    origin: ReadOrigin,
}

impl<T> CacheRead<T> {
    pub fn new(value: T, synced_at: Option<Timestamp>, origin: ReadOrigin) -> Self {
        Self {
            value,
            synced_at,
            origin,
        }
    }

    /// Consume the wrapper and return the underlying value.
    pub fn into_value(self) -> T {
        self.value
    }

    /// Get a reference to the underlying value.
    pub fn value(&self) -> &T {
        &self.value
    }

    /// When the value was last confirmed by the remote source.
    pub fn synced_at(&self) -> Option<Timestamp> {
        self.synced_at
    }

    pub fn origin(&self) -> ReadOrigin {
        self.origin
    }

    /// True if this sync performed a remote fetch that succeeded.
    pub fn is_fresh_fetch(&self) -> bool {
        self.origin == ReadOrigin::Remote
    }

    /// How long ago the value was synced, as of `now`.
    ///
    /// A value that was never synced reports `Duration::MAX`.
    pub fn staleness(&self, now: Timestamp) -> Duration {
        self.synced_at
            .map(|at| elapsed_between(at, now))
            .unwrap_or(Duration::MAX)
    }

    /// Map the inner value to a new type.
    pub fn map<U, F>(self, f: F) -> CacheRead<U>
    where
        F: FnOnce(T) -> U,
    {
        CacheRead {
            value: f(self.value),
            synced_at: self.synced_at,
            origin: self.origin,
        }
    }
}

impl<T> AsRef<T> for CacheRead<T> {
    fn as_ref(&self) -> &T {
        &self.value
    }
}
