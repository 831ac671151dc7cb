//! Per-entity cache record.

use orchard_core::{elapsed_between, EntityId, Timestamp};
use std::time::Duration;

/// The local snapshot of one entity plus its sync metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheRecord<T> {
    pub id: EntityId,
    /// Latest known snapshot, `None` until the first successful sync.
    pub data: Option<T>,
    /// A fetch for this id is in flight.
    pub loading: bool,
    /// Message of the most recent failed sync; cleared by a successful one.
    pub error: Option<String>,
    /// Completion time of the last successful sync.
    pub last_synced: Option<Timestamp>,
    pub last_accessed: Timestamp,
}

impl<T> CacheRecord<T> {
    /// A record with no data, as created on first access.
    pub fn empty(id: EntityId, now: Timestamp) -> Self {
        Self {
            id,
            data: None,
            loading: false,
            error: None,
            last_synced: None,
            last_accessed: now,
        }
    }

    /// A record holding a freshly synced snapshot.
    pub fn synced(id: EntityId, data: T, now: Timestamp) -> Self {
        Self {
            id,
            data: Some(data),
            loading: false,
            error: None,
            last_synced: Some(now),
            last_accessed: now,
        }
    }

    pub fn has_data(&self) -> bool {
        self.data.is_some()
    }

    /// Time since the record was last read.
    pub fn idle_for(&self, now: Timestamp) -> Duration {
        elapsed_between(self.last_accessed, now)
    }

    /// Whether cleanup may drop this record at `now`.
    ///
    /// Records with a fetch in flight are kept so the fetch result has a
    /// home.
    pub fn is_evictable(&self, now: Timestamp, threshold: Duration) -> bool {
        !self.loading && self.idle_for(now) > threshold
    }
}
