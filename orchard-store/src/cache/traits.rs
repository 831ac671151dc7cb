//! Remote source trait and cache statistics.

use async_trait::async_trait;
use orchard_core::{CacheableEntity, EntityId, OrchardResult};
use serde::Serialize;
use std::sync::Arc;

/// Query capability of the remote backend.
///
/// Implementations must be thread-safe; the cache may issue fetches for
/// different ids concurrently.
#[async_trait]
pub trait RemoteSource: Send + Sync {
    /// The entity type this source serves.
    type Entity: CacheableEntity;

    /// Fetch one entity by id. `Ok(None)` means the entity does not exist.
    async fn fetch_entity(&self, id: &EntityId) -> OrchardResult<Option<Self::Entity>>;

    /// Fetch every entity owned by `owner_id`.
    async fn fetch_entities_by_owner(&self, owner_id: &str) -> OrchardResult<Vec<Self::Entity>>;

    /// Fetch every entity whose status equals `status`.
    async fn fetch_entities_by_status(&self, status: &str) -> OrchardResult<Vec<Self::Entity>>;
}

#[async_trait]
impl<S: RemoteSource + ?Sized> RemoteSource for Arc<S> {
    type Entity = S::Entity;

    async fn fetch_entity(&self, id: &EntityId) -> OrchardResult<Option<Self::Entity>> {
        (**self).fetch_entity(id).await
    }

    async fn fetch_entities_by_owner(&self, owner_id: &str) -> OrchardResult<Vec<Self::Entity>> {
        (**self).fetch_entities_by_owner(owner_id).await
    }

    async fn fetch_entities_by_status(&self, status: &str) -> OrchardResult<Vec<Self::Entity>> {
        (**self).fetch_entities_by_status(status).await
    }
}

/// Statistics about cache usage.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    /// Syncs answered from cache (rate-limited or in-flight).
    pub hits: u64,
    /// Syncs that went to the remote source.
    pub misses: u64,
    /// Remote fetches that failed or timed out.
    pub failures: u64,
    /// Records dropped by cleanup.
    pub evictions: u64,
    /// Number of records currently held.
    pub entry_count: u64,
    /// Current cache version.
    pub version: u64,
}

impl CacheStats {
    /// Calculate the hit rate (0.0 to 1.0).
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}
