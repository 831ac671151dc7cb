//! In-memory remote source.
//!
//! Serves entities from a map and records how often it was asked, so cache
//! behavior can be checked without a backend. Failures and latency can be
//! injected.

use async_trait::async_trait;
use orchard_core::{CacheableEntity, EntityId, Orchard, OrchardResult, RemoteError};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{PoisonError, RwLock};
use std::time::Duration;

use crate::cache::RemoteSource;

/// Remote source backed by a `HashMap`.
#[derive(Debug)]
pub struct InMemoryRemote<T: CacheableEntity = Orchard> {
    entities: RwLock<HashMap<EntityId, T>>,
    failure: RwLock<Option<String>>,
    latency: RwLock<Option<Duration>>,
    fetches: AtomicUsize,
    queries: AtomicUsize,
}

impl<T: CacheableEntity> Default for InMemoryRemote<T> {
    fn default() -> Self {
        Self {
            entities: RwLock::new(HashMap::new()),
            failure: RwLock::new(None),
            latency: RwLock::new(None),
            fetches: AtomicUsize::new(0),
            queries: AtomicUsize::new(0),
        }
    }
}

impl<T: CacheableEntity> InMemoryRemote<T> {
    /// Create an empty remote.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a remote pre-populated with `entities`.
    pub fn with_entities(entities: impl IntoIterator<Item = T>) -> Self {
        let remote = Self::new();
        for entity in entities {
            remote.insert(entity);
        }
        remote
    }

    /// Insert or replace an entity.
    pub fn insert(&self, entity: T) {
        let id = entity.entity_id();
        self.entities
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, entity);
    }

    /// Remove an entity, returning it if present.
    pub fn remove(&self, id: &EntityId) -> Option<T> {
        self.entities
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(id)
    }

    /// Make every subsequent call fail with `reason`.
    pub fn fail_with(&self, reason: impl Into<String>) {
        *self.failure.write().unwrap_or_else(PoisonError::into_inner) = Some(reason.into());
    }

    /// Stop failing.
    pub fn recover(&self) {
        *self.failure.write().unwrap_or_else(PoisonError::into_inner) = None;
    }

    /// Delay every call by `latency` before answering.
    pub fn set_latency(&self, latency: Option<Duration>) {
        *self.latency.write().unwrap_or_else(PoisonError::into_inner) = latency;
    }

    /// Number of `fetch_entity` calls served so far.
    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    /// Number of list queries served so far.
    pub fn query_count(&self) -> usize {
        self.queries.load(Ordering::SeqCst)
    }

    pub fn len(&self) -> usize {
        self.entities
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    async fn answer<R>(
        &self,
        operation: &str,
        f: impl FnOnce(&HashMap<EntityId, T>) -> R,
    ) -> OrchardResult<R> {
        let latency = *self.latency.read().unwrap_or_else(PoisonError::into_inner);
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        let failure = self
            .failure
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if let Some(reason) = failure {
            return Err(RemoteError::Transport {
                operation: operation.to_string(),
                reason,
            }
            .into());
        }
        let entities = self.entities.read().unwrap_or_else(PoisonError::into_inner);
        Ok(f(&entities))
    }
}

#[async_trait]
impl<T: CacheableEntity> RemoteSource for InMemoryRemote<T> {
    type Entity = T;

    async fn fetch_entity(&self, id: &EntityId) -> OrchardResult<Option<T>> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        self.answer("fetch_entity", |entities| entities.get(id).cloned())
            .await
    }

    async fn fetch_entities_by_owner(&self, owner_id: &str) -> OrchardResult<Vec<T>> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        self.answer("fetch_entities_by_owner", |entities| {
            entities
                .values()
                .filter(|e| e.owner_id() == Some(owner_id))
                .cloned()
                .collect()
        })
        .await
    }

    async fn fetch_entities_by_status(&self, status: &str) -> OrchardResult<Vec<T>> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        self.answer("fetch_entities_by_status", |entities| {
            entities
                .values()
                .filter(|e| e.status() == Some(status))
                .cloned()
                .collect()
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use orchard_core::OrchardStatus;

    fn orchard(id: &str, owner: &str, status: OrchardStatus) -> Orchard {
        Orchard {
            id: EntityId::from(id),
            user_id: owner.to_string(),
            title: id.to_uppercase(),
            description: None,
            status,
            total_pockets: 1,
            filled_pockets: 0,
            pocket_price: 10.0,
            currency: None,
            created_at: None,
            updated_at: None,
        }
    }

    #[tokio::test]
    async fn test_fetch_entity_counts_calls() {
        let remote = InMemoryRemote::with_entities([orchard("a", "u", OrchardStatus::Active)]);
        assert!(remote.fetch_entity(&EntityId::from("a")).await.unwrap().is_some());
        assert!(remote.fetch_entity(&EntityId::from("b")).await.unwrap().is_none());
        assert_eq!(remote.fetch_count(), 2);
    }

    #[tokio::test]
    async fn test_queries_filter_by_owner_and_status() {
        let remote = InMemoryRemote::with_entities([
            orchard("a", "u1", OrchardStatus::Active),
            orchard("b", "u1", OrchardStatus::Draft),
            orchard("c", "u2", OrchardStatus::Active),
        ]);
        assert_eq!(remote.fetch_entities_by_owner("u1").await.unwrap().len(), 2);
        assert_eq!(remote.fetch_entities_by_status("active").await.unwrap().len(), 2);
        assert_eq!(remote.query_count(), 2);
    }

    #[tokio::test]
    async fn test_injected_failure_and_recovery() {
        let remote = InMemoryRemote::with_entities([orchard("a", "u", OrchardStatus::Active)]);
        remote.fail_with("boom");
        let err = remote.fetch_entity(&EntityId::from("a")).await.unwrap_err();
        assert!(err.to_string().contains("boom"));
        remote.recover();
        assert!(remote.fetch_entity(&EntityId::from("a")).await.is_ok());
    }
}
