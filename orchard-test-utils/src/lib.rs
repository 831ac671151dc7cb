//! ORCHARD Test Utilities
//!
//! Shared test infrastructure for the ORCHARD workspace:
//! - Proptest generators for entities and change events
//! - Fixtures for caches wired to a manual clock
//! - Assertions over cache records and errors

// Re-export in-memory doubles from their source crate
pub use orchard_store::{EntityCache, InMemoryChangeFeed, InMemoryRemote};

// Re-export core types for convenience
pub use orchard_core::{
    CacheError, CacheableEntity, ChangeEvent, ChangeKind, Clock, EntityId, ManualClock, Orchard,
    OrchardError, OrchardResult, OrchardStatus, Timestamp,
};

use chrono::Utc;
use std::sync::Arc;

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for ORCHARD types.

    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    /// Generate a non-empty entity id from a small alphabet, so that
    /// generated operation sequences hit the same ids often.
    pub fn arb_entity_id() -> impl Strategy<Value = EntityId> {
        "[a-e]{1,2}".prop_map(EntityId::from)
    }

    /// Generate a Timestamp within 2020-2030.
    pub fn arb_timestamp() -> impl Strategy<Value = Timestamp> {
        (1577836800i64..1893456000i64).prop_map(|secs| {
            chrono::DateTime::from_timestamp(secs, 0).unwrap_or_else(Utc::now)
        })
    }

    pub fn arb_orchard_status() -> impl Strategy<Value = OrchardStatus> {
        prop_oneof![
            Just(OrchardStatus::Draft),
            Just(OrchardStatus::Active),
            Just(OrchardStatus::Paused),
            Just(OrchardStatus::Completed),
            Just(OrchardStatus::Cancelled),
        ]
    }

    pub fn arb_change_kind() -> impl Strategy<Value = ChangeKind> {
        prop_oneof![
            Just(ChangeKind::Insert),
            Just(ChangeKind::Update),
            Just(ChangeKind::Delete),
        ]
    }

    /// Generate an orchard with the given id.
    pub fn arb_orchard_with_id(id: EntityId) -> impl Strategy<Value = Orchard> {
        (
            "user-[0-9]",
            "[A-Za-z ]{1,24}",
            arb_orchard_status(),
            1u32..500,
            0u32..500,
            1u32..10_000,
        )
            .prop_map(move |(user_id, title, status, total, filled, cents)| Orchard {
                id: id.clone(),
                user_id,
                title,
                description: None,
                status,
                total_pockets: total,
                filled_pockets: filled.min(total),
                pocket_price: f64::from(cents) / 100.0,
                currency: Some("USD".to_string()),
                created_at: None,
                updated_at: None,
            })
    }

    /// Generate an orchard with a random id.
    pub fn arb_orchard() -> impl Strategy<Value = Orchard> {
        arb_entity_id().prop_flat_map(arb_orchard_with_id)
    }

    /// Generate a change event on `table` for a row keyed by `column`.
    pub fn arb_change_event(table: &'static str, column: &'static str) -> impl Strategy<Value = ChangeEvent> {
        (arb_change_kind(), arb_entity_id(), 0u32..100).prop_map(move |(kind, id, filled)| {
            let row = json!({ column: id.as_str(), "filled_pockets": filled });
            match kind {
                ChangeKind::Insert => ChangeEvent::insert(table, row),
                ChangeKind::Update => ChangeEvent::update(table, row),
                ChangeKind::Delete => ChangeEvent::delete(table, json!({ column: id.as_str() })),
            }
        })
    }
}

// ============================================================================
// TEST FIXTURES
// ============================================================================

pub mod fixtures {
    //! Pre-built fixtures for common cache scenarios.

    use super::*;
    use orchard_store::{CacheConfig, SubscriberHandle};
    use std::sync::Mutex;

    /// Create an active orchard owned by `owner`.
    pub fn orchard(id: &str, owner: &str, title: &str) -> Orchard {
        Orchard {
            id: EntityId::from(id),
            user_id: owner.to_string(),
            title: title.to_string(),
            description: Some(format!("{title} orchard")),
            status: OrchardStatus::Active,
            total_pockets: 100,
            filled_pockets: 0,
            pocket_price: 150.0,
            currency: Some("USD".to_string()),
            created_at: Some(Utc::now()),
            updated_at: None,
        }
    }

    /// Create a draft orchard, excluded from the public set.
    pub fn draft_orchard(id: &str, owner: &str) -> Orchard {
        Orchard {
            status: OrchardStatus::Draft,
            ..orchard(id, owner, "Draft")
        }
    }

    /// Create a cache over `remote` with default config and a manual clock.
    pub fn cache_with(
        remote: InMemoryRemote,
    ) -> (Arc<EntityCache<InMemoryRemote>>, Arc<ManualClock>) {
        cache_with_config(remote, CacheConfig::default())
    }

    /// Create a cache over `remote` with `config` and a manual clock.
    pub fn cache_with_config(
        remote: InMemoryRemote,
        config: CacheConfig,
    ) -> (Arc<EntityCache<InMemoryRemote>>, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::starting_now());
        let cache = Arc::new(EntityCache::with_clock(remote, config, clock.clone()));
        (cache, clock)
    }

    /// Notifications captured by [`recording_subscriber`].
    pub type Recorded = Arc<Mutex<Vec<(EntityId, u64)>>>;

    /// Subscribe a callback that records every `(id, version)` it sees.
    pub fn recording_subscriber<S: orchard_store::RemoteSource>(
        cache: &EntityCache<S>,
    ) -> (SubscriberHandle, Recorded) {
        let recorded: Recorded = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&recorded);
        let handle = cache.subscribe(move |id, version| {
            sink.lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner)
                .push((id.clone(), version));
        });
        (handle, recorded)
    }
}

// ============================================================================
// CUSTOM ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Assertions for cache records and results.

    use super::*;
    use orchard_store::CacheRecord;

    /// Assert that a record holds data, is idle and carries no error.
    #[track_caller]
    pub fn assert_record_fresh<T: std::fmt::Debug>(record: &CacheRecord<T>) {
        assert!(record.data.is_some(), "Expected data, got: {:?}", record);
        assert!(!record.loading, "Expected idle record, got: {:?}", record);
        assert!(record.error.is_none(), "Expected no error, got: {:?}", record);
        assert!(record.last_synced.is_some(), "Expected last_synced, got: {:?}", record);
    }

    /// Assert that a record holds no data and has never synced.
    #[track_caller]
    pub fn assert_record_empty<T: std::fmt::Debug>(record: &CacheRecord<T>) {
        assert!(record.data.is_none(), "Expected no data, got: {:?}", record);
        assert!(!record.loading, "Expected idle record, got: {:?}", record);
        assert!(record.error.is_none(), "Expected no error, got: {:?}", record);
        assert!(record.last_synced.is_none(), "Expected never synced, got: {:?}", record);
    }

    /// Assert that an OrchardResult is a Cache error.
    #[track_caller]
    pub fn assert_cache_error<T: std::fmt::Debug>(result: &OrchardResult<T>) {
        match result {
            Err(OrchardError::Cache(_)) => {}
            other => panic!("Expected Cache error, got: {:?}", other),
        }
    }

    /// Assert that an OrchardResult is a Remote error.
    #[track_caller]
    pub fn assert_remote_error<T: std::fmt::Debug>(result: &OrchardResult<T>) {
        match result {
            Err(OrchardError::Remote(_)) => {}
            other => panic!("Expected Remote error, got: {:?}", other),
        }
    }

    /// Assert that an OrchardResult is a Feed error.
    #[track_caller]
    pub fn assert_feed_error<T: std::fmt::Debug>(result: &OrchardResult<T>) {
        match result {
            Err(OrchardError::Feed(_)) => {}
            other => panic!("Expected Feed error, got: {:?}", other),
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
