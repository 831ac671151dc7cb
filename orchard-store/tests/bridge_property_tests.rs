//! Property-Based Tests for the Subscription Bridge
//!
//! Translation rules for primary and related tables, and the end-to-end
//! path from a published change event to the cache.

use orchard_core::{ChangeEvent, ChangeKind, EntityId};
use orchard_store::{
    translate, BridgeConfig, BridgeState, CacheCommand, InMemoryChangeFeed, InMemoryRemote,
    SubscriptionBridge,
};
use orchard_test_utils::assertions::assert_feed_error;
use orchard_test_utils::fixtures::{cache_with, orchard, recording_subscriber};
use orchard_test_utils::generators::arb_change_event;
use proptest::prelude::*;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

async fn settle() {
    for _ in 0..16 {
        tokio::task::yield_now().await;
    }
}

proptest! {
    #[test]
    fn primary_events_translate_by_kind(event in arb_change_event("orchards", "id")) {
        let config = BridgeConfig::default();
        let commands = translate(&config, &event);
        let id = event.id_column("id").expect("generated id");

        match event.kind {
            ChangeKind::Insert => prop_assert!(commands.is_empty()),
            ChangeKind::Delete => prop_assert_eq!(commands, vec![CacheCommand::Invalidate(id)]),
            ChangeKind::Update => {
                prop_assert_eq!(commands.len(), 1);
                let is_merge = matches!(&commands[0], CacheCommand::Merge { id: merged, .. } if *merged == id);
                prop_assert!(is_merge);
            }
        }
    }

    #[test]
    fn related_events_schedule_their_parent(event in arb_change_event("bestowals", "orchard_id")) {
        let config = BridgeConfig::default();
        let parent = event.id_column("orchard_id").expect("generated parent");
        prop_assert_eq!(translate(&config, &event), vec![CacheCommand::ScheduleSync(parent)]);
    }

    #[test]
    fn unrelated_tables_are_ignored(event in arb_change_event("profiles", "id")) {
        prop_assert!(translate(&BridgeConfig::default(), &event).is_empty());
    }
}

#[tokio::test]
async fn update_event_merges_into_cached_record_and_notifies() {
    let (cache, _) = cache_with(InMemoryRemote::new());
    let id = cache.put(orchard("A", "u1", "X"));
    let feed = Arc::new(InMemoryChangeFeed::new());
    let mut bridge =
        SubscriptionBridge::new(Arc::clone(&cache), Arc::clone(&feed), BridgeConfig::default());
    bridge.start().await.unwrap();
    let (_sub, recorded) = recording_subscriber(&cache);
    let version = cache.version();

    feed.publish(ChangeEvent::update(
        "orchards",
        json!({ "id": "A", "filled_pockets": 42, "title": "X (updated)" }),
    ));
    settle().await;

    let record = cache.peek(&id).unwrap();
    let data = record.data.unwrap();
    assert_eq!(data.filled_pockets, 42);
    assert_eq!(data.title, "X (updated)");
    assert_eq!(data.user_id, "u1");
    assert_eq!(cache.version(), version + 1);
    assert_eq!(recorded.lock().unwrap().as_slice(), &[(id, version + 1)]);
    bridge.shutdown().await;
}

#[tokio::test]
async fn update_for_uncached_entity_is_ignored() {
    let (cache, _) = cache_with(InMemoryRemote::new());
    let feed = Arc::new(InMemoryChangeFeed::new());
    let mut bridge =
        SubscriptionBridge::new(Arc::clone(&cache), Arc::clone(&feed), BridgeConfig::default());
    bridge.start().await.unwrap();

    feed.publish(ChangeEvent::update("orchards", json!({ "id": "ghost", "title": "?" })));
    feed.publish(ChangeEvent::insert("orchards", json!({ "id": "new", "title": "?" })));
    settle().await;

    assert!(cache.is_empty());
    assert_eq!(cache.version(), 0);
    assert_eq!(bridge.metrics().events_received, 2);
    bridge.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn related_burst_coalesces_into_one_consistent_fetch() {
    let remote = InMemoryRemote::with_entities([orchard("A", "u1", "X")]);
    let (cache, _) = cache_with(remote);
    let id = EntityId::from("A");
    cache.sync(&id).await.unwrap();
    assert_eq!(cache.remote().fetch_count(), 1);

    let mut updated = orchard("A", "u1", "X");
    updated.filled_pockets = 12;
    cache.remote().insert(updated);

    let feed = Arc::new(InMemoryChangeFeed::new());
    let config = BridgeConfig::default().with_related_debounce(Duration::from_millis(100));
    let mut bridge = SubscriptionBridge::new(Arc::clone(&cache), Arc::clone(&feed), config);
    bridge.start().await.unwrap();

    for n in 0..8 {
        feed.publish(ChangeEvent::insert(
            "bestowals",
            json!({ "id": n, "orchard_id": "A", "pockets": 1 }),
        ));
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    tokio::time::sleep(Duration::from_millis(200)).await;
    settle().await;

    // Still inside the plain rate-limit window, yet the bridge refetched.
    assert_eq!(cache.remote().fetch_count(), 2);
    assert_eq!(cache.peek(&id).unwrap().data.unwrap().filled_pockets, 12);
    assert_eq!(bridge.metrics().syncs_completed, 1);
    bridge.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn shutdown_discards_pending_related_sync() {
    let remote = InMemoryRemote::with_entities([orchard("A", "u1", "X")]);
    let (cache, _) = cache_with(remote);
    cache.sync(&EntityId::from("A")).await.unwrap();

    let feed = Arc::new(InMemoryChangeFeed::new());
    let mut bridge =
        SubscriptionBridge::new(Arc::clone(&cache), Arc::clone(&feed), BridgeConfig::default());
    bridge.start().await.unwrap();

    feed.publish(ChangeEvent::insert("bestowals", json!({ "id": 1, "orchard_id": "A" })));
    settle().await;
    bridge.shutdown().await;
    tokio::time::sleep(Duration::from_millis(500)).await;

    assert_eq!(cache.remote().fetch_count(), 1);
    assert_eq!(bridge.state(), BridgeState::Unsubscribed);
    assert_eq!(feed.subscription_count(), 0);
}

#[tokio::test]
async fn starting_an_active_bridge_fails() {
    let (cache, _) = cache_with(InMemoryRemote::new());
    let feed = Arc::new(InMemoryChangeFeed::new());
    let mut bridge = SubscriptionBridge::new(cache, feed, BridgeConfig::default());
    bridge.start().await.unwrap();

    assert_feed_error(&bridge.start().await);
    assert!(bridge.is_subscribed());
    bridge.shutdown().await;
}
