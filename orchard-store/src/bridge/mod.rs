//! Subscription bridge.
//!
//! Connects a [`ChangeFeed`] to an [`EntityCache`]. Events flow through a
//! consumer task:
//!
//! ```text
//! feed (per table) ──► consumer ──translate──► invalidate / merge
//!                                      └─────► debouncer ──► sync (Consistent)
//! ```
//!
//! The bridge holds at most one live channel. [`SubscriptionBridge::start`]
//! opens it, [`SubscriptionBridge::shutdown`] unsubscribes every table and
//! stops the tasks.

pub mod debounce;
pub mod feed;
pub mod translate;

pub use debounce::Debouncer;
pub use feed::{ChangeFeed, FeedSubscription, InMemoryChangeFeed};
pub use translate::{translate, BridgeConfig, CacheCommand, RelatedTable};

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures_util::stream::{self, StreamExt};
use orchard_core::{ChangeEvent, EntityId, EventFilter, FeedError, OrchardResult, SubscriptionId};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::cache::{EntityCache, Freshness, RemoteSource};

/// Lifecycle of the bridge's channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeState {
    Unsubscribed,
    Subscribing,
    Subscribed,
}

/// Counters for bridge activity.
#[derive(Debug, Default)]
pub struct BridgeMetrics {
    pub events_received: AtomicU64,
    pub invalidations: AtomicU64,
    pub merges: AtomicU64,
    pub syncs_scheduled: AtomicU64,
    pub syncs_completed: AtomicU64,
    pub errors: AtomicU64,
}

impl BridgeMetrics {
    pub fn snapshot(&self) -> BridgeMetricsSnapshot {
        BridgeMetricsSnapshot {
            events_received: self.events_received.load(Ordering::Relaxed),
            invalidations: self.invalidations.load(Ordering::Relaxed),
            merges: self.merges.load(Ordering::Relaxed),
            syncs_scheduled: self.syncs_scheduled.load(Ordering::Relaxed),
            syncs_completed: self.syncs_completed.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BridgeMetricsSnapshot {
    pub events_received: u64,
    pub invalidations: u64,
    pub merges: u64,
    pub syncs_scheduled: u64,
    pub syncs_completed: u64,
    pub errors: u64,
}

/// The live channel: one feed handle per table plus the tasks draining it.
struct Channel {
    handles: Vec<SubscriptionId>,
    debouncer: Arc<Debouncer<EntityId>>,
    consumer: JoinHandle<()>,
    syncer: JoinHandle<()>,
}

impl Channel {
    fn abort(&self) {
        self.debouncer.cancel_all();
        self.consumer.abort();
        self.syncer.abort();
    }
}

/// Keeps an [`EntityCache`] in step with a [`ChangeFeed`].
pub struct SubscriptionBridge<S: RemoteSource, F: ChangeFeed> {
    cache: Arc<EntityCache<S>>,
    feed: Arc<F>,
    config: BridgeConfig,
    state: BridgeState,
    channel: Option<Channel>,
    metrics: Arc<BridgeMetrics>,
}

impl<S: RemoteSource + 'static, F: ChangeFeed + 'static> SubscriptionBridge<S, F> {
    pub fn new(cache: Arc<EntityCache<S>>, feed: Arc<F>, config: BridgeConfig) -> Self {
        Self {
            cache,
            feed,
            config,
            state: BridgeState::Unsubscribed,
            channel: None,
            metrics: Arc::new(BridgeMetrics::default()),
        }
    }

    pub fn state(&self) -> BridgeState {
        self.state
    }

    pub fn is_subscribed(&self) -> bool {
        self.state == BridgeState::Subscribed
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    pub fn metrics(&self) -> BridgeMetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Whether the consumer task is still draining events.
    pub fn is_running(&self) -> bool {
        self.channel
            .as_ref()
            .is_some_and(|channel| !channel.consumer.is_finished())
    }

    /// Subscribe to every configured table and start applying events.
    ///
    /// Fails with [`FeedError::AlreadySubscribed`] if the bridge is already
    /// started. If any table fails to subscribe, the tables subscribed so far
    /// are released and the bridge stays unsubscribed.
    pub async fn start(&mut self) -> OrchardResult<()> {
        if self.state != BridgeState::Unsubscribed {
            return Err(FeedError::AlreadySubscribed {
                table: self.config.primary_table.clone(),
            }
            .into());
        }
        self.config.validate()?;
        self.state = BridgeState::Subscribing;

        let tables: Vec<String> = self.config.tables().into_iter().map(String::from).collect();
        let mut subscriptions = Vec::new();
        for table in &tables {
            match self.feed.subscribe(table, EventFilter::All).await {
                Ok(subscription) => subscriptions.push(subscription),
                Err(err) => {
                    tracing::warn!(table = %table, error = %err, "Bridge subscribe failed");
                    for subscription in &subscriptions {
                        self.release(subscription.handle).await;
                    }
                    self.state = BridgeState::Unsubscribed;
                    return Err(err);
                }
            }
        }

        let handles = subscriptions.iter().map(|s| s.handle).collect();
        let (debouncer, settled) = Debouncer::new(self.config.related_debounce);
        let debouncer = Arc::new(debouncer);

        let consumer = tokio::spawn(consume(
            Arc::clone(&self.cache),
            self.config.clone(),
            subscriptions,
            Arc::clone(&debouncer),
            Arc::clone(&self.metrics),
        ));
        let syncer = tokio::spawn(resync(
            Arc::clone(&self.cache),
            settled,
            Arc::clone(&self.metrics),
        ));

        self.channel = Some(Channel {
            handles,
            debouncer,
            consumer,
            syncer,
        });
        self.state = BridgeState::Subscribed;
        tracing::info!(
            tables = ?tables,
            debounce_ms = self.config.related_debounce.as_millis() as u64,
            "Subscription bridge started"
        );
        Ok(())
    }

    /// Unsubscribe every table, stop the tasks and drop the channel.
    ///
    /// Pending debounced syncs are discarded. Calling this on a bridge that
    /// is not subscribed does nothing.
    pub async fn shutdown(&mut self) {
        let Some(channel) = self.channel.take() else {
            self.state = BridgeState::Unsubscribed;
            return;
        };
        channel.abort();
        for handle in &channel.handles {
            self.release(*handle).await;
        }
        self.state = BridgeState::Unsubscribed;
        tracing::info!("Subscription bridge stopped");
    }

    async fn release(&self, handle: SubscriptionId) {
        if let Err(err) = self.feed.unsubscribe(handle).await {
            tracing::warn!(subscription = %handle, error = %err, "Bridge unsubscribe failed");
        }
    }
}

impl<S: RemoteSource, F: ChangeFeed> Drop for SubscriptionBridge<S, F> {
    fn drop(&mut self) {
        if let Some(channel) = self.channel.take() {
            channel.abort();
            tracing::debug!("Subscription bridge dropped while subscribed");
        }
    }
}

impl<S: RemoteSource, F: ChangeFeed> std::fmt::Debug for SubscriptionBridge<S, F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionBridge")
            .field("state", &self.state)
            .field("config", &self.config)
            .field("metrics", &self.metrics.snapshot())
            .finish()
    }
}

/// Drain every table's events and apply the resulting commands.
async fn consume<S: RemoteSource>(
    cache: Arc<EntityCache<S>>,
    config: BridgeConfig,
    subscriptions: Vec<FeedSubscription>,
    debouncer: Arc<Debouncer<EntityId>>,
    metrics: Arc<BridgeMetrics>,
) {
    let mut events = stream::select_all(subscriptions.into_iter().map(|subscription| {
        stream::unfold(subscription.events, |mut rx| async move {
            rx.recv().await.map(|event| (event, rx))
        })
        .boxed()
    }));

    while let Some(event) = events.next().await {
        metrics.events_received.fetch_add(1, Ordering::Relaxed);
        apply_event(&cache, &config, &debouncer, &metrics, &event);
    }
    tracing::warn!("Change feed closed, bridge consumer exiting");
}

fn apply_event<S: RemoteSource>(
    cache: &EntityCache<S>,
    config: &BridgeConfig,
    debouncer: &Debouncer<EntityId>,
    metrics: &BridgeMetrics,
    event: &ChangeEvent,
) {
    for command in translate(config, event) {
        match command {
            CacheCommand::Invalidate(id) => {
                if cache.invalidate(&id) {
                    metrics.invalidations.fetch_add(1, Ordering::Relaxed);
                }
            }
            CacheCommand::Merge { id, patch } => match cache.merge(&id, &patch) {
                Ok(true) => {
                    metrics.merges.fetch_add(1, Ordering::Relaxed);
                }
                Ok(false) => {}
                Err(err) => {
                    metrics.errors.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!(entity_id = %id, error = %err, "Bridge merge failed");
                }
            },
            CacheCommand::ScheduleSync(parent) => {
                if cache.peek(&parent).is_some() {
                    metrics.syncs_scheduled.fetch_add(1, Ordering::Relaxed);
                    debouncer.trigger(parent);
                }
            }
        }
    }
}

/// Re-fetch parents whose debounce window settled.
async fn resync<S: RemoteSource>(
    cache: Arc<EntityCache<S>>,
    mut settled: mpsc::UnboundedReceiver<EntityId>,
    metrics: Arc<BridgeMetrics>,
) {
    while let Some(id) = settled.recv().await {
        let read = cache.sync_with(&id, Freshness::consistent()).await;
        metrics.syncs_completed.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(entity_id = %id, refreshed = read.is_some(), "Related change resynced parent");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheConfig;
    use crate::memory::InMemoryRemote;
    use orchard_core::{ManualClock, Orchard, OrchardStatus};
    use serde_json::json;
    use std::time::Duration;

    fn orchard(id: &str, filled: u32) -> Orchard {
        Orchard {
            id: EntityId::from(id),
            user_id: "u1".to_string(),
            title: id.to_string(),
            description: None,
            status: OrchardStatus::Active,
            total_pockets: 10,
            filled_pockets: filled,
            pocket_price: 5.0,
            currency: None,
            created_at: None,
            updated_at: None,
        }
    }

    type TestBridge = SubscriptionBridge<InMemoryRemote, InMemoryChangeFeed>;

    fn bridge() -> (TestBridge, Arc<EntityCache<InMemoryRemote>>, Arc<InMemoryChangeFeed>) {
        let cache = Arc::new(EntityCache::with_clock(
            InMemoryRemote::new(),
            CacheConfig::default(),
            Arc::new(ManualClock::starting_now()),
        ));
        let feed = Arc::new(InMemoryChangeFeed::new());
        let bridge = SubscriptionBridge::new(Arc::clone(&cache), Arc::clone(&feed), BridgeConfig::default());
        (bridge, cache, feed)
    }

    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn test_start_twice_is_an_error() {
        let (mut bridge, _, feed) = bridge();
        bridge.start().await.unwrap();
        assert_eq!(bridge.state(), BridgeState::Subscribed);
        assert_eq!(feed.subscription_count(), 2);

        assert!(bridge.start().await.is_err());
        assert_eq!(feed.subscription_count(), 2);
        bridge.shutdown().await;
    }

    #[tokio::test]
    async fn test_shutdown_unsubscribes_and_allows_restart() {
        let (mut bridge, _, feed) = bridge();
        bridge.start().await.unwrap();
        bridge.shutdown().await;

        assert_eq!(bridge.state(), BridgeState::Unsubscribed);
        assert_eq!(feed.subscription_count(), 0);
        assert!(!bridge.is_running());

        bridge.shutdown().await;
        bridge.start().await.unwrap();
        assert!(bridge.is_subscribed());
        bridge.shutdown().await;
    }

    #[tokio::test]
    async fn test_failed_subscribe_leaves_bridge_unsubscribed() {
        let (mut bridge, _, feed) = bridge();
        feed.refuse_subscriptions("offline");
        assert!(bridge.start().await.is_err());
        assert_eq!(bridge.state(), BridgeState::Unsubscribed);
        assert_eq!(feed.subscription_count(), 0);
    }

    #[tokio::test]
    async fn test_delete_invalidates_and_update_merges() {
        let (mut bridge, cache, feed) = bridge();
        cache.put(orchard("A", 1));
        cache.put(orchard("B", 1));
        bridge.start().await.unwrap();

        feed.publish(ChangeEvent::update("orchards", json!({ "id": "A", "filled_pockets": 6 })));
        feed.publish(ChangeEvent::delete("orchards", json!({ "id": "B" })));
        settle().await;

        let a = cache.peek(&EntityId::from("A")).unwrap().data.unwrap();
        assert_eq!(a.filled_pockets, 6);
        assert!(cache.peek(&EntityId::from("B")).is_none());

        let metrics = bridge.metrics();
        assert_eq!(metrics.events_received, 2);
        assert_eq!(metrics.merges, 1);
        assert_eq!(metrics.invalidations, 1);
        bridge.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_related_burst_triggers_single_parent_sync() {
        let (mut bridge, cache, feed) = bridge();
        cache.remote().insert(orchard("A", 3));
        cache.put(orchard("A", 0));
        bridge.start().await.unwrap();

        for n in 0..5 {
            feed.publish(ChangeEvent::insert("bestowals", json!({ "id": n, "orchard_id": "A" })));
        }
        // Parent not cached: ignored
        feed.publish(ChangeEvent::insert("bestowals", json!({ "id": 9, "orchard_id": "Z" })));
        settle().await;
        assert_eq!(cache.remote().fetch_count(), 0);

        tokio::time::sleep(Duration::from_millis(150)).await;
        settle().await;

        assert_eq!(cache.remote().fetch_count(), 1);
        assert_eq!(cache.peek(&EntityId::from("A")).unwrap().data.unwrap().filled_pockets, 3);
        assert!(cache.peek(&EntityId::from("Z")).is_none());
        assert_eq!(bridge.metrics().syncs_completed, 1);
        bridge.shutdown().await;
    }
}
