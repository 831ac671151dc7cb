//! Change feed seam.
//!
//! A [`ChangeFeed`] delivers row mutations for one table at a time over a
//! bounded channel. The network implementation lives in `orchard-sync`;
//! [`InMemoryChangeFeed`] publishes events handed to it directly.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use orchard_core::{
    new_subscription_id, ChangeEvent, EventFilter, FeedError, OrchardResult, SubscriptionId,
};
use tokio::sync::mpsc;

use crate::constants::DEFAULT_FEED_CHANNEL_CAPACITY;

/// An active feed subscription for one table.
#[derive(Debug)]
pub struct FeedSubscription {
    /// Handle to pass back to [`ChangeFeed::unsubscribe`].
    pub handle: SubscriptionId,
    pub table: String,
    /// Events matching the subscription filter, in commit order.
    pub events: mpsc::Receiver<ChangeEvent>,
}

/// Source of pushed change events.
#[async_trait]
pub trait ChangeFeed: Send + Sync {
    /// Start receiving events for `table` that pass `filter`.
    async fn subscribe(&self, table: &str, filter: EventFilter)
        -> OrchardResult<FeedSubscription>;

    /// Stop a subscription. The matching receiver sees the channel close.
    async fn unsubscribe(&self, handle: SubscriptionId) -> OrchardResult<()>;
}

#[async_trait]
impl<F: ChangeFeed + ?Sized> ChangeFeed for Arc<F> {
    async fn subscribe(
        &self,
        table: &str,
        filter: EventFilter,
    ) -> OrchardResult<FeedSubscription> {
        (**self).subscribe(table, filter).await
    }

    async fn unsubscribe(&self, handle: SubscriptionId) -> OrchardResult<()> {
        (**self).unsubscribe(handle).await
    }
}

struct Sink {
    table: String,
    filter: EventFilter,
    tx: mpsc::Sender<ChangeEvent>,
}

/// Change feed driven by [`InMemoryChangeFeed::publish`].
pub struct InMemoryChangeFeed {
    capacity: usize,
    sinks: Mutex<HashMap<SubscriptionId, Sink>>,
    refuse: Mutex<Option<String>>,
}

impl Default for InMemoryChangeFeed {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_FEED_CHANNEL_CAPACITY)
    }
}

impl InMemoryChangeFeed {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a feed whose subscription channels hold `capacity` events.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            sinks: Mutex::new(HashMap::new()),
            refuse: Mutex::new(None),
        }
    }

    /// Deliver `event` to every matching subscription.
    ///
    /// Subscriptions whose channel is full drop the event. Returns the
    /// number of subscriptions that received it.
    pub fn publish(&self, event: ChangeEvent) -> usize {
        let mut delivered = 0;
        let mut closed = Vec::new();
        let mut sinks = self.sinks();
        for (handle, sink) in sinks.iter() {
            if sink.table != event.table || !sink.filter.matches(event.kind) {
                continue;
            }
            match sink.tx.try_send(event.clone()) {
                Ok(()) => delivered += 1,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    tracing::warn!(
                        subscription = %handle,
                        table = %sink.table,
                        "Change feed channel full, event dropped"
                    );
                }
                Err(mpsc::error::TrySendError::Closed(_)) => closed.push(*handle),
            }
        }
        for handle in closed {
            sinks.remove(&handle);
        }
        delivered
    }

    /// Make subsequent `subscribe` calls fail with `reason`.
    pub fn refuse_subscriptions(&self, reason: impl Into<String>) {
        *self.refuse.lock().unwrap_or_else(PoisonError::into_inner) = Some(reason.into());
    }

    pub fn accept_subscriptions(&self) {
        *self.refuse.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }

    /// Number of live subscriptions.
    pub fn subscription_count(&self) -> usize {
        self.sinks().len()
    }

    /// Whether any live subscription listens on `table`.
    pub fn is_subscribed(&self, table: &str) -> bool {
        self.sinks().values().any(|sink| sink.table == table)
    }

    fn sinks(&self) -> MutexGuard<'_, HashMap<SubscriptionId, Sink>> {
        self.sinks.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for InMemoryChangeFeed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryChangeFeed")
            .field("capacity", &self.capacity)
            .field("subscriptions", &self.subscription_count())
            .finish()
    }
}

#[async_trait]
impl ChangeFeed for InMemoryChangeFeed {
    async fn subscribe(
        &self,
        table: &str,
        filter: EventFilter,
    ) -> OrchardResult<FeedSubscription> {
        let refused = self
            .refuse
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if let Some(reason) = refused {
            return Err(FeedError::SubscribeFailed {
                table: table.to_string(),
                reason,
            }
            .into());
        }

        let (tx, events) = mpsc::channel(self.capacity);
        let handle = new_subscription_id();
        self.sinks().insert(
            handle,
            Sink {
                table: table.to_string(),
                filter,
                tx,
            },
        );
        tracing::debug!(subscription = %handle, table, filter = filter.as_str(), "Feed subscribed");
        Ok(FeedSubscription {
            handle,
            table: table.to_string(),
            events,
        })
    }

    async fn unsubscribe(&self, handle: SubscriptionId) -> OrchardResult<()> {
        match self.sinks().remove(&handle) {
            Some(sink) => {
                tracing::debug!(subscription = %handle, table = %sink.table, "Feed unsubscribed");
                Ok(())
            }
            None => Err(FeedError::NotSubscribed.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use orchard_core::ChangeKind;
    use serde_json::json;

    #[tokio::test]
    async fn test_publish_routes_by_table_and_filter() {
        let feed = InMemoryChangeFeed::new();
        let mut all = feed.subscribe("orchards", EventFilter::All).await.unwrap();
        let mut deletes = feed
            .subscribe("orchards", EventFilter::Only(ChangeKind::Delete))
            .await
            .unwrap();
        let mut other = feed.subscribe("bestowals", EventFilter::All).await.unwrap();

        assert_eq!(feed.publish(ChangeEvent::update("orchards", json!({ "id": "A" }))), 1);
        assert_eq!(feed.publish(ChangeEvent::delete("orchards", json!({ "id": "A" }))), 2);

        assert_eq!(all.events.recv().await.unwrap().kind, ChangeKind::Update);
        assert_eq!(all.events.recv().await.unwrap().kind, ChangeKind::Delete);
        assert_eq!(deletes.events.recv().await.unwrap().kind, ChangeKind::Delete);
        assert!(other.events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_unsubscribe_closes_channel() {
        let feed = InMemoryChangeFeed::new();
        let mut sub = feed.subscribe("orchards", EventFilter::All).await.unwrap();
        feed.unsubscribe(sub.handle).await.unwrap();

        assert_eq!(feed.subscription_count(), 0);
        assert!(sub.events.recv().await.is_none());
        assert!(feed.unsubscribe(sub.handle).await.is_err());
    }

    #[tokio::test]
    async fn test_full_channel_drops_events() {
        let feed = InMemoryChangeFeed::with_capacity(1);
        let _sub = feed.subscribe("orchards", EventFilter::All).await.unwrap();
        assert_eq!(feed.publish(ChangeEvent::insert("orchards", json!({ "id": "A" }))), 1);
        assert_eq!(feed.publish(ChangeEvent::insert("orchards", json!({ "id": "B" }))), 0);
    }

    #[tokio::test]
    async fn test_dropped_receiver_is_pruned() {
        let feed = InMemoryChangeFeed::new();
        let sub = feed.subscribe("orchards", EventFilter::All).await.unwrap();
        drop(sub);
        assert_eq!(feed.publish(ChangeEvent::insert("orchards", json!({ "id": "A" }))), 0);
        assert_eq!(feed.subscription_count(), 0);
    }

    #[tokio::test]
    async fn test_refused_subscription() {
        let feed = InMemoryChangeFeed::new();
        feed.refuse_subscriptions("offline");
        let err = feed.subscribe("orchards", EventFilter::All).await.unwrap_err();
        assert!(err.to_string().contains("offline"));
        feed.accept_subscriptions();
        assert!(feed.subscribe("orchards", EventFilter::All).await.is_ok());
    }
}
