//! ORCHARD Store - Entity Cache and Change-Feed Bridge
//!
//! Client-side cache of ORCHARD entities. Records are fetched lazily from a
//! [`RemoteSource`], kept fresh by pushed change events through the
//! [`SubscriptionBridge`], and evicted by the cleanup job once idle.

pub mod bridge;
pub mod cache;
pub mod constants;
pub mod jobs;
pub mod memory;

// Re-export cache types
pub use cache::{
    CacheConfig, CacheRead, CacheRecord, CacheStats, EntityCache, Freshness, ReadOrigin,
    RemoteSource, SubscriberFn, SubscriberHandle, SubscriberRegistry,
};

// Re-export bridge types
pub use bridge::{
    translate, BridgeConfig, BridgeMetricsSnapshot, BridgeState, CacheCommand, ChangeFeed,
    Debouncer, FeedSubscription, InMemoryChangeFeed, RelatedTable, SubscriptionBridge,
};

pub use jobs::{cleanup_task, CleanupConfig, CleanupMetrics, CleanupSnapshot};
pub use memory::InMemoryRemote;
