//! Entity cache with explicit freshness and push notifications.
//!
//! The cache keeps one [`CacheRecord`] per entity id. Reads never block on
//! the remote source; [`EntityCache::sync`] decides per call whether the
//! cached snapshot is good enough or a fetch is needed:
//!
//! - at most one fetch per id is in flight; overlapping syncs get the
//!   cached data back
//! - a snapshot synced inside the rate-limit window is served as is
//! - a failed fetch keeps the previous snapshot and records the error on
//!   the record
//!
//! Every observable mutation bumps a cache-wide version and is announced to
//! the [`SubscriberRegistry`].
//!
//! # Example
//!
//! ```ignore
//! let cache = EntityCache::new(remote, CacheConfig::default());
//!
//! // Rate-limited sync
//! let read = cache.sync(&id).await;
//!
//! // Bypass the rate limit (still one fetch per id at a time)
//! let read = cache.sync_with(&id, Freshness::Consistent).await;
//! ```

pub mod entity_cache;
pub mod freshness;
pub mod record;
pub mod registry;
pub mod traits;

pub use entity_cache::{CacheConfig, EntityCache};
pub use freshness::{CacheRead, Freshness, ReadOrigin};
pub use record::CacheRecord;
pub use registry::{SubscriberFn, SubscriberHandle, SubscriberRegistry};
pub use traits::{CacheStats, RemoteSource};
