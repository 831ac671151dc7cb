//! ORCHARD Core - Entity Types
//!
//! Pure data structures shared by the cache, the change-feed bridge and the
//! network adapters. All other crates depend on this.

pub mod change;
pub mod clock;
pub mod entity;
pub mod error;
pub mod identity;

pub use change::{ChangeEvent, ChangeKind, EventFilter};
pub use clock::{elapsed_between, Clock, ManualClock, SystemClock};
pub use entity::{merge_json, CacheableEntity, Orchard, OrchardStatus};
pub use error::{CacheError, ConfigError, FeedError, OrchardError, OrchardResult, RemoteError};
pub use identity::{new_subscription_id, EntityId, SubscriptionId, Timestamp};
