//! Constants for ORCHARD Store
//!
//! Default values for the cache, bridge and cleanup job. Every value here
//! can be overridden through the matching config struct.

// ============================================================================
// ENTITY CACHE
// ============================================================================

/// Minimum age of a successful sync before `sync` fetches again (5 seconds)
pub const DEFAULT_RATE_LIMIT_WINDOW_MS: u64 = 5_000;

/// Records not accessed for this long are evicted by cleanup (10 minutes)
pub const DEFAULT_STALENESS_THRESHOLD_SECS: u64 = 600;

/// Upper bound on a single remote fetch (30 seconds)
pub const DEFAULT_FETCH_TIMEOUT_MS: u64 = 30_000;

/// Status value selecting the public entity set during refresh
pub const DEFAULT_PUBLIC_STATUS: &str = "active";

// ============================================================================
// SUBSCRIPTION BRIDGE
// ============================================================================

/// Table whose rows are the cached entities
pub const DEFAULT_PRIMARY_TABLE: &str = "orchards";

/// Coalescing window for related-entity refreshes (100 milliseconds)
pub const DEFAULT_RELATED_DEBOUNCE_MS: u64 = 100;

/// Buffer size of the channel between the feed and the bridge task
pub const DEFAULT_FEED_CHANNEL_CAPACITY: usize = 256;

// ============================================================================
// CLEANUP JOB
// ============================================================================

/// How often the cleanup job sweeps idle records (5 minutes)
pub const DEFAULT_CLEANUP_INTERVAL_SECS: u64 = 300;
