//! Cache Cleanup Background Task
//!
//! Periodically evicts cache records nobody has read for longer than the
//! cache's staleness threshold. Records with a fetch in flight are never
//! evicted.
//!
//! # Configuration
//!
//! ```rust
//! use orchard_store::jobs::CleanupConfig;
//! use std::time::Duration;
//!
//! let config = CleanupConfig {
//!     interval: Duration::from_secs(300), // Sweep every five minutes
//!     final_sweep: true,                  // Sweep once more on shutdown
//! };
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};

use orchard_core::ConfigError;

use crate::cache::{EntityCache, RemoteSource};
use crate::constants::DEFAULT_CLEANUP_INTERVAL_SECS;

// ============================================================================
// CONFIGURATION
// ============================================================================

/// Configuration for the cache cleanup background task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CleanupConfig {
    /// How often to sweep (default: 5 minutes)
    pub interval: Duration,

    /// Whether to sweep once more when shutdown is signalled (default: true)
    pub final_sweep: bool,
}

impl Default for CleanupConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(DEFAULT_CLEANUP_INTERVAL_SECS),
            final_sweep: true,
        }
    }
}

impl CleanupConfig {
    /// Create CleanupConfig from environment variables.
    ///
    /// # Environment Variables
    /// - `ORCHARD_CLEANUP_INTERVAL_SECS`: Sweep interval (default: 300)
    /// - `ORCHARD_CLEANUP_FINAL_SWEEP`: Sweep on shutdown (default: true)
    pub fn from_env() -> Self {
        let interval = Duration::from_secs(
            std::env::var("ORCHARD_CLEANUP_INTERVAL_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .filter(|secs: &u64| *secs > 0)
                .unwrap_or(DEFAULT_CLEANUP_INTERVAL_SECS),
        );

        let final_sweep = std::env::var("ORCHARD_CLEANUP_FINAL_SWEEP")
            .ok()
            .map(|s| s.to_lowercase() != "false")
            .unwrap_or(true);

        Self {
            interval,
            final_sweep,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.interval.is_zero() {
            return Err(ConfigError::InvalidValue {
                field: "interval".to_string(),
                value: "0".to_string(),
                reason: "must be > 0".to_string(),
            });
        }
        Ok(())
    }
}

// ============================================================================
// METRICS
// ============================================================================

/// Metrics for cleanup operations.
#[derive(Debug, Default)]
pub struct CleanupMetrics {
    /// Total sweeps run, including the final one
    pub cycles: AtomicU64,

    /// Total records evicted since startup
    pub evicted: AtomicU64,
}

impl CleanupMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get current snapshot of all metrics.
    pub fn snapshot(&self) -> CleanupSnapshot {
        CleanupSnapshot {
            cycles: self.cycles.load(Ordering::Relaxed),
            evicted: self.evicted.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of cleanup metrics at a point in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CleanupSnapshot {
    pub cycles: u64,
    pub evicted: u64,
}

// ============================================================================
// BACKGROUND TASK
// ============================================================================

/// Background task that periodically evicts idle cache records.
///
/// Runs until `shutdown_rx` flips to `true` (or its sender is dropped),
/// then sweeps once more if `final_sweep` is set. An invalid config falls
/// back to the default interval.
///
/// # Example
///
/// ```ignore
/// let (shutdown_tx, shutdown_rx) = watch::channel(false);
/// let handle = tokio::spawn(cleanup_task(Arc::clone(&cache), CleanupConfig::default(), shutdown_rx));
///
/// // Later, trigger shutdown
/// let _ = shutdown_tx.send(true);
/// let metrics = handle.await?;
/// ```
pub async fn cleanup_task<S: RemoteSource>(
    cache: Arc<EntityCache<S>>,
    mut config: CleanupConfig,
    mut shutdown_rx: watch::Receiver<bool>,
) -> Arc<CleanupMetrics> {
    let metrics = Arc::new(CleanupMetrics::new());

    if let Err(err) = config.validate() {
        tracing::warn!(error = %err, "Invalid cleanup config, using default interval");
        config.interval = CleanupConfig::default().interval;
    }

    let mut sweep_interval = interval(config.interval);
    sweep_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    // The first tick completes immediately; nothing is idle yet.
    sweep_interval.tick().await;

    tracing::info!(
        interval_secs = config.interval.as_secs(),
        staleness_secs = cache.config().staleness_threshold.as_secs(),
        "Cache cleanup task started"
    );

    loop {
        tokio::select! {
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    tracing::info!("Cache cleanup task shutting down");
                    break;
                }
            }

            _ = sweep_interval.tick() => {
                sweep(&cache, &metrics);
            }
        }
    }

    if config.final_sweep {
        sweep(&cache, &metrics);
    }

    let snapshot = metrics.snapshot();
    tracing::info!(
        cycles = snapshot.cycles,
        evicted = snapshot.evicted,
        "Cache cleanup task completed"
    );

    metrics
}

/// Run one sweep.
fn sweep<S: RemoteSource>(cache: &EntityCache<S>, metrics: &CleanupMetrics) {
    metrics.cycles.fetch_add(1, Ordering::Relaxed);
    let evicted = cache.cleanup();
    if evicted > 0 {
        metrics.evicted.fetch_add(evicted as u64, Ordering::Relaxed);
        tracing::info!(evicted, remaining = cache.len(), "Cache cleanup cycle completed");
    } else {
        tracing::trace!("Cache cleanup cycle completed with nothing to evict");
    }
}
