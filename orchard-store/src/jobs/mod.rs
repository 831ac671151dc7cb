//! Background Jobs for the entity cache
//!
//! - `cleanup`: Evicts records that have not been read within the
//!   staleness threshold
//!
//! # Usage
//!
//! ```ignore
//! use orchard_store::jobs::{cleanup_task, CleanupConfig};
//! use tokio::sync::watch;
//!
//! let (shutdown_tx, shutdown_rx) = watch::channel(false);
//! tokio::spawn(cleanup_task(Arc::clone(&cache), CleanupConfig::default(), shutdown_rx));
//!
//! // On shutdown
//! let _ = shutdown_tx.send(true);
//! ```

pub mod cleanup;

pub use cleanup::{cleanup_task, CleanupConfig, CleanupMetrics, CleanupSnapshot};
