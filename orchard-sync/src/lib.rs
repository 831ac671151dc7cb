//! ORCHARD sync daemon.
//!
//! Keeps an [`orchard_store::EntityCache`] warm against a REST backend and
//! applies pushed row changes from the realtime websocket through a
//! [`orchard_store::SubscriptionBridge`].

pub mod client;
pub mod config;
pub mod daemon;
pub mod error;
pub mod realtime;
pub mod rest;
pub mod telemetry;

pub use client::{ClientError, RestClient, WsClient};
pub use config::{ConfigError, SyncConfig};
pub use daemon::{run, run_with, DaemonReport, DaemonSettings};
pub use error::SyncError;
pub use realtime::{Backoff, WsChangeFeed};
pub use rest::RestRemoteSource;
