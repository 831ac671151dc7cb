//! Error types for the sync daemon.

use crate::client::ClientError;
use crate::config::ConfigError;
use orchard_core::OrchardError;

#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Client(#[from] ClientError),
    #[error(transparent)]
    Orchard(#[from] OrchardError),
    #[error("Background task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
    #[error("Failed to init tracing: {0}")]
    Telemetry(String),
}
