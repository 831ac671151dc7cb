//! Error types for ORCHARD operations

use crate::EntityId;
use std::time::Duration;
use thiserror::Error;

/// Entity cache errors.
///
/// These are recorded on cache records as their display string; callers
/// inspect the record rather than receiving the error directly.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CacheError {
    #[error("Entity id must not be empty")]
    MissingId,

    #[error("Entity not found: {id}")]
    NotFound { id: EntityId },

    #[error("Fetch failed for {id}: {reason}")]
    FetchFailed { id: EntityId, reason: String },

    #[error("Fetch for {id} timed out after {timeout:?}")]
    FetchTimeout { id: EntityId, timeout: Duration },

    #[error("Merge failed for {id}: {reason}")]
    MergeFailed { id: EntityId, reason: String },
}

/// Errors raised by remote data source implementations.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RemoteError {
    #[error("Remote {operation} returned status {status}: {body}")]
    Status {
        operation: String,
        status: u16,
        body: String,
    },

    #[error("Remote {operation} transport failure: {reason}")]
    Transport { operation: String, reason: String },

    #[error("Remote {operation} returned an undecodable payload: {reason}")]
    Decode { operation: String, reason: String },

    #[error("Remote source unavailable: {reason}")]
    Unavailable { reason: String },
}

/// Change feed and bridge errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FeedError {
    #[error("Subscribe to {table} failed: {reason}")]
    SubscribeFailed { table: String, reason: String },

    #[error("Channel for {table} is already subscribed")]
    AlreadySubscribed { table: String },

    #[error("No active subscription")]
    NotSubscribed,

    #[error("Change event decode failed: {reason}")]
    Decode { reason: String },

    #[error("Change feed channel closed")]
    ChannelClosed,
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required configuration field: {field}")]
    MissingRequired { field: String },

    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },
}

/// Master error type for all ORCHARD errors.
#[derive(Debug, Clone, Error)]
pub enum OrchardError {
    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("Remote error: {0}")]
    Remote(#[from] RemoteError),

    #[error("Feed error: {0}")]
    Feed(#[from] FeedError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
}

/// Result type alias for ORCHARD operations.
pub type OrchardResult<T> = Result<T, OrchardError>;

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_error_display_not_found() {
        let err = CacheError::NotFound {
            id: EntityId::from("A"),
        };
        let msg = format!("{}", err);
        assert!(msg.contains("Entity not found"));
        assert!(msg.contains("A"));
    }

    #[test]
    fn test_cache_error_display_timeout() {
        let err = CacheError::FetchTimeout {
            id: EntityId::from("orchard-7"),
            timeout: Duration::from_secs(30),
        };
        let msg = format!("{}", err);
        assert!(msg.contains("timed out"));
        assert!(msg.contains("orchard-7"));
        assert!(msg.contains("30s"));
    }

    #[test]
    fn test_remote_error_display_status() {
        let err = RemoteError::Status {
            operation: "fetch_entity".to_string(),
            status: 503,
            body: "upstream down".to_string(),
        };
        let msg = format!("{}", err);
        assert!(msg.contains("503"));
        assert!(msg.contains("fetch_entity"));
        assert!(msg.contains("upstream down"));
    }

    #[test]
    fn test_config_error_display_invalid_value() {
        let err = ConfigError::InvalidValue {
            field: "rate_limit_window".to_string(),
            value: "0".to_string(),
            reason: "must be > 0".to_string(),
        };
        let msg = format!("{}", err);
        assert!(msg.contains("rate_limit_window"));
        assert!(msg.contains("must be > 0"));
    }

    #[test]
    fn test_orchard_error_from_variants() {
        let cache = OrchardError::from(CacheError::MissingId);
        assert!(matches!(cache, OrchardError::Cache(_)));

        let remote = OrchardError::from(RemoteError::Unavailable {
            reason: "offline".to_string(),
        });
        assert!(matches!(remote, OrchardError::Remote(_)));

        let feed = OrchardError::from(FeedError::ChannelClosed);
        assert!(matches!(feed, OrchardError::Feed(_)));

        let config = OrchardError::from(ConfigError::MissingRequired {
            field: "table".to_string(),
        });
        assert!(matches!(config, OrchardError::Config(_)));
    }
}
