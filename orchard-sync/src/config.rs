//! Configuration loading for the ORCHARD sync daemon.
//!
//! Connection fields are required. The `cache`, `bridge`, `cleanup` and
//! `logging` sections may be omitted; the library defaults apply.

use orchard_store::{BridgeConfig, CacheConfig, CleanupConfig, RelatedTable};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SyncConfig {
    /// Base URL of the REST endpoint, e.g. `https://project.example.co`.
    pub rest_base_url: String,
    /// Realtime websocket endpoint.
    pub ws_endpoint: String,
    pub auth: AuthConfig,
    pub request_timeout_ms: u64,
    /// Owner whose entities are preloaded next to the public set.
    #[serde(default)]
    pub owner_id: Option<String>,
    /// How often cache statistics are logged.
    pub stats_interval_secs: u64,
    pub reconnect: ReconnectConfig,
    #[serde(default)]
    pub cache: Option<CacheSection>,
    #[serde(default)]
    pub bridge: Option<BridgeSection>,
    #[serde(default)]
    pub cleanup: Option<CleanupSection>,
    #[serde(default)]
    pub logging: Option<LoggingConfig>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AuthConfig {
    /// Project key, sent as `apikey`.
    pub api_key: String,
    /// User token, sent as `Authorization: Bearer`. Falls back to the key.
    #[serde(default)]
    pub jwt: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ReconnectConfig {
    pub initial_ms: u64,
    pub max_ms: u64,
    pub multiplier: f64,
    pub jitter_ms: u64,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CacheSection {
    pub rate_limit_ms: Option<u64>,
    pub staleness_secs: Option<u64>,
    /// `0` disables the fetch timeout.
    pub fetch_timeout_ms: Option<u64>,
    pub public_status: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BridgeSection {
    pub primary_table: Option<String>,
    pub id_column: Option<String>,
    pub debounce_ms: Option<u64>,
    pub channel_capacity: Option<usize>,
    pub related: Option<Vec<RelatedSection>>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RelatedSection {
    pub table: String,
    pub parent_column: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CleanupSection {
    pub interval_secs: Option<u64>,
    pub final_sweep: Option<bool>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    /// Directive used when `RUST_LOG` is unset.
    pub filter: Option<String>,
    /// Emit JSON lines instead of human-readable output.
    #[serde(default)]
    pub json: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing configuration file path (use --config or ORCHARD_SYNC_CONFIG)")]
    MissingConfigPath,
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Invalid config value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },
    #[error(transparent)]
    Section(#[from] orchard_core::ConfigError),
}

impl SyncConfig {
    pub fn load() -> Result<Self, ConfigError> {
        let path = config_path_from_args().or_else(config_path_from_env);
        let path = path.ok_or(ConfigError::MissingConfigPath)?;
        let config = Self::from_path(&path)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml(&contents)
    }

    pub fn from_toml(contents: &str) -> Result<Self, ConfigError> {
        let config: SyncConfig = toml::from_str(contents)?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.rest_base_url.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "rest_base_url",
                reason: "must not be empty".to_string(),
            });
        }
        if !self.rest_base_url.starts_with("http://") && !self.rest_base_url.starts_with("https://")
        {
            return Err(ConfigError::InvalidValue {
                field: "rest_base_url",
                reason: "must start with http:// or https://".to_string(),
            });
        }
        if !self.ws_endpoint.starts_with("ws://") && !self.ws_endpoint.starts_with("wss://") {
            return Err(ConfigError::InvalidValue {
                field: "ws_endpoint",
                reason: "must start with ws:// or wss://".to_string(),
            });
        }
        if self.auth.api_key.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "auth.api_key",
                reason: "must not be empty".to_string(),
            });
        }
        if self.auth.jwt.as_deref().is_some_and(|jwt| jwt.trim().is_empty()) {
            return Err(ConfigError::InvalidValue {
                field: "auth.jwt",
                reason: "must not be empty when set".to_string(),
            });
        }
        if self.request_timeout_ms == 0 {
            return Err(ConfigError::InvalidValue {
                field: "request_timeout_ms",
                reason: "must be > 0".to_string(),
            });
        }
        if self.stats_interval_secs == 0 {
            return Err(ConfigError::InvalidValue {
                field: "stats_interval_secs",
                reason: "must be > 0".to_string(),
            });
        }
        if self.owner_id.as_deref().is_some_and(|owner| owner.trim().is_empty()) {
            return Err(ConfigError::InvalidValue {
                field: "owner_id",
                reason: "must not be empty when set".to_string(),
            });
        }
        if self.reconnect.initial_ms == 0 {
            return Err(ConfigError::InvalidValue {
                field: "reconnect.initial_ms",
                reason: "must be > 0".to_string(),
            });
        }
        if self.reconnect.max_ms < self.reconnect.initial_ms {
            return Err(ConfigError::InvalidValue {
                field: "reconnect.max_ms",
                reason: "must be >= initial_ms".to_string(),
            });
        }
        if self.reconnect.multiplier < 1.0 {
            return Err(ConfigError::InvalidValue {
                field: "reconnect.multiplier",
                reason: "must be >= 1.0".to_string(),
            });
        }
        if self.cleanup_config().interval.is_zero() {
            return Err(ConfigError::InvalidValue {
                field: "cleanup.interval_secs",
                reason: "must be > 0".to_string(),
            });
        }
        self.cache_config().validate()?;
        self.bridge_config().validate()?;
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn stats_interval(&self) -> Duration {
        Duration::from_secs(self.stats_interval_secs)
    }

    /// Cache settings with library defaults for anything left out.
    pub fn cache_config(&self) -> CacheConfig {
        let mut config = CacheConfig::default();
        let Some(section) = &self.cache else {
            return config;
        };
        if let Some(ms) = section.rate_limit_ms {
            config = config.with_rate_limit_window(Duration::from_millis(ms));
        }
        if let Some(secs) = section.staleness_secs {
            config = config.with_staleness_threshold(Duration::from_secs(secs));
        }
        if let Some(ms) = section.fetch_timeout_ms {
            config = config.with_fetch_timeout((ms > 0).then(|| Duration::from_millis(ms)));
        }
        if let Some(status) = &section.public_status {
            config = config.with_public_status(status.clone());
        }
        config
    }

    /// Bridge settings with library defaults for anything left out.
    pub fn bridge_config(&self) -> BridgeConfig {
        let mut config = BridgeConfig::default();
        let Some(section) = &self.bridge else {
            return config;
        };
        if let Some(table) = &section.primary_table {
            config = config.with_primary_table(table.clone());
        }
        if let Some(column) = &section.id_column {
            config = config.with_id_column(column.clone());
        }
        if let Some(ms) = section.debounce_ms {
            config = config.with_related_debounce(Duration::from_millis(ms));
        }
        if let Some(capacity) = section.channel_capacity {
            config = config.with_channel_capacity(capacity);
        }
        if let Some(related) = &section.related {
            config = config.with_related(
                related
                    .iter()
                    .map(|r| RelatedTable::new(r.table.clone(), r.parent_column.clone()))
                    .collect(),
            );
        }
        config
    }

    /// Cleanup settings with library defaults for anything left out.
    pub fn cleanup_config(&self) -> CleanupConfig {
        let mut config = CleanupConfig::default();
        if let Some(section) = &self.cleanup {
            if let Some(secs) = section.interval_secs {
                config = config.with_interval(Duration::from_secs(secs));
            }
            if let Some(final_sweep) = section.final_sweep {
                config.final_sweep = final_sweep;
            }
        }
        config
    }

    pub fn logging(&self) -> LoggingConfig {
        self.logging.clone().unwrap_or_default()
    }
}

fn config_path_from_env() -> Option<PathBuf> {
    std::env::var("ORCHARD_SYNC_CONFIG").ok().map(PathBuf::from)
}

fn config_path_from_args() -> Option<PathBuf> {
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        if arg == "--config" {
            return args.next().map(PathBuf::from);
        }
    }
    None
}
