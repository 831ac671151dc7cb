use orchard_store::RelatedTable;
use orchard_sync::config::{AuthConfig, ConfigError, ReconnectConfig, SyncConfig};
use orchard_sync::Backoff;
use proptest::prelude::*;
use std::io::Write;
use std::time::Duration;

const MINIMAL: &str = r#"
rest_base_url = "https://project.example.co"
ws_endpoint = "wss://project.example.co/realtime"
request_timeout_ms = 5000
stats_interval_secs = 60

[auth]
api_key = "anon-key"

[reconnect]
initial_ms = 250
max_ms = 5000
multiplier = 1.5
jitter_ms = 100
"#;

fn base_config() -> SyncConfig {
    SyncConfig::from_toml(MINIMAL).unwrap()
}

#[test]
fn minimal_config_uses_library_defaults() {
    let config = base_config();
    config.validate().unwrap();

    let cache = config.cache_config();
    assert_eq!(cache.rate_limit_window, Duration::from_secs(5));
    assert_eq!(cache.public_status, "active");
    let bridge = config.bridge_config();
    assert_eq!(bridge.primary_table, "orchards");
    assert_eq!(bridge.related, vec![RelatedTable::new("bestowals", "orchard_id")]);
    assert!(config.cleanup_config().final_sweep);
    assert!(!config.logging().json);
    assert!(config.owner_id.is_none());
}

#[test]
fn config_file_sections_override_defaults() {
    let contents = format!(
        r#"owner_id = "u1"
{MINIMAL}
[cache]
rate_limit_ms = 1000
fetch_timeout_ms = 0
public_status = "open"

[bridge]
primary_table = "groves"
debounce_ms = 250

[[bridge.related]]
table = "pledges"
parent_column = "grove_id"

[cleanup]
interval_secs = 30
final_sweep = false

[logging]
filter = "orchard_sync=debug"
json = true
"#
    );
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(contents.as_bytes()).unwrap();

    let config = SyncConfig::from_path(file.path()).unwrap();
    config.validate().unwrap();

    assert_eq!(config.owner_id.as_deref(), Some("u1"));
    let cache = config.cache_config();
    assert_eq!(cache.rate_limit_window, Duration::from_secs(1));
    assert_eq!(cache.fetch_timeout, None);
    assert_eq!(cache.public_status, "open");
    let bridge = config.bridge_config();
    assert_eq!(bridge.primary_table, "groves");
    assert_eq!(bridge.related_debounce, Duration::from_millis(250));
    assert_eq!(bridge.related, vec![RelatedTable::new("pledges", "grove_id")]);
    let cleanup = config.cleanup_config();
    assert_eq!(cleanup.interval, Duration::from_secs(30));
    assert!(!cleanup.final_sweep);
    assert!(config.logging().json);
}

#[test]
fn owner_id_must_precede_sections() {
    // A key after a table header belongs to that table.
    let contents = format!("{MINIMAL}\nowner_id = \"u1\"\n");
    assert!(matches!(
        SyncConfig::from_toml(&contents),
        Err(ConfigError::Parse(_))
    ));
}

#[test]
fn unknown_fields_are_rejected() {
    let contents = MINIMAL.replace("stats_interval_secs = 60", "stats_interval_secs = 60\nverbose = true");
    assert!(matches!(
        SyncConfig::from_toml(&contents),
        Err(ConfigError::Parse(_))
    ));
}

#[test]
fn missing_file_is_an_io_error() {
    let dir = tempfile::tempdir().unwrap();
    let result = SyncConfig::from_path(&dir.path().join("absent.toml"));
    assert!(matches!(result, Err(ConfigError::Io(_))));
}

#[test]
fn config_requires_api_key() {
    let mut config = base_config();
    config.auth = AuthConfig {
        api_key: "  ".to_string(),
        jwt: None,
    };
    assert!(matches!(
        config.validate(),
        Err(ConfigError::InvalidValue { field: "auth.api_key", .. })
    ));
}

#[test]
fn config_requires_websocket_scheme() {
    let mut config = base_config();
    config.ws_endpoint = "https://project.example.co/realtime".to_string();
    assert!(matches!(
        config.validate(),
        Err(ConfigError::InvalidValue { field: "ws_endpoint", .. })
    ));
}

#[test]
fn invalid_cache_section_is_reported() {
    let contents = format!("{MINIMAL}\n[cache]\nstaleness_secs = 0\n");
    let config = SyncConfig::from_toml(&contents).unwrap();
    assert!(matches!(config.validate(), Err(ConfigError::Section(_))));
}

#[test]
fn blank_jwt_is_rejected() {
    let mut config = base_config();
    config.auth.jwt = Some(String::new());
    assert!(matches!(
        config.validate(),
        Err(ConfigError::InvalidValue { field: "auth.jwt", .. })
    ));
}

proptest! {
    #[test]
    fn reconnect_validation_matches_bounds(
        initial_ms in 0u64..2_000,
        max_ms in 0u64..4_000,
        multiplier in 0.5f64..4.0,
    ) {
        let mut config = base_config();
        config.reconnect = ReconnectConfig { initial_ms, max_ms, multiplier, jitter_ms: 0 };
        let valid = initial_ms > 0 && max_ms >= initial_ms && multiplier >= 1.0;
        prop_assert_eq!(config.validate().is_ok(), valid);
    }

    #[test]
    fn backoff_never_exceeds_cap_plus_jitter(
        initial_ms in 1u64..1_000,
        extra_ms in 0u64..10_000,
        multiplier in 1.0f64..3.0,
        jitter_ms in 0u64..500,
        attempts in 1usize..20,
    ) {
        let max_ms = initial_ms + extra_ms;
        let mut backoff = Backoff::new(ReconnectConfig { initial_ms, max_ms, multiplier, jitter_ms });
        for _ in 0..attempts {
            let delay = backoff.next_delay().as_millis() as u64;
            prop_assert!(delay >= initial_ms);
            prop_assert!(delay <= max_ms + jitter_ms);
        }
    }
}
