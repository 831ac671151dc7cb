//! Change event translation.
//!
//! Turns raw [`ChangeEvent`]s into [`CacheCommand`]s. Translation is pure:
//! it never looks at the cache, so whether a command takes effect (for
//! example whether the parent of a related row is cached) is decided when
//! the command is applied.

use std::time::Duration;

use orchard_core::{ChangeEvent, ChangeKind, ConfigError, EntityId};
use serde_json::Value;

use crate::constants::{
    DEFAULT_FEED_CHANNEL_CAPACITY, DEFAULT_PRIMARY_TABLE, DEFAULT_RELATED_DEBOUNCE_MS,
};

/// A cache mutation derived from a change event.
#[derive(Debug, Clone, PartialEq)]
pub enum CacheCommand {
    /// Drop the cached record.
    Invalidate(EntityId),
    /// Overlay the row onto cached data.
    Merge { id: EntityId, patch: Value },
    /// Re-fetch the parent after the debounce window settles.
    ScheduleSync(EntityId),
}

impl CacheCommand {
    pub fn entity_id(&self) -> &EntityId {
        match self {
            CacheCommand::Invalidate(id)
            | CacheCommand::Merge { id, .. }
            | CacheCommand::ScheduleSync(id) => id,
        }
    }
}

/// A table whose rows belong to a primary entity through a foreign key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelatedTable {
    pub table: String,
    pub parent_column: String,
}

impl RelatedTable {
    pub fn new(table: impl Into<String>, parent_column: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            parent_column: parent_column.into(),
        }
    }
}

/// Configuration for the subscription bridge.
#[derive(Debug, Clone, PartialEq)]
pub struct BridgeConfig {
    /// Table holding the cached entities.
    pub primary_table: String,
    /// Column carrying the entity id on the primary table.
    pub id_column: String,
    /// Tables whose changes refresh their parent entity.
    pub related: Vec<RelatedTable>,
    /// Quiet period before a related change triggers a parent sync.
    pub related_debounce: Duration,
    /// Capacity of each per-table event channel.
    pub channel_capacity: usize,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            primary_table: DEFAULT_PRIMARY_TABLE.to_string(),
            id_column: "id".to_string(),
            related: vec![RelatedTable::new("bestowals", "orchard_id")],
            related_debounce: Duration::from_millis(DEFAULT_RELATED_DEBOUNCE_MS),
            channel_capacity: DEFAULT_FEED_CHANNEL_CAPACITY,
        }
    }
}

impl BridgeConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create BridgeConfig from environment variables.
    ///
    /// - `ORCHARD_BRIDGE_PRIMARY_TABLE`: primary table (default: "orchards")
    /// - `ORCHARD_BRIDGE_DEBOUNCE_MS`: related debounce window (default: 100)
    /// - `ORCHARD_BRIDGE_CHANNEL_CAPACITY`: per-table channel size (default: 256)
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let primary_table = std::env::var("ORCHARD_BRIDGE_PRIMARY_TABLE")
            .ok()
            .filter(|s| !s.trim().is_empty())
            .unwrap_or(defaults.primary_table);

        let related_debounce = std::env::var("ORCHARD_BRIDGE_DEBOUNCE_MS")
            .ok()
            .and_then(|s| s.parse().ok())
            .map(Duration::from_millis)
            .unwrap_or(defaults.related_debounce);

        let channel_capacity = std::env::var("ORCHARD_BRIDGE_CHANNEL_CAPACITY")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(defaults.channel_capacity);

        Self {
            primary_table,
            related_debounce,
            channel_capacity,
            ..defaults
        }
    }

    pub fn with_primary_table(mut self, table: impl Into<String>) -> Self {
        self.primary_table = table.into();
        self
    }

    pub fn with_id_column(mut self, column: impl Into<String>) -> Self {
        self.id_column = column.into();
        self
    }

    /// Replace the related tables.
    pub fn with_related(mut self, related: Vec<RelatedTable>) -> Self {
        self.related = related;
        self
    }

    pub fn with_related_debounce(mut self, window: Duration) -> Self {
        self.related_debounce = window;
        self
    }

    pub fn with_channel_capacity(mut self, capacity: usize) -> Self {
        self.channel_capacity = capacity;
        self
    }

    /// Every table the bridge listens on, primary first.
    pub fn tables(&self) -> Vec<&str> {
        std::iter::once(self.primary_table.as_str())
            .chain(self.related.iter().map(|r| r.table.as_str()))
            .collect()
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.primary_table.trim().is_empty() {
            return Err(ConfigError::MissingRequired {
                field: "primary_table".to_string(),
            });
        }
        if self.id_column.trim().is_empty() {
            return Err(ConfigError::MissingRequired {
                field: "id_column".to_string(),
            });
        }
        if self.channel_capacity == 0 {
            return Err(ConfigError::InvalidValue {
                field: "channel_capacity".to_string(),
                value: "0".to_string(),
                reason: "must be > 0".to_string(),
            });
        }
        for related in &self.related {
            if related.table == self.primary_table {
                return Err(ConfigError::InvalidValue {
                    field: "related".to_string(),
                    value: related.table.clone(),
                    reason: "related table must differ from the primary table".to_string(),
                });
            }
            if related.parent_column.trim().is_empty() {
                return Err(ConfigError::MissingRequired {
                    field: format!("related.{}.parent_column", related.table),
                });
            }
        }
        Ok(())
    }
}

/// Translate a change event into cache commands.
///
/// | table   | kind   | command                    |
/// |---------|--------|----------------------------|
/// | primary | DELETE | `Invalidate(id)`           |
/// | primary | UPDATE | `Merge { id, new row }`    |
/// | primary | INSERT | none                       |
/// | related | any    | `ScheduleSync(parent id)`  |
///
/// Events for unknown tables, or without a usable id, yield nothing.
pub fn translate(config: &BridgeConfig, event: &ChangeEvent) -> Vec<CacheCommand> {
    if event.table == config.primary_table {
        let Some(id) = event.id_column(&config.id_column) else {
            tracing::debug!(table = %event.table, kind = ?event.kind, "Change event without id");
            return Vec::new();
        };
        return match event.kind {
            ChangeKind::Delete => vec![CacheCommand::Invalidate(id)],
            ChangeKind::Update => match event.new_row() {
                Some(row) => vec![CacheCommand::Merge {
                    id,
                    patch: row.clone(),
                }],
                None => Vec::new(),
            },
            ChangeKind::Insert => Vec::new(),
        };
    }

    config
        .related
        .iter()
        .filter(|related| related.table == event.table)
        .filter_map(|related| event.id_column(&related.parent_column))
        .map(CacheCommand::ScheduleSync)
        .collect()
}
