//! Change feed event types.
//!
//! The remote source pushes one [`ChangeEvent`] per committed row mutation.
//! Payloads stay untyped JSON because a single feed carries rows from
//! several tables.

use crate::{EntityId, Timestamp};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Row mutation kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

/// Which mutation kinds a subscription wants delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EventFilter {
    /// Every kind (`*`).
    #[default]
    All,
    Only(ChangeKind),
}

impl EventFilter {
    pub fn matches(&self, kind: ChangeKind) -> bool {
        match self {
            EventFilter::All => true,
            EventFilter::Only(wanted) => *wanted == kind,
        }
    }

    /// Wire form used in subscribe frames.
    pub fn as_str(&self) -> &'static str {
        match self {
            EventFilter::All => "*",
            EventFilter::Only(ChangeKind::Insert) => "INSERT",
            EventFilter::Only(ChangeKind::Update) => "UPDATE",
            EventFilter::Only(ChangeKind::Delete) => "DELETE",
        }
    }
}

/// A single row mutation pushed by the change feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent {
    /// Table the mutated row belongs to.
    pub table: String,
    /// Mutation kind.
    #[serde(rename = "eventType")]
    pub kind: ChangeKind,
    /// Row after the mutation (absent or empty for deletes).
    #[serde(default)]
    pub new: Option<Value>,
    /// Row before the mutation (often only the primary key).
    #[serde(default)]
    pub old: Option<Value>,
    /// When the mutation was committed remotely.
    #[serde(default)]
    pub commit_timestamp: Option<Timestamp>,
}

impl ChangeEvent {
    pub fn insert(table: impl Into<String>, new: Value) -> Self {
        Self {
            table: table.into(),
            kind: ChangeKind::Insert,
            new: Some(new),
            old: None,
            commit_timestamp: None,
        }
    }

    pub fn update(table: impl Into<String>, new: Value) -> Self {
        Self {
            table: table.into(),
            kind: ChangeKind::Update,
            new: Some(new),
            old: None,
            commit_timestamp: None,
        }
    }

    pub fn delete(table: impl Into<String>, old: Value) -> Self {
        Self {
            table: table.into(),
            kind: ChangeKind::Delete,
            new: None,
            old: Some(old),
            commit_timestamp: None,
        }
    }

    /// The new row if it carries any columns.
    pub fn new_row(&self) -> Option<&Value> {
        self.new.as_ref().filter(|row| !is_empty_row(row))
    }

    /// The old row if it carries any columns.
    pub fn old_row(&self) -> Option<&Value> {
        self.old.as_ref().filter(|row| !is_empty_row(row))
    }

    /// Read `column` as an entity id, preferring the new row over the old.
    ///
    /// String and integer columns are both accepted.
    pub fn id_column(&self, column: &str) -> Option<EntityId> {
        self.new_row()
            .and_then(|row| id_from(row, column))
            .or_else(|| self.old_row().and_then(|row| id_from(row, column)))
    }
}

fn is_empty_row(row: &Value) -> bool {
    match row {
        Value::Null => true,
        Value::Object(map) => map.is_empty(),
        _ => false,
    }
}

fn id_from(row: &Value, column: &str) -> Option<EntityId> {
    match row.get(column)? {
        Value::String(s) if !s.trim().is_empty() => Some(EntityId::new(s.clone())),
        Value::Number(n) => Some(EntityId::new(n.to_string())),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decode_wire_event() {
        let wire = json!({
            "table": "orchards",
            "eventType": "UPDATE",
            "new": { "id": "A", "title": "X" },
            "old": { "id": "A" },
            "commit_timestamp": "2026-01-01T00:00:00Z"
        });
        let event: ChangeEvent = serde_json::from_value(wire).unwrap();
        assert_eq!(event.kind, ChangeKind::Update);
        assert_eq!(event.id_column("id"), Some(EntityId::from("A")));
        assert!(event.commit_timestamp.is_some());
    }

    #[test]
    fn test_delete_with_empty_new_row_falls_back_to_old() {
        let wire = json!({
            "table": "orchards",
            "eventType": "DELETE",
            "new": {},
            "old": { "id": "B" }
        });
        let event: ChangeEvent = serde_json::from_value(wire).unwrap();
        assert!(event.new_row().is_none());
        assert_eq!(event.id_column("id"), Some(EntityId::from("B")));
    }

    #[test]
    fn test_numeric_id_column() {
        let event = ChangeEvent::insert("bestowals", json!({ "orchard_id": 42 }));
        assert_eq!(event.id_column("orchard_id"), Some(EntityId::from("42")));
        assert_eq!(event.id_column("missing"), None);
    }

    #[test]
    fn test_blank_id_column_is_ignored() {
        let event = ChangeEvent::insert("bestowals", json!({ "orchard_id": "  " }));
        assert_eq!(event.id_column("orchard_id"), None);
    }

    #[test]
    fn test_event_filter_matches() {
        assert!(EventFilter::All.matches(ChangeKind::Delete));
        assert!(EventFilter::Only(ChangeKind::Update).matches(ChangeKind::Update));
        assert!(!EventFilter::Only(ChangeKind::Update).matches(ChangeKind::Insert));
        assert_eq!(EventFilter::Only(ChangeKind::Delete).as_str(), "DELETE");
    }
}
