//! Cacheable entity trait and the orchard entity shipped with the cache.

use crate::{EntityId, Timestamp};
use serde::{de::DeserializeOwned, Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// Marker trait for types that can be cached.
///
/// - `entity_id()` must return the unique identifier for this instance
/// - `owner_id()` returns the user that owns the entity, if any; it decides
///   which entries win when owner-scoped and public sets are merged
/// - `status()` is optional and only consulted by in-memory sources
/// - Implementations must round-trip through serde so the change feed can
///   merge partial payloads into them
pub trait CacheableEntity: Clone + Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Get the unique identifier for this entity.
    fn entity_id(&self) -> EntityId;

    /// Get the id of the user owning this entity.
    fn owner_id(&self) -> Option<&str>;

    /// Lifecycle status used to select the public set, if the entity has one.
    fn status(&self) -> Option<&str> {
        None
    }

    /// Return a copy of this entity with `patch` overlaid onto it.
    ///
    /// Top-level keys in the patch replace the entity's keys. Keys absent
    /// from the patch keep their current value.
    fn merged(&self, patch: &Value) -> Result<Self, serde_json::Error> {
        let mut base = serde_json::to_value(self)?;
        merge_json(&mut base, patch);
        serde_json::from_value(base)
    }
}

/// Overlay the top-level keys of `patch` onto `base`.
///
/// Non-object patches replace `base` wholesale.
pub fn merge_json(base: &mut Value, patch: &Value) {
    match (base, patch) {
        (Value::Object(base), Value::Object(patch)) => {
            for (key, value) in patch {
                base.insert(key.clone(), value.clone());
            }
        }
        (base, patch) => *base = patch.clone(),
    }
}

/// Lifecycle status of an orchard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum OrchardStatus {
    #[default]
    Draft,
    Active,
    Paused,
    Completed,
    Cancelled,
}

impl OrchardStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrchardStatus::Draft => "draft",
            OrchardStatus::Active => "active",
            OrchardStatus::Paused => "paused",
            OrchardStatus::Completed => "completed",
            OrchardStatus::Cancelled => "cancelled",
        }
    }
}

/// A fundraising orchard: a goal split into equally priced pockets that
/// supporters fill through bestowals.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Orchard {
    pub id: EntityId,
    pub user_id: String,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub status: OrchardStatus,
    #[serde(default, deserialize_with = "null_as_default")]
    pub total_pockets: u32,
    #[serde(default, deserialize_with = "null_as_default")]
    pub filled_pockets: u32,
    #[serde(default, deserialize_with = "null_as_default")]
    pub pocket_price: f64,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    pub created_at: Option<Timestamp>,
    #[serde(default)]
    pub updated_at: Option<Timestamp>,
}

/// Read a nullable column as its default, the same as a missing one.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

impl Orchard {
    /// Fraction of pockets filled, in `0.0..=1.0`.
    pub fn completion(&self) -> f64 {
        if self.total_pockets == 0 {
            0.0
        } else {
            (self.filled_pockets.min(self.total_pockets)) as f64 / self.total_pockets as f64
        }
    }
}

impl CacheableEntity for Orchard {
    fn entity_id(&self) -> EntityId {
        self.id.clone()
    }

    fn owner_id(&self) -> Option<&str> {
        if self.user_id.is_empty() {
            None
        } else {
            Some(&self.user_id)
        }
    }

    fn status(&self) -> Option<&str> {
        Some(self.status.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    fn orchard() -> Orchard {
        Orchard {
            id: EntityId::from("A"),
            user_id: "user-1".to_string(),
            title: "X".to_string(),
            description: None,
            status: OrchardStatus::Active,
            total_pockets: 10,
            filled_pockets: 4,
            pocket_price: 150.0,
            currency: Some("USD".to_string()),
            created_at: None,
            updated_at: None,
        }
    }

    #[test]
    fn test_merged_overlays_present_keys_only() {
        let merged = orchard()
            .merged(&json!({ "filled_pockets": 5, "title": "Y" }))
            .unwrap();
        assert_eq!(merged.filled_pockets, 5);
        assert_eq!(merged.title, "Y");
        assert_eq!(merged.total_pockets, 10);
        assert_eq!(merged.user_id, "user-1");
    }

    #[test]
    fn test_merged_rejects_ill_typed_patch() {
        let result = orchard().merged(&json!({ "filled_pockets": "many" }));
        assert!(result.is_err());
    }

    #[test]
    fn test_merged_reads_null_columns_as_defaults() {
        let merged = orchard()
            .merged(&json!({ "total_pockets": null, "pocket_price": null, "status": null }))
            .unwrap();
        assert_eq!(merged.total_pockets, 0);
        assert_eq!(merged.pocket_price, 0.0);
        assert_eq!(merged.status, OrchardStatus::Draft);
        assert_eq!(merged.filled_pockets, 4);
    }

    #[test]
    fn test_orchard_deserializes_sparse_row() {
        let row = json!({ "id": "B", "user_id": "u", "title": "Seeds", "status": "paused" });
        let orchard: Orchard = serde_json::from_value(row).unwrap();
        assert_eq!(orchard.status, OrchardStatus::Paused);
        assert_eq!(orchard.total_pockets, 0);
        assert_eq!(orchard.completion(), 0.0);
    }

    #[test]
    fn test_completion_clamps_overfill() {
        let mut o = orchard();
        o.filled_pockets = 20;
        assert_eq!(o.completion(), 1.0);
    }

    #[test]
    fn test_owner_id_empty_is_none() {
        let mut o = orchard();
        assert_eq!(o.owner_id(), Some("user-1"));
        o.user_id.clear();
        assert_eq!(o.owner_id(), None);
    }

    #[test]
    fn test_status_as_str_matches_serde() {
        for status in [
            OrchardStatus::Draft,
            OrchardStatus::Active,
            OrchardStatus::Paused,
            OrchardStatus::Completed,
            OrchardStatus::Cancelled,
        ] {
            let json = serde_json::to_value(status).unwrap();
            assert_eq!(json, Value::String(status.as_str().to_string()));
        }
    }

    proptest! {
        #[test]
        fn prop_merging_own_row_is_identity(
            total in 0u32..10_000,
            filled in 0u32..10_000,
            price in 0u32..100_000,
            title in "[a-zA-Z ]{0,24}",
        ) {
            let mut o = orchard();
            o.total_pockets = total;
            o.filled_pockets = filled;
            o.pocket_price = f64::from(price);
            o.title = title;
            let row = serde_json::to_value(&o).unwrap();
            prop_assert_eq!(o.merged(&row).unwrap(), o);
        }

        #[test]
        fn prop_completion_stays_in_unit_range(total in any::<u32>(), filled in any::<u32>()) {
            let mut o = orchard();
            o.total_pockets = total;
            o.filled_pockets = filled;
            let completion = o.completion();
            prop_assert!((0.0..=1.0).contains(&completion));
        }
    }
}
