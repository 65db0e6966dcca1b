//! Data types for graph entities.
//!
//! An entity is a typed node in the graph. The envelope (id, type, status,
//! timestamps) is fixed; the `data` payload is an open JSON map validated
//! per type at the boundary. The store is the single arbiter of structure:
//! entities never hold pointers to one another, only ids.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::{EntityId, EntityType, Timestamp};

/// Open JSON payload carried by entities and bonds.
pub type JsonMap = serde_json::Map<String, Value>;

/// Lifecycle status of an entity.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityStatus {
    /// Live and participating in queries and the pulse.
    Active,
    /// Superseded but retained in the live table.
    Deprecated,
    /// Terminal success (signals, foci, inquiries).
    Resolved,
    /// Terminal failure.
    Failed,
    /// Moved to the archive relation (never present in the live table).
    Archived,
}

impl EntityStatus {
    /// Returns the lowercase wire name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Deprecated => "deprecated",
            Self::Resolved => "resolved",
            Self::Failed => "failed",
            Self::Archived => "archived",
        }
    }

    /// Parses a status name.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(Self::Active),
            "deprecated" => Some(Self::Deprecated),
            "resolved" => Some(Self::Resolved),
            "failed" => Some(Self::Failed),
            "archived" => Some(Self::Archived),
            _ => None,
        }
    }
}

/// A typed node in the graph.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Entity {
    /// Unique id; the prefix matches `entity_type`.
    pub id: EntityId,

    /// The entity's type (redundant with the id prefix, stored for
    /// index-free filtering).
    pub entity_type: EntityType,

    /// Open domain payload, validated per type at the boundary.
    pub data: JsonMap,

    /// Lifecycle status.
    pub status: EntityStatus,

    /// Creation time; never changes after the first save.
    pub created_at: Timestamp,

    /// Last mutation time; monotonically >= `created_at`.
    pub updated_at: Timestamp,
}

impl Entity {
    /// Creates a new active entity with current timestamps.
    pub fn new(id: EntityId, data: JsonMap) -> Self {
        let now = Timestamp::now();
        Self {
            entity_type: id.entity_type(),
            id,
            data,
            status: EntityStatus::Active,
            created_at: now,
            updated_at: now,
        }
    }

    /// Returns a string field from `data`.
    pub fn data_str(&self, key: &str) -> Option<&str> {
        self.data.get(key).and_then(Value::as_str)
    }

    /// The human-facing title: `title`, else `name`, else the slug.
    pub fn title(&self) -> &str {
        self.data_str("title")
            .or_else(|| self.data_str("name"))
            .unwrap_or_else(|| self.id.slug())
    }

    /// Text used for the full-text index and for embedding generation:
    /// the slug plus the salient prose fields.
    pub fn document_text(&self) -> String {
        let mut text = self.id.slug().replace('-', " ");
        for key in ["title", "name", "description", "content", "summary", "statement"] {
            if let Some(s) = self.data_str(key) {
                text.push(' ');
                text.push_str(s);
            }
        }
        text
    }
}

/// Compact entity view used in constellations, search hits, and
/// capability listings.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EntitySummary {
    /// Entity id.
    pub id: EntityId,
    /// Entity type.
    pub entity_type: EntityType,
    /// Human-facing title.
    pub title: String,
    /// Lifecycle status.
    pub status: EntityStatus,
}

impl From<&Entity> for EntitySummary {
    fn from(e: &Entity) -> Self {
        Self {
            id: e.id.clone(),
            entity_type: e.entity_type,
            title: e.title().to_string(),
            status: e.status,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn data(pairs: &[(&str, Value)]) -> JsonMap {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_new_entity_defaults() {
        let id = EntityId::parse("learning-validate-inputs").unwrap();
        let e = Entity::new(id.clone(), data(&[("title", json!("Validate inputs"))]));
        assert_eq!(e.id, id);
        assert_eq!(e.entity_type, EntityType::Learning);
        assert_eq!(e.status, EntityStatus::Active);
        assert!(e.updated_at >= e.created_at);
    }

    #[test]
    fn test_title_fallbacks() {
        let id = EntityId::parse("tool-parser").unwrap();
        let titled = Entity::new(id.clone(), data(&[("title", json!("The Parser"))]));
        assert_eq!(titled.title(), "The Parser");

        let named = Entity::new(id.clone(), data(&[("name", json!("parser"))]));
        assert_eq!(named.title(), "parser");

        let bare = Entity::new(id, JsonMap::new());
        assert_eq!(bare.title(), "parser");
    }

    #[test]
    fn test_document_text_collects_salient_fields() {
        let id = EntityId::parse("learning-input-handling").unwrap();
        let e = Entity::new(
            id,
            data(&[
                ("title", json!("Input handling")),
                ("content", json!("always validate at the boundary")),
                ("count", json!(3)),
            ]),
        );
        let text = e.document_text();
        assert!(text.contains("input handling"));
        assert!(text.contains("always validate at the boundary"));
        assert!(!text.contains('3'));
    }

    #[test]
    fn test_status_roundtrip() {
        for s in [
            EntityStatus::Active,
            EntityStatus::Deprecated,
            EntityStatus::Resolved,
            EntityStatus::Failed,
            EntityStatus::Archived,
        ] {
            assert_eq!(EntityStatus::parse(s.as_str()), Some(s));
        }
    }

    #[test]
    fn test_entity_json_roundtrip() {
        let id = EntityId::parse("signal-abc123").unwrap();
        let e = Entity::new(id, data(&[("title", json!("A signal"))]));
        let bytes = serde_json::to_vec(&e).unwrap();
        let restored: Entity = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(restored.id, e.id);
        assert_eq!(restored.entity_type, e.entity_type);
        assert_eq!(restored.data, e.data);
        assert_eq!(restored.status, e.status);
    }

    #[test]
    fn test_summary_from_entity() {
        let id = EntityId::parse("focus-ship-it").unwrap();
        let e = Entity::new(id.clone(), data(&[("title", json!("Ship it"))]));
        let s = EntitySummary::from(&e);
        assert_eq!(s.id, id);
        assert_eq!(s.title, "Ship it");
    }
}
