//! Entity filtering for typed lookup.
//!
//! [`EntityFilter`] provides a composable way to filter entities across
//! query operations. Filters are applied as post-filters after the primary
//! retrieval (full scan or type-index scan).

use serde_json::Value;

use crate::entity::{Entity, EntityStatus};
use crate::types::{EntityType, Timestamp};

/// Filter criteria for entity queries.
///
/// Used by [`query_entities`](crate::GraphStore::query_entities). Fields
/// set to `None` are not filtered on.
///
/// # Example
///
/// ```rust
/// use chora::{EntityFilter, EntityStatus, EntityType};
///
/// // Active signals only
/// let filter = EntityFilter {
///     entity_type: Some(EntityType::Signal),
///     status: Some(EntityStatus::Active),
///     ..EntityFilter::default()
/// };
/// ```
#[derive(Clone, Debug, Default)]
pub struct EntityFilter {
    /// Only include entities of this type.
    pub entity_type: Option<EntityType>,

    /// Only include entities with this status.
    pub status: Option<EntityStatus>,

    /// Only include entities updated at or after this timestamp.
    pub since: Option<Timestamp>,

    /// Only include entities whose `data` fields equal these values.
    ///
    /// Each entry is `(field name, expected value)`; all must match.
    pub data_equals: Vec<(String, Value)>,
}

impl EntityFilter {
    /// Filter to one entity type.
    pub fn of_type(entity_type: EntityType) -> Self {
        Self {
            entity_type: Some(entity_type),
            ..Default::default()
        }
    }

    /// Restricts to a status.
    pub fn with_status(mut self, status: EntityStatus) -> Self {
        self.status = Some(status);
        self
    }

    /// Adds a data-field equality predicate.
    pub fn where_eq(mut self, field: impl Into<String>, value: Value) -> Self {
        self.data_equals.push((field.into(), value));
        self
    }

    /// Returns `true` if the given entity passes all filter criteria.
    pub fn matches(&self, entity: &Entity) -> bool {
        if let Some(t) = self.entity_type {
            if entity.entity_type != t {
                return false;
            }
        }

        if let Some(s) = self.status {
            if entity.status != s {
                return false;
            }
        }

        if let Some(since) = self.since {
            if entity.updated_at < since {
                return false;
            }
        }

        for (field, expected) in &self.data_equals {
            if entity.data.get(field) != Some(expected) {
                return false;
            }
        }

        true
    }
}
