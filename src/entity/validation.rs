//! Boundary validation for entity payloads.
//!
//! Entity `data` is an open map; the rules here are the per-type minimums
//! a record must satisfy before it reaches storage. Structure beyond this
//! is the domain's business.

use crate::entity::types::{Entity, JsonMap};
use crate::error::{ChoraError, ValidationError};
use crate::types::EntityType;

/// Maximum serialized payload size in bytes (100 KB).
pub const MAX_DATA_SIZE: usize = 100 * 1024;

/// Validates an entity before storage.
///
/// # Rules
///
/// - id prefix and `entity_type` must agree
/// - `updated_at >= created_at`
/// - serialized `data` at most 100 KB
/// - signals and foci require a non-empty `title`
/// - protocols require a `graph` object
/// - circles with a `sync_policy` must name a known policy
pub(crate) fn validate_entity(entity: &Entity) -> Result<(), ChoraError> {
    if entity.id.entity_type() != entity.entity_type {
        return Err(ValidationError::invalid_id(
            entity.id.as_str(),
            format!(
                "prefix names '{}' but entity_type is '{}'",
                entity.id.entity_type(),
                entity.entity_type
            ),
        )
        .into());
    }

    if entity.updated_at < entity.created_at {
        return Err(ValidationError::invalid_field(
            "updated_at",
            "must not precede created_at",
        )
        .into());
    }

    let size = serde_json::to_vec(&entity.data)
        .map(|b| b.len())
        .unwrap_or(usize::MAX);
    if size > MAX_DATA_SIZE {
        return Err(ValidationError::data_too_large(size, MAX_DATA_SIZE).into());
    }

    match entity.entity_type {
        EntityType::Signal | EntityType::Focus => require_title(&entity.data)?,
        EntityType::Protocol => {
            match entity.data.get("graph") {
                Some(v) if v.is_object() => {}
                Some(_) => {
                    return Err(ValidationError::invalid_field(
                        "graph",
                        "must be an object with nodes and edges",
                    )
                    .into());
                }
                None => return Err(ValidationError::required_field("graph").into()),
            }
        }
        EntityType::Circle => {
            if let Some(policy) = entity.data.get("sync_policy") {
                let ok = policy
                    .as_str()
                    .map(|s| s == "local-only" || s == "cloud")
                    .unwrap_or(false);
                if !ok {
                    return Err(ValidationError::invalid_field(
                        "sync_policy",
                        "must be 'local-only' or 'cloud'",
                    )
                    .into());
                }
            }
        }
        _ => {}
    }

    Ok(())
}

fn require_title(data: &JsonMap) -> Result<(), ChoraError> {
    let has_title = data
        .get("title")
        .and_then(|v| v.as_str())
        .map(|s| !s.trim().is_empty())
        .unwrap_or(false);
    if !has_title {
        return Err(ValidationError::required_field("title").into());
    }
    Ok(())
}
