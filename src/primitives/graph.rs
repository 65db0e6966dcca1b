//! Graph-domain primitives: entities, bonds, constellations, archival.

use serde_json::{json, Value};

use super::{
    opt_f32, opt_map, opt_str, opt_usize, parse_entity_type, require_str, Domain, Interface,
    PrimitiveDef, PrimitiveRegistry,
};
use crate::bond::NewBond;
use crate::entity::{Entity, EntityStatus};
use crate::error::ValidationError;
use crate::physics::Verb;
use crate::query::EntityFilter;
use crate::types::{slugify, EntityId};

/// Registers the graph-domain primitives.
pub fn register(registry: &mut PrimitiveRegistry) {
    registry.register(PrimitiveDef::new(
        "manifest_entity",
        Domain::Graph,
        "Create a typed entity in the graph",
        Interface::new(&["type"], &["id", "data"]),
        |ctx, inputs| {
            let entity_type = parse_entity_type(require_str(inputs, "type")?)?;
            let data = opt_map(inputs, "data");

            let id = match opt_str(inputs, "id") {
                Some(id) => EntityId::parse(id)?,
                None => {
                    let title = data
                        .get("title")
                        .or_else(|| data.get("name"))
                        .and_then(Value::as_str)
                        .map(slugify)
                        .filter(|s| !s.is_empty());
                    match title {
                        Some(slug) => EntityId::new(entity_type, &slug)?,
                        None => EntityId::generate(entity_type),
                    }
                }
            };
            if id.entity_type() != entity_type {
                return Err(ValidationError::invalid_id(
                    id.as_str(),
                    format!("prefix does not name type '{}'", entity_type),
                )
                .into());
            }

            let id = ctx.store.create_entity(Entity::new(id, data))?;
            Ok(json!({"entity_id": id}))
        },
    ));

    registry.register(PrimitiveDef::new(
        "get_entity",
        Domain::Graph,
        "Fetch one entity with its full payload",
        Interface::new(&["id"], &[]),
        |ctx, inputs| {
            let entity = ctx.store.get_entity(require_str(inputs, "id")?)?;
            Ok(serde_json::to_value(entity)?)
        },
    ));

    registry.register(PrimitiveDef::new(
        "update_entity_data",
        Domain::Graph,
        "Merge a patch into an entity's data",
        Interface::new(&["id", "data"], &[]),
        |ctx, inputs| {
            let id = require_str(inputs, "id")?;
            let patch = inputs
                .get("data")
                .and_then(Value::as_object)
                .cloned()
                .ok_or_else(|| ValidationError::invalid_field("data", "must be an object"))?;
            let entity = ctx.store.update_entity_data(id, patch)?;
            Ok(json!({
                "entity_id": entity.id,
                "updated_at": entity.updated_at,
            }))
        },
    ));

    registry.register(PrimitiveDef::new(
        "manage_bond",
        Domain::Graph,
        "Create or update a physics-checked bond",
        Interface::new(&["verb", "from_id", "to_id"], &["confidence", "metadata"]),
        |ctx, inputs| {
            let verb_name = require_str(inputs, "verb")?;
            let verb = Verb::parse(verb_name).ok_or_else(|| {
                ValidationError::invalid_field("verb", format!("unknown verb '{}'", verb_name))
            })?;
            let outcome = ctx.store.manage_bond(NewBond {
                verb,
                from_id: EntityId::parse(require_str(inputs, "from_id")?)?,
                to_id: EntityId::parse(require_str(inputs, "to_id")?)?,
                confidence: opt_f32(inputs, "confidence"),
                metadata: inputs.get("metadata").and_then(Value::as_object).cloned(),
            })?;
            Ok(json!({
                "bond_id": outcome.bond.id,
                "confidence": outcome.bond.confidence,
                "status": outcome.bond.status.as_str(),
                "created": outcome.created,
                "signal_id": outcome.signal_id,
            }))
        },
    ));

    registry.register(PrimitiveDef::new(
        "get_constellation",
        Domain::Graph,
        "The 1-hop bond neighborhood around an entity, grouped by verb",
        Interface::new(&["id"], &[]),
        |ctx, inputs| {
            let constellation = ctx.store.get_constellation(require_str(inputs, "id")?)?;
            Ok(serde_json::to_value(constellation)?)
        },
    ));

    registry.register(PrimitiveDef::new(
        "compost",
        Domain::Graph,
        "Archive an entity (refuses while live bonds remain, unless forced)",
        Interface::new(&["id"], &["force"]),
        |ctx, inputs| {
            let id = require_str(inputs, "id")?;
            let force = inputs
                .get("force")
                .and_then(Value::as_bool)
                .unwrap_or(false);
            ctx.store.archive_entity(id, force)?;
            Ok(json!({"archived": id}))
        },
    ));

    registry.register(PrimitiveDef::new(
        "query_entities",
        Domain::Graph,
        "Typed entity lookup with status and data-field predicates",
        Interface::new(&[], &["type", "status", "where", "limit"]),
        |ctx, inputs| {
            let mut filter = EntityFilter::default();
            if let Some(name) = opt_str(inputs, "type") {
                filter.entity_type = Some(parse_entity_type(name)?);
            }
            if let Some(name) = opt_str(inputs, "status") {
                filter.status = Some(EntityStatus::parse(name).ok_or_else(|| {
                    ValidationError::invalid_field("status", format!("unknown status '{}'", name))
                })?);
            }
            for (field, expected) in opt_map(inputs, "where") {
                filter.data_equals.push((field, expected));
            }

            let mut entities = ctx.store.query_entities(&filter)?;
            entities.truncate(opt_usize(inputs, "limit", 100));
            let summaries: Vec<Value> = entities
                .iter()
                .map(|e| serde_json::to_value(crate::entity::EntitySummary::from(e)))
                .collect::<std::result::Result<_, _>>()?;
            Ok(json!({"count": summaries.len(), "entities": summaries}))
        },
    ));

    registry.register(PrimitiveDef::new(
        "fts_search",
        Domain::Graph,
        "Full-text search over entity titles and salient fields",
        Interface::new(&["query"], &["type", "limit"]),
        |ctx, inputs| {
            let entity_type = match opt_str(inputs, "type") {
                Some(name) => Some(parse_entity_type(name)?),
                None => None,
            };
            let hits = ctx.store.fts_search(
                require_str(inputs, "query")?,
                entity_type,
                opt_usize(inputs, "limit", 10),
            )?;
            Ok(json!({"hits": serde_json::to_value(hits)?}))
        },
    ));
}

// Registration is covered by the registry tests in `primitives::tests`;
// behavior is covered end-to-end in the dispatch integration tests.
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_is_idempotent_per_registry() {
        let mut registry = PrimitiveRegistry::new();
        register(&mut registry);
        assert!(registry.contains("manifest_entity"));
        assert!(registry.contains("compost"));
        assert!(registry.contains("fts_search"));
    }

    #[test]
    fn test_ids_follow_convention() {
        let mut registry = PrimitiveRegistry::new();
        register(&mut registry);
        let def = registry.get("update_entity_data").unwrap();
        assert_eq!(def.id, "primitive-update-entity-data");
        assert_eq!(def.domain, Domain::Graph);
    }
}
