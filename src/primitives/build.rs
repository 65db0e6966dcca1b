//! Build-domain primitives: protocol authoring.

use serde_json::json;

use super::{opt_str, require_str, Domain, Interface, PrimitiveDef, PrimitiveRegistry};
use crate::entity::{Entity, JsonMap};
use crate::error::ValidationError;
use crate::types::{slugify, EntityId, EntityType};
use crate::vm::ProtocolGraph;

/// Registers the build-domain primitives.
pub fn register(registry: &mut PrimitiveRegistry) {
    registry.register(PrimitiveDef::new(
        "manifest_protocol",
        Domain::Build,
        "Create a protocol entity after validating its graph",
        Interface::new(&["name", "graph"], &["description", "inputs_schema"]),
        |ctx, inputs| {
            let name = require_str(inputs, "name")?;
            let graph = inputs
                .get("graph")
                .filter(|v| v.is_object())
                .cloned()
                .ok_or_else(|| ValidationError::invalid_field("graph", "must be an object"))?;

            let mut data = JsonMap::new();
            data.insert("name".into(), json!(name));
            data.insert("graph".into(), graph);
            if let Some(description) = opt_str(inputs, "description") {
                data.insert("description".into(), json!(description));
            }
            if let Some(schema) = inputs.get("inputs_schema") {
                data.insert("inputs_schema".into(), schema.clone());
            }

            // A protocol that cannot parse must not reach the store
            ProtocolGraph::from_entity_data(&data).map_err(|e| {
                ValidationError::invalid_field("graph", e.to_string())
            })?;

            let slug = slugify(name);
            if slug.is_empty() {
                return Err(ValidationError::invalid_field("name", "yields an empty slug").into());
            }
            let id = EntityId::new(EntityType::Protocol, &slug)?;
            let id = ctx.store.create_entity(Entity::new(id, data))?;
            Ok(json!({"entity_id": id}))
        },
    ));
}
