//! Attention-domain primitives: signals and foci.

use serde_json::json;

use super::{opt_map, opt_str, require_str, Domain, Interface, PrimitiveDef, PrimitiveRegistry};
use crate::bond::NewBond;
use crate::entity::{Entity, EntityStatus};
use crate::error::{ChoraError, ValidationError};
use crate::physics::{Urgency, Verb};
use crate::types::{EntityId, EntityType, Timestamp};

/// Registers the attention-domain primitives.
pub fn register(registry: &mut PrimitiveRegistry) {
    registry.register(PrimitiveDef::new(
        "emit_signal",
        Domain::Attention,
        "Create a signal entity demanding attention",
        Interface::new(&["title"], &["category", "urgency", "source_id", "data"]),
        |ctx, inputs| {
            let urgency = match opt_str(inputs, "urgency") {
                Some("high") => Urgency::High,
                Some("normal") | None => Urgency::Normal,
                Some(other) => {
                    return Err(ValidationError::invalid_field(
                        "urgency",
                        format!("must be 'normal' or 'high', got '{}'", other),
                    )
                    .into());
                }
            };
            let signal_id = ctx.store.emit_signal(
                require_str(inputs, "title")?,
                opt_str(inputs, "category").unwrap_or("manual"),
                urgency,
                opt_str(inputs, "source_id"),
                opt_map(inputs, "data"),
            )?;
            Ok(json!({"signal_id": signal_id}))
        },
    ));

    registry.register(PrimitiveDef::new(
        "resolve_signal",
        Domain::Attention,
        "Mark an active signal resolved",
        Interface::new(&["id"], &["outcome_data"]),
        |ctx, inputs| {
            let id = require_str(inputs, "id")?;
            let outcome = inputs
                .get("outcome_data")
                .cloned()
                .unwrap_or_else(|| json!({"resolution": "manual"}));
            ctx.store.resolve_signal(id, outcome)?;
            Ok(json!({"signal_id": id, "status": "resolved"}))
        },
    ));

    registry.register(PrimitiveDef::new(
        "resolve_focus",
        Domain::Attention,
        "Resolve a focus with an outcome; completion may crystallize a learning",
        Interface::new(&["id", "outcome"], &["learning_title", "learning_content"]),
        |ctx, inputs| {
            let id = require_str(inputs, "id")?;
            let outcome = require_str(inputs, "outcome")?;
            if outcome != "completed" && outcome != "abandoned" {
                return Err(ValidationError::invalid_field(
                    "outcome",
                    format!("must be 'completed' or 'abandoned', got '{}'", outcome),
                )
                .into());
            }

            let mut focus = ctx.store.get_entity(id)?;
            if focus.entity_type != EntityType::Focus {
                return Err(
                    ValidationError::invalid_field("id", format!("'{}' is not a focus", id)).into(),
                );
            }
            if focus.status != EntityStatus::Active {
                return Err(ChoraError::AlreadyResolved(id.to_string()));
            }

            focus.status = EntityStatus::Resolved;
            focus.data.insert("outcome".into(), json!(outcome));
            focus
                .data
                .insert("resolved_at".into(), json!(Timestamp::now()));
            ctx.store.save_entity(focus)?;

            // Completion can leave a residue of knowledge
            let learning_id = match (outcome, opt_str(inputs, "learning_title")) {
                ("completed", Some(title)) => {
                    let learning_id = EntityId::generate(EntityType::Learning);
                    let mut data = crate::entity::JsonMap::new();
                    data.insert("title".into(), json!(title));
                    if let Some(content) = opt_str(inputs, "learning_content") {
                        data.insert("content".into(), json!(content));
                    }
                    ctx.store
                        .create_entity(Entity::new(learning_id.clone(), data))?;
                    ctx.store.manage_bond(NewBond::new(
                        Verb::CrystallizedFrom,
                        learning_id.clone(),
                        EntityId::parse(id)?,
                    ))?;
                    Some(learning_id)
                }
                _ => None,
            };

            Ok(json!({
                "focus_id": id,
                "outcome": outcome,
                "learning_id": learning_id,
            }))
        },
    ));
}
