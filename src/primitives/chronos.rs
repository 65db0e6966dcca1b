//! Chronos-domain primitives: time.

use serde_json::json;

use super::{require_str, Domain, Interface, PrimitiveDef, PrimitiveRegistry};
use crate::types::Timestamp;

/// Registers the chronos-domain primitives.
pub fn register(registry: &mut PrimitiveRegistry) {
    registry.register(PrimitiveDef::new(
        "now",
        Domain::Chronos,
        "The current timestamp in Unix milliseconds",
        Interface::new(&[], &[]),
        |_ctx, _inputs| Ok(json!({"ts": Timestamp::now()})),
    ));

    registry.register(PrimitiveDef::new(
        "entity_age",
        Domain::Chronos,
        "Whole days since an entity was created and last updated",
        Interface::new(&["id"], &[]),
        |ctx, inputs| {
            let entity = ctx.store.get_entity(require_str(inputs, "id")?)?;
            let now = Timestamp::now();
            Ok(json!({
                "entity_id": entity.id,
                "created_days_ago": entity.created_at.age_days(now),
                "updated_days_ago": entity.updated_at.age_days(now),
            }))
        },
    ));
}
