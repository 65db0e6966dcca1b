//! Logic-domain primitives: pure evaluation.

use serde_json::json;

use super::{opt_map, require_str, Domain, Interface, PrimitiveDef, PrimitiveRegistry};
use crate::vm::template::eval_predicate;

/// Registers the logic-domain primitives.
pub fn register(registry: &mut PrimitiveRegistry) {
    registry.register(PrimitiveDef::new(
        "evaluate",
        Domain::Logic,
        "Evaluate a pure predicate expression over a bindings map",
        Interface::new(&["predicate"], &["bindings"]),
        |_ctx, inputs| {
            let bindings = opt_map(inputs, "bindings");
            let value = eval_predicate(require_str(inputs, "predicate")?, &bindings)?;
            Ok(json!({"value": value}))
        },
    ));
}
