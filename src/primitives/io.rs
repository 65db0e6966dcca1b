//! Io-domain primitives: the output membrane.

use serde_json::json;

use super::{require_str, Domain, Interface, PrimitiveDef, PrimitiveRegistry};

/// Registers the io-domain primitives.
pub fn register(registry: &mut PrimitiveRegistry) {
    registry.register(PrimitiveDef::new(
        "speak",
        Domain::Io,
        "Emit one line of user-visible text through the sink",
        Interface::new(&["text"], &[]),
        |ctx, inputs| {
            let text = require_str(inputs, "text")?;
            ctx.sink.emit(text);
            Ok(json!({"spoken": true}))
        },
    ));
}
