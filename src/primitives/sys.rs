//! Sys-domain primitives: introspection.

use serde_json::json;

use super::{collect_capabilities, Domain, Interface, PrimitiveDef, PrimitiveRegistry};
use crate::config::PULSE_HISTORY_RETAIN;
use crate::types::Timestamp;

/// Registers the sys-domain primitives.
pub fn register(registry: &mut PrimitiveRegistry) {
    registry.register(PrimitiveDef::new(
        "ping",
        Domain::Sys,
        "Liveness check",
        Interface::new(&[], &[]),
        |_ctx, _inputs| Ok(json!({"pong": true, "ts": Timestamp::now()})),
    ));

    registry.register(PrimitiveDef::new(
        "capabilities",
        Domain::Sys,
        "List every dispatchable protocol and primitive",
        Interface::new(&[], &[]),
        |ctx, _inputs| {
            let capabilities = collect_capabilities(ctx.store, ctx.registry)?;
            Ok(json!({
                "count": capabilities.len(),
                "capabilities": serde_json::to_value(capabilities)?,
            }))
        },
    ));

    registry.register(PrimitiveDef::new(
        "pulse_status",
        Domain::Sys,
        "Pulse configuration and recent pulse summaries",
        Interface::new(&[], &[]),
        |ctx, _inputs| {
            let pulse = &ctx.store.config().pulse;
            let recent = ctx.store.recent_pulse_summaries(PULSE_HISTORY_RETAIN)?;
            Ok(json!({
                "enabled": pulse.enabled,
                "interval_seconds": pulse.interval_seconds,
                "recent": serde_json::to_value(recent)?,
            }))
        },
    ));
}
