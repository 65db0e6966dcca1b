//! Cognition-domain primitives: the semantic layer surface.
//!
//! Every primitive here degrades gracefully — an absent vectorizer means a
//! `fallback`/`fts`/`type-based`/`keyword` method tag in the response, not
//! an error.

use super::{
    opt_str, opt_usize, parse_entity_type, require_str, Domain, Interface, PrimitiveDef,
    PrimitiveRegistry,
};
use crate::semantic;

/// Registers the cognition-domain primitives.
pub fn register(registry: &mut PrimitiveRegistry) {
    registry.register(PrimitiveDef::new(
        "embed_entity",
        Domain::Cognition,
        "Generate and persist an embedding for an entity",
        Interface::new(&["id"], &[]),
        |ctx, inputs| {
            let outcome =
                semantic::embed_entity(ctx.store, ctx.vectorizer, require_str(inputs, "id")?)?;
            Ok(serde_json::to_value(outcome)?)
        },
    ));

    registry.register(PrimitiveDef::new(
        "embed_text",
        Domain::Cognition,
        "Vectorize free text in memory",
        Interface::new(&["text"], &[]),
        |ctx, inputs| {
            let outcome = semantic::embed_text(ctx.vectorizer, require_str(inputs, "text")?)?;
            Ok(serde_json::to_value(outcome)?)
        },
    ));

    registry.register(PrimitiveDef::new(
        "semantic_similarity",
        Domain::Cognition,
        "Cosine similarity of two entities' stored vectors",
        Interface::new(&["a", "b"], &[]),
        |ctx, inputs| {
            let outcome = semantic::similarity(
                ctx.store,
                require_str(inputs, "a")?,
                require_str(inputs, "b")?,
            )?;
            Ok(serde_json::to_value(outcome)?)
        },
    ));

    registry.register(PrimitiveDef::new(
        "semantic_search",
        Domain::Cognition,
        "Ranked search: cosine over embeddings, full-text fallback",
        Interface::new(&["query"], &["type", "limit"]),
        |ctx, inputs| {
            let entity_type = match opt_str(inputs, "type") {
                Some(name) => Some(parse_entity_type(name)?),
                None => None,
            };
            let outcome = semantic::search(
                ctx.store,
                ctx.vectorizer,
                require_str(inputs, "query")?,
                entity_type,
                opt_usize(inputs, "limit", 10),
            )?;
            Ok(serde_json::to_value(outcome)?)
        },
    ));

    registry.register(PrimitiveDef::new(
        "suggest_bonds",
        Domain::Cognition,
        "Physics-constrained bond candidates, ranked",
        Interface::new(&["id"], &["limit"]),
        |ctx, inputs| {
            let outcome = semantic::suggest_bonds(
                ctx.store,
                ctx.vectorizer,
                require_str(inputs, "id")?,
                opt_usize(inputs, "limit", 10),
            )?;
            Ok(serde_json::to_value(outcome)?)
        },
    ));

    registry.register(PrimitiveDef::new(
        "detect_clusters",
        Domain::Cognition,
        "Group entities of one type by embedding or shared terms",
        Interface::new(&["type"], &[]),
        |ctx, inputs| {
            let entity_type = parse_entity_type(require_str(inputs, "type")?)?;
            let outcome = semantic::detect_clusters(ctx.store, ctx.vectorizer, entity_type)?;
            Ok(serde_json::to_value(outcome)?)
        },
    ));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registration() {
        let mut registry = PrimitiveRegistry::new();
        register(&mut registry);
        for name in [
            "embed_entity",
            "embed_text",
            "semantic_similarity",
            "semantic_search",
            "suggest_bonds",
            "detect_clusters",
        ] {
            assert!(registry.contains(name), "missing {}", name);
        }
    }
}
