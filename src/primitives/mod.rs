//! The primitive registry: native operations exposed to the protocol VM.
//!
//! A primitive is a named native handler `(ctx, inputs) -> Result<Value>`
//! wrapped into the standard [`Response`] envelope by the registry.
//! Primitives are grouped by domain (attention, build, chronos, cognition,
//! graph, io, logic, sys); registration order does not affect semantics.
//!
//! Handlers never write to raw output — user-visible text goes through
//! `ctx.sink`.

pub mod attention;
pub mod build;
pub mod chronos;
pub mod cognition;
pub mod graph;
pub mod io;
pub mod logic;
pub mod sys;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::embedding::Vectorizer;
use crate::entity::JsonMap;
use crate::error::{ChoraError, ErrorKind, Result, ValidationError};
use crate::query::EntityFilter;
use crate::response::{Response, Sink};
use crate::store::GraphStore;
use crate::types::EntityType;
use tracing::warn;

/// Execution context handed to every primitive.
///
/// The context is the I/O membrane: the store handle, the registry (for
/// introspection), the vectorizer, the output sink, and the acting
/// persona. Any side effect a protocol wants must flow through here.
pub struct PrimitiveCtx<'a> {
    /// The graph store.
    pub store: &'a GraphStore,
    /// The registry itself, for capability introspection.
    pub registry: &'a PrimitiveRegistry,
    /// The configured vectorizer.
    pub vectorizer: &'a dyn Vectorizer,
    /// Output membrane for user-visible text.
    pub sink: Arc<dyn Sink>,
    /// Acting persona/user id, when known.
    pub persona: Option<String>,
    /// Absolute deadline for the enclosing dispatch, when one was set.
    pub deadline: Option<Instant>,
}

impl<'a> PrimitiveCtx<'a> {
    /// True when the enclosing dispatch's deadline has passed.
    pub fn deadline_exceeded(&self) -> bool {
        self.deadline.map(|d| Instant::now() >= d).unwrap_or(false)
    }
}

/// Handler signature for native primitives.
pub type Handler = Arc<dyn Fn(&PrimitiveCtx, &JsonMap) -> Result<Value> + Send + Sync>;

/// Declared input interface of a primitive or protocol.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Interface {
    /// Inputs that must be present.
    pub required: Vec<String>,
    /// Inputs that may be present.
    pub optional: Vec<String>,
}

impl Interface {
    /// Builds an interface from field-name lists.
    pub fn new(required: &[&str], optional: &[&str]) -> Self {
        Self {
            required: required.iter().map(|s| s.to_string()).collect(),
            optional: optional.iter().map(|s| s.to_string()).collect(),
        }
    }
}

/// Primitive domain grouping.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Domain {
    /// Signals and foci.
    Attention,
    /// Protocol authoring.
    Build,
    /// Time.
    Chronos,
    /// The semantic layer.
    Cognition,
    /// Entities and bonds.
    Graph,
    /// The output membrane.
    Io,
    /// Pure evaluation.
    Logic,
    /// Introspection.
    Sys,
}

/// A registered primitive.
pub struct PrimitiveDef {
    /// Canonical short alias (`manifest_entity`).
    pub alias: String,
    /// Full id (`primitive-manifest-entity`).
    pub id: String,
    /// Domain grouping.
    pub domain: Domain,
    /// One-line description for capability listings.
    pub description: String,
    /// Declared inputs.
    pub interface: Interface,
    handler: Handler,
}

impl PrimitiveDef {
    /// Creates a definition; the full id is derived from the alias.
    pub fn new<F>(
        alias: &str,
        domain: Domain,
        description: &str,
        interface: Interface,
        handler: F,
    ) -> Self
    where
        F: Fn(&PrimitiveCtx, &JsonMap) -> Result<Value> + Send + Sync + 'static,
    {
        Self {
            alias: alias.to_string(),
            id: format!("primitive-{}", alias.replace('_', "-")),
            domain,
            description: description.to_string(),
            interface,
            handler: Arc::new(handler),
        }
    }
}

impl std::fmt::Debug for PrimitiveDef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrimitiveDef")
            .field("id", &self.id)
            .field("domain", &self.domain)
            .finish_non_exhaustive()
    }
}

/// Capability kind tag.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CapabilityKind {
    /// An executable protocol entity.
    Protocol,
    /// A native primitive.
    Primitive,
}

/// One entry in a capability listing.
#[derive(Clone, Debug, Serialize)]
pub struct Capability {
    /// The dispatchable id.
    pub id: String,
    /// Protocol or primitive.
    pub kind: CapabilityKind,
    /// One-line description.
    pub description: String,
    /// Declared inputs.
    pub interface: Interface,
}

/// Name → primitive registry. Read-only after initialization.
#[derive(Default)]
pub struct PrimitiveRegistry {
    defs: Vec<Arc<PrimitiveDef>>,
    by_name: HashMap<String, Arc<PrimitiveDef>>,
}

impl std::fmt::Debug for PrimitiveRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrimitiveRegistry")
            .field("primitives", &self.defs.len())
            .finish()
    }
}

impl PrimitiveRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// The standard registry with every built-in primitive.
    pub fn standard() -> Self {
        let mut registry = Self::new();
        graph::register(&mut registry);
        attention::register(&mut registry);
        build::register(&mut registry);
        chronos::register(&mut registry);
        cognition::register(&mut registry);
        io::register(&mut registry);
        logic::register(&mut registry);
        sys::register(&mut registry);
        registry
    }

    /// Registers a primitive under its full id and its alias.
    pub fn register(&mut self, def: PrimitiveDef) {
        let def = Arc::new(def);
        for name in [def.id.clone(), def.alias.clone()] {
            if self.by_name.insert(name.clone(), def.clone()).is_some() {
                warn!(%name, "Primitive name registered twice; later wins");
            }
        }
        self.defs.push(def);
    }

    /// Looks up a primitive by full id or alias.
    pub fn get(&self, name: &str) -> Option<&Arc<PrimitiveDef>> {
        self.by_name.get(name)
    }

    /// True when a primitive answers to this name.
    pub fn contains(&self, name: &str) -> bool {
        self.by_name.contains_key(name)
    }

    /// All registered primitives, sorted by id.
    pub fn list(&self) -> Vec<&Arc<PrimitiveDef>> {
        let mut defs: Vec<_> = self.defs.iter().collect();
        defs.sort_by(|a, b| a.id.cmp(&b.id));
        defs
    }

    /// Invokes a primitive by name, producing the standard envelope.
    ///
    /// Missing primitives and missing required inputs become error
    /// envelopes, never panics or raw errors.
    pub fn invoke(&self, name: &str, ctx: &PrimitiveCtx, inputs: &JsonMap) -> Response {
        let def = match self.get(name) {
            Some(def) => def,
            None => {
                return Response::error(
                    ErrorKind::PrimitiveNotFound,
                    format!("Primitive not found: {}", name),
                );
            }
        };

        for required in &def.interface.required {
            if !inputs.contains_key(required) {
                return Response::error(
                    ErrorKind::InvalidInputs,
                    format!("Required field missing: {}", required),
                );
            }
        }

        if ctx.deadline_exceeded() {
            return Response::error(ErrorKind::ExecutionError, "timeout");
        }

        Response::from((def.handler)(ctx, inputs))
    }
}

/// Builds the merged capability listing: protocols from the entities
/// table plus the primitive registry.
pub fn collect_capabilities(
    store: &GraphStore,
    registry: &PrimitiveRegistry,
) -> Result<Vec<Capability>> {
    let mut capabilities = Vec::new();

    for protocol in store.query_entities(&EntityFilter::of_type(EntityType::Protocol))? {
        let interface = protocol
            .data
            .get("inputs_schema")
            .and_then(|v| serde_json::from_value::<Interface>(v.clone()).ok())
            .unwrap_or_default();
        capabilities.push(Capability {
            id: protocol.id.to_string(),
            kind: CapabilityKind::Protocol,
            description: protocol
                .data_str("description")
                .unwrap_or_else(|| protocol.title())
                .to_string(),
            interface,
        });
    }

    for def in registry.list() {
        capabilities.push(Capability {
            id: def.id.clone(),
            kind: CapabilityKind::Primitive,
            description: def.description.clone(),
            interface: def.interface.clone(),
        });
    }

    Ok(capabilities)
}

// ============================================================================
// Input helpers shared by handler implementations
// ============================================================================

pub(crate) fn require_str<'m>(inputs: &'m JsonMap, key: &str) -> Result<&'m str> {
    inputs
        .get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| ValidationError::required_field(key).into())
}

pub(crate) fn opt_str<'m>(inputs: &'m JsonMap, key: &str) -> Option<&'m str> {
    inputs.get(key).and_then(Value::as_str)
}

pub(crate) fn opt_map(inputs: &JsonMap, key: &str) -> JsonMap {
    inputs
        .get(key)
        .and_then(Value::as_object)
        .cloned()
        .unwrap_or_default()
}

pub(crate) fn opt_usize(inputs: &JsonMap, key: &str, default: usize) -> usize {
    inputs
        .get(key)
        .and_then(Value::as_u64)
        .map(|n| n as usize)
        .unwrap_or(default)
}

pub(crate) fn opt_f32(inputs: &JsonMap, key: &str) -> Option<f32> {
    inputs.get(key).and_then(Value::as_f64).map(|f| f as f32)
}

pub(crate) fn parse_entity_type(name: &str) -> Result<EntityType> {
    EntityType::parse(name).ok_or_else(|| {
        ChoraError::from(ValidationError::invalid_field(
            "type",
            format!("unknown entity type '{}'", name),
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::embedding::NullVectorizer;
    use crate::response::MemorySink;
    use serde_json::json;
    use tempfile::tempdir;

    fn ctx_fixture() -> (GraphStore, PrimitiveRegistry, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let store = GraphStore::open(dir.path().join("test.db"), Config::default()).unwrap();
        (store, PrimitiveRegistry::standard(), dir)
    }

    #[test]
    fn test_standard_registry_answers_to_id_and_alias() {
        let registry = PrimitiveRegistry::standard();
        assert!(registry.contains("manifest_entity"));
        assert!(registry.contains("primitive-manifest-entity"));
        assert!(registry.contains("semantic_search"));
        assert!(!registry.contains("warp_core"));
    }

    #[test]
    fn test_list_is_sorted_and_tagged() {
        let registry = PrimitiveRegistry::standard();
        let listed = registry.list();
        assert!(listed.len() >= 20);
        for window in listed.windows(2) {
            assert!(window[0].id < window[1].id);
        }
    }

    #[test]
    fn test_invoke_unknown_primitive() {
        let (store, registry, _dir) = ctx_fixture();
        let vectorizer = NullVectorizer::new(384);
        let ctx = PrimitiveCtx {
            store: &store,
            registry: &registry,
            vectorizer: &vectorizer,
            sink: MemorySink::new(),
            persona: None,
            deadline: None,
        };
        let response = registry.invoke("missing_primitive", &ctx, &JsonMap::new());
        assert_eq!(response.error_kind(), Some(ErrorKind::PrimitiveNotFound));
    }

    #[test]
    fn test_invoke_checks_required_inputs() {
        let (store, registry, _dir) = ctx_fixture();
        let vectorizer = NullVectorizer::new(384);
        let ctx = PrimitiveCtx {
            store: &store,
            registry: &registry,
            vectorizer: &vectorizer,
            sink: MemorySink::new(),
            persona: None,
            deadline: None,
        };
        let response = registry.invoke("manifest_entity", &ctx, &JsonMap::new());
        assert_eq!(response.error_kind(), Some(ErrorKind::InvalidInputs));
    }

    #[test]
    fn test_invoke_success_envelope() {
        let (store, registry, _dir) = ctx_fixture();
        let vectorizer = NullVectorizer::new(384);
        let ctx = PrimitiveCtx {
            store: &store,
            registry: &registry,
            vectorizer: &vectorizer,
            sink: MemorySink::new(),
            persona: None,
            deadline: None,
        };
        let mut inputs = JsonMap::new();
        inputs.insert("type".into(), json!("learning"));
        inputs.insert("data".into(), json!({"title": "From a test"}));
        let response = registry.invoke("manifest_entity", &ctx, &inputs);
        assert!(response.is_success());
        let id = response.data().unwrap()["entity_id"].as_str().unwrap();
        assert!(id.starts_with("learning-"));
    }

    #[test]
    fn test_collect_capabilities_merges_kinds() {
        let (store, registry, _dir) = ctx_fixture();
        let mut data = JsonMap::new();
        data.insert("graph".into(), json!({"nodes": [], "edges": []}));
        data.insert("description".into(), json!("a protocol"));
        data.insert(
            "inputs_schema".into(),
            json!({"required": ["x"], "optional": []}),
        );
        store
            .save_generic("protocol-caps", EntityType::Protocol, data)
            .unwrap();

        let capabilities = collect_capabilities(&store, &registry).unwrap();
        let protocol = capabilities
            .iter()
            .find(|c| c.id == "protocol-caps")
            .unwrap();
        assert_eq!(protocol.kind, CapabilityKind::Protocol);
        assert_eq!(protocol.interface.required, vec!["x"]);
        assert!(capabilities
            .iter()
            .any(|c| c.kind == CapabilityKind::Primitive && c.id == "primitive-manifest-entity"));
    }
}
