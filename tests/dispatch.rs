//! Integration tests for the dispatch layer: intent normalization,
//! capability listing, the uniform result shape, and exit codes.

use std::sync::Arc;

use chora::{
    exit_code, CapabilityKind, Config, DispatchOptions, Engine, EntityType, ErrorKind, GraphStore,
    JsonMap, MemorySink,
};
use serde_json::json;
use tempfile::tempdir;

fn fixture() -> (Arc<Engine>, tempfile::TempDir) {
    let dir = tempdir().unwrap();
    let store = Arc::new(GraphStore::open(dir.path().join("test.db"), Config::default()).unwrap());
    (Arc::new(Engine::new(store)), dir)
}

fn inputs(value: serde_json::Value) -> JsonMap {
    value.as_object().cloned().unwrap_or_default()
}

fn seed_protocol(engine: &Engine, id: &str, output: serde_json::Value) {
    let mut data = JsonMap::new();
    data.insert(
        "graph".into(),
        json!({
            "nodes": [
                {"id": "start", "kind": "START"},
                {"id": "done", "kind": "RETURN", "output": output},
            ],
            "edges": [{"from": "start", "to": "done"}],
        }),
    );
    engine
        .store()
        .save_generic(id, EntityType::Protocol, data)
        .unwrap();
}

// ============================================================================
// Intent normalization (seed scenario 8)
// ============================================================================

#[test]
fn test_normalization_routes_all_forms_to_same_primitive() {
    let (engine, _dir) = fixture();

    for (intent, title) in [
        ("manifest_entity", "via alias"),
        ("primitive-manifest-entity", "via full id"),
        ("manifest-entity", "via dash form"),
    ] {
        let result = engine.dispatch(
            intent,
            inputs(json!({"type": "learning", "data": {"title": title}})),
            DispatchOptions::default(),
        );
        assert!(result.ok(), "intent '{}' failed: {:?}", intent, result);
        let id = result.data().unwrap()["entity_id"].as_str().unwrap();
        assert!(id.starts_with("learning-"), "intent '{}'", intent);
    }

    // All three dispatches created entities through the same primitive
    let learnings = engine
        .store()
        .query_entities(&chora::EntityFilter::of_type(EntityType::Learning))
        .unwrap();
    assert_eq!(learnings.len(), 3);
}

#[test]
fn test_protocol_resolved_by_short_name() {
    let (engine, _dir) = fixture();
    seed_protocol(&engine, "protocol-greet", json!({"greeting": "hello"}));

    let result = engine.dispatch("greet", JsonMap::new(), DispatchOptions::default());
    assert!(result.ok());
    assert_eq!(result.data().unwrap()["greeting"], "hello");
    assert_eq!(result.exit_node(), Some("done"));
}

#[test]
fn test_underscore_intent_reaches_dashed_protocol() {
    let (engine, _dir) = fixture();
    seed_protocol(&engine, "protocol-daily-review", json!({"ran": true}));

    let result = engine.dispatch("daily_review", JsonMap::new(), DispatchOptions::default());
    assert!(result.ok());
}

#[test]
fn test_unknown_intent_is_intent_not_found() {
    let (engine, _dir) = fixture();
    let result = engine.dispatch("never-heard-of-it", JsonMap::new(), DispatchOptions::default());
    assert_eq!(result.error_kind(), Some(ErrorKind::IntentNotFound));
    assert!(result.error_message().unwrap().contains("never-heard-of-it"));
}

// ============================================================================
// Uniform result shape (testable property 5)
// ============================================================================

#[test]
fn test_exactly_one_of_ok_or_error() {
    let (engine, _dir) = fixture();

    let ok = engine
        .dispatch("ping", JsonMap::new(), DispatchOptions::default())
        .to_value();
    assert_eq!(ok["ok"], json!(true));
    assert!(ok.get("error_kind").is_none());
    assert!(ok.get("error_message").is_none());

    let err = engine
        .dispatch("missing", JsonMap::new(), DispatchOptions::default())
        .to_value();
    assert_eq!(err["ok"], json!(false));
    assert!(err.get("data").is_none());
    assert_eq!(err["error_kind"], "intent_not_found");
}

#[test]
fn test_primitive_error_kinds_surface_unchanged() {
    let (engine, _dir) = fixture();

    // not_found from get_entity
    let result = engine.dispatch(
        "get_entity",
        inputs(json!({"id": "tool-ghost"})),
        DispatchOptions::default(),
    );
    assert_eq!(result.error_kind(), Some(ErrorKind::NotFound));

    // invalid_inputs from a missing required field
    let result = engine.dispatch("get_entity", JsonMap::new(), DispatchOptions::default());
    assert_eq!(result.error_kind(), Some(ErrorKind::InvalidInputs));

    // physics_violation through manage_bond
    engine
        .dispatch(
            "manifest_entity",
            inputs(json!({"type": "story", "id": "story-s", "data": {"title": "S"}})),
            DispatchOptions::default(),
        )
        .data()
        .unwrap();
    engine
        .dispatch(
            "manifest_entity",
            inputs(json!({"type": "tool", "id": "tool-t", "data": {"title": "T"}})),
            DispatchOptions::default(),
        )
        .data()
        .unwrap();
    let result = engine.dispatch(
        "manage_bond",
        inputs(json!({"verb": "verifies", "from_id": "story-s", "to_id": "tool-t"})),
        DispatchOptions::default(),
    );
    assert_eq!(result.error_kind(), Some(ErrorKind::PhysicsViolation));
}

// ============================================================================
// Capabilities
// ============================================================================

#[test]
fn test_capabilities_list_both_kinds() {
    let (engine, _dir) = fixture();
    seed_protocol(&engine, "protocol-caps", json!({}));

    let capabilities = engine.capabilities().unwrap();

    let protocol = capabilities
        .iter()
        .find(|c| c.id == "protocol-caps")
        .expect("protocol listed");
    assert_eq!(protocol.kind, CapabilityKind::Protocol);

    let primitive = capabilities
        .iter()
        .find(|c| c.id == "primitive-manage-bond")
        .expect("primitive listed");
    assert_eq!(primitive.kind, CapabilityKind::Primitive);
    assert!(primitive
        .interface
        .required
        .contains(&"verb".to_string()));
}

#[test]
fn test_capabilities_primitive_reports_same_list() {
    let (engine, _dir) = fixture();
    let result = engine.dispatch("capabilities", JsonMap::new(), DispatchOptions::default());
    assert!(result.ok());
    let count = result.data().unwrap()["count"].as_u64().unwrap();
    assert_eq!(count as usize, engine.capabilities().unwrap().len());
}

// ============================================================================
// Sink membrane
// ============================================================================

#[test]
fn test_speak_goes_through_sink() {
    let (engine, _dir) = fixture();
    let sink = MemorySink::new();

    let result = engine.dispatch(
        "speak",
        inputs(json!({"text": "the membrane holds"})),
        DispatchOptions {
            sink: Some(sink.clone()),
            ..Default::default()
        },
    );
    assert!(result.ok());
    assert_eq!(sink.lines(), vec!["the membrane holds"]);
}

// ============================================================================
// Exit codes
// ============================================================================

#[test]
fn test_exit_codes_follow_contract() {
    let (engine, _dir) = fixture();

    let ok = engine.dispatch("ping", JsonMap::new(), DispatchOptions::default());
    assert_eq!(exit_code(ok.error_kind()), 0);

    let not_found = engine.dispatch("missing", JsonMap::new(), DispatchOptions::default());
    assert_eq!(exit_code(not_found.error_kind()), 3);

    let invalid = engine.dispatch("get_entity", JsonMap::new(), DispatchOptions::default());
    assert_eq!(exit_code(invalid.error_kind()), 2);
}
