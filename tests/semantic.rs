//! Integration tests for the semantic layer: graceful degradation, ranked
//! search, bond suggestions, and clustering.

use std::sync::Arc;

use chora::{Config, DispatchOptions, Engine, EntityId, GraphStore, JsonMap, NewBond, Verb};
use serde_json::json;
use tempfile::tempdir;

fn fixture(config: Config) -> (Arc<Engine>, tempfile::TempDir) {
    let dir = tempdir().unwrap();
    let store = Arc::new(GraphStore::open(dir.path().join("test.db"), config).unwrap());
    (Arc::new(Engine::new(store)), dir)
}

fn inputs(value: serde_json::Value) -> JsonMap {
    value.as_object().cloned().unwrap_or_default()
}

fn seed(engine: &Engine, id: &str, title: &str) {
    let mut data = JsonMap::new();
    data.insert("title".into(), json!(title));
    engine
        .store()
        .save_generic(id, EntityId::parse(id).unwrap().entity_type(), data)
        .unwrap();
}

fn embed(engine: &Engine, id: &str) {
    let result = engine.dispatch(
        "embed_entity",
        inputs(json!({"id": id})),
        DispatchOptions::default(),
    );
    assert!(result.ok());
    assert_eq!(result.data().unwrap()["method"], "semantic");
}

// ============================================================================
// Graceful degradation without a vectorizer
// ============================================================================

#[test]
fn test_embed_entity_falls_back_without_vectorizer() {
    let (engine, _dir) = fixture(Config::default());
    seed(&engine, "learning-a", "some learning");

    let result = engine.dispatch(
        "embed_entity",
        inputs(json!({"id": "learning-a"})),
        DispatchOptions::default(),
    );
    assert!(result.ok(), "degradation is success, not error");
    let data = result.data().unwrap();
    assert_eq!(data["method"], "fallback");
    assert!(data["error"].as_str().is_some());
    assert!(engine.store().get_embedding("learning-a").unwrap().is_none());
}

#[test]
fn test_embed_text_falls_back_without_vectorizer() {
    let (engine, _dir) = fixture(Config::default());
    let result = engine.dispatch(
        "embed_text",
        inputs(json!({"text": "free text"})),
        DispatchOptions::default(),
    );
    assert!(result.ok());
    assert_eq!(result.data().unwrap()["method"], "fallback");
}

#[test]
fn test_search_falls_back_to_fts() {
    let (engine, _dir) = fixture(Config::default());
    seed(&engine, "learning-input", "validate user input");
    seed(&engine, "learning-other", "deploy the service");

    let result = engine.dispatch(
        "semantic_search",
        inputs(json!({"query": "validate input"})),
        DispatchOptions::default(),
    );
    assert!(result.ok());
    let data = result.data().unwrap();
    assert_eq!(data["method"], "fts");
    let hits = data["hits"].as_array().unwrap();
    assert_eq!(hits[0]["entity"]["id"], "learning-input");
}

#[test]
fn test_similarity_missing_vectors_is_zero_fallback() {
    let (engine, _dir) = fixture(Config::default());
    seed(&engine, "learning-a", "one");
    seed(&engine, "learning-b", "two");

    let result = engine.dispatch(
        "semantic_similarity",
        inputs(json!({"a": "learning-a", "b": "learning-b"})),
        DispatchOptions::default(),
    );
    let data = result.data().unwrap();
    assert_eq!(data["score"], json!(0.0));
    assert_eq!(data["method"], "fallback");
}

#[test]
fn test_identical_entity_scores_one() {
    let (engine, _dir) = fixture(Config::default());
    seed(&engine, "learning-a", "one");

    let result = engine.dispatch(
        "semantic_similarity",
        inputs(json!({"a": "learning-a", "b": "learning-a"})),
        DispatchOptions::default(),
    );
    assert_eq!(result.data().unwrap()["score"], json!(1.0));
}

// ============================================================================
// Semantic paths with the deterministic hash vectorizer
// ============================================================================

#[test]
fn test_semantic_search_ranks_by_cosine() {
    let (engine, _dir) = fixture(Config::with_hash_vectorizer());
    seed(&engine, "learning-match", "validate user input at the boundary");
    seed(&engine, "learning-far", "tune garbage collector pauses");
    embed(&engine, "learning-match");
    embed(&engine, "learning-far");

    let result = engine.dispatch(
        "semantic_search",
        inputs(json!({"query": "validate user input"})),
        DispatchOptions::default(),
    );
    let data = result.data().unwrap();
    assert_eq!(data["method"], "semantic");
    let hits = data["hits"].as_array().unwrap();
    assert_eq!(hits[0]["entity"]["id"], "learning-match");
    assert!(hits[0]["score"].as_f64().unwrap() > hits[1]["score"].as_f64().unwrap());
}

#[test]
fn test_similarity_semantic_with_stored_vectors() {
    let (engine, _dir) = fixture(Config::with_hash_vectorizer());
    seed(&engine, "learning-a", "validate user input early");
    seed(&engine, "learning-b", "validate user input late");
    seed(&engine, "learning-c", "unrelated orchestration concerns");
    for id in ["learning-a", "learning-b", "learning-c"] {
        embed(&engine, id);
    }

    let close = engine
        .dispatch(
            "semantic_similarity",
            inputs(json!({"a": "learning-a", "b": "learning-b"})),
            DispatchOptions::default(),
        )
        .data()
        .unwrap()
        .clone();
    let far = engine
        .dispatch(
            "semantic_similarity",
            inputs(json!({"a": "learning-a", "b": "learning-c"})),
            DispatchOptions::default(),
        )
        .data()
        .unwrap()
        .clone();

    assert_eq!(close["method"], "semantic");
    assert!(close["score"].as_f64().unwrap() > far["score"].as_f64().unwrap());
}

#[test]
fn test_embedding_survives_reembedding_after_update() {
    let (engine, _dir) = fixture(Config::with_hash_vectorizer());
    seed(&engine, "learning-re", "first wording");
    embed(&engine, "learning-re");

    // Data update invalidates; the semantic layer can re-embed
    let mut patch = JsonMap::new();
    patch.insert("title".into(), json!("second wording"));
    engine
        .store()
        .update_entity_data("learning-re", patch)
        .unwrap();
    assert!(engine.store().get_embedding("learning-re").unwrap().is_none());

    embed(&engine, "learning-re");
    assert!(engine.store().get_embedding("learning-re").unwrap().is_some());
}

// ============================================================================
// Bond suggestions
// ============================================================================

#[test]
fn test_suggest_bonds_respects_physics() {
    let (engine, _dir) = fixture(Config::default());
    seed(&engine, "learning-l", "shared wording here");
    seed(&engine, "principle-p", "shared wording here");
    seed(&engine, "tool-t", "shared wording here");

    let result = engine.dispatch(
        "suggest_bonds",
        inputs(json!({"id": "learning-l", "limit": 50})),
        DispatchOptions::default(),
    );
    let data = result.data().unwrap();
    assert_eq!(data["method"], "type-based");

    let suggestions = data["suggestions"].as_array().unwrap();
    assert!(!suggestions.is_empty());
    // learning surfaces principle is admitted
    assert!(suggestions.iter().any(|s| {
        s["verb"] == "surfaces" && s["from_id"] == "learning-l" && s["to_id"] == "principle-p"
    }));
    // nothing suggests a triple outside the table
    for s in suggestions {
        let verb = chora::Verb::parse(s["verb"].as_str().unwrap()).unwrap();
        let from = EntityId::parse(s["from_id"].as_str().unwrap()).unwrap();
        let to = EntityId::parse(s["to_id"].as_str().unwrap()).unwrap();
        assert!(chora::physics::allows(verb, from.entity_type(), to.entity_type()));
        assert_ne!(verb, chora::Verb::CrystallizedFrom);
    }
}

#[test]
fn test_suggest_bonds_excludes_existing() {
    let (engine, _dir) = fixture(Config::default());
    seed(&engine, "learning-l", "alpha");
    seed(&engine, "principle-p", "alpha");
    engine
        .store()
        .manage_bond(NewBond::new(
            Verb::Surfaces,
            EntityId::parse("learning-l").unwrap(),
            EntityId::parse("principle-p").unwrap(),
        ))
        .unwrap();

    let result = engine.dispatch(
        "suggest_bonds",
        inputs(json!({"id": "learning-l", "limit": 50})),
        DispatchOptions::default(),
    );
    let suggestions = result.data().unwrap()["suggestions"].as_array().unwrap().clone();
    assert!(!suggestions.iter().any(|s| {
        s["verb"] == "surfaces" && s["from_id"] == "learning-l" && s["to_id"] == "principle-p"
    }));
}

// ============================================================================
// Clustering
// ============================================================================

#[test]
fn test_detect_clusters_keyword_fallback() {
    let (engine, _dir) = fixture(Config::default());
    seed(&engine, "learning-v1", "validation of inputs");
    seed(&engine, "learning-v2", "validation of outputs");
    seed(&engine, "learning-gc", "garbage collection pauses");

    let result = engine.dispatch(
        "detect_clusters",
        inputs(json!({"type": "learning"})),
        DispatchOptions::default(),
    );
    let data = result.data().unwrap();
    assert_eq!(data["method"], "keyword");

    let clusters = data["clusters"].as_array().unwrap();
    let validation = clusters
        .iter()
        .find(|c| c["label"] == "validation")
        .expect("shared-term cluster");
    assert_eq!(validation["members"].as_array().unwrap().len(), 2);
}

#[test]
fn test_detect_clusters_semantic_with_vectors() {
    let (engine, _dir) = fixture(Config::with_hash_vectorizer());
    for (id, title) in [
        ("learning-a1", "validate user input forms"),
        ("learning-a2", "validate user input payloads"),
        ("learning-b1", "tune garbage collector pauses"),
        ("learning-b2", "tune garbage collector threads"),
    ] {
        seed(&engine, id, title);
        embed(&engine, id);
    }

    let result = engine.dispatch(
        "detect_clusters",
        inputs(json!({"type": "learning"})),
        DispatchOptions::default(),
    );
    let data = result.data().unwrap();
    assert_eq!(data["method"], "semantic");
    let clusters = data["clusters"].as_array().unwrap();
    assert!(!clusters.is_empty());
    let total: usize = clusters
        .iter()
        .map(|c| c["members"].as_array().unwrap().len())
        .sum();
    assert_eq!(total, 4);
}
