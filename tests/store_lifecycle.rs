//! Integration tests for entity lifecycle, embedding cascade, archival,
//! full-text search, and the save-hook bus.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use chora::{
    ChoraError, Config, Entity, EntityFilter, EntityId, EntityStatus, EntityType, GraphStore,
    JsonMap, NewBond, Verb,
};
use serde_json::json;
use tempfile::tempdir;

fn open_store() -> (GraphStore, tempfile::TempDir) {
    let dir = tempdir().unwrap();
    let store = GraphStore::open(dir.path().join("test.db"), Config::default()).unwrap();
    (store, dir)
}

fn entity(id: &str, pairs: &[(&str, serde_json::Value)]) -> Entity {
    Entity::new(
        EntityId::parse(id).unwrap(),
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect(),
    )
}

fn dummy_vector(dimension: usize) -> Vec<f32> {
    let mut v = vec![0.0; dimension];
    v[0] = 1.0;
    v
}

// ============================================================================
// Embedding cascade (seed scenario 6)
// ============================================================================

#[test]
fn test_embedding_cascade_on_update_and_archive() {
    let (store, _dir) = open_store();
    store
        .create_entity(entity("learning-e", &[("title", json!("Original"))]))
        .unwrap();

    store
        .save_embedding("learning-e", dummy_vector(384))
        .unwrap();
    assert!(store.get_embedding("learning-e").unwrap().is_some());

    // Updating data invalidates the row in the same commit
    let mut patch = JsonMap::new();
    patch.insert("title".into(), json!("Changed"));
    store.update_entity_data("learning-e", patch).unwrap();
    assert!(store.get_embedding("learning-e").unwrap().is_none());

    // Re-embed, then archive: the archive row holds the payload and the
    // embedding row is gone
    store
        .save_embedding("learning-e", dummy_vector(384))
        .unwrap();
    store.archive_entity("learning-e", false).unwrap();

    assert!(store.try_get_entity("learning-e").unwrap().is_none());
    assert!(store.get_embedding("learning-e").unwrap().is_none());
    let record = store.get_archived_entity("learning-e").unwrap().unwrap();
    assert_eq!(record.payload["id"], "learning-e");
    assert_eq!(record.payload["data"]["title"], "Changed");
}

#[test]
fn test_status_change_preserves_embedding() {
    let (store, _dir) = open_store();
    store
        .create_entity(entity("learning-s", &[("title", json!("Stable"))]))
        .unwrap();
    store
        .save_embedding("learning-s", dummy_vector(384))
        .unwrap();

    // A status flip does not touch data, so the vector survives
    store
        .set_status("learning-s", EntityStatus::Deprecated)
        .unwrap();
    assert!(store.get_embedding("learning-s").unwrap().is_some());
}

#[test]
fn test_embedding_dimension_checked() {
    let (store, _dir) = open_store();
    store
        .create_entity(entity("learning-d", &[("title", json!("Dim"))]))
        .unwrap();

    let err = store
        .save_embedding("learning-d", dummy_vector(64))
        .unwrap_err();
    assert!(err.is_validation());
}

// ============================================================================
// Archive semantics
// ============================================================================

#[test]
fn test_archive_refuses_then_forces_with_bonds() {
    let (store, _dir) = open_store();
    store
        .create_entity(entity("inquiry-a", &[("title", json!("A"))]))
        .unwrap();
    store
        .create_entity(entity("learning-b", &[("title", json!("B"))]))
        .unwrap();
    let outcome = store
        .manage_bond(NewBond::new(
            Verb::Yields,
            EntityId::parse("inquiry-a").unwrap(),
            EntityId::parse("learning-b").unwrap(),
        ))
        .unwrap();

    let err = store.archive_entity("inquiry-a", false).unwrap_err();
    assert!(matches!(err, ChoraError::ArchiveHasBonds { .. }));
    assert!(store.try_get_entity("inquiry-a").unwrap().is_some());

    store.archive_entity("inquiry-a", true).unwrap();
    assert!(store.try_get_entity("inquiry-a").unwrap().is_none());
    // The dangling bond was dissolved into the archive first
    assert!(store.get_archived_bond(outcome.bond.id).unwrap().is_some());
    assert!(store.bonds_to("learning-b").unwrap().is_empty());
}

#[test]
fn test_duplicate_id_rejected() {
    let (store, _dir) = open_store();
    store
        .create_entity(entity("tool-t", &[("title", json!("T"))]))
        .unwrap();
    let err = store
        .create_entity(entity("tool-t", &[("title", json!("T2"))]))
        .unwrap_err();
    assert!(matches!(err, ChoraError::DuplicateId(_)));
}

#[test]
fn test_updated_at_monotonic_across_saves() {
    let (store, _dir) = open_store();
    store
        .create_entity(entity("learning-m", &[("title", json!("M"))]))
        .unwrap();
    let first = store.get_entity("learning-m").unwrap();

    std::thread::sleep(std::time::Duration::from_millis(5));
    let mut patch = JsonMap::new();
    patch.insert("content".into(), json!("more"));
    store.update_entity_data("learning-m", patch).unwrap();

    let second = store.get_entity("learning-m").unwrap();
    assert_eq!(second.created_at, first.created_at);
    assert!(second.updated_at > first.updated_at);
}

// ============================================================================
// Full-text search
// ============================================================================

#[test]
fn test_fts_search_scores_and_filters_by_type() {
    let (store, _dir) = open_store();
    store
        .create_entity(entity(
            "learning-validate",
            &[("title", json!("validate user input"))],
        ))
        .unwrap();
    store
        .create_entity(entity(
            "tool-validator",
            &[("title", json!("input validator tool"))],
        ))
        .unwrap();

    let all = store.fts_search("input", None, 10).unwrap();
    assert_eq!(all.len(), 2);

    let tools = store
        .fts_search("input", Some(EntityType::Tool), 10)
        .unwrap();
    assert_eq!(tools.len(), 1);
    assert_eq!(tools[0].entity.id.as_str(), "tool-validator");
}

#[test]
fn test_fts_index_follows_updates() {
    let (store, _dir) = open_store();
    store
        .create_entity(entity("learning-f", &[("title", json!("alpha topic"))]))
        .unwrap();
    assert_eq!(store.fts_search("alpha", None, 10).unwrap().len(), 1);

    let mut patch = JsonMap::new();
    patch.insert("title".into(), json!("omega topic"));
    store.update_entity_data("learning-f", patch).unwrap();

    assert!(store.fts_search("alpha", None, 10).unwrap().is_empty());
    assert_eq!(store.fts_search("omega", None, 10).unwrap().len(), 1);
}

#[test]
fn test_fts_index_entity_rebuilds_postings() {
    let (store, _dir) = open_store();
    store
        .create_entity(entity("learning-r", &[("title", json!("rebuild me"))]))
        .unwrap();

    store.fts_index_entity("learning-r").unwrap();
    let hits = store.fts_search("rebuild", None, 10).unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].entity.id.as_str(), "learning-r");
}

// ============================================================================
// Save hooks (timing choice: strictly after commit, failures isolated)
// ============================================================================

#[test]
fn test_hooks_observe_committed_state() {
    let (store, _dir) = open_store();
    let store = Arc::new(store);

    let seen = Arc::new(std::sync::Mutex::new(Vec::<bool>::new()));
    let hook_store = Arc::clone(&store);
    let hook_seen = Arc::clone(&seen);
    store.register_hook(Arc::new(move |event| {
        // The hook runs after the commit: the row is visible
        let exists = hook_store
            .try_get_entity(event.entity_id.as_str())?
            .is_some();
        hook_seen.lock().unwrap().push(exists);
        Ok(())
    }));

    store
        .create_entity(entity("learning-h", &[("title", json!("H"))]))
        .unwrap();
    assert_eq!(*seen.lock().unwrap(), vec![true]);
}

#[test]
fn test_failing_hook_does_not_roll_back() {
    let (store, _dir) = open_store();
    let calls = Arc::new(AtomicUsize::new(0));

    let hook_calls = Arc::clone(&calls);
    store.register_hook(Arc::new(move |_| {
        hook_calls.fetch_add(1, Ordering::SeqCst);
        Err(ChoraError::execution("deliberate hook failure"))
    }));
    let hook_calls = Arc::clone(&calls);
    store.register_hook(Arc::new(move |_| {
        hook_calls.fetch_add(10, Ordering::SeqCst);
        Ok(())
    }));

    store
        .create_entity(entity("learning-iso", &[("title", json!("Iso"))]))
        .unwrap();

    // Both hooks ran; the commit stands
    assert_eq!(calls.load(Ordering::SeqCst), 11);
    assert!(store.try_get_entity("learning-iso").unwrap().is_some());
}

#[test]
fn test_every_save_fires_hooks() {
    let (store, _dir) = open_store();
    let calls = Arc::new(AtomicUsize::new(0));
    let hook_calls = Arc::clone(&calls);
    store.register_hook(Arc::new(move |_| {
        hook_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }));

    store
        .create_entity(entity("learning-n", &[("title", json!("N"))]))
        .unwrap();
    let mut patch = JsonMap::new();
    patch.insert("content".into(), json!("1"));
    store.update_entity_data("learning-n", patch).unwrap();
    store
        .set_status("learning-n", EntityStatus::Deprecated)
        .unwrap();

    // Latest-write-wins is rejected: three saves, three events
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

// ============================================================================
// Queries
// ============================================================================

#[test]
fn test_query_by_type_status_and_field() {
    let (store, _dir) = open_store();
    store
        .create_entity(entity(
            "signal-one",
            &[("title", json!("One")), ("category", json!("epistemic"))],
        ))
        .unwrap();
    store
        .create_entity(entity(
            "signal-two",
            &[("title", json!("Two")), ("category", json!("stagnation"))],
        ))
        .unwrap();
    store.resolve_signal("signal-two", json!({})).unwrap();

    let active = store
        .query_entities(
            &EntityFilter::of_type(EntityType::Signal).with_status(EntityStatus::Active),
        )
        .unwrap();
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].id.as_str(), "signal-one");

    let stagnation = store
        .query_entities(
            &EntityFilter::of_type(EntityType::Signal)
                .where_eq("category", json!("stagnation")),
        )
        .unwrap();
    assert_eq!(stagnation.len(), 1);
    assert_eq!(stagnation[0].id.as_str(), "signal-two");
}

#[test]
fn test_store_reopens_with_data() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("test.db");

    let store = GraphStore::open(&path, Config::default()).unwrap();
    store
        .create_entity(entity("learning-persist", &[("title", json!("P"))]))
        .unwrap();
    store.close().unwrap();

    let store = GraphStore::open(&path, Config::default()).unwrap();
    let loaded = store.get_entity("learning-persist").unwrap();
    assert_eq!(loaded.data_str("title"), Some("P"));
    store.close().unwrap();
}
