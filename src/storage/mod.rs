//! Storage layer abstractions for Chora.
//!
//! This module provides a trait-based abstraction over the storage engine,
//! allowing different backends to be used (e.g., redb, mock for testing).
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     GraphStore                               │
//! │                         │                                    │
//! │                         ▼                                    │
//! │              ┌─────────────────────┐                        │
//! │              │   StorageEngine     │  ← Trait               │
//! │              └─────────────────────┘                        │
//! │                         ▲                                    │
//! │                         │                                    │
//! │                  ┌──────┴──────┐                            │
//! │                  │ RedbStorage │                            │
//! │                  └─────────────┘                            │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! The engine knows nothing about physics, hooks, or signals — it provides
//! atomic multi-table writes and typed reads. Everything semantic lives in
//! the [`GraphStore`](crate::GraphStore) facade.

pub mod redb;
pub mod schema;

pub use self::redb::RedbStorage;
pub use schema::{
    ArchiveKind, ArchiveRecord, DatabaseMetadata, EmbeddingRecord, OutcomeError, OutcomeStatus,
    PulseSummary, SignalOutcome, SCHEMA_VERSION,
};

use std::path::Path;

use crate::bond::Bond;
use crate::config::Config;
use crate::entity::Entity;
use crate::error::Result;
use crate::physics::Verb;
use crate::types::{BondId, EntityType};

/// Storage engine trait for Chora.
///
/// This trait defines the contract that any storage backend must implement.
/// The primary implementation is [`RedbStorage`].
///
/// # Thread Safety
///
/// Implementations must be `Send + Sync` to allow the store to be shared
/// across threads. The engine handles internal synchronization; writes are
/// serialized by a single writer.
pub trait StorageEngine: Send + Sync {
    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Returns the database metadata.
    fn metadata(&self) -> &DatabaseMetadata;

    /// Closes the storage engine, flushing any pending writes.
    ///
    /// This method consumes the storage engine. After calling `close()`,
    /// the engine cannot be used.
    fn close(self: Box<Self>) -> Result<()>;

    /// Returns the path to the database file, if applicable.
    fn path(&self) -> Option<&Path>;

    // =========================================================================
    // Entity Operations
    // =========================================================================

    /// Saves an entity atomically across its tables.
    ///
    /// Writes, in a single transaction:
    /// - the entity row
    /// - the by-type index entry
    /// - the refreshed FTS postings (`fts_terms` computed by the caller)
    /// - when `drop_embedding` is set, removal of the embedding row
    ///
    /// The embedding removal rides inside the commit so the invalidation
    /// invariant holds the instant the commit is visible.
    fn save_entity(&self, entity: &Entity, drop_embedding: bool, fts_terms: &[String])
        -> Result<()>;

    /// Retrieves an entity by id from the live table.
    fn get_entity(&self, id: &str) -> Result<Option<Entity>>;

    /// Returns true if the live table holds an entity with this id.
    fn entity_exists(&self, id: &str) -> Result<bool>;

    /// Lists live entities, optionally restricted to one type (via the
    /// by-type index).
    fn list_entities(&self, entity_type: Option<EntityType>) -> Result<Vec<Entity>>;

    /// Moves an entity out of the live tables into the archive.
    ///
    /// Removes, in a single transaction: the entity row, its by-type index
    /// entry, its FTS postings, and its embedding row; then inserts the
    /// archive record holding the full prior payload.
    fn archive_entity(&self, entity: &Entity) -> Result<()>;

    /// Reads an archive record by key (`entity:{id}` or `bond:{uuid}`).
    fn get_archived(&self, key: &str) -> Result<Option<ArchiveRecord>>;

    // =========================================================================
    // Bond Operations
    // =========================================================================

    /// Saves a bond and its index entries atomically.
    ///
    /// Writes to 4 tables in a single transaction: the bond row, the
    /// by-from and by-to multimaps, and the `(verb, from, to)` uniqueness
    /// key.
    fn save_bond(&self, bond: &Bond) -> Result<()>;

    /// Retrieves a bond by id.
    fn get_bond(&self, id: BondId) -> Result<Option<Bond>>;

    /// Finds the bond with the given `(verb, from, to)` identity, if any.
    fn find_bond(&self, verb: Verb, from: &str, to: &str) -> Result<Option<Bond>>;

    /// All bond ids where the given entity is the source.
    fn bond_ids_from(&self, entity_id: &str) -> Result<Vec<BondId>>;

    /// All bond ids where the given entity is the target.
    fn bond_ids_to(&self, entity_id: &str) -> Result<Vec<BondId>>;

    /// Moves a bond out of the live tables into the archive.
    fn archive_bond(&self, bond: &Bond) -> Result<()>;

    // =========================================================================
    // Embedding Operations
    // =========================================================================

    /// Saves an embedding row (delete-then-insert under the writer lock).
    fn save_embedding(&self, record: &EmbeddingRecord) -> Result<()>;

    /// Retrieves an embedding row by entity id.
    fn get_embedding(&self, entity_id: &str) -> Result<Option<EmbeddingRecord>>;

    /// Deletes an embedding row. Returns true if one existed.
    fn delete_embedding(&self, entity_id: &str) -> Result<bool>;

    /// Lists entity ids that currently have an embedding row.
    fn list_embedded_ids(&self) -> Result<Vec<String>>;

    // =========================================================================
    // Full-Text Postings
    // =========================================================================

    /// Entity ids posted under the given term.
    fn fts_candidates(&self, term: &str) -> Result<Vec<String>>;

    /// Terms currently posted for the given entity.
    fn fts_terms_for(&self, entity_id: &str) -> Result<Vec<String>>;

    // =========================================================================
    // Outcome & Pulse History
    // =========================================================================

    /// Appends a signal outcome record.
    fn record_outcome(&self, outcome: &SignalOutcome) -> Result<()>;

    /// All outcome records for a signal, chronological.
    fn outcomes_for_signal(&self, signal_id: &str) -> Result<Vec<SignalOutcome>>;

    /// Appends a pulse summary and trims the table to `retain` rows.
    fn append_pulse_summary(&self, summary: &PulseSummary, retain: usize) -> Result<()>;

    /// The most recent pulse summaries, newest first.
    fn recent_pulse_summaries(&self, limit: usize) -> Result<Vec<PulseSummary>>;
}

/// Opens a storage engine at the given path.
///
/// This is a convenience function that creates a [`RedbStorage`] instance.
/// For more control, use `RedbStorage::open()` directly.
///
/// # Errors
///
/// Returns an error if:
/// - The database file is corrupted
/// - The database is locked by another process
/// - Schema version doesn't match
/// - Embedding dimension doesn't match (for existing databases)
pub fn open_storage(path: impl AsRef<Path>, config: &Config) -> Result<Box<dyn StorageEngine>> {
    let storage = RedbStorage::open(path, config)?;
    Ok(Box::new(storage))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_open_storage() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.db");

        let config = Config::default();
        let storage = open_storage(&path, &config).unwrap();

        assert_eq!(storage.metadata().embedding_dimension, 384);
        assert!(storage.path().is_some());

        storage.close().unwrap();
    }

    #[test]
    fn test_storage_engine_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<RedbStorage>();
    }
}
