//! The redb-backed [`StorageEngine`].
//!
//! [redb](https://docs.rs/redb) gives us ACID transactions, MVCC reads
//! against a single serialized writer, and crash recovery, all in pure
//! Rust. Each engine call below is one write transaction: the multi-table
//! writes it performs land together or not at all. Physics checks happen
//! in the facade *before* a transaction is opened — by the time control
//! reaches this module, the write is legal.
//!
//! On disk there is one file plus redb's lock sidecar. A metadata record
//! (schema version, embedding dimension, timestamps) is seeded on first
//! open and gates every reopen.

use std::path::{Path, PathBuf};

use ::redb::{
    Database, ReadableMultimapTable, ReadableTable, ReadableTableMetadata, WriteTransaction,
};
use tracing::{debug, info, instrument, warn};

use super::schema::{
    archive_bond_key, archive_entity_key, bond_key, outcome_key, outcome_key_range, ArchiveKind,
    ArchiveRecord, DatabaseMetadata, EmbeddingRecord, PulseSummary, SignalOutcome, ARCHIVE_TABLE,
    BONDS_BY_FROM_TABLE, BONDS_BY_TO_TABLE, BONDS_TABLE, BOND_KEYS_TABLE, EMBEDDINGS_TABLE,
    ENTITIES_BY_TYPE_TABLE, ENTITIES_TABLE, FTS_DOCS_TABLE, FTS_TERMS_TABLE, METADATA_TABLE,
    OUTCOMES_TABLE, PULSE_HISTORY_TABLE, SCHEMA_VERSION,
};
use super::StorageEngine;
use crate::bond::Bond;
use crate::config::Config;
use crate::entity::Entity;
use crate::error::{ChoraError, Result, StorageError, ValidationError};
use crate::physics::Verb;
use crate::types::{BondId, EntityType, Timestamp};

/// Metadata key in the metadata table.
const METADATA_KEY: &str = "db_metadata";

/// The production storage engine: one redb database file plus a cached
/// copy of its metadata record. Sharing across threads is safe; redb
/// serializes writers and snapshots readers internally.
#[derive(Debug)]
pub struct RedbStorage {
    db: Database,
    metadata: DatabaseMetadata,
    path: PathBuf,
}

impl RedbStorage {
    /// Opens the database file, seeding it on first use.
    ///
    /// A fresh file gets every table plus its metadata record in one
    /// seeding transaction. A reopened file must pass the compatibility
    /// gate (same schema version, same locked-in embedding dimension).
    /// Either way the metadata's last-opened stamp is durable before the
    /// handle is returned.
    ///
    /// # Errors
    ///
    /// Fails when another process holds the writer lock, the file is
    /// corrupted or missing its metadata record, or the compatibility
    /// gate refuses the reopen.
    #[instrument(skip(config), fields(path = %path.as_ref().display()))]
    pub fn open(path: impl AsRef<Path>, config: &Config) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let fresh = !path.exists();

        let db = Database::builder().create(&path).map_err(|e| match e {
            ::redb::DatabaseError::DatabaseAlreadyOpen => StorageError::DatabaseLocked,
            other => StorageError::Redb(other.to_string()),
        })?;

        let metadata = if fresh {
            let metadata = DatabaseMetadata::new(
                config.embedding_dimension as u32,
                &config.embedding_model,
            );
            let txn = db.begin_write().map_err(StorageError::from)?;
            Self::create_tables(&txn)?;
            Self::put_metadata(&txn, &metadata)?;
            txn.commit().map_err(StorageError::from)?;
            metadata
        } else {
            let mut metadata = Self::read_metadata(&db)?;
            Self::check_compatibility(&metadata, config)?;
            metadata.touch();
            let txn = db.begin_write().map_err(StorageError::from)?;
            Self::put_metadata(&txn, &metadata)?;
            txn.commit().map_err(StorageError::from)?;
            metadata
        };

        info!(
            fresh,
            schema_version = metadata.schema_version,
            dimension = metadata.embedding_dimension,
            "Storage ready"
        );
        Ok(Self { db, metadata, path })
    }

    /// Opens every table once, so no later transaction races table
    /// creation.
    fn create_tables(txn: &WriteTransaction) -> Result<()> {
        txn.open_table(ENTITIES_TABLE)?;
        txn.open_table(BONDS_TABLE)?;
        txn.open_table(BOND_KEYS_TABLE)?;
        txn.open_table(ARCHIVE_TABLE)?;
        txn.open_table(EMBEDDINGS_TABLE)?;
        txn.open_table(OUTCOMES_TABLE)?;
        txn.open_table(PULSE_HISTORY_TABLE)?;
        txn.open_multimap_table(ENTITIES_BY_TYPE_TABLE)?;
        txn.open_multimap_table(BONDS_BY_FROM_TABLE)?;
        txn.open_multimap_table(BONDS_BY_TO_TABLE)?;
        txn.open_multimap_table(FTS_TERMS_TABLE)?;
        txn.open_multimap_table(FTS_DOCS_TABLE)?;
        Ok(())
    }

    /// Writes the metadata record inside an already-open transaction.
    fn put_metadata(txn: &WriteTransaction, metadata: &DatabaseMetadata) -> Result<()> {
        let bytes = bincode::serialize(metadata).map_err(StorageError::from)?;
        txn.open_table(METADATA_TABLE)?
            .insert(METADATA_KEY, bytes.as_slice())?;
        Ok(())
    }

    /// Reads the metadata record of an existing file. Its absence means
    /// the file was not produced by this engine.
    fn read_metadata(db: &Database) -> Result<DatabaseMetadata> {
        let txn = db.begin_read().map_err(StorageError::from)?;
        let table = txn
            .open_table(METADATA_TABLE)
            .map_err(|e| StorageError::corrupted(format!("no metadata table: {}", e)))?;
        let guard = table
            .get(METADATA_KEY)
            .map_err(StorageError::from)?
            .ok_or_else(|| StorageError::corrupted("metadata record missing"))?;
        bincode::deserialize(guard.value())
            .map_err(|e| ChoraError::from(StorageError::corrupted(format!("metadata unreadable: {}", e))))
    }

    /// The reopen gate: schema version first, then the embedding
    /// dimension locked in at creation.
    fn check_compatibility(metadata: &DatabaseMetadata, config: &Config) -> Result<()> {
        if metadata.schema_version != SCHEMA_VERSION {
            warn!(
                found = metadata.schema_version,
                "Refusing incompatible schema version"
            );
            return Err(StorageError::SchemaVersionMismatch {
                expected: SCHEMA_VERSION,
                found: metadata.schema_version,
            }
            .into());
        }

        let stored = metadata.embedding_dimension as usize;
        if stored != config.embedding_dimension {
            warn!(
                stored,
                requested = config.embedding_dimension,
                "Refusing embedding dimension change"
            );
            return Err(ValidationError::dimension_mismatch(config.embedding_dimension, stored).into());
        }
        Ok(())
    }

    fn encode_entity(entity: &Entity) -> Result<Vec<u8>> {
        serde_json::to_vec(entity).map_err(|e| StorageError::from(e).into())
    }

    fn decode_entity(bytes: &[u8]) -> Result<Entity> {
        serde_json::from_slice(bytes).map_err(|e| StorageError::from(e).into())
    }

    fn encode_bond(bond: &Bond) -> Result<Vec<u8>> {
        serde_json::to_vec(bond).map_err(|e| StorageError::from(e).into())
    }

    fn decode_bond(bytes: &[u8]) -> Result<Bond> {
        serde_json::from_slice(bytes).map_err(|e| StorageError::from(e).into())
    }
}

impl StorageEngine for RedbStorage {
    fn metadata(&self) -> &DatabaseMetadata {
        &self.metadata
    }

    #[instrument(skip(self))]
    fn close(self: Box<Self>) -> Result<()> {
        info!("Closing storage engine");
        // redb flushes durably on drop
        drop(self.db);
        Ok(())
    }

    fn path(&self) -> Option<&Path> {
        Some(&self.path)
    }

    // =========================================================================
    // Entity Operations
    // =========================================================================

    #[instrument(skip(self, entity, fts_terms), fields(id = %entity.id))]
    fn save_entity(
        &self,
        entity: &Entity,
        drop_embedding: bool,
        fts_terms: &[String],
    ) -> Result<()> {
        let bytes = Self::encode_entity(entity)?;
        let id = entity.id.as_str();

        let write_txn = self.db.begin_write().map_err(StorageError::from)?;
        {
            let mut entities = write_txn.open_table(ENTITIES_TABLE)?;
            entities.insert(id, bytes.as_slice())?;

            let mut by_type = write_txn.open_multimap_table(ENTITIES_BY_TYPE_TABLE)?;
            by_type.insert(entity.entity_type.as_str(), id)?;

            if drop_embedding {
                let mut embeddings = write_txn.open_table(EMBEDDINGS_TABLE)?;
                embeddings.remove(id)?;
            }

            // Refresh FTS postings: clear the old reverse postings, then
            // insert the new ones in both directions.
            let mut fts_docs = write_txn.open_multimap_table(FTS_DOCS_TABLE)?;
            let mut fts_index = write_txn.open_multimap_table(FTS_TERMS_TABLE)?;
            let old_terms: Vec<String> = {
                let mut terms = Vec::new();
                for guard in fts_docs.get(id)? {
                    terms.push(guard?.value().to_string());
                }
                terms
            };
            for term in &old_terms {
                fts_index.remove(term.as_str(), id)?;
            }
            fts_docs.remove_all(id)?;
            for term in fts_terms {
                fts_index.insert(term.as_str(), id)?;
                fts_docs.insert(id, term.as_str())?;
            }
        }
        write_txn.commit().map_err(StorageError::from)?;

        debug!(terms = fts_terms.len(), drop_embedding, "Entity saved");
        Ok(())
    }

    fn get_entity(&self, id: &str) -> Result<Option<Entity>> {
        let read_txn = self.db.begin_read().map_err(StorageError::from)?;
        let entities = read_txn.open_table(ENTITIES_TABLE)?;
        match entities.get(id).map_err(StorageError::from)? {
            Some(guard) => Ok(Some(Self::decode_entity(guard.value())?)),
            None => Ok(None),
        }
    }

    fn entity_exists(&self, id: &str) -> Result<bool> {
        let read_txn = self.db.begin_read().map_err(StorageError::from)?;
        let entities = read_txn.open_table(ENTITIES_TABLE)?;
        Ok(entities.get(id).map_err(StorageError::from)?.is_some())
    }

    fn list_entities(&self, entity_type: Option<EntityType>) -> Result<Vec<Entity>> {
        let read_txn = self.db.begin_read().map_err(StorageError::from)?;
        let entities = read_txn.open_table(ENTITIES_TABLE)?;

        let mut out = Vec::new();
        match entity_type {
            Some(t) => {
                let by_type = read_txn.open_multimap_table(ENTITIES_BY_TYPE_TABLE)?;
                for guard in by_type.get(t.as_str()).map_err(StorageError::from)? {
                    let id = guard.map_err(StorageError::from)?;
                    if let Some(bytes) = entities.get(id.value()).map_err(StorageError::from)? {
                        out.push(Self::decode_entity(bytes.value())?);
                    }
                }
            }
            None => {
                for row in entities.iter().map_err(StorageError::from)? {
                    let (_, bytes) = row.map_err(StorageError::from)?;
                    out.push(Self::decode_entity(bytes.value())?);
                }
            }
        }
        Ok(out)
    }

    #[instrument(skip(self, entity), fields(id = %entity.id))]
    fn archive_entity(&self, entity: &Entity) -> Result<()> {
        let id = entity.id.as_str();
        let record = ArchiveRecord {
            kind: ArchiveKind::Entity,
            payload: serde_json::to_value(entity).map_err(StorageError::from)?,
            archived_at: Timestamp::now(),
        };
        let record_bytes = serde_json::to_vec(&record).map_err(StorageError::from)?;
        let archive_key = archive_entity_key(id);

        let write_txn = self.db.begin_write().map_err(StorageError::from)?;
        {
            let mut entities = write_txn.open_table(ENTITIES_TABLE)?;
            entities.remove(id)?;

            let mut by_type = write_txn.open_multimap_table(ENTITIES_BY_TYPE_TABLE)?;
            by_type.remove(entity.entity_type.as_str(), id)?;

            let mut embeddings = write_txn.open_table(EMBEDDINGS_TABLE)?;
            embeddings.remove(id)?;

            let mut fts_docs = write_txn.open_multimap_table(FTS_DOCS_TABLE)?;
            let mut fts_index = write_txn.open_multimap_table(FTS_TERMS_TABLE)?;
            let old_terms: Vec<String> = {
                let mut terms = Vec::new();
                for guard in fts_docs.get(id)? {
                    terms.push(guard?.value().to_string());
                }
                terms
            };
            for term in &old_terms {
                fts_index.remove(term.as_str(), id)?;
            }
            fts_docs.remove_all(id)?;

            let mut archive = write_txn.open_table(ARCHIVE_TABLE)?;
            archive.insert(archive_key.as_str(), record_bytes.as_slice())?;
        }
        write_txn.commit().map_err(StorageError::from)?;

        info!("Entity archived");
        Ok(())
    }

    fn get_archived(&self, key: &str) -> Result<Option<ArchiveRecord>> {
        let read_txn = self.db.begin_read().map_err(StorageError::from)?;
        let archive = read_txn.open_table(ARCHIVE_TABLE)?;
        match archive.get(key).map_err(StorageError::from)? {
            Some(guard) => Ok(Some(
                serde_json::from_slice(guard.value()).map_err(StorageError::from)?,
            )),
            None => Ok(None),
        }
    }

    // =========================================================================
    // Bond Operations
    // =========================================================================

    #[instrument(skip(self, bond), fields(id = %bond.id, verb = %bond.verb))]
    fn save_bond(&self, bond: &Bond) -> Result<()> {
        let bytes = Self::encode_bond(bond)?;
        let key = bond_key(
            bond.verb.as_str(),
            bond.from_id.as_str(),
            bond.to_id.as_str(),
        );

        let write_txn = self.db.begin_write().map_err(StorageError::from)?;
        {
            let mut bonds = write_txn.open_table(BONDS_TABLE)?;
            bonds.insert(bond.id.as_bytes(), bytes.as_slice())?;

            let mut by_from = write_txn.open_multimap_table(BONDS_BY_FROM_TABLE)?;
            by_from.insert(bond.from_id.as_str(), bond.id.as_bytes())?;

            let mut by_to = write_txn.open_multimap_table(BONDS_BY_TO_TABLE)?;
            by_to.insert(bond.to_id.as_str(), bond.id.as_bytes())?;

            let mut keys = write_txn.open_table(BOND_KEYS_TABLE)?;
            keys.insert(key.as_str(), bond.id.as_bytes())?;
        }
        write_txn.commit().map_err(StorageError::from)?;

        debug!("Bond saved");
        Ok(())
    }

    fn get_bond(&self, id: BondId) -> Result<Option<Bond>> {
        let read_txn = self.db.begin_read().map_err(StorageError::from)?;
        let bonds = read_txn.open_table(BONDS_TABLE)?;
        match bonds.get(id.as_bytes()).map_err(StorageError::from)? {
            Some(guard) => Ok(Some(Self::decode_bond(guard.value())?)),
            None => Ok(None),
        }
    }

    fn find_bond(&self, verb: Verb, from: &str, to: &str) -> Result<Option<Bond>> {
        let key = bond_key(verb.as_str(), from, to);
        let read_txn = self.db.begin_read().map_err(StorageError::from)?;
        let keys = read_txn.open_table(BOND_KEYS_TABLE)?;
        let id = match keys.get(key.as_str()).map_err(StorageError::from)? {
            Some(guard) => BondId::from_bytes(*guard.value()),
            None => return Ok(None),
        };
        let bonds = read_txn.open_table(BONDS_TABLE)?;
        match bonds.get(id.as_bytes()).map_err(StorageError::from)? {
            Some(guard) => Ok(Some(Self::decode_bond(guard.value())?)),
            None => Ok(None),
        }
    }

    fn bond_ids_from(&self, entity_id: &str) -> Result<Vec<BondId>> {
        let read_txn = self.db.begin_read().map_err(StorageError::from)?;
        let by_from = read_txn.open_multimap_table(BONDS_BY_FROM_TABLE)?;
        let mut out = Vec::new();
        for guard in by_from.get(entity_id).map_err(StorageError::from)? {
            out.push(BondId::from_bytes(*guard.map_err(StorageError::from)?.value()));
        }
        Ok(out)
    }

    fn bond_ids_to(&self, entity_id: &str) -> Result<Vec<BondId>> {
        let read_txn = self.db.begin_read().map_err(StorageError::from)?;
        let by_to = read_txn.open_multimap_table(BONDS_BY_TO_TABLE)?;
        let mut out = Vec::new();
        for guard in by_to.get(entity_id).map_err(StorageError::from)? {
            out.push(BondId::from_bytes(*guard.map_err(StorageError::from)?.value()));
        }
        Ok(out)
    }

    #[instrument(skip(self, bond), fields(id = %bond.id))]
    fn archive_bond(&self, bond: &Bond) -> Result<()> {
        let record = ArchiveRecord {
            kind: ArchiveKind::Bond,
            payload: serde_json::to_value(bond).map_err(StorageError::from)?,
            archived_at: Timestamp::now(),
        };
        let record_bytes = serde_json::to_vec(&record).map_err(StorageError::from)?;
        let archive_key = archive_bond_key(&bond.id);
        let key = bond_key(
            bond.verb.as_str(),
            bond.from_id.as_str(),
            bond.to_id.as_str(),
        );

        let write_txn = self.db.begin_write().map_err(StorageError::from)?;
        {
            let mut bonds = write_txn.open_table(BONDS_TABLE)?;
            bonds.remove(bond.id.as_bytes())?;

            let mut by_from = write_txn.open_multimap_table(BONDS_BY_FROM_TABLE)?;
            by_from.remove(bond.from_id.as_str(), bond.id.as_bytes())?;

            let mut by_to = write_txn.open_multimap_table(BONDS_BY_TO_TABLE)?;
            by_to.remove(bond.to_id.as_str(), bond.id.as_bytes())?;

            let mut keys = write_txn.open_table(BOND_KEYS_TABLE)?;
            keys.remove(key.as_str())?;

            let mut archive = write_txn.open_table(ARCHIVE_TABLE)?;
            archive.insert(archive_key.as_str(), record_bytes.as_slice())?;
        }
        write_txn.commit().map_err(StorageError::from)?;

        info!("Bond archived");
        Ok(())
    }

    // =========================================================================
    // Embedding Operations
    // =========================================================================

    fn save_embedding(&self, record: &EmbeddingRecord) -> Result<()> {
        let bytes = bincode::serialize(record).map_err(StorageError::from)?;

        let write_txn = self.db.begin_write().map_err(StorageError::from)?;
        {
            let mut embeddings = write_txn.open_table(EMBEDDINGS_TABLE)?;
            // Rows are immutable once written: replace is delete-then-insert
            embeddings.remove(record.entity_id.as_str())?;
            embeddings.insert(record.entity_id.as_str(), bytes.as_slice())?;
        }
        write_txn.commit().map_err(StorageError::from)?;
        Ok(())
    }

    fn get_embedding(&self, entity_id: &str) -> Result<Option<EmbeddingRecord>> {
        let read_txn = self.db.begin_read().map_err(StorageError::from)?;
        let embeddings = read_txn.open_table(EMBEDDINGS_TABLE)?;
        match embeddings.get(entity_id).map_err(StorageError::from)? {
            Some(guard) => Ok(Some(
                bincode::deserialize(guard.value()).map_err(StorageError::from)?,
            )),
            None => Ok(None),
        }
    }

    fn delete_embedding(&self, entity_id: &str) -> Result<bool> {
        let write_txn = self.db.begin_write().map_err(StorageError::from)?;
        let existed = {
            let mut embeddings = write_txn.open_table(EMBEDDINGS_TABLE)?;
            let removed = embeddings.remove(entity_id)?;
            removed.is_some()
        };
        write_txn.commit().map_err(StorageError::from)?;
        Ok(existed)
    }

    fn list_embedded_ids(&self) -> Result<Vec<String>> {
        let read_txn = self.db.begin_read().map_err(StorageError::from)?;
        let embeddings = read_txn.open_table(EMBEDDINGS_TABLE)?;
        let mut out = Vec::new();
        for row in embeddings.iter().map_err(StorageError::from)? {
            let (key, _) = row.map_err(StorageError::from)?;
            out.push(key.value().to_string());
        }
        Ok(out)
    }

    // =========================================================================
    // Full-Text Postings
    // =========================================================================

    fn fts_candidates(&self, term: &str) -> Result<Vec<String>> {
        let read_txn = self.db.begin_read().map_err(StorageError::from)?;
        let fts_index = read_txn.open_multimap_table(FTS_TERMS_TABLE)?;
        let mut out = Vec::new();
        for guard in fts_index.get(term).map_err(StorageError::from)? {
            out.push(guard.map_err(StorageError::from)?.value().to_string());
        }
        Ok(out)
    }

    fn fts_terms_for(&self, entity_id: &str) -> Result<Vec<String>> {
        let read_txn = self.db.begin_read().map_err(StorageError::from)?;
        let fts_docs = read_txn.open_multimap_table(FTS_DOCS_TABLE)?;
        let mut out = Vec::new();
        for guard in fts_docs.get(entity_id).map_err(StorageError::from)? {
            out.push(guard.map_err(StorageError::from)?.value().to_string());
        }
        Ok(out)
    }

    // =========================================================================
    // Outcome & Pulse History
    // =========================================================================

    fn record_outcome(&self, outcome: &SignalOutcome) -> Result<()> {
        let key = outcome_key(outcome.signal_id.as_str(), outcome.started_at);
        let bytes = serde_json::to_vec(outcome).map_err(StorageError::from)?;

        let write_txn = self.db.begin_write().map_err(StorageError::from)?;
        {
            let mut outcomes = write_txn.open_table(OUTCOMES_TABLE)?;
            outcomes.insert(key.as_slice(), bytes.as_slice())?;
        }
        write_txn.commit().map_err(StorageError::from)?;
        Ok(())
    }

    fn outcomes_for_signal(&self, signal_id: &str) -> Result<Vec<SignalOutcome>> {
        let (start, end) = outcome_key_range(signal_id);
        let read_txn = self.db.begin_read().map_err(StorageError::from)?;
        let outcomes = read_txn.open_table(OUTCOMES_TABLE)?;
        let mut out = Vec::new();
        for row in outcomes
            .range::<&[u8]>(start.as_slice()..end.as_slice())
            .map_err(StorageError::from)?
        {
            let (_, bytes) = row.map_err(StorageError::from)?;
            out.push(serde_json::from_slice(bytes.value()).map_err(StorageError::from)?);
        }
        Ok(out)
    }

    fn append_pulse_summary(&self, summary: &PulseSummary, retain: usize) -> Result<()> {
        let bytes = serde_json::to_vec(summary).map_err(StorageError::from)?;
        let ts = summary.ts.as_millis().max(0) as u64;

        let write_txn = self.db.begin_write().map_err(StorageError::from)?;
        {
            let mut history = write_txn.open_table(PULSE_HISTORY_TABLE)?;
            history.insert(ts, bytes.as_slice())?;

            // Trim the ring: drop oldest rows beyond the retention window
            let len = history.len().map_err(StorageError::from)? as usize;
            if len > retain {
                let mut stale = Vec::with_capacity(len - retain);
                for row in history.iter().map_err(StorageError::from)?.take(len - retain) {
                    let (key, _) = row.map_err(StorageError::from)?;
                    stale.push(key.value());
                }
                for key in stale {
                    history.remove(key)?;
                }
            }
        }
        write_txn.commit().map_err(StorageError::from)?;
        Ok(())
    }

    fn recent_pulse_summaries(&self, limit: usize) -> Result<Vec<PulseSummary>> {
        let read_txn = self.db.begin_read().map_err(StorageError::from)?;
        let history = read_txn.open_table(PULSE_HISTORY_TABLE)?;
        let mut out = Vec::new();
        for row in history.iter().map_err(StorageError::from)?.rev().take(limit) {
            let (_, bytes) = row.map_err(StorageError::from)?;
            out.push(serde_json::from_slice(bytes.value()).map_err(StorageError::from)?);
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::JsonMap;
    use crate::storage::schema::{OutcomeStatus, SignalOutcome};
    use crate::types::EntityId;
    use tempfile::tempdir;

    fn default_config() -> Config {
        Config::default()
    }

    fn entity(id: &str) -> Entity {
        let mut data = JsonMap::new();
        data.insert("title".into(), serde_json::json!("Title"));
        Entity::new(EntityId::parse(id).unwrap(), data)
    }

    #[test]
    fn test_open_creates_new_database() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.db");

        assert!(!path.exists());

        let storage = RedbStorage::open(&path, &default_config()).unwrap();

        assert!(path.exists());
        assert_eq!(storage.metadata().schema_version, SCHEMA_VERSION);
        assert_eq!(storage.metadata().embedding_dimension, 384);

        Box::new(storage).close().unwrap();
    }

    #[test]
    fn test_open_existing_database() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.db");

        let storage = RedbStorage::open(&path, &default_config()).unwrap();
        let created_at = storage.metadata().created_at;
        Box::new(storage).close().unwrap();

        std::thread::sleep(std::time::Duration::from_millis(10));
        let storage = RedbStorage::open(&path, &default_config()).unwrap();

        // created_at preserved, last_opened_at refreshed
        assert_eq!(storage.metadata().created_at, created_at);
        assert!(storage.metadata().last_opened_at > created_at);

        Box::new(storage).close().unwrap();
    }

    #[test]
    fn test_dimension_mismatch_returns_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.db");

        let storage = RedbStorage::open(&path, &default_config()).unwrap();
        Box::new(storage).close().unwrap();

        let config_768 = Config {
            embedding_dimension: 768,
            ..Default::default()
        };
        let result = RedbStorage::open(&path, &config_768);

        assert!(result.is_err());
        assert!(matches!(
            result.unwrap_err(),
            ChoraError::Validation(ValidationError::DimensionMismatch { .. })
        ));
    }

    #[test]
    fn test_entity_roundtrip_and_type_index() {
        let dir = tempdir().unwrap();
        let storage =
            RedbStorage::open(dir.path().join("test.db"), &default_config()).unwrap();

        let e = entity("learning-roundtrip");
        storage.save_entity(&e, false, &[]).unwrap();

        let loaded = storage.get_entity("learning-roundtrip").unwrap().unwrap();
        assert_eq!(loaded.id, e.id);
        assert!(storage.entity_exists("learning-roundtrip").unwrap());

        let listed = storage.list_entities(Some(EntityType::Learning)).unwrap();
        assert_eq!(listed.len(), 1);
        assert!(storage
            .list_entities(Some(EntityType::Tool))
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_fts_postings_replaced_on_save() {
        let dir = tempdir().unwrap();
        let storage =
            RedbStorage::open(dir.path().join("test.db"), &default_config()).unwrap();

        let e = entity("learning-fts");
        storage
            .save_entity(&e, false, &["alpha".into(), "beta".into()])
            .unwrap();
        assert_eq!(storage.fts_candidates("alpha").unwrap(), vec!["learning-fts"]);

        storage.save_entity(&e, false, &["gamma".into()]).unwrap();
        assert!(storage.fts_candidates("alpha").unwrap().is_empty());
        assert_eq!(storage.fts_candidates("gamma").unwrap(), vec!["learning-fts"]);
        assert_eq!(storage.fts_terms_for("learning-fts").unwrap(), vec!["gamma"]);
    }

    #[test]
    fn test_save_entity_drops_embedding_in_same_commit() {
        let dir = tempdir().unwrap();
        let storage =
            RedbStorage::open(dir.path().join("test.db"), &default_config()).unwrap();

        let e = entity("learning-emb");
        storage.save_entity(&e, false, &[]).unwrap();
        storage
            .save_embedding(&EmbeddingRecord {
                entity_id: "learning-emb".into(),
                model_name: "external".into(),
                dimension: 3,
                vector: vec![1.0, 0.0, 0.0],
                created_at: Timestamp::now(),
                updated_at: Timestamp::now(),
            })
            .unwrap();
        assert!(storage.get_embedding("learning-emb").unwrap().is_some());

        storage.save_entity(&e, true, &[]).unwrap();
        assert!(storage.get_embedding("learning-emb").unwrap().is_none());
    }

    #[test]
    fn test_archive_entity_removes_all_traces() {
        let dir = tempdir().unwrap();
        let storage =
            RedbStorage::open(dir.path().join("test.db"), &default_config()).unwrap();

        let e = entity("learning-gone");
        storage
            .save_entity(&e, false, &["trace".into()])
            .unwrap();
        storage.archive_entity(&e).unwrap();

        assert!(!storage.entity_exists("learning-gone").unwrap());
        assert!(storage.fts_candidates("trace").unwrap().is_empty());
        let record = storage
            .get_archived(&archive_entity_key("learning-gone"))
            .unwrap()
            .unwrap();
        assert_eq!(record.kind, ArchiveKind::Entity);
        assert_eq!(record.payload["id"], "learning-gone");
    }

    #[test]
    fn test_bond_roundtrip_and_indexes() {
        let dir = tempdir().unwrap();
        let storage =
            RedbStorage::open(dir.path().join("test.db"), &default_config()).unwrap();

        let bond = Bond {
            id: BondId::new(),
            verb: Verb::Surfaces,
            from_id: EntityId::parse("learning-a").unwrap(),
            to_id: EntityId::parse("principle-b").unwrap(),
            confidence: 1.0,
            status: crate::bond::BondStatus::Active,
            metadata: JsonMap::new(),
            created_at: Timestamp::now(),
            updated_at: Timestamp::now(),
        };
        storage.save_bond(&bond).unwrap();

        assert!(storage.get_bond(bond.id).unwrap().is_some());
        assert_eq!(storage.bond_ids_from("learning-a").unwrap(), vec![bond.id]);
        assert_eq!(storage.bond_ids_to("principle-b").unwrap(), vec![bond.id]);
        let found = storage
            .find_bond(Verb::Surfaces, "learning-a", "principle-b")
            .unwrap()
            .unwrap();
        assert_eq!(found.id, bond.id);

        storage.archive_bond(&bond).unwrap();
        assert!(storage.get_bond(bond.id).unwrap().is_none());
        assert!(storage.bond_ids_from("learning-a").unwrap().is_empty());
        assert!(storage
            .find_bond(Verb::Surfaces, "learning-a", "principle-b")
            .unwrap()
            .is_none());
        assert!(storage
            .get_archived(&archive_bond_key(&bond.id))
            .unwrap()
            .is_some());
    }

    #[test]
    fn test_outcomes_per_signal() {
        let dir = tempdir().unwrap();
        let storage =
            RedbStorage::open(dir.path().join("test.db"), &default_config()).unwrap();

        let signal = EntityId::parse("signal-out").unwrap();
        for millis in [1000, 2000] {
            storage
                .record_outcome(&SignalOutcome {
                    signal_id: signal.clone(),
                    protocol_id: "protocol-ping".into(),
                    started_at: Timestamp::from_millis(millis),
                    ended_at: Timestamp::from_millis(millis + 5),
                    duration_ms: 5,
                    status: OutcomeStatus::Completed,
                    error: None,
                })
                .unwrap();
        }

        let outcomes = storage.outcomes_for_signal("signal-out").unwrap();
        assert_eq!(outcomes.len(), 2);
        assert!(outcomes[0].started_at < outcomes[1].started_at);
        assert!(storage.outcomes_for_signal("signal-other").unwrap().is_empty());
    }

    #[test]
    fn test_pulse_history_ring() {
        let dir = tempdir().unwrap();
        let storage =
            RedbStorage::open(dir.path().join("test.db"), &default_config()).unwrap();

        for i in 0..5u64 {
            storage
                .append_pulse_summary(
                    &PulseSummary {
                        ts: Timestamp::from_millis(1000 + i as i64),
                        signals_processed: i,
                        errors: 0,
                        duration_ms: 1,
                    },
                    3,
                )
                .unwrap();
        }

        let recent = storage.recent_pulse_summaries(10).unwrap();
        assert_eq!(recent.len(), 3);
        // Newest first
        assert_eq!(recent[0].signals_processed, 4);
        assert_eq!(recent[2].signals_processed, 2);
    }
}
