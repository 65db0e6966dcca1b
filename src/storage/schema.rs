//! Database schema definitions and versioning.
//!
//! This module defines the table structure for the redb storage engine.
//! All table definitions are compile-time constants to ensure consistency.
//!
//! # Schema Versioning
//!
//! The schema version is stored in the metadata table. When opening an
//! existing database, we check the version and fail if it doesn't match.
//!
//! # Table Layout
//!
//! ```text
//! metadata           &str -> &[u8]        "db_metadata" -> DatabaseMetadata (bincode)
//! entities           &str -> &[u8]        entity id -> Entity (json)
//! entities_by_type   &str -> &str         type name -> entity id (multimap)
//! bonds              &[u8;16] -> &[u8]    bond uuid -> Bond (json)
//! bonds_by_from      &str -> &[u8;16]     entity id -> bond uuid (multimap)
//! bonds_by_to        &str -> &[u8;16]     entity id -> bond uuid (multimap)
//! bond_keys          &str -> &[u8;16]     "verb|from|to" -> bond uuid
//! archive            &str -> &[u8]        "entity:{id}" / "bond:{uuid}" -> ArchiveRecord (json)
//! embeddings         &str -> &[u8]        entity id -> EmbeddingRecord (bincode)
//! fts_terms          &str -> &str         term -> entity id (multimap)
//! fts_docs           &str -> &str         entity id -> term (multimap, reverse postings)
//! signal_outcomes    &[u8] -> &[u8]       composite key -> SignalOutcome (json)
//! pulse_history      u64 -> &[u8]         ts millis -> PulseSummary (json), ring
//! ```

use redb::{MultimapTableDefinition, TableDefinition};
use serde::{Deserialize, Serialize};

use crate::error::ErrorKind;
use crate::types::{EntityId, Timestamp};

/// Current schema version.
///
/// Increment this when making breaking changes to the schema.
/// The database will refuse to open if versions don't match.
pub const SCHEMA_VERSION: u32 = 1;

// ============================================================================
// Table Definitions
// ============================================================================

/// Metadata table for database-level information.
pub const METADATA_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("metadata");

/// Entities table: id -> json-serialized [`Entity`](crate::Entity).
pub const ENTITIES_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("entities");

/// Index: entity ids by type name.
pub const ENTITIES_BY_TYPE_TABLE: MultimapTableDefinition<&str, &str> =
    MultimapTableDefinition::new("entities_by_type");

/// Bonds table: 16-byte UUID -> json-serialized [`Bond`](crate::Bond).
pub const BONDS_TABLE: TableDefinition<&[u8; 16], &[u8]> = TableDefinition::new("bonds");

/// Index: bond ids by source entity.
pub const BONDS_BY_FROM_TABLE: MultimapTableDefinition<&str, &[u8; 16]> =
    MultimapTableDefinition::new("bonds_by_from");

/// Index: bond ids by target entity.
pub const BONDS_BY_TO_TABLE: MultimapTableDefinition<&str, &[u8; 16]> =
    MultimapTableDefinition::new("bonds_by_to");

/// Uniqueness index: `"verb|from|to"` -> bond id. Lets `manage_bond`
/// upsert instead of duplicating edges.
pub const BOND_KEYS_TABLE: TableDefinition<&str, &[u8; 16]> = TableDefinition::new("bond_keys");

/// Archive relation: full prior payloads of archived entities and bonds.
pub const ARCHIVE_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("archive");

/// Embeddings table: entity id -> bincode-serialized [`EmbeddingRecord`].
pub const EMBEDDINGS_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("embeddings");

/// Full-text postings: term -> entity id.
pub const FTS_TERMS_TABLE: MultimapTableDefinition<&str, &str> =
    MultimapTableDefinition::new("fts_terms");

/// Reverse postings: entity id -> term. Needed to clear stale postings
/// when a document changes.
pub const FTS_DOCS_TABLE: MultimapTableDefinition<&str, &str> =
    MultimapTableDefinition::new("fts_docs");

/// Signal outcome records, keyed by [`outcome_key`].
pub const OUTCOMES_TABLE: TableDefinition<&[u8], &[u8]> = TableDefinition::new("signal_outcomes");

/// Pulse summaries, keyed by timestamp millis; trimmed to a ring.
pub const PULSE_HISTORY_TABLE: TableDefinition<u64, &[u8]> = TableDefinition::new("pulse_history");

// ============================================================================
// Database Metadata
// ============================================================================

/// Database metadata stored in the metadata table.
///
/// This is serialized with bincode and stored under the key "db_metadata".
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DatabaseMetadata {
    /// Schema version for compatibility checking.
    pub schema_version: u32,

    /// Embedding dimension configured for this database.
    ///
    /// Once set, this cannot be changed without recreating the database.
    pub embedding_dimension: u32,

    /// Embedding model name recorded at creation.
    pub embedding_model: String,

    /// Timestamp when the database was created.
    pub created_at: Timestamp,

    /// Last time the database was opened (updated on each open).
    pub last_opened_at: Timestamp,
}

impl DatabaseMetadata {
    /// Creates new metadata for a fresh database.
    pub fn new(embedding_dimension: u32, embedding_model: &str) -> Self {
        let now = Timestamp::now();
        Self {
            schema_version: SCHEMA_VERSION,
            embedding_dimension,
            embedding_model: embedding_model.to_string(),
            created_at: now,
            last_opened_at: now,
        }
    }

    /// Updates the last_opened_at timestamp.
    pub fn touch(&mut self) {
        self.last_opened_at = Timestamp::now();
    }
}

// ============================================================================
// Persisted Records
// ============================================================================

/// What kind of row an archive record preserves.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArchiveKind {
    /// An archived entity.
    Entity,
    /// A dissolved bond.
    Bond,
}

/// A row in the archive relation: the full prior payload plus when it
/// was archived.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ArchiveRecord {
    /// Entity or bond.
    pub kind: ArchiveKind,
    /// The full serialized prior payload.
    pub payload: serde_json::Value,
    /// When the row was moved here.
    pub archived_at: Timestamp,
}

/// A persisted embedding row.
///
/// Vectors are immutable once written; an update is delete-then-insert
/// under the writer lock. The row cascades away with its entity and is
/// invalidated by any entity data change.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EmbeddingRecord {
    /// Owning entity id.
    pub entity_id: String,
    /// Name of the model that produced the vector.
    pub model_name: String,
    /// Vector dimension.
    pub dimension: u32,
    /// Unit vector.
    pub vector: Vec<f32>,
    /// When first written.
    pub created_at: Timestamp,
    /// When last rewritten.
    pub updated_at: Timestamp,
}

/// Terminal status of one recorded protocol execution.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutcomeStatus {
    /// The protocol fulfilled.
    Completed,
    /// The protocol failed with a taxonomy kind.
    Failed,
    /// The worker panicked; the guard still recorded completion.
    Panicked,
}

/// Structured error recorded with a failed outcome.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct OutcomeError {
    /// Closed-taxonomy kind.
    pub kind: ErrorKind,
    /// Single-line failure summary.
    pub message: String,
}

/// One recorded protocol execution on behalf of a signal.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SignalOutcome {
    /// The signal that triggered the run.
    pub signal_id: EntityId,
    /// The protocol that ran.
    pub protocol_id: String,
    /// When the run started.
    pub started_at: Timestamp,
    /// When the run ended.
    pub ended_at: Timestamp,
    /// Wall-clock duration.
    pub duration_ms: u64,
    /// Terminal status.
    pub status: OutcomeStatus,
    /// Present iff `status != Completed`.
    pub error: Option<OutcomeError>,
}

/// One pulse's summary row.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PulseSummary {
    /// When the pulse started.
    pub ts: Timestamp,
    /// Signals dispatched to protocols this pulse.
    pub signals_processed: u64,
    /// Per-signal failures recorded this pulse.
    pub errors: u64,
    /// Wall-clock duration of the pulse.
    pub duration_ms: u64,
}

// ============================================================================
// Key Encoding Helpers
// ============================================================================

/// Archive key for an entity row.
#[inline]
pub fn archive_entity_key(id: &str) -> String {
    format!("entity:{}", id)
}

/// Archive key for a bond row.
#[inline]
pub fn archive_bond_key(id: &crate::types::BondId) -> String {
    format!("bond:{}", id)
}

/// Bond uniqueness key: `"verb|from|to"`.
#[inline]
pub fn bond_key(verb: &str, from: &str, to: &str) -> String {
    format!("{}|{}|{}", verb, from, to)
}

/// Encodes an outcome key: `[signal_id bytes][0x00][started_at BE][uuid]`.
///
/// The signal id prefix enables range scans per signal; the big-endian
/// timestamp orders outcomes chronologically; the uuid suffix keeps
/// same-millisecond runs distinct.
pub fn outcome_key(signal_id: &str, started_at: Timestamp) -> Vec<u8> {
    let mut key = Vec::with_capacity(signal_id.len() + 1 + 8 + 16);
    key.extend_from_slice(signal_id.as_bytes());
    key.push(0);
    key.extend_from_slice(&started_at.to_be_bytes());
    key.extend_from_slice(uuid::Uuid::now_v7().as_bytes());
    key
}

/// Range bounds covering every outcome key for a signal.
pub fn outcome_key_range(signal_id: &str) -> (Vec<u8>, Vec<u8>) {
    let mut start = signal_id.as_bytes().to_vec();
    start.push(0);
    let mut end = signal_id.as_bytes().to_vec();
    end.push(1);
    (start, end)
}
