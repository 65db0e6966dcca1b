//! Error types for Chora.
//!
//! Chora uses a hierarchical error system:
//! - `ChoraError` is the top-level error returned by all public APIs
//! - Specific error types (`StorageError`, `ValidationError`, `NotFoundError`)
//!   provide detail
//! - `ErrorKind` is the closed dispatch taxonomy surfaced to front ends
//!
//! # Error Handling Pattern
//! ```rust,ignore
//! use chora::{GraphStore, Config, Result};
//!
//! fn example() -> Result<()> {
//!     let store = GraphStore::open("./chora.db", Config::default())?;
//!     // ... operations that may fail ...
//!     store.close()?;
//!     Ok(())
//! }
//! ```

use std::path::PathBuf;
use thiserror::Error;

use serde::{Deserialize, Serialize};

/// Result type alias for Chora operations.
pub type Result<T> = std::result::Result<T, ChoraError>;

/// Closed taxonomy of error kinds surfaced by dispatch.
///
/// Every `ChoraError` maps onto exactly one kind via [`ChoraError::kind`].
/// Front ends key their behavior (exit codes, retry policy) off this enum,
/// never off error message text.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// The intent matched neither a protocol nor a primitive.
    IntentNotFound,
    /// A primitive id was named but is not registered.
    PrimitiveNotFound,
    /// A protocol id was named but no such entity exists.
    ProtocolNotFound,
    /// Inputs failed boundary validation.
    InvalidInputs,
    /// A bond write violated the physics table.
    PhysicsViolation,
    /// A primitive or protocol failed during execution.
    ExecutionError,
    /// A referenced entity or bond does not exist.
    NotFound,
    /// The signal or focus was already in a terminal state.
    AlreadyResolved,
    /// An optional capability (vectorizer, inference) is absent.
    DependencyUnavailable,
}

impl ErrorKind {
    /// Returns the snake_case wire name of this kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::IntentNotFound => "intent_not_found",
            Self::PrimitiveNotFound => "primitive_not_found",
            Self::ProtocolNotFound => "protocol_not_found",
            Self::InvalidInputs => "invalid_inputs",
            Self::PhysicsViolation => "physics_violation",
            Self::ExecutionError => "execution_error",
            Self::NotFound => "not_found",
            Self::AlreadyResolved => "already_resolved",
            Self::DependencyUnavailable => "dependency_unavailable",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Maps an error kind onto the CLI front-end exit code contract.
///
/// `None` (success) is 0; invalid input is 2; not-found kinds are 3;
/// physics violations are 4; everything else is the generic failure 1.
pub fn exit_code(kind: Option<ErrorKind>) -> i32 {
    match kind {
        None => 0,
        Some(ErrorKind::InvalidInputs) => 2,
        Some(
            ErrorKind::NotFound
            | ErrorKind::IntentNotFound
            | ErrorKind::PrimitiveNotFound
            | ErrorKind::ProtocolNotFound,
        ) => 3,
        Some(ErrorKind::PhysicsViolation) => 4,
        Some(_) => 1,
    }
}

/// Top-level error enum for all Chora operations.
///
/// This is the only error type returned by public APIs.
/// Use pattern matching to handle specific error cases.
#[derive(Debug, Error)]
pub enum ChoraError {
    /// Storage layer error (I/O, corruption, transactions).
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// Input validation error.
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    /// Requested entity, bond, protocol, or primitive not found.
    #[error("{0}")]
    NotFound(#[from] NotFoundError),

    /// A bond write named a `(verb, from, to)` triple outside the physics table.
    #[error("Physics violation: {verb} does not admit {from_type} -> {to_type}")]
    Physics {
        /// The verb that was attempted.
        verb: String,
        /// Type of the bond source.
        from_type: String,
        /// Type of the bond target.
        to_type: String,
    },

    /// An entity with this id already exists in the live table.
    #[error("Duplicate id: {0}")]
    DuplicateId(String),

    /// Archiving refused because live bonds still touch the entity.
    #[error("Cannot archive {id}: {bonds} live bond(s) attached (use force)")]
    ArchiveHasBonds {
        /// Entity that was to be archived.
        id: String,
        /// Number of live bonds attached.
        bonds: usize,
    },

    /// The signal or focus is already in a terminal state.
    #[error("Already resolved: {0}")]
    AlreadyResolved(String),

    /// A protocol or primitive failed during execution.
    #[error("Execution error: {0}")]
    Execution(String),

    /// A primitive returned an error envelope; the kind is preserved.
    #[error("Primitive failed ({kind}): {message}")]
    Primitive {
        /// Error kind reported by the primitive.
        kind: ErrorKind,
        /// Single-line failure summary.
        message: String,
    },

    /// Configuration error.
    #[error("Configuration error: {reason}")]
    Config {
        /// Description of what's wrong with the configuration.
        reason: String,
    },

    /// General I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Embedding persistence error.
    #[error("Embedding error: {0}")]
    Embedding(String),

    /// Keyring or invitation crypto error.
    #[error("Crypto error: {0}")]
    Crypto(String),

    /// An optional capability is absent and no fallback applies here.
    #[error("Dependency unavailable: {0}")]
    DependencyUnavailable(String),
}

impl ChoraError {
    /// Creates a configuration error with the given reason.
    pub fn config(reason: impl Into<String>) -> Self {
        Self::Config {
            reason: reason.into(),
        }
    }

    /// Creates an execution error with the given message.
    pub fn execution(msg: impl Into<String>) -> Self {
        Self::Execution(msg.into())
    }

    /// Creates an embedding error with the given message.
    pub fn embedding(msg: impl Into<String>) -> Self {
        Self::Embedding(msg.into())
    }

    /// Creates a crypto error with the given message.
    pub fn crypto(msg: impl Into<String>) -> Self {
        Self::Crypto(msg.into())
    }

    /// Creates a physics violation for the given triple.
    pub fn physics(
        verb: impl Into<String>,
        from_type: impl Into<String>,
        to_type: impl Into<String>,
    ) -> Self {
        Self::Physics {
            verb: verb.into(),
            from_type: from_type.into(),
            to_type: to_type.into(),
        }
    }

    /// Maps this error onto the closed dispatch taxonomy.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(_) | Self::DuplicateId(_) | Self::ArchiveHasBonds { .. } => {
                ErrorKind::InvalidInputs
            }
            Self::NotFound(nf) => match nf {
                NotFoundError::Protocol(_) => ErrorKind::ProtocolNotFound,
                NotFoundError::Primitive(_) => ErrorKind::PrimitiveNotFound,
                NotFoundError::Intent(_) => ErrorKind::IntentNotFound,
                _ => ErrorKind::NotFound,
            },
            Self::Physics { .. } => ErrorKind::PhysicsViolation,
            Self::AlreadyResolved(_) => ErrorKind::AlreadyResolved,
            Self::Primitive { kind, .. } => *kind,
            Self::Embedding(_) | Self::DependencyUnavailable(_) => {
                ErrorKind::DependencyUnavailable
            }
            Self::Storage(_)
            | Self::Execution(_)
            | Self::Config { .. }
            | Self::Io(_)
            | Self::Crypto(_) => ErrorKind::ExecutionError,
        }
    }

    /// Returns true if this is a "not found" error.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    /// Returns true if this is a validation error.
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }

    /// Returns true if this is a physics violation.
    pub fn is_physics(&self) -> bool {
        matches!(self, Self::Physics { .. })
    }

    /// Returns true if this is a storage error.
    pub fn is_storage(&self) -> bool {
        matches!(self, Self::Storage(_))
    }
}

/// Storage-related errors.
///
/// These errors indicate problems with the underlying storage layer.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Database file or data is corrupted.
    #[error("Database corrupted: {0}")]
    Corrupted(String),

    /// Database file not found at expected path.
    #[error("Database not found: {0}")]
    DatabaseNotFound(PathBuf),

    /// Database is locked by another process.
    #[error("Database is locked by another writer")]
    DatabaseLocked,

    /// Transaction failed (commit, rollback, etc.).
    #[error("Transaction failed: {0}")]
    Transaction(String),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Error from the redb storage engine.
    #[error("Storage engine error: {0}")]
    Redb(String),

    /// Database schema version doesn't match expected version.
    #[error("Schema version mismatch: expected {expected}, found {found}")]
    SchemaVersionMismatch {
        /// Expected schema version.
        expected: u32,
        /// Actual schema version found in database.
        found: u32,
    },
}

impl StorageError {
    /// Creates a corruption error with the given message.
    pub fn corrupted(msg: impl Into<String>) -> Self {
        Self::Corrupted(msg.into())
    }

    /// Creates a transaction error with the given message.
    pub fn transaction(msg: impl Into<String>) -> Self {
        Self::Transaction(msg.into())
    }

    /// Creates a serialization error with the given message.
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization(msg.into())
    }

    /// Creates a redb error with the given message.
    pub fn redb(msg: impl Into<String>) -> Self {
        Self::Redb(msg.into())
    }
}

// Conversions from redb error types
impl From<redb::Error> for StorageError {
    fn from(err: redb::Error) -> Self {
        StorageError::Redb(err.to_string())
    }
}

impl From<redb::DatabaseError> for StorageError {
    fn from(err: redb::DatabaseError) -> Self {
        StorageError::Redb(err.to_string())
    }
}

impl From<redb::TransactionError> for StorageError {
    fn from(err: redb::TransactionError) -> Self {
        StorageError::Transaction(err.to_string())
    }
}

impl From<redb::CommitError> for StorageError {
    fn from(err: redb::CommitError) -> Self {
        StorageError::Transaction(format!("Commit failed: {}", err))
    }
}

impl From<redb::TableError> for StorageError {
    fn from(err: redb::TableError) -> Self {
        StorageError::Redb(format!("Table error: {}", err))
    }
}

impl From<redb::StorageError> for StorageError {
    fn from(err: redb::StorageError) -> Self {
        StorageError::Redb(format!("Storage error: {}", err))
    }
}

impl From<bincode::Error> for StorageError {
    fn from(err: bincode::Error) -> Self {
        StorageError::Serialization(err.to_string())
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::Serialization(err.to_string())
    }
}

// Also allow direct conversion to ChoraError for convenience
impl From<redb::Error> for ChoraError {
    fn from(err: redb::Error) -> Self {
        ChoraError::Storage(StorageError::from(err))
    }
}

impl From<redb::DatabaseError> for ChoraError {
    fn from(err: redb::DatabaseError) -> Self {
        ChoraError::Storage(StorageError::from(err))
    }
}

impl From<redb::TransactionError> for ChoraError {
    fn from(err: redb::TransactionError) -> Self {
        ChoraError::Storage(StorageError::from(err))
    }
}

impl From<redb::CommitError> for ChoraError {
    fn from(err: redb::CommitError) -> Self {
        ChoraError::Storage(StorageError::from(err))
    }
}

impl From<redb::TableError> for ChoraError {
    fn from(err: redb::TableError) -> Self {
        ChoraError::Storage(StorageError::from(err))
    }
}

impl From<redb::StorageError> for ChoraError {
    fn from(err: redb::StorageError) -> Self {
        ChoraError::Storage(StorageError::from(err))
    }
}

impl From<bincode::Error> for ChoraError {
    fn from(err: bincode::Error) -> Self {
        ChoraError::Storage(StorageError::from(err))
    }
}

impl From<serde_json::Error> for ChoraError {
    fn from(err: serde_json::Error) -> Self {
        ChoraError::Storage(StorageError::from(err))
    }
}

/// Validation errors for input data.
///
/// These errors indicate problems with data provided by the caller.
#[derive(Debug, Error)]
pub enum ValidationError {
    /// A field has an invalid value.
    #[error("Invalid field '{field}': {reason}")]
    InvalidField {
        /// Name of the invalid field.
        field: String,
        /// Why the value is invalid.
        reason: String,
    },

    /// A required field is missing or empty.
    #[error("Required field missing: {field}")]
    RequiredField {
        /// Name of the missing field.
        field: String,
    },

    /// An entity id is malformed or its prefix doesn't name a known type.
    #[error("Invalid entity id '{id}': {reason}")]
    InvalidId {
        /// The offending id.
        id: String,
        /// Why the id is invalid.
        reason: String,
    },

    /// Embedding dimension doesn't match the store's configured dimension.
    #[error("Embedding dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch {
        /// Expected dimension from store configuration.
        expected: usize,
        /// Actual dimension provided.
        got: usize,
    },

    /// Payload exceeds maximum allowed size.
    #[error("Data too large: {size} bytes (max: {max} bytes)")]
    DataTooLarge {
        /// Actual payload size in bytes.
        size: usize,
        /// Maximum allowed size in bytes.
        max: usize,
    },
}

impl ValidationError {
    /// Creates an invalid field error.
    pub fn invalid_field(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidField {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Creates a required field error.
    pub fn required_field(field: impl Into<String>) -> Self {
        Self::RequiredField {
            field: field.into(),
        }
    }

    /// Creates an invalid id error.
    pub fn invalid_id(id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidId {
            id: id.into(),
            reason: reason.into(),
        }
    }

    /// Creates a dimension mismatch error.
    pub fn dimension_mismatch(expected: usize, got: usize) -> Self {
        Self::DimensionMismatch { expected, got }
    }

    /// Creates a data too large error.
    pub fn data_too_large(size: usize, max: usize) -> Self {
        Self::DataTooLarge { size, max }
    }
}

/// Not found errors for specific reference kinds.
#[derive(Debug, Error)]
pub enum NotFoundError {
    /// Entity with given id not found in the live table.
    #[error("Entity not found: {0}")]
    Entity(String),

    /// Bond with given id not found.
    #[error("Bond not found: {0}")]
    Bond(String),

    /// Protocol entity with given id not found.
    #[error("Protocol not found: {0}")]
    Protocol(String),

    /// Primitive with given id not registered.
    #[error("Primitive not found: {0}")]
    Primitive(String),

    /// Intent matched neither a protocol nor a primitive.
    #[error("Intent not found: {0}")]
    Intent(String),
}

impl NotFoundError {
    /// Creates an entity not found error.
    pub fn entity(id: impl ToString) -> Self {
        Self::Entity(id.to_string())
    }

    /// Creates a bond not found error.
    pub fn bond(id: impl ToString) -> Self {
        Self::Bond(id.to_string())
    }

    /// Creates a protocol not found error.
    pub fn protocol(id: impl ToString) -> Self {
        Self::Protocol(id.to_string())
    }

    /// Creates a primitive not found error.
    pub fn primitive(id: impl ToString) -> Self {
        Self::Primitive(id.to_string())
    }

    /// Creates an intent not found error.
    pub fn intent(id: impl ToString) -> Self {
        Self::Intent(id.to_string())
    }
}
