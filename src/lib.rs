//! # Chora
//!
//! An event-sourced graph virtual machine. Durable state is a typed
//! entity/bond graph in an embedded store; behavior is protocols — graph
//! entities executed by a small interpreter — and primitives, native
//! operations exposed to it. A background pulse metabolizes attention:
//! it dispatches triggered signals, ages entities into stagnation, and
//! auto-resolves signals whose condition cleared.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use chora::{Config, DispatchOptions, Engine, GraphStore};
//!
//! // Open or create a store
//! let store = Arc::new(GraphStore::open("./chora.db", Config::default())?);
//! let engine = Arc::new(Engine::new(store));
//!
//! // Dispatch an intent (a primitive or a protocol by name)
//! let result = engine.dispatch(
//!     "manifest_entity",
//!     serde_json::json!({"type": "learning", "data": {"title": "Validate input"}})
//!         .as_object().cloned().unwrap(),
//!     DispatchOptions::default(),
//! );
//! assert!(result.ok());
//! ```
//!
//! ## Key Concepts
//!
//! ### Entities and bonds
//!
//! An **entity** is a typed node (`{type}-{slug}` ids) with an open JSON
//! payload. A **bond** is a directed typed edge whose
//! `(verb, from.type, to.type)` triple must be admitted by the closed
//! physics table. Confidence is clamped to [0, 1]; tentative creation and
//! confidence drops emit epistemic signals.
//!
//! ### Protocols and primitives
//!
//! A **protocol** is an entity whose `graph` the VM executes: START,
//! CALL, BRANCH, MERGE, RETURN, SET nodes with fuel, cycle detection, and
//! a step trace. A **primitive** is a native handler returning the
//! standard response envelope. The [`Engine`] normalizes intents onto
//! either.
//!
//! ### The pulse
//!
//! The [`Pulse`](pulse::Pulse) runs on its own cadence: triggered signals
//! are dispatched and resolved or failed with recorded outcomes,
//! stagnating entities raise escalation signals, and tracked signals
//! auto-resolve when their condition clears.
//!
//! ### Sync and circles
//!
//! Entities `inhabit` circles; the [`SyncRouter`](sync::SyncRouter)
//! consults the keyring to decide which cloud circles receive each
//! change. Local-only is the default everywhere.
//!
//! ## Thread Safety
//!
//! [`GraphStore`] and [`Engine`] are `Send + Sync`; share them across
//! threads with `Arc`. The storage engine uses MVCC reads with a single
//! serialized writer.

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]
#![deny(unsafe_op_in_unsafe_fn)]

// ============================================================================
// Module declarations
// ============================================================================

mod config;
mod engine;
mod error;
mod fts;
mod response;
mod store;
mod types;

pub mod embedding;
pub mod physics;
pub mod primitives;
pub mod pulse;
pub mod semantic;
pub mod storage;
pub mod sync;
pub mod vm;

// Domain modules
mod bond;
mod entity;
mod query;

// ============================================================================
// Public API re-exports
// ============================================================================

// Main handles
pub use engine::{DispatchOptions, DispatchResult, Engine, RecordedHandle};
pub use store::{
    BondDirection, BondOutcome, ChangeEvent, Constellation, ConstellationBond, FtsHit, GraphStore,
    HookId, SaveHook,
};

// Configuration
pub use config::{Config, PulseConfig, VectorizerKind, PULSE_HISTORY_RETAIN};

// Error handling
pub use error::{exit_code, ChoraError, ErrorKind, NotFoundError, Result, StorageError,
    ValidationError};

// Core types
pub use types::{slugify, BondId, EntityId, EntityType, Timestamp};

// Domain types
pub use bond::{Bond, BondStatus, NewBond};
pub use entity::{Entity, EntityStatus, EntitySummary, JsonMap};
pub use physics::{Urgency, Verb};

// Query
pub use query::EntityFilter;

// Dispatch surface
pub use primitives::{Capability, CapabilityKind, Interface, PrimitiveCtx, PrimitiveRegistry};
pub use response::{MemorySink, Response, Sink, StdoutSink};

// Storage records (for advanced users)
pub use storage::{
    ArchiveKind, ArchiveRecord, DatabaseMetadata, EmbeddingRecord, OutcomeError, OutcomeStatus,
    PulseSummary, SignalOutcome,
};

// ============================================================================
// Prelude module for convenient imports
// ============================================================================

/// Convenient imports for common Chora usage.
///
/// ```rust
/// use chora::prelude::*;
/// ```
pub mod prelude {
    pub use crate::config::{Config, PulseConfig};
    pub use crate::engine::{DispatchOptions, DispatchResult, Engine};
    pub use crate::entity::{Entity, EntityStatus, JsonMap};
    pub use crate::error::{ChoraError, ErrorKind, Result};
    pub use crate::physics::Verb;
    pub use crate::pulse::Pulse;
    pub use crate::query::EntityFilter;
    pub use crate::store::GraphStore;
    pub use crate::types::{EntityId, EntityType, Timestamp};
}
