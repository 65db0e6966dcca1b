//! Configuration types for Chora.
//!
//! The [`Config`] struct controls store and engine behavior:
//! - Vectorizer provider and embedding dimension
//! - Pulse cadence
//! - VM step budget
//!
//! # Example
//! ```rust
//! use chora::{Config, PulseConfig};
//!
//! // Use defaults (no vectorizer, 384 dimensions, pulse disabled)
//! let config = Config::default();
//!
//! // Enable the pulse at a one-minute cadence
//! let config = Config {
//!     pulse: PulseConfig {
//!         enabled: true,
//!         interval_seconds: 60,
//!     },
//!     ..Default::default()
//! };
//! ```

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// Store and engine configuration options.
///
/// All fields have sensible defaults. Use struct update syntax to override
/// specific settings:
///
/// ```rust
/// use chora::Config;
///
/// let config = Config {
///     step_budget: 500,
///     ..Default::default()
/// };
/// ```
#[derive(Clone, Debug)]
pub struct Config {
    /// How embedding vectors are produced.
    pub vectorizer: VectorizerKind,

    /// Embedding vector dimension (must match vectorizer output).
    ///
    /// Locked into the store metadata on creation; reopening with a
    /// different dimension is an error.
    pub embedding_dimension: usize,

    /// Model name recorded alongside persisted embeddings.
    pub embedding_model: String,

    /// Pulse loop settings.
    pub pulse: PulseConfig,

    /// Maximum VM steps per protocol run.
    ///
    /// A malformed protocol cannot loop forever: exceeding the budget
    /// fails the run with `execution_error: step_budget_exhausted`.
    pub step_budget: u64,

    /// Pending-change queue capacity for the sync router.
    pub sync_queue_capacity: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            // No vectorizer is the safe default - every semantic operation
            // degrades to its deterministic fallback
            vectorizer: VectorizerKind::Disabled,
            // 384 matches all-MiniLM-L6-v2, the conventional small model
            embedding_dimension: 384,
            embedding_model: "external".to_string(),
            pulse: PulseConfig::default(),
            step_budget: 10_000,
            sync_queue_capacity: 1024,
        }
    }
}

impl Config {
    /// Creates a new Config with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a Config with the deterministic hash vectorizer enabled.
    ///
    /// The hash vectorizer is not a learned model; it exists so semantic
    /// ranking paths can run offline with stable results.
    pub fn with_hash_vectorizer() -> Self {
        Self {
            vectorizer: VectorizerKind::Hash,
            embedding_model: "hash-v1".to_string(),
            ..Default::default()
        }
    }

    /// Validates the configuration.
    ///
    /// Called automatically by `GraphStore::open()`. You can also call this
    /// explicitly to check configuration before attempting to open.
    ///
    /// # Errors
    /// Returns `ValidationError` if:
    /// - `embedding_dimension` is 0 or > 4096
    /// - `pulse.interval_seconds` is 0
    /// - `step_budget` is 0
    /// - `sync_queue_capacity` is 0
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.embedding_dimension == 0 {
            return Err(ValidationError::invalid_field(
                "embedding_dimension",
                "must be greater than 0",
            ));
        }
        if self.embedding_dimension > 4096 {
            return Err(ValidationError::invalid_field(
                "embedding_dimension",
                "must not exceed 4096",
            ));
        }
        if self.pulse.interval_seconds == 0 {
            return Err(ValidationError::invalid_field(
                "pulse.interval_seconds",
                "must be at least 1",
            ));
        }
        if self.step_budget == 0 {
            return Err(ValidationError::invalid_field(
                "step_budget",
                "must be greater than 0",
            ));
        }
        if self.sync_queue_capacity == 0 {
            return Err(ValidationError::invalid_field(
                "sync_queue_capacity",
                "must be greater than 0",
            ));
        }
        Ok(())
    }
}

/// Vectorizer provider configuration.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VectorizerKind {
    /// No vectorizer; semantic operations report their fallback method.
    Disabled,
    /// Deterministic token-hash vectors (offline, stable across runs).
    Hash,
}

/// Pulse loop settings.
///
/// One pulse processes triggered signals, sweeps for stagnation, and
/// re-evaluates auto-resolvable signals. The loop never overlaps with
/// itself; a tick arriving mid-run is skipped and logged.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PulseConfig {
    /// Whether the background loop runs at all.
    pub enabled: bool,

    /// Seconds between pulses; also the per-run deadline.
    pub interval_seconds: u64,
}

impl Default for PulseConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            interval_seconds: 60,
        }
    }
}

/// Number of pulse summaries retained for status queries.
pub const PULSE_HISTORY_RETAIN: usize = 64;
