//! Data types for bonds.
//!
//! Bonds are directed typed edges between entities. They are separate rows
//! referenced by id — entities never embed them — and every write is
//! checked against the physics table.

use serde::{Deserialize, Serialize};

use crate::entity::JsonMap;
use crate::physics::Verb;
use crate::types::{BondId, EntityId, Timestamp};

/// Lifecycle status of a bond.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BondStatus {
    /// Created below full confidence.
    Forming,
    /// Established.
    Active,
    /// Under epistemic pressure (confidence dropped).
    Stressed,
    /// Archived; only ever present in the archive relation.
    Dissolved,
}

impl BondStatus {
    /// Returns the lowercase wire name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Forming => "forming",
            Self::Active => "active",
            Self::Stressed => "stressed",
            Self::Dissolved => "dissolved",
        }
    }
}

/// A stored directed edge between two entities.
///
/// # Uniqueness
///
/// The combination `(verb, from_id, to_id)` is unique: managing a bond
/// that already exists updates it in place rather than creating a second
/// row.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Bond {
    /// Unique identifier for this bond.
    pub id: BondId,

    /// The verb naming the edge semantics.
    pub verb: Verb,

    /// Source entity.
    pub from_id: EntityId,

    /// Target entity.
    pub to_id: EntityId,

    /// Epistemic confidence in [0.0, 1.0]; clamped at write. Default 1.0.
    pub confidence: f32,

    /// Lifecycle status.
    pub status: BondStatus,

    /// Open metadata (`last_verified_at`, `verification_result`,
    /// `failure_summary`, ...).
    pub metadata: JsonMap,

    /// When this bond was created.
    pub created_at: Timestamp,

    /// Last mutation time.
    pub updated_at: Timestamp,
}

/// Input for creating or updating a bond through
/// [`manage_bond`](crate::GraphStore::manage_bond).
#[derive(Clone, Debug)]
pub struct NewBond {
    /// The verb naming the edge semantics.
    pub verb: Verb,

    /// Source entity id.
    pub from_id: EntityId,

    /// Target entity id.
    pub to_id: EntityId,

    /// Confidence; `None` means the default 1.0.
    pub confidence: Option<f32>,

    /// Optional metadata merged into the bond.
    pub metadata: Option<JsonMap>,
}

impl NewBond {
    /// Convenience constructor with default confidence and no metadata.
    pub fn new(verb: Verb, from_id: EntityId, to_id: EntityId) -> Self {
        Self {
            verb,
            from_id,
            to_id,
            confidence: None,
            metadata: None,
        }
    }

    /// Sets the confidence.
    pub fn with_confidence(mut self, confidence: f32) -> Self {
        self.confidence = Some(confidence);
        self
    }
}
