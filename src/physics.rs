//! The physics table: which bonds the graph admits.
//!
//! Every bond verb has a closed set of allowed `(from.type, to.type)`
//! pairs. A bond write outside the table fails with a physics violation;
//! changing the table is a schema migration, not runtime configuration.
//!
//! Confidence semantics live here too: confidence is clamped to [0, 1] at
//! write, creating a bond below full confidence emits a tentative-bond
//! signal at normal urgency, and lowering confidence emits a
//! confidence-dropped signal whose urgency escalates with the size of the
//! drop (not the absolute value).

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::types::EntityType;

/// Directed bond verb. Closed set.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Verb {
    /// inquiry → learning
    Yields,
    /// learning → principle
    Surfaces,
    /// learning → pattern
    Induces,
    /// principle → pattern
    Governs,
    /// principle → story
    Clarifies,
    /// pattern → story | behavior
    Structures,
    /// story → behavior
    Specifies,
    /// behavior → tool
    Implements,
    /// tool → behavior
    Verifies,
    /// tool → signal
    Emits,
    /// signal → protocol | focus
    Triggers,
    /// any → any
    CrystallizedFrom,
    /// any → circle
    Inhabits,
    /// asset → circle
    BelongsTo,
    /// persona → circle
    Stewards,
}

impl Verb {
    /// All verbs in table order.
    pub const ALL: [Verb; 15] = [
        Verb::Yields,
        Verb::Surfaces,
        Verb::Induces,
        Verb::Governs,
        Verb::Clarifies,
        Verb::Structures,
        Verb::Specifies,
        Verb::Implements,
        Verb::Verifies,
        Verb::Emits,
        Verb::Triggers,
        Verb::CrystallizedFrom,
        Verb::Inhabits,
        Verb::BelongsTo,
        Verb::Stewards,
    ];

    /// Returns the kebab-case wire name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Yields => "yields",
            Self::Surfaces => "surfaces",
            Self::Induces => "induces",
            Self::Governs => "governs",
            Self::Clarifies => "clarifies",
            Self::Structures => "structures",
            Self::Specifies => "specifies",
            Self::Implements => "implements",
            Self::Verifies => "verifies",
            Self::Emits => "emits",
            Self::Triggers => "triggers",
            Self::CrystallizedFrom => "crystallized-from",
            Self::Inhabits => "inhabits",
            Self::BelongsTo => "belongs-to",
            Self::Stewards => "stewards",
        }
    }

    /// Parses a verb name.
    pub fn parse(s: &str) -> Option<Verb> {
        Self::ALL.iter().copied().find(|v| v.as_str() == s)
    }

    /// Returns the allowed `(from, to)` type pairs for this verb, or `None`
    /// when the verb admits unbounded pairs (`crystallized-from`,
    /// `inhabits`).
    pub fn allowed_pairs(&self) -> Option<&'static [(EntityType, EntityType)]> {
        use EntityType::*;
        match self {
            Self::Yields => Some(&[(Inquiry, Learning)]),
            Self::Surfaces => Some(&[(Learning, Principle)]),
            Self::Induces => Some(&[(Learning, Pattern)]),
            Self::Governs => Some(&[(Principle, Pattern)]),
            Self::Clarifies => Some(&[(Principle, Story)]),
            Self::Structures => Some(&[(Pattern, Story), (Pattern, Behavior)]),
            Self::Specifies => Some(&[(Story, Behavior)]),
            Self::Implements => Some(&[(Behavior, Tool)]),
            Self::Verifies => Some(&[(Tool, Behavior)]),
            Self::Emits => Some(&[(Tool, Signal)]),
            Self::Triggers => Some(&[(Signal, Protocol), (Signal, Focus)]),
            Self::CrystallizedFrom | Self::Inhabits => None,
            Self::BelongsTo => Some(&[(Asset, Circle)]),
            Self::Stewards => Some(&[(Persona, Circle)]),
        }
    }
}

impl fmt::Display for Verb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returns true iff the physics table admits `verb` between the given
/// endpoint types.
pub fn allows(verb: Verb, from: EntityType, to: EntityType) -> bool {
    match verb {
        Verb::CrystallizedFrom => true,
        Verb::Inhabits => to == EntityType::Circle,
        _ => verb
            .allowed_pairs()
            .map(|pairs| pairs.contains(&(from, to)))
            .unwrap_or(false),
    }
}

/// Verbs whose pairs admit `from` as a source type, with the matching
/// target types. Universal verbs are excluded: they admit everything and
/// suggest nothing.
pub fn outgoing_targets(from: EntityType) -> Vec<(Verb, EntityType)> {
    let mut out = Vec::new();
    for verb in Verb::ALL {
        if verb == Verb::CrystallizedFrom {
            continue;
        }
        if verb == Verb::Inhabits {
            out.push((verb, EntityType::Circle));
            continue;
        }
        if let Some(pairs) = verb.allowed_pairs() {
            for (f, t) in pairs {
                if *f == from {
                    out.push((verb, *t));
                }
            }
        }
    }
    out
}

/// Signal urgency attached to epistemic signals.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Urgency {
    /// Routine attention.
    Normal,
    /// Demands prompt attention.
    High,
}

impl Urgency {
    /// Returns the lowercase wire name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Normal => "normal",
            Self::High => "high",
        }
    }
}

/// A confidence drop at or above this delta escalates the epistemic signal
/// to high urgency.
pub const HIGH_URGENCY_DROP: f32 = 0.5;

/// Clamps a confidence value into [0.0, 1.0]. NaN clamps to 1.0 (the
/// default confidence) rather than poisoning comparisons downstream.
pub fn clamp_confidence(c: f32) -> f32 {
    if c.is_nan() {
        return 1.0;
    }
    c.clamp(0.0, 1.0)
}

/// Urgency of a confidence-dropped signal, as a function of the drop
/// magnitude. Create-time tentative signals are always normal urgency:
/// urgency tracks change, not absolute confidence.
pub fn drop_urgency(delta: f32) -> Urgency {
    if delta >= HIGH_URGENCY_DROP {
        Urgency::High
    } else {
        Urgency::Normal
    }
}
