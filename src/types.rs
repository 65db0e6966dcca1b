//! Core type definitions for Chora identifiers and timestamps.
//!
//! Entity ids are human-readable strings of the form `{type}-{slug}`; the
//! prefix is the entity type and is validated at parse time. Bond ids use
//! UUID v7 for time-ordered unique identification. Timestamps are Unix
//! milliseconds with a big-endian byte encoding for ordered index keys.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::error::ValidationError;

/// Typed entity kind.
///
/// The ten core kinds (the working vocabulary of the graph) plus the
/// auxiliary kinds the system itself depends on (circles, protocols,
/// primitives, ...). The set is closed: extending it is a schema change,
/// exactly like extending the physics table.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityType {
    /// An open question driving attention.
    Inquiry,
    /// A unit of pending attention; processed by the pulse.
    Signal,
    /// A distilled observation.
    Learning,
    /// A governing statement, including stagnation rules.
    Principle,
    /// A recurring structure extracted from learnings.
    Pattern,
    /// A narrative grouping of patterns and behaviors.
    Story,
    /// A concrete executable behavior.
    Behavior,
    /// An implementation artifact.
    Tool,
    /// A unit of committed attention with an outcome.
    Focus,
    /// A reified connection between people or things.
    Relationship,
    /// A sync/sharing boundary.
    Circle,
    /// An external artifact owned by a circle.
    Asset,
    /// An executable graph run by the VM.
    Protocol,
    /// A native operation descriptor.
    Primitive,
    /// A foundational invariant statement.
    Axiom,
    /// A rendering arrangement.
    Layout,
    /// An acting identity.
    Persona,
}

impl EntityType {
    /// All entity types, core first.
    pub const ALL: [EntityType; 17] = [
        EntityType::Inquiry,
        EntityType::Signal,
        EntityType::Learning,
        EntityType::Principle,
        EntityType::Pattern,
        EntityType::Story,
        EntityType::Behavior,
        EntityType::Tool,
        EntityType::Focus,
        EntityType::Relationship,
        EntityType::Circle,
        EntityType::Asset,
        EntityType::Protocol,
        EntityType::Primitive,
        EntityType::Axiom,
        EntityType::Layout,
        EntityType::Persona,
    ];

    /// Returns the lowercase name used as the id prefix.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Inquiry => "inquiry",
            Self::Signal => "signal",
            Self::Learning => "learning",
            Self::Principle => "principle",
            Self::Pattern => "pattern",
            Self::Story => "story",
            Self::Behavior => "behavior",
            Self::Tool => "tool",
            Self::Focus => "focus",
            Self::Relationship => "relationship",
            Self::Circle => "circle",
            Self::Asset => "asset",
            Self::Protocol => "protocol",
            Self::Primitive => "primitive",
            Self::Axiom => "axiom",
            Self::Layout => "layout",
            Self::Persona => "persona",
        }
    }

    /// Parses a type name.
    pub fn parse(s: &str) -> Option<EntityType> {
        Self::ALL.iter().copied().find(|t| t.as_str() == s)
    }

    /// Returns true for the ten core kinds.
    pub fn is_core(&self) -> bool {
        matches!(
            self,
            Self::Inquiry
                | Self::Signal
                | Self::Learning
                | Self::Principle
                | Self::Pattern
                | Self::Story
                | Self::Behavior
                | Self::Tool
                | Self::Focus
                | Self::Relationship
        )
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Entity identifier of the form `{type}-{slug}`.
///
/// The prefix up to the first `-` names the entity type; the slug is
/// lowercase alphanumeric with `-` separators and may itself contain
/// dashes (`principle-inquiry-stagnates-after-30-days`).
///
/// # Example
/// ```
/// use chora::{EntityId, EntityType};
///
/// let id = EntityId::parse("learning-validate-inputs").unwrap();
/// assert_eq!(id.entity_type(), EntityType::Learning);
/// assert_eq!(id.slug(), "validate-inputs");
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityId(String);

impl EntityId {
    /// Builds an id from a type and a slug. The slug is normalized to
    /// lowercase; invalid characters are rejected.
    pub fn new(entity_type: EntityType, slug: &str) -> Result<Self, ValidationError> {
        let slug = slug.to_lowercase();
        if slug.is_empty() {
            return Err(ValidationError::invalid_id(
                format!("{}-", entity_type),
                "empty slug",
            ));
        }
        if !slug
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '.')
        {
            return Err(ValidationError::invalid_id(
                format!("{}-{}", entity_type, slug),
                "slug may contain only [a-z0-9.-]",
            ));
        }
        Ok(Self(format!("{}-{}", entity_type.as_str(), slug)))
    }

    /// Parses and validates an id string.
    pub fn parse(s: &str) -> Result<Self, ValidationError> {
        let (prefix, slug) = match s.split_once('-') {
            Some(parts) => parts,
            None => {
                return Err(ValidationError::invalid_id(s, "missing '-' type separator"));
            }
        };
        let entity_type = EntityType::parse(prefix)
            .ok_or_else(|| ValidationError::invalid_id(s, format!("unknown type '{}'", prefix)))?;
        Self::new(entity_type, slug)
    }

    /// Generates an id with a time-ordered 12-hex slug.
    pub fn generate(entity_type: EntityType) -> Self {
        let hex = Uuid::now_v7().simple().to_string();
        Self(format!("{}-{}", entity_type.as_str(), &hex[..12]))
    }

    /// Returns the entity type encoded in the prefix.
    ///
    /// Construction validates the prefix, so this cannot fail.
    pub fn entity_type(&self) -> EntityType {
        let prefix = self.0.split_once('-').map(|(p, _)| p).unwrap_or_default();
        EntityType::parse(prefix).expect("EntityId prefix validated at construction")
    }

    /// Returns the slug after the type prefix.
    pub fn slug(&self) -> &str {
        self.0.split_once('-').map(|(_, s)| s).unwrap_or_default()
    }

    /// Returns the id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for EntityId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Turns free text into an id slug: lowercase, non-alphanumerics collapsed
/// to single dashes, trimmed.
pub fn slugify(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut dash = true;
    for c in text.chars() {
        if c.is_ascii_alphanumeric() {
            out.push(c.to_ascii_lowercase());
            dash = false;
        } else if !dash {
            out.push('-');
            dash = true;
        }
    }
    while out.ends_with('-') {
        out.pop();
    }
    out
}

/// Bond identifier (UUID v7 for time-ordering).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BondId(pub Uuid);

impl BondId {
    /// Creates a new BondId with a UUID v7 (time-ordered).
    #[inline]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Creates a nil (all zeros) BondId.
    #[inline]
    pub fn nil() -> Self {
        Self(Uuid::nil())
    }

    /// Returns the raw UUID bytes for storage.
    #[inline]
    pub fn as_bytes(&self) -> &[u8; 16] {
        self.0.as_bytes()
    }

    /// Creates a BondId from raw bytes.
    #[inline]
    pub fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(Uuid::from_bytes(bytes))
    }

    /// Parses a BondId from its string form.
    pub fn parse(s: &str) -> Result<Self, ValidationError> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|e| ValidationError::invalid_id(s, e.to_string()))
    }
}

impl Default for BondId {
    /// Returns a nil (all zeros) BondId.
    ///
    /// For a new unique ID, use [`BondId::new()`].
    fn default() -> Self {
        Self::nil()
    }
}

impl fmt::Display for BondId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unix timestamp in milliseconds.
///
/// Using i64 allows representing dates far into the future and past.
/// Millisecond precision is sufficient for graph operations.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Timestamp(pub i64);

/// Milliseconds in one day.
pub const DAY_MS: i64 = 24 * 60 * 60 * 1000;

impl Timestamp {
    /// Creates a timestamp for the current moment.
    ///
    /// If the system clock is before the Unix epoch (should never happen
    /// in practice), returns a timestamp of 0 (epoch) rather than panicking.
    #[inline]
    pub fn now() -> Self {
        use std::time::{SystemTime, UNIX_EPOCH};
        let duration = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        Self(duration.as_millis() as i64)
    }

    /// Creates a timestamp from Unix milliseconds.
    #[inline]
    pub const fn from_millis(millis: i64) -> Self {
        Self(millis)
    }

    /// Returns the timestamp as Unix milliseconds.
    #[inline]
    pub const fn as_millis(&self) -> i64 {
        self.0
    }

    /// Returns big-endian bytes for storage (enables lexicographic ordering).
    #[inline]
    pub fn to_be_bytes(&self) -> [u8; 8] {
        self.0.to_be_bytes()
    }

    /// Returns this timestamp shifted back by whole days.
    #[inline]
    pub fn minus_days(&self, days: i64) -> Self {
        Self(self.0.saturating_sub(days.saturating_mul(DAY_MS)))
    }

    /// Whole days elapsed between this timestamp and `now`.
    #[inline]
    pub fn age_days(&self, now: Timestamp) -> i64 {
        (now.0.saturating_sub(self.0)) / DAY_MS
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entity_type_roundtrip() {
        for t in EntityType::ALL {
            assert_eq!(EntityType::parse(t.as_str()), Some(t));
        }
        assert_eq!(EntityType::parse("widget"), None);
    }

    #[test]
    fn test_core_types() {
        assert!(EntityType::Inquiry.is_core());
        assert!(EntityType::Relationship.is_core());
        assert!(!EntityType::Circle.is_core());
        assert!(!EntityType::Protocol.is_core());
        assert_eq!(EntityType::ALL.iter().filter(|t| t.is_core()).count(), 10);
    }

    #[test]
    fn test_entity_id_parse() {
        let id = EntityId::parse("principle-inquiry-stagnates-after-30-days").unwrap();
        assert_eq!(id.entity_type(), EntityType::Principle);
        assert_eq!(id.slug(), "inquiry-stagnates-after-30-days");
    }

    #[test]
    fn test_entity_id_rejects_unknown_prefix() {
        let err = EntityId::parse("widget-foo").unwrap_err();
        assert!(err.to_string().contains("unknown type"));
    }

    #[test]
    fn test_entity_id_rejects_missing_separator() {
        assert!(EntityId::parse("inquiry").is_err());
        assert!(EntityId::parse("inquiry-").is_err());
    }

    #[test]
    fn test_entity_id_rejects_bad_charset() {
        assert!(EntityId::parse("inquiry-What Now").is_err());
    }

    #[test]
    fn test_entity_id_generate() {
        let a = EntityId::generate(EntityType::Signal);
        let b = EntityId::generate(EntityType::Signal);
        assert_ne!(a, b);
        assert_eq!(a.entity_type(), EntityType::Signal);
        assert_eq!(a.slug().len(), 12);
    }

    #[test]
    fn test_slugify() {
        assert_eq!(slugify("Always Validate Input!"), "always-validate-input");
        assert_eq!(slugify("  spaced   out  "), "spaced-out");
        assert_eq!(slugify("v1.2"), "v1-2");
    }

    #[test]
    fn test_entity_id_json_is_plain_string() {
        let id = EntityId::parse("tool-parser").unwrap();
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"tool-parser\"");
    }

    #[test]
    fn test_bond_id_new_is_unique() {
        assert_ne!(BondId::new(), BondId::new());
    }

    #[test]
    fn test_bond_id_bytes_roundtrip() {
        let id = BondId::new();
        assert_eq!(BondId::from_bytes(*id.as_bytes()), id);
    }

    #[test]
    fn test_timestamp_ordering_and_bytes() {
        let t1 = Timestamp::from_millis(1000);
        let t2 = Timestamp::from_millis(2000);
        assert!(t1 < t2);
        assert!(t1.to_be_bytes() < t2.to_be_bytes());
    }

    #[test]
    fn test_timestamp_days() {
        let now = Timestamp::from_millis(40 * DAY_MS);
        let old = now.minus_days(31);
        assert_eq!(old.age_days(now), 31);
        assert_eq!(now.age_days(now), 0);
    }
}
