//! Bond management module.
//!
//! A **bond** is a directed typed edge between two entities. Bond writes
//! are admitted or refused by the physics table; confidence is clamped and
//! its movements emit epistemic signals.
//!
//! # Operations
//!
//! All bond operations are available on [`GraphStore`](crate::GraphStore):
//!
//! - [`manage_bond(new_bond)`](crate::GraphStore::manage_bond)
//! - [`get_bond(id)`](crate::GraphStore::get_bond)
//! - [`dissolve_bond(id)`](crate::GraphStore::dissolve_bond)
//! - [`get_constellation(id)`](crate::GraphStore::get_constellation)
//!
//! # Constraints
//!
//! - Bonds cannot be self-referential (`from_id != to_id`)
//! - The `(verb, from.type, to.type)` triple must be in the physics table
//! - Confidence is clamped into `[0.0, 1.0]`

pub mod types;

pub use types::{Bond, BondStatus, NewBond};

use crate::error::{ChoraError, ValidationError};

/// Validates a new bond before the physics check.
///
/// Checks only what needs no storage lookup: self-reference. Physics and
/// endpoint existence are checked by the store, which can see both
/// entities.
pub(crate) fn validate_new_bond(bond: &NewBond) -> Result<(), ChoraError> {
    if bond.from_id == bond.to_id {
        return Err(ValidationError::invalid_field(
            "to_id",
            "cannot create a self-bond (from_id == to_id)",
        )
        .into());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::physics::Verb;
    use crate::types::EntityId;

    #[test]
    fn test_valid_bond_passes() {
        let nb = NewBond::new(
            Verb::Surfaces,
            EntityId::parse("learning-a").unwrap(),
            EntityId::parse("principle-b").unwrap(),
        );
        assert!(validate_new_bond(&nb).is_ok());
    }

    #[test]
    fn test_self_bond_rejected() {
        let id = EntityId::parse("learning-a").unwrap();
        let nb = NewBond::new(Verb::CrystallizedFrom, id.clone(), id);
        let err = validate_new_bond(&nb).unwrap_err();
        assert!(err.is_validation());
        assert!(err.to_string().contains("self-bond"));
    }
}
