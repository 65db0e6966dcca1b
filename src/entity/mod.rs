//! Entity management module.
//!
//! An **entity** is a typed node in the graph — the unit of durable state.
//! The envelope (id, type, status, timestamps) is fixed; the `data` payload
//! is an open JSON map validated per type at the boundary.
//!
//! # Operations
//!
//! All entity operations are available on [`GraphStore`](crate::GraphStore):
//!
//! - [`create_entity(entity)`](crate::GraphStore::create_entity)
//! - [`save_entity(entity)`](crate::GraphStore::save_entity)
//! - [`save_generic(id, type, data)`](crate::GraphStore::save_generic)
//! - [`update_entity_data(id, patch)`](crate::GraphStore::update_entity_data)
//! - [`get_entity(id)`](crate::GraphStore::get_entity)
//! - [`query_entities(filter)`](crate::GraphStore::query_entities)
//! - [`archive_entity(id, force)`](crate::GraphStore::archive_entity)

pub mod types;
pub mod validation;

pub use types::{Entity, EntityStatus, EntitySummary, JsonMap};
pub(crate) use validation::validate_entity;
pub use validation::MAX_DATA_SIZE;
