//! Query operations for Chora.
//!
//! This module provides filtering for typed entity lookup. Full-text
//! search lives on the store facade; similarity search lives in the
//! semantic layer.

mod filter;

pub use filter::EntityFilter;
