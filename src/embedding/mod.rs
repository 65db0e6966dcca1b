//! Vectorizer abstractions for the semantic layer.
//!
//! Chora consumes a pluggable [`Vectorizer`] but does not implement an
//! embedding model. Two built-in providers cover the operational range:
//!
//! - [`NullVectorizer`] — reports unavailability; every semantic operation
//!   takes its deterministic fallback path
//! - [`HashVectorizer`] — deterministic token-hash vectors, stable across
//!   runs; lets the semantic ranking paths run offline
//!
//! # Implementing a Custom Provider
//!
//! ```rust,ignore
//! use chora::embedding::Vectorizer;
//! use chora::Result;
//!
//! struct MyVectorizer { client: MyApiClient }
//!
//! impl Vectorizer for MyVectorizer {
//!     fn name(&self) -> &str { "my-model" }
//!     fn dimension(&self) -> usize { 768 }
//!     fn available(&self) -> bool { true }
//!     fn embed(&self, text: &str) -> Result<Vec<f32>> {
//!         Ok(self.client.get_embedding(text)?)
//!     }
//! }
//! ```

use crate::config::{Config, VectorizerKind};
use crate::error::{ChoraError, Result};

/// Produces dense vector representations of text.
///
/// Implementations must be thread-safe (`Send + Sync`). Callers are
/// expected to check [`available`](Vectorizer::available) and degrade
/// gracefully rather than treat an error as fatal.
pub trait Vectorizer: Send + Sync {
    /// The model name recorded alongside persisted embeddings.
    fn name(&self) -> &str;

    /// The dimension of vectors produced by this vectorizer.
    fn dimension(&self) -> usize;

    /// Whether the vectorizer can produce vectors at all.
    fn available(&self) -> bool;

    /// Generates a vector for the given text.
    ///
    /// # Errors
    ///
    /// Returns `ChoraError::DependencyUnavailable` when the provider
    /// cannot produce vectors.
    fn embed(&self, text: &str) -> Result<Vec<f32>>;
}

/// The absent vectorizer.
///
/// Every semantic operation consults [`available`](Vectorizer::available)
/// first and reports its fallback method instead of calling `embed`.
#[derive(Clone, Debug)]
pub struct NullVectorizer {
    dimension: usize,
}

impl NullVectorizer {
    /// Creates a null vectorizer advertising the given dimension.
    pub fn new(dimension: usize) -> Self {
        Self { dimension }
    }
}

impl Vectorizer for NullVectorizer {
    fn name(&self) -> &str {
        "none"
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn available(&self) -> bool {
        false
    }

    fn embed(&self, _text: &str) -> Result<Vec<f32>> {
        Err(ChoraError::DependencyUnavailable(
            "no vectorizer configured".into(),
        ))
    }
}

/// Deterministic token-hash vectorizer.
///
/// Each token hashes to a bucket and a sign; the accumulated vector is
/// L2-normalized. Not a learned model — similar wording scores high,
/// synonyms don't — but it is stable across runs and processes, which is
/// what the offline ranking paths need.
#[derive(Clone, Debug)]
pub struct HashVectorizer {
    dimension: usize,
}

impl HashVectorizer {
    /// Creates a hash vectorizer with the given dimension.
    pub fn new(dimension: usize) -> Self {
        Self { dimension }
    }
}

/// FNV-1a, fixed offset basis. std's default hasher is randomly keyed per
/// process, which would break cross-run stability.
fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for b in bytes {
        hash ^= u64::from(*b);
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    hash
}

impl Vectorizer for HashVectorizer {
    fn name(&self) -> &str {
        "hash-v1"
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn available(&self) -> bool {
        true
    }

    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut vector = vec![0.0f32; self.dimension];
        for token in crate::fts::tokenize(text) {
            let hash = fnv1a(token.as_bytes());
            let index = (hash % self.dimension as u64) as usize;
            let sign = if hash & (1 << 63) == 0 { 1.0 } else { -1.0 };
            vector[index] += sign;
        }

        let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for x in &mut vector {
                *x /= norm;
            }
        }
        Ok(vector)
    }
}

/// Creates a vectorizer based on the configuration.
pub fn create_vectorizer(config: &Config) -> Box<dyn Vectorizer> {
    match config.vectorizer {
        VectorizerKind::Disabled => Box::new(NullVectorizer::new(config.embedding_dimension)),
        VectorizerKind::Hash => Box::new(HashVectorizer::new(config.embedding_dimension)),
    }
}
