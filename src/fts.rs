//! Full-text tokenization.
//!
//! The index itself is a pair of redb multimaps (term -> id, id -> term)
//! maintained transactionally with entity writes; this module owns only
//! the text processing.

use std::collections::BTreeSet;

/// Minimum token length admitted to the index.
const MIN_TOKEN_LEN: usize = 2;

/// Tokenizes text for the full-text index: lowercase, split on
/// non-alphanumerics, short tokens dropped, deduplicated and sorted.
pub fn tokenize(text: &str) -> Vec<String> {
    let mut terms = BTreeSet::new();
    let mut current = String::new();
    for c in text.chars() {
        if c.is_alphanumeric() {
            current.extend(c.to_lowercase());
        } else if !current.is_empty() {
            if current.chars().count() >= MIN_TOKEN_LEN {
                terms.insert(std::mem::take(&mut current));
            } else {
                current.clear();
            }
        }
    }
    if current.chars().count() >= MIN_TOKEN_LEN {
        terms.insert(current);
    }
    terms.into_iter().collect()
}

/// Fraction of `query_terms` found in `doc_terms`. Both inputs are
/// tokenized term lists.
pub fn match_ratio(query_terms: &[String], doc_terms: &[String]) -> f32 {
    if query_terms.is_empty() {
        return 0.0;
    }
    let hits = query_terms
        .iter()
        .filter(|t| doc_terms.contains(t))
        .count();
    hits as f32 / query_terms.len() as f32
}
