//! The semantic layer: similarity, ranked search, bond suggestions, and
//! cluster detection over persisted embeddings.
//!
//! Graceful degradation is universal here. No operation fails because the
//! vectorizer is absent — each one falls back to a deterministic path and
//! reports which `method` produced its answer, so callers can tell a
//! semantic ranking from a lexical one.

use serde::{Deserialize, Serialize};

use crate::embedding::Vectorizer;
use crate::entity::{Entity, EntityStatus, EntitySummary};
use crate::error::Result;
use crate::fts::{match_ratio, tokenize};
use crate::physics::{self, Verb};
use crate::query::EntityFilter;
use crate::store::GraphStore;
use crate::types::{EntityId, EntityType};

/// How a semantic operation produced its answer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Method {
    /// Cosine over stored vectors.
    Semantic,
    /// The degraded path (vectorizer or vectors absent).
    Fallback,
    /// Full-text ranking.
    Fts,
    /// Physics-table compatibility plus term overlap.
    TypeBased,
    /// Shared-term grouping.
    Keyword,
}

impl Method {
    /// Returns the kebab-case wire name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Semantic => "semantic",
            Self::Fallback => "fallback",
            Self::Fts => "fts",
            Self::TypeBased => "type-based",
            Self::Keyword => "keyword",
        }
    }
}

/// Result of persisting (or failing to persist) an entity embedding.
#[derive(Clone, Debug, Serialize)]
pub struct EmbedOutcome {
    /// `semantic` on success, `fallback` when degraded.
    pub method: Method,
    /// The entity involved.
    pub entity_id: EntityId,
    /// Vector dimension, when one was produced.
    pub dimension: Option<usize>,
    /// Why the operation degraded, when it did.
    pub error: Option<String>,
}

/// Result of vectorizing free text in memory.
#[derive(Clone, Debug, Serialize)]
pub struct EmbedTextOutcome {
    /// `semantic` on success, `fallback` when degraded.
    pub method: Method,
    /// Vector dimension, when one was produced.
    pub dimension: Option<usize>,
    /// The vector itself, when one was produced.
    pub vector: Option<Vec<f32>>,
    /// Why the operation degraded, when it did.
    pub error: Option<String>,
}

/// Result of a similarity comparison.
#[derive(Clone, Debug, Serialize)]
pub struct SimilarityOutcome {
    /// Cosine in [-1, 1]; 0.0 on the fallback path.
    pub score: f32,
    /// How the score was produced.
    pub method: Method,
}

/// One ranked search hit.
#[derive(Clone, Debug, Serialize)]
pub struct SearchHit {
    /// The matching entity.
    pub entity: EntitySummary,
    /// Ranking score (cosine or term-match fraction).
    pub score: f32,
}

/// Result of a ranked search.
#[derive(Clone, Debug, Serialize)]
pub struct SearchOutcome {
    /// `semantic` or the `fts` fallback.
    pub method: Method,
    /// Hits, best first.
    pub hits: Vec<SearchHit>,
}

/// One candidate bond, admitted by the physics table.
#[derive(Clone, Debug, Serialize)]
pub struct BondSuggestion {
    /// Proposed verb.
    pub verb: Verb,
    /// Proposed source.
    pub from_id: EntityId,
    /// Proposed target.
    pub to_id: EntityId,
    /// Ranking score.
    pub score: f32,
    /// The counterpart entity (the end that isn't the focal entity).
    pub counterpart: EntitySummary,
}

/// Result of bond suggestion.
#[derive(Clone, Debug, Serialize)]
pub struct SuggestOutcome {
    /// `semantic` or the `type-based` heuristic.
    pub method: Method,
    /// Candidates, best first.
    pub suggestions: Vec<BondSuggestion>,
}

/// One detected cluster.
#[derive(Clone, Debug, Serialize)]
pub struct Cluster {
    /// Human-facing label (a member title or the shared term).
    pub label: String,
    /// Member entity ids.
    pub members: Vec<EntityId>,
}

/// Result of cluster detection.
#[derive(Clone, Debug, Serialize)]
pub struct ClusterOutcome {
    /// `semantic` or the `keyword` fallback.
    pub method: Method,
    /// Detected clusters.
    pub clusters: Vec<Cluster>,
}

/// Cosine similarity of two vectors. Zero-norm or mismatched inputs
/// score 0.0.
pub fn cosine(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let na: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let nb: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if na == 0.0 || nb == 0.0 {
        return 0.0;
    }
    dot / (na * nb)
}

/// Generates and persists an embedding for an entity.
///
/// Degrades to a `fallback` envelope when the vectorizer is absent; the
/// entity itself must exist.
pub fn embed_entity(
    store: &GraphStore,
    vectorizer: &dyn Vectorizer,
    id: &str,
) -> Result<EmbedOutcome> {
    let entity = store.get_entity(id)?;

    if !vectorizer.available() {
        return Ok(EmbedOutcome {
            method: Method::Fallback,
            entity_id: entity.id,
            dimension: None,
            error: Some("no vectorizer configured".into()),
        });
    }

    let vector = vectorizer.embed(&entity.document_text())?;
    let dimension = vector.len();
    store.save_embedding(id, vector)?;

    Ok(EmbedOutcome {
        method: Method::Semantic,
        entity_id: entity.id,
        dimension: Some(dimension),
        error: None,
    })
}

/// Vectorizes free text in memory (nothing is persisted).
pub fn embed_text(vectorizer: &dyn Vectorizer, text: &str) -> Result<EmbedTextOutcome> {
    if !vectorizer.available() {
        return Ok(EmbedTextOutcome {
            method: Method::Fallback,
            dimension: None,
            vector: None,
            error: Some("no vectorizer configured".into()),
        });
    }
    let vector = vectorizer.embed(text)?;
    Ok(EmbedTextOutcome {
        method: Method::Semantic,
        dimension: Some(vector.len()),
        vector: Some(vector),
        error: None,
    })
}

/// Cosine similarity of two entities' stored vectors.
///
/// The identical entity scores 1.0 by definition; a missing vector on
/// either side scores 0.0 with `method: fallback`.
pub fn similarity(store: &GraphStore, a: &str, b: &str) -> Result<SimilarityOutcome> {
    if a == b {
        return Ok(SimilarityOutcome {
            score: 1.0,
            method: Method::Semantic,
        });
    }

    let va = store.get_embedding(a)?;
    let vb = store.get_embedding(b)?;
    match (va, vb) {
        (Some(ra), Some(rb)) => Ok(SimilarityOutcome {
            score: cosine(&ra.vector, &rb.vector),
            method: Method::Semantic,
        }),
        _ => Ok(SimilarityOutcome {
            score: 0.0,
            method: Method::Fallback,
        }),
    }
}

/// Ranked search: cosine over stored vectors when possible, full-text
/// otherwise.
pub fn search(
    store: &GraphStore,
    vectorizer: &dyn Vectorizer,
    query: &str,
    entity_type: Option<EntityType>,
    limit: usize,
) -> Result<SearchOutcome> {
    if vectorizer.available() {
        let query_vector = vectorizer.embed(query)?;

        let mut hits = Vec::new();
        for id in store.list_embedded_ids()? {
            let entity = match store.try_get_entity(&id)? {
                Some(e) => e,
                None => continue,
            };
            if let Some(t) = entity_type {
                if entity.entity_type != t {
                    continue;
                }
            }
            if let Some(record) = store.get_embedding(&id)? {
                hits.push(SearchHit {
                    score: cosine(&query_vector, &record.vector),
                    entity: EntitySummary::from(&entity),
                });
            }
        }

        if !hits.is_empty() {
            hits.sort_by(|a, b| {
                b.score
                    .partial_cmp(&a.score)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then_with(|| a.entity.id.cmp(&b.entity.id))
            });
            hits.truncate(limit);
            return Ok(SearchOutcome {
                method: Method::Semantic,
                hits,
            });
        }
        // Vectorizer present but nothing embedded yet: fall through
    }

    let hits = store
        .fts_search(query, entity_type, limit)?
        .into_iter()
        .map(|h| SearchHit {
            entity: h.entity,
            score: h.score,
        })
        .collect();
    Ok(SearchOutcome {
        method: Method::Fts,
        hits,
    })
}

/// Suggests bonds for an entity, constrained by the physics table.
///
/// Candidates are ranked by cosine when the focal entity has a stored
/// vector, else by a type-compatibility heuristic weighted by term
/// overlap. `crystallized-from` is excluded: it admits everything and
/// therefore suggests nothing.
pub fn suggest_bonds(
    store: &GraphStore,
    vectorizer: &dyn Vectorizer,
    id: &str,
    limit: usize,
) -> Result<SuggestOutcome> {
    let focal = store.get_entity(id)?;
    let focal_vector = store.get_embedding(id)?.map(|r| r.vector);
    let semantic = vectorizer.available() && focal_vector.is_some();
    let focal_terms = tokenize(&focal.document_text());

    // Every suggestion touches the focal entity, so its live bonds are the
    // complete dedup set.
    let mut existing = std::collections::HashSet::new();
    for bond in store.bonds_from(id)?.into_iter().chain(store.bonds_to(id)?) {
        existing.insert((bond.verb, bond.from_id, bond.to_id));
    }

    let mut suggestions = Vec::new();
    for candidate in store.query_entities(&EntityFilter::default())? {
        if candidate.id.as_str() == id || candidate.status != EntityStatus::Active {
            continue;
        }

        let score = match &focal_vector {
            Some(fv) if semantic => match store.get_embedding(candidate.id.as_str())? {
                Some(record) => cosine(fv, &record.vector),
                None => 0.0,
            },
            _ => {
                let candidate_terms = tokenize(&candidate.document_text());
                0.4 + 0.6 * match_ratio(&focal_terms, &candidate_terms)
            }
        };

        for verb in Verb::ALL {
            if verb == Verb::CrystallizedFrom {
                continue;
            }
            for (from, to) in [(&focal, &candidate), (&candidate, &focal)] {
                if !physics::allows(verb, from.entity_type, to.entity_type) {
                    continue;
                }
                if existing.contains(&(verb, from.id.clone(), to.id.clone())) {
                    continue;
                }
                suggestions.push(BondSuggestion {
                    verb,
                    from_id: from.id.clone(),
                    to_id: to.id.clone(),
                    score,
                    counterpart: EntitySummary::from(&candidate),
                });
            }
        }
    }

    suggestions.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| (a.from_id.cmp(&b.from_id)).then(a.to_id.cmp(&b.to_id)))
    });
    suggestions.truncate(limit);

    Ok(SuggestOutcome {
        method: if semantic {
            Method::Semantic
        } else {
            Method::TypeBased
        },
        suggestions,
    })
}

/// Groups entities of one type into clusters.
///
/// With embeddings present, runs a small deterministic centroid grouping;
/// otherwise groups by the most widely shared term.
pub fn detect_clusters(
    store: &GraphStore,
    vectorizer: &dyn Vectorizer,
    entity_type: EntityType,
) -> Result<ClusterOutcome> {
    let entities = store.query_entities(&EntityFilter::of_type(entity_type))?;

    if vectorizer.available() {
        let mut embedded = Vec::new();
        for entity in &entities {
            if let Some(record) = store.get_embedding(entity.id.as_str())? {
                embedded.push((entity, record.vector));
            }
        }
        if embedded.len() >= 2 {
            return Ok(ClusterOutcome {
                method: Method::Semantic,
                clusters: centroid_clusters(&embedded),
            });
        }
    }

    Ok(ClusterOutcome {
        method: Method::Keyword,
        clusters: keyword_clusters(&entities),
    })
}

/// Deterministic k-means-like grouping. Centroids are seeded from the
/// first k members in id order, so equal inputs give equal clusters.
fn centroid_clusters(embedded: &[(&Entity, Vec<f32>)]) -> Vec<Cluster> {
    let n = embedded.len();
    let k = (((n as f64) / 2.0).sqrt().ceil() as usize).clamp(1, n);
    let dim = embedded[0].1.len();

    let mut centroids: Vec<Vec<f32>> = embedded.iter().take(k).map(|(_, v)| v.clone()).collect();
    let mut assignment = vec![0usize; n];

    for _ in 0..8 {
        let mut moved = false;
        for (i, (_, vector)) in embedded.iter().enumerate() {
            let best = (0..k)
                .max_by(|&a, &b| {
                    cosine(vector, &centroids[a])
                        .partial_cmp(&cosine(vector, &centroids[b]))
                        .unwrap_or(std::cmp::Ordering::Equal)
                })
                .unwrap_or(0);
            if assignment[i] != best {
                assignment[i] = best;
                moved = true;
            }
        }

        let mut sums = vec![vec![0.0f32; dim]; k];
        let mut counts = vec![0usize; k];
        for (i, (_, vector)) in embedded.iter().enumerate() {
            counts[assignment[i]] += 1;
            for (s, v) in sums[assignment[i]].iter_mut().zip(vector) {
                *s += v;
            }
        }
        for (c, (sum, count)) in centroids.iter_mut().zip(sums.iter().zip(&counts)) {
            if *count > 0 {
                *c = sum.iter().map(|s| s / *count as f32).collect();
            }
        }

        if !moved {
            break;
        }
    }

    (0..k)
        .filter_map(|cluster| {
            let members: Vec<usize> = (0..n).filter(|i| assignment[*i] == cluster).collect();
            if members.is_empty() {
                return None;
            }
            // Label with the member closest to the centroid
            let label_idx = members
                .iter()
                .copied()
                .max_by(|&a, &b| {
                    cosine(&embedded[a].1, &centroids[cluster])
                        .partial_cmp(&cosine(&embedded[b].1, &centroids[cluster]))
                        .unwrap_or(std::cmp::Ordering::Equal)
                })
                .unwrap_or(members[0]);
            Some(Cluster {
                label: embedded[label_idx].0.title().to_string(),
                members: members
                    .into_iter()
                    .map(|i| embedded[i].0.id.clone())
                    .collect(),
            })
        })
        .collect()
}

/// Greedy shared-term grouping: repeatedly take the term covering the most
/// still-unclustered entities (ties lexicographic).
fn keyword_clusters(entities: &[Entity]) -> Vec<Cluster> {
    use std::collections::{BTreeMap, BTreeSet};

    let terms_per_entity: Vec<(usize, Vec<String>)> = entities
        .iter()
        .enumerate()
        .map(|(i, e)| (i, tokenize(&e.document_text())))
        .collect();

    let mut uncovered: BTreeSet<usize> = (0..entities.len()).collect();
    let mut clusters = Vec::new();

    while !uncovered.is_empty() {
        let mut term_coverage: BTreeMap<&str, Vec<usize>> = BTreeMap::new();
        for (i, terms) in &terms_per_entity {
            if !uncovered.contains(i) {
                continue;
            }
            for term in terms {
                term_coverage.entry(term).or_default().push(*i);
            }
        }

        let best = term_coverage
            .iter()
            .filter(|(_, members)| members.len() >= 2)
            .max_by(|(ta, a), (tb, b)| {
                // Widest coverage wins; longer terms beat connective noise
                a.len()
                    .cmp(&b.len())
                    .then(ta.len().cmp(&tb.len()))
                    .then(ta.cmp(tb))
            });

        match best {
            Some((term, members)) => {
                for i in members {
                    uncovered.remove(i);
                }
                clusters.push(Cluster {
                    label: term.to_string(),
                    members: members.iter().map(|i| entities[*i].id.clone()).collect(),
                });
            }
            None => {
                // Only singletons remain: one cluster each
                for i in std::mem::take(&mut uncovered) {
                    clusters.push(Cluster {
                        label: entities[i].title().to_string(),
                        members: vec![entities[i].id.clone()],
                    });
                }
            }
        }
    }

    clusters
}
