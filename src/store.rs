//! The graph store facade.
//!
//! [`GraphStore`] is the single arbiter of the typed entity/bond graph:
//! every write is validated, physics-checked, committed atomically by the
//! storage engine, and then announced to the save-hook bus. Entities never
//! hold pointers to one another — traversal always comes back here.
//!
//! # Write pipeline
//!
//! ```text
//! validate -> physics check -> atomic commit -> save hooks
//! ```
//!
//! Save hooks run strictly *after* the commit: they observe committed
//! state, run in registration order, and a failing hook is logged without
//! affecting the commit. The two maintenance concerns that must be exactly
//! as fresh as the entity row — embedding invalidation and FTS postings —
//! are not hooks; they ride inside the entity's own write transaction.
//!
//! # Thread Safety
//!
//! `GraphStore` is `Send + Sync` and can be shared across threads using
//! `Arc`. The storage engine serializes writes internally.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, info, instrument, warn};

use crate::bond::{validate_new_bond, Bond, BondStatus, NewBond};
use crate::config::Config;
use crate::entity::{validate_entity, Entity, EntityStatus, EntitySummary, JsonMap};
use crate::error::{ChoraError, NotFoundError, Result};
use crate::fts::tokenize;
use crate::physics::{self, clamp_confidence, drop_urgency, Urgency, Verb};
use crate::query::EntityFilter;
use crate::storage::{
    open_storage, DatabaseMetadata, EmbeddingRecord, PulseSummary, SignalOutcome, StorageEngine,
};
use crate::types::{BondId, EntityId, EntityType, Timestamp};

/// A committed change announced to save hooks.
#[derive(Clone, Debug)]
pub struct ChangeEvent {
    /// The saved entity's id.
    pub entity_id: EntityId,
    /// The saved entity's type.
    pub entity_type: EntityType,
    /// The committed payload.
    pub data: JsonMap,
    /// Commit time.
    pub ts: Timestamp,
}

/// A registered save hook.
pub type SaveHook = Arc<dyn Fn(&ChangeEvent) -> Result<()> + Send + Sync>;

/// Handle returned by [`GraphStore::register_hook`]; pass to
/// [`GraphStore::remove_hook`] to detach.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct HookId(u64);

/// Direction of a bond relative to the constellation's focal entity.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BondDirection {
    /// The focal entity is the bond's source.
    Outgoing,
    /// The focal entity is the bond's target.
    Incoming,
}

/// One edge in a constellation, with its counterpart summarized.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ConstellationBond {
    /// The bond's id.
    pub bond_id: BondId,
    /// The bond's verb.
    pub verb: Verb,
    /// Whether the focal entity is source or target.
    pub direction: BondDirection,
    /// Bond confidence.
    pub confidence: f32,
    /// Bond status.
    pub status: BondStatus,
    /// The entity on the other end.
    pub counterpart: EntitySummary,
}

/// The 1-hop bond neighborhood around a focal entity, grouped by verb.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Constellation {
    /// The focal entity.
    pub focus: EntitySummary,
    /// Bonds grouped by verb name.
    pub groups: BTreeMap<String, Vec<ConstellationBond>>,
}

/// A full-text search hit.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FtsHit {
    /// The matching entity.
    pub entity: EntitySummary,
    /// Fraction of query terms matched, in (0, 1].
    pub score: f32,
}

/// The result of a [`manage_bond`](GraphStore::manage_bond) call.
#[derive(Clone, Debug)]
pub struct BondOutcome {
    /// The bond after the write.
    pub bond: Bond,
    /// True when a new row was created (false on upsert).
    pub created: bool,
    /// Id of the epistemic signal emitted by this write, if any.
    pub signal_id: Option<EntityId>,
}

/// The main graph store handle.
///
/// Create an instance with [`GraphStore::open()`] and close it with
/// [`GraphStore::close()`].
pub struct GraphStore {
    /// Storage engine (redb or mock for testing).
    storage: Box<dyn StorageEngine>,

    /// Configuration used to open this store.
    config: Config,

    /// Save-hook bus, in registration order.
    hooks: RwLock<Vec<(HookId, SaveHook)>>,

    /// Next hook id.
    next_hook: AtomicU64,
}

impl std::fmt::Debug for GraphStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let hook_count = self.hooks.read().map(|h| h.len()).unwrap_or(0);
        f.debug_struct("GraphStore")
            .field("config", &self.config)
            .field("hooks", &hook_count)
            .finish_non_exhaustive()
    }
}

impl GraphStore {
    /// Opens or creates a graph store at the specified path.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - Configuration is invalid (see [`Config::validate`])
    /// - Database file is corrupted
    /// - Database is locked by another process
    /// - Schema version or embedding dimension doesn't match
    #[instrument(skip(config), fields(path = %path.as_ref().display()))]
    pub fn open(path: impl AsRef<Path>, config: Config) -> Result<Self> {
        config.validate().map_err(ChoraError::from)?;

        info!("Opening graph store");
        let storage = open_storage(&path, &config)?;

        Ok(Self {
            storage,
            config,
            hooks: RwLock::new(Vec::new()),
            next_hook: AtomicU64::new(1),
        })
    }

    /// Closes the store, flushing all pending writes.
    ///
    /// Consumes the handle; registered hooks are dropped with it.
    #[instrument(skip(self))]
    pub fn close(self) -> Result<()> {
        info!("Closing graph store");
        self.storage.close()
    }

    /// Returns a reference to the store configuration.
    #[inline]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Returns the database metadata.
    #[inline]
    pub fn metadata(&self) -> &DatabaseMetadata {
        self.storage.metadata()
    }

    // =========================================================================
    // Save-Hook Bus
    // =========================================================================

    /// Registers a save hook.
    ///
    /// Hooks run strictly after each successful entity commit, in
    /// registration order, observing committed state. A failing hook is
    /// logged and does not undo the commit or stop later hooks.
    pub fn register_hook(&self, hook: SaveHook) -> HookId {
        let id = HookId(self.next_hook.fetch_add(1, Ordering::Relaxed));
        self.hooks
            .write()
            .expect("hook registry lock poisoned")
            .push((id, hook));
        id
    }

    /// Removes a previously registered hook. Returns true if it existed.
    pub fn remove_hook(&self, id: HookId) -> bool {
        let mut hooks = self.hooks.write().expect("hook registry lock poisoned");
        let before = hooks.len();
        hooks.retain(|(h, _)| *h != id);
        hooks.len() < before
    }

    fn fire_hooks(&self, event: &ChangeEvent) {
        let hooks: Vec<(HookId, SaveHook)> = self
            .hooks
            .read()
            .expect("hook registry lock poisoned")
            .clone();
        for (id, hook) in hooks {
            if let Err(e) = hook(event) {
                warn!(hook = id.0, entity = %event.entity_id, error = %e, "Save hook failed");
            }
        }
    }

    // =========================================================================
    // Entity Operations
    // =========================================================================

    /// Creates a new entity; fails if the id already exists.
    ///
    /// The caller's timestamps are trusted (subject to the
    /// `updated_at >= created_at` invariant), so backdated records can be
    /// seeded.
    #[instrument(skip(self, entity), fields(id = %entity.id))]
    pub fn create_entity(&self, entity: Entity) -> Result<EntityId> {
        if self.storage.entity_exists(entity.id.as_str())? {
            return Err(ChoraError::DuplicateId(entity.id.to_string()));
        }
        self.commit_entity(entity, true)
    }

    /// Upserts an entity.
    ///
    /// On update, `created_at` is preserved from the stored row and
    /// `updated_at` is bumped to now; a change to `data` invalidates the
    /// entity's embedding row in the same commit.
    #[instrument(skip(self, entity), fields(id = %entity.id))]
    pub fn save_entity(&self, mut entity: Entity) -> Result<EntityId> {
        match self.storage.get_entity(entity.id.as_str())? {
            Some(old) => {
                entity.created_at = old.created_at;
                let now = Timestamp::now();
                entity.updated_at = if now > entity.created_at {
                    now
                } else {
                    entity.created_at
                };
                let data_changed = old.data != entity.data;
                self.commit_entity_inner(entity, data_changed)
            }
            None => self.commit_entity(entity, true),
        }
    }

    /// Upserts from raw parts, checking that the id prefix names `entity_type`.
    pub fn save_generic(
        &self,
        id: &str,
        entity_type: EntityType,
        data: JsonMap,
    ) -> Result<EntityId> {
        let id = EntityId::parse(id).map_err(ChoraError::from)?;
        if id.entity_type() != entity_type {
            return Err(crate::error::ValidationError::invalid_id(
                id.as_str(),
                format!("prefix does not name type '{}'", entity_type),
            )
            .into());
        }
        self.save_entity(Entity::new(id, data))
    }

    fn commit_entity(&self, entity: Entity, drop_embedding: bool) -> Result<EntityId> {
        self.commit_entity_inner(entity, drop_embedding)
    }

    fn commit_entity_inner(&self, entity: Entity, drop_embedding: bool) -> Result<EntityId> {
        validate_entity(&entity)?;

        let terms = tokenize(&entity.document_text());
        self.storage.save_entity(&entity, drop_embedding, &terms)?;

        let event = ChangeEvent {
            entity_id: entity.id.clone(),
            entity_type: entity.entity_type,
            data: entity.data,
            ts: Timestamp::now(),
        };
        self.fire_hooks(&event);
        Ok(event.entity_id)
    }

    /// Retrieves an entity by id.
    ///
    /// # Errors
    ///
    /// Returns [`NotFoundError::Entity`] if no live entity has this id.
    pub fn get_entity(&self, id: &str) -> Result<Entity> {
        self.storage
            .get_entity(id)?
            .ok_or_else(|| NotFoundError::entity(id).into())
    }

    /// Retrieves an entity by id, or `None` if absent.
    pub fn try_get_entity(&self, id: &str) -> Result<Option<Entity>> {
        self.storage.get_entity(id)
    }

    /// Shallow-merges a patch into an entity's data and saves.
    ///
    /// The merge is per top-level key; the embedding row is invalidated in
    /// the same commit.
    #[instrument(skip(self, patch))]
    pub fn update_entity_data(&self, id: &str, patch: JsonMap) -> Result<Entity> {
        let mut entity = self.get_entity(id)?;
        for (k, v) in patch {
            entity.data.insert(k, v);
        }
        self.save_entity(entity.clone())?;
        self.get_entity(id)
    }

    /// Sets an entity's lifecycle status.
    pub fn set_status(&self, id: &str, status: EntityStatus) -> Result<()> {
        let mut entity = self.get_entity(id)?;
        entity.status = status;
        self.save_entity(entity)?;
        Ok(())
    }

    /// Lists entities matching the filter.
    pub fn query_entities(&self, filter: &EntityFilter) -> Result<Vec<Entity>> {
        let mut entities = self.storage.list_entities(filter.entity_type)?;
        entities.retain(|e| filter.matches(e));
        entities.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(entities)
    }

    /// Archives an entity, moving its full payload to the archive relation.
    ///
    /// Refuses with [`ChoraError::ArchiveHasBonds`] when live bonds still
    /// touch the entity, unless `force` is set — in which case the dangling
    /// bonds are dissolved into the archive first.
    #[instrument(skip(self))]
    pub fn archive_entity(&self, id: &str, force: bool) -> Result<()> {
        let entity = self.get_entity(id)?;

        let mut bond_ids = self.storage.bond_ids_from(id)?;
        bond_ids.extend(self.storage.bond_ids_to(id)?);
        bond_ids.sort();
        bond_ids.dedup();

        if !bond_ids.is_empty() && !force {
            return Err(ChoraError::ArchiveHasBonds {
                id: id.to_string(),
                bonds: bond_ids.len(),
            });
        }

        for bond_id in bond_ids {
            if let Some(bond) = self.storage.get_bond(bond_id)? {
                // The entity being archived is leaving the live table
                // anyway; only its counterparts lapse.
                self.dissolve_into_archive(bond, Some(&entity.id))?;
            }
        }

        self.storage.archive_entity(&entity)?;
        info!(id, "Entity archived");
        Ok(())
    }

    /// Reads an archived entity's record, if present.
    pub fn get_archived_entity(&self, id: &str) -> Result<Option<crate::storage::ArchiveRecord>> {
        self.storage
            .get_archived(&crate::storage::schema::archive_entity_key(id))
    }

    /// Reads a dissolved bond's record, if present.
    pub fn get_archived_bond(&self, id: BondId) -> Result<Option<crate::storage::ArchiveRecord>> {
        self.storage
            .get_archived(&crate::storage::schema::archive_bond_key(&id))
    }

    // =========================================================================
    // Bond Operations
    // =========================================================================

    /// Creates or updates a bond, enforcing physics and confidence
    /// semantics.
    ///
    /// - The `(verb, from.type, to.type)` triple must be in the physics
    ///   table; both endpoints must exist.
    /// - Confidence is clamped into [0, 1]; default 1.0.
    /// - Creating below full confidence emits a tentative-bond signal at
    ///   normal urgency.
    /// - Lowering confidence emits a confidence-dropped signal; urgency is
    ///   high when the drop is >= 0.5. Raising confidence emits nothing.
    #[instrument(skip(self, new_bond), fields(verb = %new_bond.verb, from = %new_bond.from_id, to = %new_bond.to_id))]
    pub fn manage_bond(&self, new_bond: NewBond) -> Result<BondOutcome> {
        validate_new_bond(&new_bond)?;

        let from = self.get_entity(new_bond.from_id.as_str())?;
        let to = self.get_entity(new_bond.to_id.as_str())?;

        if !physics::allows(new_bond.verb, from.entity_type, to.entity_type) {
            return Err(ChoraError::physics(
                new_bond.verb.as_str(),
                from.entity_type.as_str(),
                to.entity_type.as_str(),
            ));
        }

        let confidence = clamp_confidence(new_bond.confidence.unwrap_or(1.0));
        let now = Timestamp::now();

        let existing = self.storage.find_bond(
            new_bond.verb,
            new_bond.from_id.as_str(),
            new_bond.to_id.as_str(),
        )?;

        match existing {
            Some(mut bond) => {
                let old_confidence = bond.confidence;
                bond.confidence = confidence;
                bond.updated_at = now;
                if let Some(metadata) = new_bond.metadata {
                    for (k, v) in metadata {
                        bond.metadata.insert(k, v);
                    }
                }

                let signal_id = if confidence < old_confidence {
                    bond.status = BondStatus::Stressed;
                    let delta = old_confidence - confidence;
                    Some(self.emit_confidence_drop_signal(&bond, old_confidence, delta)?)
                } else {
                    if confidence >= 1.0 && bond.status == BondStatus::Forming {
                        bond.status = BondStatus::Active;
                    }
                    None
                };

                self.storage.save_bond(&bond)?;
                debug!(id = %bond.id, %confidence, "Bond updated");
                Ok(BondOutcome {
                    bond,
                    created: false,
                    signal_id,
                })
            }
            None => {
                let bond = Bond {
                    id: BondId::new(),
                    verb: new_bond.verb,
                    from_id: new_bond.from_id,
                    to_id: new_bond.to_id,
                    confidence,
                    status: if confidence < 1.0 {
                        BondStatus::Forming
                    } else {
                        BondStatus::Active
                    },
                    metadata: new_bond.metadata.unwrap_or_default(),
                    created_at: now,
                    updated_at: now,
                };
                self.storage.save_bond(&bond)?;

                let signal_id = if confidence < 1.0 {
                    Some(self.emit_tentative_bond_signal(&bond)?)
                } else {
                    None
                };

                debug!(id = %bond.id, %confidence, "Bond created");
                Ok(BondOutcome {
                    bond,
                    created: true,
                    signal_id,
                })
            }
        }
    }

    /// Retrieves a bond by id.
    pub fn get_bond(&self, id: BondId) -> Result<Bond> {
        self.storage
            .get_bond(id)?
            .ok_or_else(|| NotFoundError::bond(id).into())
    }

    /// All live bonds where the given entity is the source.
    pub fn bonds_from(&self, entity_id: &str) -> Result<Vec<Bond>> {
        let mut bonds = Vec::new();
        for id in self.storage.bond_ids_from(entity_id)? {
            if let Some(bond) = self.storage.get_bond(id)? {
                bonds.push(bond);
            }
        }
        Ok(bonds)
    }

    /// All live bonds where the given entity is the target.
    pub fn bonds_to(&self, entity_id: &str) -> Result<Vec<Bond>> {
        let mut bonds = Vec::new();
        for id in self.storage.bond_ids_to(entity_id)? {
            if let Some(bond) = self.storage.get_bond(id)? {
                bonds.push(bond);
            }
        }
        Ok(bonds)
    }

    /// Dissolves a bond: the row moves to the archive with status
    /// `dissolved`.
    ///
    /// When an endpoint is a `relationship` entity, that entity is marked
    /// deprecated — relationship entities reify their bonds and lapse with
    /// them.
    #[instrument(skip(self))]
    pub fn dissolve_bond(&self, id: BondId) -> Result<()> {
        let bond = self.get_bond(id)?;
        self.dissolve_into_archive(bond, None)?;
        info!(id = %id, "Bond dissolved");
        Ok(())
    }

    /// Moves a bond to the archive with status `dissolved` and applies the
    /// dissolution side effect to its endpoints. Every dissolution path
    /// (explicit or forced archive) comes through here so the side effect
    /// is uniform; `except` skips an endpoint that is itself being
    /// archived.
    fn dissolve_into_archive(&self, mut bond: Bond, except: Option<&EntityId>) -> Result<()> {
        bond.status = BondStatus::Dissolved;
        bond.updated_at = Timestamp::now();
        self.storage.archive_bond(&bond)?;

        for endpoint in [&bond.from_id, &bond.to_id] {
            if except == Some(endpoint) {
                continue;
            }
            if endpoint.entity_type() == EntityType::Relationship {
                if let Some(mut entity) = self.try_get_entity(endpoint.as_str())? {
                    if entity.status == EntityStatus::Active {
                        entity.status = EntityStatus::Deprecated;
                        self.save_entity(entity)?;
                    }
                }
            }
        }
        Ok(())
    }

    /// Returns the 1-hop bond neighborhood around an entity, grouped by
    /// verb, with counterpart summaries.
    pub fn get_constellation(&self, id: &str) -> Result<Constellation> {
        let focus = self.get_entity(id)?;
        let mut groups: BTreeMap<String, Vec<ConstellationBond>> = BTreeMap::new();

        let mut push = |bond: Bond, direction: BondDirection, counterpart_id: &EntityId| -> Result<()> {
            let counterpart = match self.try_get_entity(counterpart_id.as_str())? {
                Some(e) => EntitySummary::from(&e),
                None => return Ok(()),
            };
            groups
                .entry(bond.verb.as_str().to_string())
                .or_default()
                .push(ConstellationBond {
                    bond_id: bond.id,
                    verb: bond.verb,
                    direction,
                    confidence: bond.confidence,
                    status: bond.status,
                    counterpart,
                });
            Ok(())
        };

        for bond in self.bonds_from(id)? {
            let counterpart = bond.to_id.clone();
            push(bond, BondDirection::Outgoing, &counterpart)?;
        }
        for bond in self.bonds_to(id)? {
            let counterpart = bond.from_id.clone();
            push(bond, BondDirection::Incoming, &counterpart)?;
        }

        Ok(Constellation {
            focus: EntitySummary::from(&focus),
            groups,
        })
    }

    // =========================================================================
    // Signals
    // =========================================================================

    /// Creates a signal entity.
    ///
    /// The id is generated; `source_id` links the signal to what raised it.
    pub fn emit_signal(
        &self,
        title: &str,
        category: &str,
        urgency: Urgency,
        source_id: Option<&str>,
        extra: JsonMap,
    ) -> Result<EntityId> {
        let id = EntityId::generate(EntityType::Signal);
        let mut data = extra;
        data.insert("title".into(), json!(title));
        data.insert("category".into(), json!(category));
        data.insert("urgency".into(), json!(urgency.as_str()));
        if let Some(source) = source_id {
            data.insert("source_id".into(), json!(source));
        }
        self.create_entity(Entity::new(id.clone(), data))?;
        debug!(id = %id, category, "Signal emitted");
        Ok(id)
    }

    fn emit_tentative_bond_signal(&self, bond: &Bond) -> Result<EntityId> {
        let title = format!(
            "Tentative bond created: {} {} -> {} (confidence {:.2})",
            bond.verb, bond.from_id, bond.to_id, bond.confidence
        );
        // Create-time urgency is always normal: urgency tracks change,
        // not absolute confidence.
        self.emit_signal(
            &title,
            "epistemic",
            Urgency::Normal,
            Some(&bond.id.to_string()),
            JsonMap::new(),
        )
    }

    fn emit_confidence_drop_signal(
        &self,
        bond: &Bond,
        old_confidence: f32,
        delta: f32,
    ) -> Result<EntityId> {
        let title = format!(
            "Bond confidence dropped: {} {} -> {} ({:.2} -> {:.2})",
            bond.verb, bond.from_id, bond.to_id, old_confidence, bond.confidence
        );
        self.emit_signal(
            &title,
            "epistemic",
            drop_urgency(delta),
            Some(&bond.id.to_string()),
            JsonMap::new(),
        )
    }

    /// Marks a signal resolved, recording outcome data.
    ///
    /// # Errors
    ///
    /// Returns [`ChoraError::AlreadyResolved`] when the signal is not
    /// active.
    pub fn resolve_signal(&self, id: &str, outcome_data: Value) -> Result<()> {
        self.finish_signal(id, EntityStatus::Resolved, outcome_data)
    }

    /// Marks a signal failed, recording outcome data.
    pub fn fail_signal(&self, id: &str, outcome_data: Value) -> Result<()> {
        self.finish_signal(id, EntityStatus::Failed, outcome_data)
    }

    fn finish_signal(&self, id: &str, status: EntityStatus, outcome_data: Value) -> Result<()> {
        let mut entity = self.get_entity(id)?;
        if entity.entity_type != EntityType::Signal {
            return Err(crate::error::ValidationError::invalid_field(
                "id",
                format!("'{}' is not a signal", id),
            )
            .into());
        }
        if entity.status != EntityStatus::Active {
            return Err(ChoraError::AlreadyResolved(id.to_string()));
        }
        entity.status = status;
        entity.data.insert("outcome_data".into(), outcome_data);
        self.save_entity(entity)?;
        Ok(())
    }

    // =========================================================================
    // Full-Text Search
    // =========================================================================

    /// Searches the full-text index.
    ///
    /// Scores are the fraction of query terms matched; ties break on id
    /// for determinism.
    pub fn fts_search(
        &self,
        query: &str,
        entity_type: Option<EntityType>,
        limit: usize,
    ) -> Result<Vec<FtsHit>> {
        let terms = tokenize(query);
        if terms.is_empty() {
            return Ok(Vec::new());
        }

        let mut hits: BTreeMap<String, usize> = BTreeMap::new();
        for term in &terms {
            for id in self.storage.fts_candidates(term)? {
                *hits.entry(id).or_default() += 1;
            }
        }

        let mut results = Vec::new();
        for (id, count) in hits {
            let entity = match self.try_get_entity(&id)? {
                Some(e) => e,
                None => continue,
            };
            if let Some(t) = entity_type {
                if entity.entity_type != t {
                    continue;
                }
            }
            results.push(FtsHit {
                entity: EntitySummary::from(&entity),
                score: count as f32 / terms.len() as f32,
            });
        }

        results.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.entity.id.cmp(&b.entity.id))
        });
        results.truncate(limit);
        Ok(results)
    }

    /// Rebuilds the full-text postings for one entity.
    pub fn fts_index_entity(&self, id: &str) -> Result<()> {
        let entity = self.get_entity(id)?;
        let terms = tokenize(&entity.document_text());
        // Re-saving refreshes the postings; data is unchanged so the
        // embedding row survives.
        self.storage.save_entity(&entity, false, &terms)?;
        Ok(())
    }

    // =========================================================================
    // Embeddings
    // =========================================================================

    /// Persists an embedding vector for an entity.
    ///
    /// # Errors
    ///
    /// Fails when the entity is absent or the dimension doesn't match the
    /// store configuration.
    pub fn save_embedding(&self, entity_id: &str, vector: Vec<f32>) -> Result<()> {
        if !self.storage.entity_exists(entity_id)? {
            return Err(NotFoundError::entity(entity_id).into());
        }
        if vector.len() != self.config.embedding_dimension {
            return Err(crate::error::ValidationError::dimension_mismatch(
                self.config.embedding_dimension,
                vector.len(),
            )
            .into());
        }

        let now = Timestamp::now();
        let created_at = self
            .storage
            .get_embedding(entity_id)?
            .map(|r| r.created_at)
            .unwrap_or(now);

        self.storage.save_embedding(&EmbeddingRecord {
            entity_id: entity_id.to_string(),
            model_name: self.config.embedding_model.clone(),
            dimension: vector.len() as u32,
            vector,
            created_at,
            updated_at: now,
        })
    }

    /// Reads an entity's embedding row, if present.
    pub fn get_embedding(&self, entity_id: &str) -> Result<Option<EmbeddingRecord>> {
        self.storage.get_embedding(entity_id)
    }

    /// Lists entity ids that currently have an embedding row.
    pub fn list_embedded_ids(&self) -> Result<Vec<String>> {
        self.storage.list_embedded_ids()
    }

    // =========================================================================
    // Outcome & Pulse History
    // =========================================================================

    /// Appends a signal outcome record.
    pub fn record_outcome(&self, outcome: &SignalOutcome) -> Result<()> {
        self.storage.record_outcome(outcome)
    }

    /// All outcome records for a signal, chronological.
    pub fn outcomes_for_signal(&self, signal_id: &str) -> Result<Vec<SignalOutcome>> {
        self.storage.outcomes_for_signal(signal_id)
    }

    /// Appends a pulse summary, trimming the ring.
    pub fn append_pulse_summary(&self, summary: &PulseSummary, retain: usize) -> Result<()> {
        self.storage.append_pulse_summary(summary, retain)
    }

    /// The most recent pulse summaries, newest first.
    pub fn recent_pulse_summaries(&self, limit: usize) -> Result<Vec<PulseSummary>> {
        self.storage.recent_pulse_summaries(limit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn open_store() -> (GraphStore, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let store = GraphStore::open(dir.path().join("test.db"), Config::default()).unwrap();
        (store, dir)
    }

    fn seed(store: &GraphStore, id: &str) -> EntityId {
        let mut data = JsonMap::new();
        data.insert("title".into(), json!(format!("Title of {}", id)));
        store
            .create_entity(Entity::new(EntityId::parse(id).unwrap(), data))
            .unwrap()
    }

    #[test]
    fn test_create_entity_rejects_duplicate() {
        let (store, _dir) = open_store();
        seed(&store, "learning-a");
        let mut data = JsonMap::new();
        data.insert("title".into(), json!("Again"));
        let err = store
            .create_entity(Entity::new(EntityId::parse("learning-a").unwrap(), data))
            .unwrap_err();
        assert!(matches!(err, ChoraError::DuplicateId(_)));
    }

    #[test]
    fn test_update_entity_data_merges_and_bumps() {
        let (store, _dir) = open_store();
        seed(&store, "learning-a");

        let mut patch = JsonMap::new();
        patch.insert("content".into(), json!("merged in"));
        let updated = store.update_entity_data("learning-a", patch).unwrap();

        assert_eq!(updated.data_str("content"), Some("merged in"));
        assert!(updated.data_str("title").is_some());
        assert!(updated.updated_at >= updated.created_at);
    }

    #[test]
    fn test_manage_bond_enforces_physics() {
        let (store, _dir) = open_store();
        seed(&store, "story-x");
        seed(&store, "tool-y");

        let err = store
            .manage_bond(NewBond::new(
                Verb::Verifies,
                EntityId::parse("story-x").unwrap(),
                EntityId::parse("tool-y").unwrap(),
            ))
            .unwrap_err();
        assert!(err.is_physics());
        assert_eq!(err.kind(), crate::error::ErrorKind::PhysicsViolation);
    }

    #[test]
    fn test_manage_bond_missing_endpoint() {
        let (store, _dir) = open_store();
        seed(&store, "learning-a");
        let err = store
            .manage_bond(NewBond::new(
                Verb::Surfaces,
                EntityId::parse("learning-a").unwrap(),
                EntityId::parse("principle-missing").unwrap(),
            ))
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_manage_bond_upserts() {
        let (store, _dir) = open_store();
        seed(&store, "learning-a");
        seed(&store, "principle-b");

        let first = store
            .manage_bond(NewBond::new(
                Verb::Surfaces,
                EntityId::parse("learning-a").unwrap(),
                EntityId::parse("principle-b").unwrap(),
            ))
            .unwrap();
        assert!(first.created);
        assert_eq!(first.bond.status, BondStatus::Active);
        assert!(first.signal_id.is_none());

        let second = store
            .manage_bond(
                NewBond::new(
                    Verb::Surfaces,
                    EntityId::parse("learning-a").unwrap(),
                    EntityId::parse("principle-b").unwrap(),
                )
                .with_confidence(1.0),
            )
            .unwrap();
        assert!(!second.created);
        assert_eq!(second.bond.id, first.bond.id);
    }

    #[test]
    fn test_confidence_clamped_at_write() {
        let (store, _dir) = open_store();
        seed(&store, "learning-a");
        seed(&store, "principle-b");

        let outcome = store
            .manage_bond(
                NewBond::new(
                    Verb::Surfaces,
                    EntityId::parse("learning-a").unwrap(),
                    EntityId::parse("principle-b").unwrap(),
                )
                .with_confidence(3.5),
            )
            .unwrap();
        assert_eq!(outcome.bond.confidence, 1.0);
    }

    #[test]
    fn test_constellation_groups_by_verb() {
        let (store, _dir) = open_store();
        seed(&store, "learning-a");
        seed(&store, "principle-b");
        seed(&store, "inquiry-q");

        store
            .manage_bond(NewBond::new(
                Verb::Surfaces,
                EntityId::parse("learning-a").unwrap(),
                EntityId::parse("principle-b").unwrap(),
            ))
            .unwrap();
        store
            .manage_bond(NewBond::new(
                Verb::Yields,
                EntityId::parse("inquiry-q").unwrap(),
                EntityId::parse("learning-a").unwrap(),
            ))
            .unwrap();

        let constellation = store.get_constellation("learning-a").unwrap();
        assert_eq!(constellation.focus.id.as_str(), "learning-a");
        assert_eq!(constellation.groups.len(), 2);

        let surfaces = &constellation.groups["surfaces"];
        assert_eq!(surfaces.len(), 1);
        assert_eq!(surfaces[0].direction, BondDirection::Outgoing);
        assert_eq!(surfaces[0].counterpart.id.as_str(), "principle-b");

        let yields = &constellation.groups["yields"];
        assert_eq!(yields[0].direction, BondDirection::Incoming);
        assert_eq!(yields[0].counterpart.id.as_str(), "inquiry-q");
    }

    #[test]
    fn test_archive_refuses_with_bonds_then_forces() {
        let (store, _dir) = open_store();
        seed(&store, "learning-a");
        seed(&store, "principle-b");
        let outcome = store
            .manage_bond(NewBond::new(
                Verb::Surfaces,
                EntityId::parse("learning-a").unwrap(),
                EntityId::parse("principle-b").unwrap(),
            ))
            .unwrap();

        let err = store.archive_entity("learning-a", false).unwrap_err();
        assert!(matches!(err, ChoraError::ArchiveHasBonds { bonds: 1, .. }));

        store.archive_entity("learning-a", true).unwrap();
        assert!(store.try_get_entity("learning-a").unwrap().is_none());
        let archived_bond = store.get_archived_bond(outcome.bond.id).unwrap().unwrap();
        assert_eq!(archived_bond.payload["status"], "dissolved");
    }

    #[test]
    fn test_resolve_signal_then_already_resolved() {
        let (store, _dir) = open_store();
        let id = store
            .emit_signal("Attend", "test", Urgency::Normal, None, JsonMap::new())
            .unwrap();

        store
            .resolve_signal(id.as_str(), json!({"done": true}))
            .unwrap();
        let signal = store.get_entity(id.as_str()).unwrap();
        assert_eq!(signal.status, EntityStatus::Resolved);
        assert_eq!(signal.data["outcome_data"]["done"], json!(true));

        let err = store
            .resolve_signal(id.as_str(), json!({}))
            .unwrap_err();
        assert!(matches!(err, ChoraError::AlreadyResolved(_)));
    }

    #[test]
    fn test_fts_search_ranks_by_match_fraction() {
        let (store, _dir) = open_store();
        let mut data = JsonMap::new();
        data.insert("title".into(), json!("validate user input"));
        store
            .create_entity(Entity::new(EntityId::parse("learning-both").unwrap(), data))
            .unwrap();
        let mut data = JsonMap::new();
        data.insert("title".into(), json!("validate schemas"));
        store
            .create_entity(Entity::new(EntityId::parse("learning-one").unwrap(), data))
            .unwrap();

        let hits = store.fts_search("validate input", None, 10).unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].entity.id.as_str(), "learning-both");
        assert!(hits[0].score > hits[1].score);
    }

    #[test]
    fn test_hooks_fire_in_order_and_isolate_failures() {
        let (store, _dir) = open_store();
        let order = Arc::new(std::sync::Mutex::new(Vec::<&'static str>::new()));

        let o = order.clone();
        store.register_hook(Arc::new(move |_| {
            o.lock().unwrap().push("first");
            Err(ChoraError::execution("hook failure"))
        }));
        let o = order.clone();
        store.register_hook(Arc::new(move |_| {
            o.lock().unwrap().push("second");
            Ok(())
        }));

        seed(&store, "learning-hooked");
        assert_eq!(*order.lock().unwrap(), vec!["first", "second"]);
        // The failing hook did not undo the commit
        assert!(store.try_get_entity("learning-hooked").unwrap().is_some());
    }

    #[test]
    fn test_remove_hook_detaches() {
        let (store, _dir) = open_store();
        let count = Arc::new(AtomicU64::new(0));

        let c = count.clone();
        let id = store.register_hook(Arc::new(move |_| {
            c.fetch_add(1, Ordering::Relaxed);
            Ok(())
        }));

        seed(&store, "learning-one");
        assert!(store.remove_hook(id));
        seed(&store, "learning-two");
        assert_eq!(count.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_save_generic_checks_prefix() {
        let (store, _dir) = open_store();
        let err = store
            .save_generic("learning-x", EntityType::Tool, JsonMap::new())
            .unwrap_err();
        assert!(err.is_validation());

        store
            .save_generic("learning-x", EntityType::Learning, JsonMap::new())
            .unwrap();
        assert!(store.try_get_entity("learning-x").unwrap().is_some());
    }

    #[test]
    fn test_graph_store_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<GraphStore>();
    }
}
