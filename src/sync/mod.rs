//! The sync router: deciding, per entity, which circles receive change
//! events.
//!
//! A save hook registered with the store inspects the saved entity's
//! `inhabits` bonds and consults the keyring. Changes to entities that
//! inhabit at least one cloud circle are enqueued as pending changes on a
//! bounded channel; everything else stays local. Local-only is the safe
//! default: absent bindings and unknown circles never sync.
//!
//! The queue preserves per-entity order — every save produces an entry;
//! latest-write-wins collapsing is explicitly rejected.

pub mod invitation;
pub mod keyring;

pub use invitation::{
    accept_invitation, create_invitation, generate_keypair, invitation_path, Invitation,
};
pub use keyring::{CircleBinding, Identity, Keyring, SyncPolicy};

use std::sync::{Arc, Mutex, RwLock};

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::physics::Verb;
use crate::store::{ChangeEvent, GraphStore, HookId};
use crate::types::Timestamp;

/// One enqueued change event bound for cloud circles.
#[derive(Clone, Debug, Serialize)]
pub struct PendingChange {
    /// The changed entity.
    pub entity_id: String,
    /// The cloud circles that should receive it.
    pub circle_ids: Vec<String>,
    /// The committed payload.
    pub payload: Value,
    /// When the change was observed.
    pub ts: Timestamp,
}

/// Callback fired for every enqueued change.
pub type ChangeCallback = Box<dyn Fn(&PendingChange) + Send + Sync>;

/// The sync router: a save hook plus a pending-change queue.
///
/// Detach with [`close`](SyncRouter::close); dropping without closing
/// leaves the hook registered for the store's lifetime.
pub struct SyncRouter {
    store: Arc<GraphStore>,
    keyring: Arc<RwLock<Keyring>>,
    callback: Arc<Mutex<Option<ChangeCallback>>>,
    hook: Option<HookId>,
    rx: Receiver<PendingChange>,
}

impl std::fmt::Debug for SyncRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncRouter")
            .field("attached", &self.hook.is_some())
            .field("pending", &self.rx.len())
            .finish()
    }
}

impl SyncRouter {
    /// Attaches a router to a store with the given keyring.
    ///
    /// The queue capacity comes from the store configuration; when the
    /// queue is full further changes are dropped with a warning rather
    /// than blocking the writer.
    pub fn attach(store: Arc<GraphStore>, keyring: Keyring) -> Self {
        let capacity = store.config().sync_queue_capacity;
        let (tx, rx) = bounded(capacity);
        let keyring = Arc::new(RwLock::new(keyring));
        let callback: Arc<Mutex<Option<ChangeCallback>>> = Arc::new(Mutex::new(None));

        let hook_store = Arc::clone(&store);
        let hook_keyring = Arc::clone(&keyring);
        let hook_callback = Arc::clone(&callback);
        let hook = store.register_hook(Arc::new(move |event| {
            route_change(&hook_store, &hook_keyring, &tx, &hook_callback, event)
        }));

        info!(capacity, "Sync router attached");
        Self {
            store,
            keyring,
            callback,
            hook: Some(hook),
            rx,
        }
    }

    /// True iff at least one circle the entity inhabits is bound with the
    /// cloud policy.
    pub fn should_emit(&self, entity_id: &str) -> Result<bool> {
        Ok(!self.target_circles(entity_id)?.is_empty())
    }

    /// The cloud circles that should receive this entity's changes,
    /// sorted and deduplicated.
    pub fn target_circles(&self, entity_id: &str) -> Result<Vec<String>> {
        let keyring = self.keyring.read().expect("keyring lock poisoned");
        target_circles(&self.store, &keyring, entity_id)
    }

    /// Registers a callback fired for every enqueued change.
    pub fn on_change(&self, callback: ChangeCallback) {
        *self.callback.lock().expect("callback lock poisoned") = Some(callback);
    }

    /// Returns and clears the pending queue.
    pub fn flush(&self) -> Vec<PendingChange> {
        let mut out = Vec::new();
        while let Ok(change) = self.rx.try_recv() {
            out.push(change);
        }
        out
    }

    /// Pending changes currently queued.
    pub fn pending_len(&self) -> usize {
        self.rx.len()
    }

    /// Replaces the keyring (e.g. after a binding change was saved).
    pub fn set_keyring(&self, keyring: Keyring) {
        *self.keyring.write().expect("keyring lock poisoned") = keyring;
    }

    /// Detaches the save hook. The queue can still be flushed afterward.
    pub fn close(mut self) {
        if let Some(hook) = self.hook.take() {
            self.store.remove_hook(hook);
            info!("Sync router detached");
        }
    }
}

/// Computes the cloud circles for an entity from its `inhabits` bonds and
/// the keyring.
fn target_circles(store: &GraphStore, keyring: &Keyring, entity_id: &str) -> Result<Vec<String>> {
    let mut circles: Vec<String> = store
        .bonds_from(entity_id)?
        .into_iter()
        .filter(|bond| bond.verb == Verb::Inhabits)
        .map(|bond| bond.to_id.to_string())
        .filter(|circle| keyring.policy_for(circle) == SyncPolicy::Cloud)
        .collect();
    circles.sort();
    circles.dedup();
    Ok(circles)
}

fn route_change(
    store: &GraphStore,
    keyring: &RwLock<Keyring>,
    tx: &Sender<PendingChange>,
    callback: &Mutex<Option<ChangeCallback>>,
    event: &ChangeEvent,
) -> Result<()> {
    let keyring = keyring.read().expect("keyring lock poisoned");
    let circle_ids = target_circles(store, &keyring, event.entity_id.as_str())?;
    if circle_ids.is_empty() {
        return Ok(());
    }

    let change = PendingChange {
        entity_id: event.entity_id.to_string(),
        circle_ids,
        payload: Value::Object(event.data.clone()),
        ts: event.ts,
    };

    if let Some(cb) = callback.lock().expect("callback lock poisoned").as_ref() {
        cb(&change);
    }

    match tx.try_send(change) {
        Ok(()) => {
            debug!(entity = %event.entity_id, "Change queued for sync");
            Ok(())
        }
        Err(TrySendError::Full(change)) => {
            warn!(entity = %change.entity_id, "Sync queue full; change dropped");
            Ok(())
        }
        Err(TrySendError::Disconnected(_)) => Ok(()),
    }
}
