//! The dispatch layer — the graph VM's single event horizon.
//!
//! A front end hands the engine an *intent* (the name of a protocol or
//! primitive) plus inputs; the engine normalizes the intent, routes it,
//! and returns one uniform [`DispatchResult`]. Primitives run inline;
//! protocols run on the VM. Recorded execution wraps a protocol run so
//! that exactly one signal outcome row is written — before the result
//! reaches the caller, and even when the worker panics.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use serde_json::{json, Value};
use tracing::{info, instrument, warn};

use crate::embedding::{create_vectorizer, Vectorizer};
use crate::entity::{Entity, JsonMap};
use crate::error::{ChoraError, ErrorKind, NotFoundError, Result};
use crate::primitives::{collect_capabilities, Capability, PrimitiveCtx, PrimitiveRegistry};
use crate::response::{Response, Sink, StdoutSink};
use crate::storage::{OutcomeError, OutcomeStatus, SignalOutcome};
use crate::store::GraphStore;
use crate::types::{EntityId, EntityType, Timestamp};
use crate::vm::{self, ProtocolGraph};

/// Per-dispatch options.
#[derive(Clone, Default)]
pub struct DispatchOptions {
    /// Output sink; stdout when absent.
    pub sink: Option<Arc<dyn Sink>>,
    /// Acting persona/user id.
    pub persona: Option<String>,
    /// Optional deadline for the whole dispatch.
    pub deadline: Option<Duration>,
}

/// The uniform result of one dispatch. Exactly one of the variants is
/// returned; failures always carry a closed-taxonomy kind.
#[derive(Clone, Debug)]
pub enum DispatchResult {
    /// The intent ran to fulfillment.
    Fulfilled {
        /// Extracted output (primitive data or RETURN template).
        data: Value,
        /// The RETURN node id, for protocol runs.
        exit_node: Option<String>,
    },
    /// The intent failed.
    Failed {
        /// Closed-taxonomy kind.
        kind: ErrorKind,
        /// Single-line failure summary.
        message: String,
    },
}

impl DispatchResult {
    /// Builds a failure result.
    pub fn failed(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self::Failed {
            kind,
            message: message.into(),
        }
    }

    /// True when fulfilled.
    pub fn ok(&self) -> bool {
        matches!(self, Self::Fulfilled { .. })
    }

    /// Output data, when fulfilled.
    pub fn data(&self) -> Option<&Value> {
        match self {
            Self::Fulfilled { data, .. } => Some(data),
            Self::Failed { .. } => None,
        }
    }

    /// The RETURN node id, when a protocol fulfilled.
    pub fn exit_node(&self) -> Option<&str> {
        match self {
            Self::Fulfilled { exit_node, .. } => exit_node.as_deref(),
            Self::Failed { .. } => None,
        }
    }

    /// The error kind, when failed.
    pub fn error_kind(&self) -> Option<ErrorKind> {
        match self {
            Self::Fulfilled { .. } => None,
            Self::Failed { kind, .. } => Some(*kind),
        }
    }

    /// The error message, when failed.
    pub fn error_message(&self) -> Option<&str> {
        match self {
            Self::Fulfilled { .. } => None,
            Self::Failed { message, .. } => Some(message),
        }
    }

    /// The wire shape: `{ok, data?, exit_node?}` or
    /// `{ok, error_kind, error_message}`.
    pub fn to_value(&self) -> Value {
        match self {
            Self::Fulfilled { data, exit_node } => json!({
                "ok": true,
                "data": data,
                "exit_node": exit_node,
            }),
            Self::Failed { kind, message } => json!({
                "ok": false,
                "error_kind": kind.as_str(),
                "error_message": message,
            }),
        }
    }

    fn from_error(e: &ChoraError) -> Self {
        Self::Failed {
            kind: e.kind(),
            message: e.to_string().replace('\n', " "),
        }
    }

    fn from_response(response: Response) -> Self {
        match response {
            Response::Success { data } => Self::Fulfilled {
                data,
                exit_node: None,
            },
            Response::Error { kind, message } => Self::Failed { kind, message },
        }
    }
}

enum Resolved {
    Protocol(Entity),
    Primitive(String),
}

/// The dispatch engine.
///
/// Owns the primitive registry (read-only after init) and the vectorizer;
/// shares the graph store. `Engine` is `Send + Sync`; wrap it in `Arc` to
/// share with the pulse and with worker threads.
pub struct Engine {
    store: Arc<GraphStore>,
    registry: Arc<PrimitiveRegistry>,
    vectorizer: Arc<dyn Vectorizer>,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}

impl Engine {
    /// Creates an engine over a store, with the standard primitive
    /// registry and the configured vectorizer.
    pub fn new(store: Arc<GraphStore>) -> Self {
        let vectorizer: Arc<dyn Vectorizer> = Arc::from(create_vectorizer(store.config()));
        Self {
            store,
            registry: Arc::new(PrimitiveRegistry::standard()),
            vectorizer,
        }
    }

    /// The shared store handle.
    pub fn store(&self) -> &Arc<GraphStore> {
        &self.store
    }

    /// The primitive registry.
    pub fn registry(&self) -> &PrimitiveRegistry {
        &self.registry
    }

    /// Lists every dispatchable capability: protocols from the entities
    /// table, primitives from the registry.
    pub fn capabilities(&self) -> Result<Vec<Capability>> {
        collect_capabilities(&self.store, &self.registry)
    }

    /// Dispatches an intent.
    ///
    /// Intent normalization, in order: the verbatim name (protocol id,
    /// then primitive id or alias), the `protocol-`/`primitive-` prefixed
    /// forms, and finally the same ladder with `_`/`-` swapped. Protocols
    /// win ties at every rung.
    #[instrument(skip(self, inputs, opts))]
    pub fn dispatch(&self, intent: &str, inputs: JsonMap, opts: DispatchOptions) -> DispatchResult {
        let resolved = match self.resolve_intent(intent) {
            Ok(resolved) => resolved,
            Err(e) => return DispatchResult::from_error(&e),
        };

        let sink = opts.sink.clone().unwrap_or_else(|| Arc::new(StdoutSink));
        let deadline = opts.deadline.map(|d| Instant::now() + d);
        let ctx = PrimitiveCtx {
            store: &self.store,
            registry: &self.registry,
            vectorizer: self.vectorizer.as_ref(),
            sink,
            persona: opts.persona.clone(),
            deadline,
        };

        match resolved {
            Resolved::Primitive(name) => {
                DispatchResult::from_response(self.registry.invoke(&name, &ctx, &inputs))
            }
            Resolved::Protocol(entity) => self.run_protocol(&entity, &inputs, &ctx),
        }
    }

    fn resolve_intent(&self, intent: &str) -> Result<Resolved> {
        let mut variants = vec![intent.to_string()];
        for swapped in [intent.replace('_', "-"), intent.replace('-', "_")] {
            if !variants.contains(&swapped) {
                variants.push(swapped);
            }
        }

        for variant in &variants {
            // Verbatim: protocol beats primitive
            if let Some(entity) = self.protocol_entity(variant)? {
                return Ok(Resolved::Protocol(entity));
            }
            if self.registry.contains(variant) {
                return Ok(Resolved::Primitive(variant.clone()));
            }

            // Prefixed forms
            let prefixed = format!("protocol-{}", variant);
            if let Some(entity) = self.protocol_entity(&prefixed)? {
                return Ok(Resolved::Protocol(entity));
            }
            let prefixed = format!("primitive-{}", variant);
            if self.registry.contains(&prefixed) {
                return Ok(Resolved::Primitive(prefixed));
            }
        }

        Err(NotFoundError::intent(intent).into())
    }

    fn protocol_entity(&self, id: &str) -> Result<Option<Entity>> {
        match self.store.try_get_entity(id)? {
            Some(entity) if entity.entity_type == EntityType::Protocol => Ok(Some(entity)),
            _ => Ok(None),
        }
    }

    fn run_protocol(
        &self,
        entity: &Entity,
        inputs: &JsonMap,
        ctx: &PrimitiveCtx<'_>,
    ) -> DispatchResult {
        let graph = match ProtocolGraph::from_entity_data(&entity.data) {
            Ok(graph) => graph,
            Err(e) => return DispatchResult::from_error(&e),
        };

        // inputs_schema.required gates entry
        if let Some(required) = entity
            .data
            .get("inputs_schema")
            .and_then(|s| s.get("required"))
            .and_then(Value::as_array)
        {
            for field in required.iter().filter_map(Value::as_str) {
                if !inputs.contains_key(field) {
                    return DispatchResult::failed(
                        ErrorKind::InvalidInputs,
                        format!("Required field missing: {}", field),
                    );
                }
            }
        }

        let budget = self.store.config().step_budget;
        match vm::execute(&graph, entity.id.as_str(), inputs, ctx, budget) {
            Ok(outcome) => {
                info!(protocol = %entity.id, exit_node = %outcome.exit_node, "Protocol fulfilled");
                DispatchResult::Fulfilled {
                    data: outcome.output,
                    exit_node: Some(outcome.exit_node),
                }
            }
            Err(e) => {
                warn!(protocol = %entity.id, error = %e, "Protocol failed");
                DispatchResult::from_error(&e)
            }
        }
    }

    // =========================================================================
    // Recorded Execution
    // =========================================================================

    /// Dispatches a protocol on behalf of a signal, guaranteeing exactly
    /// one [`SignalOutcome`] row.
    ///
    /// The record is durable before the result is returned; a panic in
    /// the dispatch still records completion (status `panicked`) via the
    /// guard.
    pub fn execute_recorded(
        &self,
        signal_id: &EntityId,
        protocol_intent: &str,
        inputs: JsonMap,
        opts: DispatchOptions,
    ) -> DispatchResult {
        let mut guard = OutcomeGuard {
            store: Arc::clone(&self.store),
            signal_id: signal_id.clone(),
            protocol_id: protocol_intent.to_string(),
            started_at: Timestamp::now(),
            t0: Instant::now(),
            done: false,
        };

        let result = self.dispatch(protocol_intent, inputs, opts);
        guard.complete(&result);
        result
    }

    /// Runs [`execute_recorded`](Self::execute_recorded) on a worker
    /// thread. The outcome row is written on the worker before the result
    /// crosses back; joining a panicked worker yields a failed result
    /// whose record already says `panicked`.
    pub fn spawn_recorded(
        self: &Arc<Self>,
        signal_id: EntityId,
        protocol_intent: String,
        inputs: JsonMap,
        opts: DispatchOptions,
    ) -> RecordedHandle {
        let engine = Arc::clone(self);
        let (tx, rx) = crossbeam_channel::bounded(1);

        let thread = std::thread::spawn(move || {
            let outcome = catch_unwind(AssertUnwindSafe(|| {
                engine.execute_recorded(&signal_id, &protocol_intent, inputs, opts)
            }));
            if let Ok(result) = outcome {
                // A full channel or dropped receiver is the caller's business
                let _ = tx.send(result);
            }
            // On panic the guard has already recorded; dropping tx signals it
        });

        RecordedHandle {
            rx,
            thread: Some(thread),
        }
    }
}

/// Handle to an asynchronously executing recorded protocol run.
pub struct RecordedHandle {
    rx: crossbeam_channel::Receiver<DispatchResult>,
    thread: Option<JoinHandle<()>>,
}

impl RecordedHandle {
    /// Waits for the worker and returns its result.
    pub fn join(mut self) -> DispatchResult {
        let result = self.rx.recv().unwrap_or_else(|_| {
            DispatchResult::failed(ErrorKind::ExecutionError, "worker panicked")
        });
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
        result
    }
}

/// Writes exactly one outcome row per recorded execution: `complete`
/// records the real terminal status; the drop path covers panics.
struct OutcomeGuard {
    store: Arc<GraphStore>,
    signal_id: EntityId,
    protocol_id: String,
    started_at: Timestamp,
    t0: Instant,
    done: bool,
}

impl OutcomeGuard {
    fn complete(&mut self, result: &DispatchResult) {
        let (status, error) = match result {
            DispatchResult::Fulfilled { .. } => (OutcomeStatus::Completed, None),
            DispatchResult::Failed { kind, message } => (
                OutcomeStatus::Failed,
                Some(OutcomeError {
                    kind: *kind,
                    message: message.clone(),
                }),
            ),
        };
        self.record(status, error);
        self.done = true;
    }

    fn record(&self, status: OutcomeStatus, error: Option<OutcomeError>) {
        let outcome = SignalOutcome {
            signal_id: self.signal_id.clone(),
            protocol_id: self.protocol_id.clone(),
            started_at: self.started_at,
            ended_at: Timestamp::now(),
            duration_ms: self.t0.elapsed().as_millis() as u64,
            status,
            error,
        };
        if let Err(e) = self.store.record_outcome(&outcome) {
            warn!(signal = %self.signal_id, error = %e, "Failed to record signal outcome");
        }
    }
}

impl Drop for OutcomeGuard {
    fn drop(&mut self) {
        if !self.done {
            self.record(
                OutcomeStatus::Panicked,
                Some(OutcomeError {
                    kind: ErrorKind::ExecutionError,
                    message: "execution panicked".into(),
                }),
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use serde_json::json;
    use tempfile::tempdir;

    fn fixture() -> (Arc<Engine>, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let store =
            Arc::new(GraphStore::open(dir.path().join("test.db"), Config::default()).unwrap());
        (Arc::new(Engine::new(store)), dir)
    }

    fn inputs(value: Value) -> JsonMap {
        value.as_object().cloned().unwrap_or_default()
    }

    #[test]
    fn test_dispatch_primitive_by_alias() {
        let (engine, _dir) = fixture();
        let result = engine.dispatch(
            "ping",
            JsonMap::new(),
            DispatchOptions::default(),
        );
        assert!(result.ok());
        assert_eq!(result.data().unwrap()["pong"], json!(true));
        assert!(result.exit_node().is_none());
    }

    #[test]
    fn test_dispatch_unknown_intent() {
        let (engine, _dir) = fixture();
        let result = engine.dispatch("transmogrify", JsonMap::new(), DispatchOptions::default());
        assert!(!result.ok());
        assert_eq!(result.error_kind(), Some(ErrorKind::IntentNotFound));
    }

    #[test]
    fn test_result_wire_shape_is_exclusive() {
        let (engine, _dir) = fixture();

        let ok = engine
            .dispatch("ping", JsonMap::new(), DispatchOptions::default())
            .to_value();
        assert_eq!(ok["ok"], json!(true));
        assert!(ok.get("error_kind").is_none());

        let err = engine
            .dispatch("nope", JsonMap::new(), DispatchOptions::default())
            .to_value();
        assert_eq!(err["ok"], json!(false));
        assert_eq!(err["error_kind"], "intent_not_found");
        assert!(err.get("data").is_none());
    }

    #[test]
    fn test_protocol_beats_primitive_on_prefixed_tie() {
        let (engine, _dir) = fixture();
        // Both protocol-speak (entity) and primitive-speak exist for the
        // intent "speak"... but "speak" is also a verbatim alias, which
        // resolves first. The prefixed form goes to the protocol.
        let mut data = JsonMap::new();
        data.insert(
            "graph".into(),
            json!({
                "nodes": [
                    {"id": "start", "kind": "START"},
                    {"id": "done", "kind": "RETURN", "output": {"via": "protocol"}},
                ],
                "edges": [{"from": "start", "to": "done"}],
            }),
        );
        engine
            .store()
            .save_generic("protocol-speak", EntityType::Protocol, data)
            .unwrap();

        let result = engine.dispatch("protocol-speak", JsonMap::new(), DispatchOptions::default());
        assert!(result.ok());
        assert_eq!(result.data().unwrap()["via"], "protocol");

        // Verbatim alias still goes to the primitive
        let result = engine.dispatch(
            "speak",
            inputs(json!({"text": "hi"})),
            DispatchOptions {
                sink: Some(crate::response::MemorySink::new()),
                ..Default::default()
            },
        );
        assert!(result.ok());
        assert_eq!(result.data().unwrap()["spoken"], json!(true));
    }

    #[test]
    fn test_protocol_inputs_schema_gates_entry() {
        let (engine, _dir) = fixture();
        let mut data = JsonMap::new();
        data.insert(
            "graph".into(),
            json!({
                "nodes": [
                    {"id": "start", "kind": "START"},
                    {"id": "done", "kind": "RETURN"},
                ],
                "edges": [{"from": "start", "to": "done"}],
            }),
        );
        data.insert("inputs_schema".into(), json!({"required": ["x"]}));
        engine
            .store()
            .save_generic("protocol-needs-x", EntityType::Protocol, data)
            .unwrap();

        let result = engine.dispatch("needs-x", JsonMap::new(), DispatchOptions::default());
        assert_eq!(result.error_kind(), Some(ErrorKind::InvalidInputs));

        let result = engine.dispatch(
            "needs-x",
            inputs(json!({"x": 1})),
            DispatchOptions::default(),
        );
        assert!(result.ok());
    }

    #[test]
    fn test_execute_recorded_writes_outcome_before_return() {
        let (engine, _dir) = fixture();
        let mut data = JsonMap::new();
        data.insert(
            "graph".into(),
            json!({
                "nodes": [
                    {"id": "start", "kind": "START"},
                    {"id": "done", "kind": "RETURN", "output": {"ran": true}},
                ],
                "edges": [{"from": "start", "to": "done"}],
            }),
        );
        engine
            .store()
            .save_generic("protocol-ok", EntityType::Protocol, data)
            .unwrap();
        let signal = engine
            .store()
            .emit_signal(
                "Run it",
                "test",
                crate::physics::Urgency::Normal,
                None,
                JsonMap::new(),
            )
            .unwrap();

        let result = engine.execute_recorded(
            &signal,
            "protocol-ok",
            JsonMap::new(),
            DispatchOptions::default(),
        );
        assert!(result.ok());

        let outcomes = engine.store().outcomes_for_signal(signal.as_str()).unwrap();
        assert_eq!(outcomes.len(), 1);
        assert_eq!(outcomes[0].status, OutcomeStatus::Completed);
        assert_eq!(outcomes[0].protocol_id, "protocol-ok");
        assert!(outcomes[0].ended_at >= outcomes[0].started_at);
    }

    #[test]
    fn test_execute_recorded_failure_records_error() {
        let (engine, _dir) = fixture();
        let signal = engine
            .store()
            .emit_signal(
                "Run broken",
                "test",
                crate::physics::Urgency::Normal,
                None,
                JsonMap::new(),
            )
            .unwrap();

        let result = engine.execute_recorded(
            &signal,
            "protocol-does-not-exist",
            JsonMap::new(),
            DispatchOptions::default(),
        );
        assert!(!result.ok());

        let outcomes = engine.store().outcomes_for_signal(signal.as_str()).unwrap();
        assert_eq!(outcomes.len(), 1);
        assert_eq!(outcomes[0].status, OutcomeStatus::Failed);
        assert_eq!(
            outcomes[0].error.as_ref().unwrap().kind,
            ErrorKind::IntentNotFound
        );
    }

    #[test]
    fn test_spawn_recorded_round_trip() {
        let (engine, _dir) = fixture();
        let mut data = JsonMap::new();
        data.insert(
            "graph".into(),
            json!({
                "nodes": [
                    {"id": "start", "kind": "START"},
                    {"id": "done", "kind": "RETURN", "output": {"async": true}},
                ],
                "edges": [{"from": "start", "to": "done"}],
            }),
        );
        engine
            .store()
            .save_generic("protocol-async", EntityType::Protocol, data)
            .unwrap();
        let signal = engine
            .store()
            .emit_signal(
                "Async run",
                "test",
                crate::physics::Urgency::Normal,
                None,
                JsonMap::new(),
            )
            .unwrap();

        let handle = engine.spawn_recorded(
            signal.clone(),
            "protocol-async".into(),
            JsonMap::new(),
            DispatchOptions::default(),
        );
        let result = handle.join();
        assert!(result.ok());
        assert_eq!(
            engine
                .store()
                .outcomes_for_signal(signal.as_str())
                .unwrap()
                .len(),
            1
        );
    }

    #[test]
    fn test_engine_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Engine>();
    }
}
