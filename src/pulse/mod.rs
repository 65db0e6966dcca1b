//! The pulse: the graph's attention metabolism.
//!
//! One pulse dispatches triggered signals to their protocols, sweeps for
//! stagnating entities, re-evaluates auto-resolvable signals, and writes a
//! summary row. The background loop ticks at a configured interval and
//! never overlaps with itself — a tick arriving mid-run is skipped and the
//! skip logged.
//!
//! Errors in one signal never abort the pulse; they are recorded
//! per-signal and counted in the summary.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, RecvTimeoutError, Sender};
use serde::Serialize;
use serde_json::json;
use tracing::{debug, info, instrument, warn};

use crate::config::{PulseConfig, PULSE_HISTORY_RETAIN};
use crate::engine::{DispatchOptions, Engine};
use crate::entity::{Entity, EntityStatus, JsonMap};
use crate::error::Result;
use crate::physics::{Urgency, Verb};
use crate::query::EntityFilter;
use crate::storage::PulseSummary;
use crate::types::{EntityId, EntityType, Timestamp};

/// Default stagnation window for inquiries, in days.
pub const DEFAULT_INQUIRY_STAGNATION_DAYS: i64 = 30;

/// Default stagnation window for signals, in days.
pub const DEFAULT_SIGNAL_STAGNATION_DAYS: i64 = 7;

/// One dispatchable signal found by the preview step.
#[derive(Clone, Debug, Serialize)]
pub struct PulseCandidate {
    /// The active signal.
    pub signal_id: EntityId,
    /// The protocol its `triggers` bond points at.
    pub protocol_id: EntityId,
}

/// The pulse runner.
///
/// Construct with [`Pulse::new`], then either call
/// [`run_once`](Pulse::run_once) directly or [`start`](Pulse::start) the
/// background loop. Dropping the pulse stops the loop.
pub struct Pulse {
    engine: Arc<Engine>,
    config: PulseConfig,
    running: Arc<AtomicBool>,
    shutdown: Option<Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl std::fmt::Debug for Pulse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pulse")
            .field("config", &self.config)
            .field("looping", &self.thread.is_some())
            .finish()
    }
}

impl Pulse {
    /// Creates a pulse over an engine, taking its cadence from the store
    /// configuration.
    pub fn new(engine: Arc<Engine>) -> Self {
        let config = engine.store().config().pulse;
        Self {
            engine,
            config,
            running: Arc::new(AtomicBool::new(false)),
            shutdown: None,
            thread: None,
        }
    }

    /// The effective pulse configuration.
    pub fn config(&self) -> PulseConfig {
        self.config
    }

    /// Lists dispatch candidates without performing any writes.
    pub fn preview(&self) -> Result<Vec<PulseCandidate>> {
        candidates(&self.engine)
    }

    /// Recent pulse summaries, newest first.
    pub fn status(&self) -> Result<Vec<PulseSummary>> {
        self.engine
            .store()
            .recent_pulse_summaries(PULSE_HISTORY_RETAIN)
    }

    /// Runs one pulse now.
    ///
    /// Returns `None` when another pulse is still running (the overlap
    /// guard also protects manual runs against the background loop).
    pub fn run_once(&self) -> Result<Option<PulseSummary>> {
        if self.running.swap(true, Ordering::SeqCst) {
            warn!("Pulse already running; this run skipped");
            return Ok(None);
        }
        let result = pulse_once(&self.engine, &self.config);
        self.running.store(false, Ordering::SeqCst);
        result.map(Some)
    }

    /// Starts the background loop. No-op when disabled or already
    /// started.
    pub fn start(&mut self) {
        if !self.config.enabled {
            info!("Pulse disabled; loop not started");
            return;
        }
        if self.thread.is_some() {
            return;
        }

        let (tx, rx) = bounded::<()>(1);
        let engine = Arc::clone(&self.engine);
        let running = Arc::clone(&self.running);
        let config = self.config;

        let thread = std::thread::spawn(move || {
            let interval = Duration::from_secs(config.interval_seconds);
            info!(interval_seconds = config.interval_seconds, "Pulse loop started");
            loop {
                match rx.recv_timeout(interval) {
                    Err(RecvTimeoutError::Timeout) => {
                        if running.swap(true, Ordering::SeqCst) {
                            warn!("Pulse still running; tick skipped");
                            continue;
                        }
                        let t0 = Instant::now();
                        if let Err(e) = pulse_once(&engine, &config) {
                            warn!(error = %e, "Pulse run failed");
                        }
                        running.store(false, Ordering::SeqCst);
                        if t0.elapsed() > interval {
                            warn!("Pulse overran its interval; next tick delayed");
                        }
                    }
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                }
            }
            info!("Pulse loop stopped");
        });

        self.shutdown = Some(tx);
        self.thread = Some(thread);
    }

    /// Stops the background loop and waits for it to exit.
    pub fn stop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for Pulse {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Finds active signals with a `triggers` bond to a protocol.
fn candidates(engine: &Engine) -> Result<Vec<PulseCandidate>> {
    let store = engine.store();
    let signals = store.query_entities(
        &EntityFilter::of_type(EntityType::Signal).with_status(EntityStatus::Active),
    )?;

    let mut out = Vec::new();
    for signal in signals {
        let mut protocol_targets: Vec<EntityId> = store
            .bonds_from(signal.id.as_str())?
            .into_iter()
            .filter(|b| b.verb == Verb::Triggers)
            .map(|b| b.to_id)
            .filter(|to| to.entity_type() == EntityType::Protocol)
            .collect();
        protocol_targets.sort();
        if let Some(protocol_id) = protocol_targets.into_iter().next() {
            out.push(PulseCandidate {
                signal_id: signal.id,
                protocol_id,
            });
        }
    }
    Ok(out)
}

/// One full pulse: dispatch, stagnation sweep, auto-resolution sweep,
/// summary.
#[instrument(skip(engine, config))]
fn pulse_once(engine: &Engine, config: &PulseConfig) -> Result<PulseSummary> {
    let t0 = Instant::now();
    let ts = Timestamp::now();
    let run_deadline = Duration::from_secs(config.interval_seconds);
    let store = engine.store();

    let mut signals_processed = 0u64;
    let mut errors = 0u64;

    for candidate in candidates(engine)? {
        let remaining = run_deadline.saturating_sub(t0.elapsed());
        if remaining.is_zero() {
            warn!("Pulse deadline reached; remaining candidates deferred");
            break;
        }

        let signal = match store.try_get_entity(candidate.signal_id.as_str())? {
            Some(signal) => signal,
            None => continue,
        };

        let mut inputs = signal.data.clone();
        inputs.insert("signal_id".into(), json!(signal.id));

        let dispatch_start = Instant::now();
        let result = engine.execute_recorded(
            &signal.id,
            candidate.protocol_id.as_str(),
            inputs,
            DispatchOptions {
                deadline: Some(remaining),
                ..Default::default()
            },
        );
        signals_processed += 1;

        let finish = if result.ok() {
            store.resolve_signal(
                signal.id.as_str(),
                json!({
                    "protocol_id": candidate.protocol_id,
                    "duration_ms": dispatch_start.elapsed().as_millis() as u64,
                    "payload": result.data(),
                }),
            )
        } else {
            errors += 1;
            store.fail_signal(
                signal.id.as_str(),
                json!({
                    "error": {
                        "kind": result.error_kind().map(|k| k.as_str()),
                        "message": result.error_message(),
                    },
                }),
            )
        };
        if let Err(e) = finish {
            warn!(signal = %signal.id, error = %e, "Failed to record signal status");
            errors += 1;
        }
    }

    if let Err(e) = stagnation_sweep(engine) {
        warn!(error = %e, "Stagnation sweep failed");
        errors += 1;
    }
    if let Err(e) = auto_resolution_sweep(engine) {
        warn!(error = %e, "Auto-resolution sweep failed");
        errors += 1;
    }

    let summary = PulseSummary {
        ts,
        signals_processed,
        errors,
        duration_ms: t0.elapsed().as_millis() as u64,
    };
    store.append_pulse_summary(&summary, PULSE_HISTORY_RETAIN)?;

    debug!(
        signals = signals_processed,
        errors, "Pulse complete"
    );
    Ok(summary)
}

/// Parses `{kind}-stagnates-after-{N}-days` from a principle slug.
fn parse_stagnation_rule(slug: &str) -> Option<(EntityType, i64)> {
    let (kind, rest) = slug.split_once("-stagnates-after-")?;
    let days = rest.strip_suffix("-days")?.parse::<i64>().ok()?;
    let entity_type = EntityType::parse(kind)?;
    (days > 0).then_some((entity_type, days))
}

/// The active stagnation rules: principle entities override the built-in
/// inquiry/signal defaults.
fn stagnation_rules(engine: &Engine) -> Result<BTreeMap<EntityType, i64>> {
    let mut rules = BTreeMap::new();
    let principles = engine.store().query_entities(
        &EntityFilter::of_type(EntityType::Principle).with_status(EntityStatus::Active),
    )?;
    for principle in principles {
        if let Some((entity_type, days)) = parse_stagnation_rule(principle.id.slug()) {
            rules.insert(entity_type, days);
        }
    }
    rules
        .entry(EntityType::Inquiry)
        .or_insert(DEFAULT_INQUIRY_STAGNATION_DAYS);
    rules
        .entry(EntityType::Signal)
        .or_insert(DEFAULT_SIGNAL_STAGNATION_DAYS);
    Ok(rules)
}

/// Emits an escalation signal for each active entity older than its
/// kind's stagnation window. One escalation per source entity — repeats
/// are deduplicated against existing stagnation signals.
fn stagnation_sweep(engine: &Engine) -> Result<()> {
    let store = engine.store();
    let now = Timestamp::now();

    for (entity_type, days) in stagnation_rules(engine)? {
        let stale: Vec<Entity> = store
            .query_entities(&EntityFilter::of_type(entity_type).with_status(EntityStatus::Active))?
            .into_iter()
            .filter(|e| e.created_at.age_days(now) > days)
            .collect();

        for entity in stale {
            let already_escalated = !store
                .query_entities(
                    &EntityFilter::of_type(EntityType::Signal)
                        .where_eq("category", json!("stagnation"))
                        .where_eq("source_id", json!(entity.id)),
                )?
                .is_empty();
            if already_escalated {
                continue;
            }

            let age = entity.created_at.age_days(now);
            let mut extra = JsonMap::new();
            extra.insert("stale_days".into(), json!(age));
            extra.insert("rule_days".into(), json!(days));
            store.emit_signal(
                &format!("Stagnation: {} inactive for {} days", entity.id, age),
                "stagnation",
                Urgency::Normal,
                Some(entity.id.as_str()),
                extra,
            )?;
            info!(entity = %entity.id, age_days = age, "Stagnation signal emitted");
        }
    }
    Ok(())
}

/// Re-evaluates active signals carrying a `tracks` reference and a
/// `resolves_when` predicate; resolves those whose condition cleared.
fn auto_resolution_sweep(engine: &Engine) -> Result<()> {
    let store = engine.store();
    let signals = store.query_entities(
        &EntityFilter::of_type(EntityType::Signal).with_status(EntityStatus::Active),
    )?;

    for signal in signals {
        let tracks = match signal.data_str("tracks") {
            Some(tracks) => tracks.to_string(),
            None => continue,
        };
        let predicate = match signal.data_str("resolves_when") {
            Some(predicate) => predicate.to_string(),
            None => continue,
        };

        let cleared = match predicate.as_str() {
            "void-cleared" => store.try_get_entity(&tracks)?.is_none(),
            "entity-updated" => store
                .try_get_entity(&tracks)?
                .map(|e| e.updated_at > signal.created_at)
                .unwrap_or(false),
            "bond-added" => {
                let verb = signal.data_str("bond_verb").and_then(Verb::parse);
                store
                    .bonds_from(&tracks)?
                    .into_iter()
                    .chain(store.bonds_to(&tracks)?)
                    .any(|b| {
                        verb.map(|v| b.verb == v).unwrap_or(true)
                            && b.created_at > signal.created_at
                    })
            }
            other => {
                warn!(signal = %signal.id, predicate = other, "Unknown resolves_when predicate");
                false
            }
        };

        if cleared {
            store.resolve_signal(
                signal.id.as_str(),
                json!({"auto_resolved": predicate, "tracks": tracks}),
            )?;
            info!(signal = %signal.id, cause = %predicate, "Signal auto-resolved");
        }
    }
    Ok(())
}
