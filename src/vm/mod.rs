//! The protocol VM: a small interpreter over protocol graphs.
//!
//! Execution walks the graph from START, rendering templates and calling
//! primitives, until a RETURN node fulfills the run or a failure
//! terminates it. Every side effect flows through a primitive call — the
//! interpreter itself only moves values between bindings.
//!
//! # Termination
//!
//! Three guards bound every run:
//!
//! - **Fuel**: total steps are capped by the configured budget
//!   (`step_budget_exhausted`).
//! - **Cycle rule**: the arm a visit executes in is the most recent
//!   BRANCH decision at that moment; a node may be revisited only in an
//!   arm it has not been visited in before (`cycle_detected`). Branch
//!   decisions elsewhere in the graph don't widen a loop's allowance.
//! - **Deadline**: the dispatch deadline is checked every step
//!   (`timeout`).

pub mod graph;
pub mod state;
pub mod template;

pub use graph::{Edge, Node, NodeKind, ProtocolGraph};
pub use state::{ExecState, ExecStatus};

use std::collections::{HashMap, HashSet};
use std::time::Instant;

use serde_json::Value;
use tracing::debug;

use crate::entity::JsonMap;
use crate::error::{ChoraError, Result};
use crate::primitives::PrimitiveCtx;
use crate::response::Response;
use template::{canonical_label, eval_predicate, resolve_template};

/// A fulfilled protocol run.
#[derive(Clone, Debug)]
pub struct VmOutcome {
    /// The RETURN node's resolved output template.
    pub output: Value,
    /// The RETURN node that fulfilled the run.
    pub exit_node: String,
    /// Every node visited, in order.
    pub trace: Vec<String>,
}

/// Builds the initial bindings: the whole input map under `input`, plus
/// each input key bound directly when it doesn't collide.
pub fn initial_bindings(inputs: &JsonMap) -> JsonMap {
    let mut bindings = JsonMap::new();
    bindings.insert("input".into(), Value::Object(inputs.clone()));
    for (k, v) in inputs {
        if k != "input" {
            bindings.insert(k.clone(), v.clone());
        }
    }
    bindings
}

/// Executes a protocol graph to a terminal state.
///
/// # Errors
///
/// - A primitive error envelope fails the run with that primitive's kind.
/// - Structural and guard failures (`no_branch`, `cycle_detected`,
///   `step_budget_exhausted`, `timeout`, unresolved bindings) are
///   execution errors.
pub fn execute(
    graph: &ProtocolGraph,
    protocol_id: &str,
    inputs: &JsonMap,
    ctx: &PrimitiveCtx<'_>,
    step_budget: u64,
) -> Result<VmOutcome> {
    let mut state = ExecState::new(protocol_id, initial_bindings(inputs), graph.start());
    state.status = ExecStatus::Running;

    // The arm a visit executes in is the most recent branch decision
    // (None before any branch fires). Scoping the revisit check to that
    // decision alone keeps unrelated branches from widening a loop's
    // allowance: a gating branch that repeats its arm is a cycle no
    // matter what the rest of the graph decided in between.
    let mut current_arm: Option<(String, String)> = None;
    let mut visited: HashMap<String, HashSet<Option<(String, String)>>> = HashMap::new();
    let mut fuel = step_budget;

    loop {
        if let Some(deadline) = ctx.deadline {
            if Instant::now() >= deadline {
                return Err(ChoraError::execution("timeout"));
            }
        }
        if fuel == 0 {
            return Err(ChoraError::execution("step_budget_exhausted"));
        }
        fuel -= 1;

        let node_id = state.current_node.clone();
        if !visited
            .entry(node_id.clone())
            .or_default()
            .insert(current_arm.clone())
        {
            return Err(ChoraError::execution(format!(
                "cycle_detected at node '{}'",
                node_id
            )));
        }
        state.trace.push(node_id.clone());

        let node = graph
            .node(&node_id)
            .ok_or_else(|| ChoraError::execution(format!("unknown node '{}'", node_id)))?;

        match node.kind {
            NodeKind::Start | NodeKind::Merge => {
                state.current_node = graph.successor(&node_id)?.to_string();
            }

            NodeKind::Set => {
                let value_template = node
                    .value
                    .as_ref()
                    .ok_or_else(|| ChoraError::execution("SET node lost its value"))?;
                let value = resolve_template(value_template, &state.bindings)?;
                let binding = node
                    .output
                    .as_ref()
                    .ok_or_else(|| ChoraError::execution("SET node lost its output"))?;
                state.bindings.insert(binding.clone(), value);
                state.current_node = graph.successor(&node_id)?.to_string();
            }

            NodeKind::Call => {
                let primitive = node
                    .primitive
                    .as_ref()
                    .ok_or_else(|| ChoraError::execution("CALL node lost its primitive"))?;
                let args = match &node.args {
                    Some(template) => match resolve_template(template, &state.bindings)? {
                        Value::Object(map) => map,
                        other => {
                            return Err(ChoraError::execution(format!(
                                "CALL args must render to an object, got {}",
                                other
                            )));
                        }
                    },
                    None => JsonMap::new(),
                };

                debug!(node = %node_id, %primitive, "VM call");
                match ctx.registry.invoke(primitive, ctx, &args) {
                    Response::Success { data } => {
                        let binding = node.output.clone().unwrap_or_else(|| "result".to_string());
                        state.bindings.insert(binding, data);
                        state.current_node = graph.successor(&node_id)?.to_string();
                    }
                    Response::Error { kind, message } => {
                        state.fail(kind, message.clone());
                        return Err(ChoraError::Primitive { kind, message });
                    }
                }
            }

            NodeKind::Branch => {
                let predicate = node
                    .predicate
                    .as_ref()
                    .ok_or_else(|| ChoraError::execution("BRANCH node lost its predicate"))?;
                let value = eval_predicate(predicate, &state.bindings)?;
                let label = canonical_label(&value);
                let edge = graph.branch_target(&node_id, &label).ok_or_else(|| {
                    ChoraError::execution(format!(
                        "no_branch: node '{}' has no arm for '{}' and no default",
                        node_id, label
                    ))
                })?;
                current_arm = Some((
                    node_id.clone(),
                    edge.label.clone().unwrap_or_else(|| "default".to_string()),
                ));
                state.current_node = edge.to.clone();
            }

            NodeKind::Return => {
                let output = match &node.output_template {
                    Some(template) => resolve_template(template, &state.bindings)?,
                    None => Value::Null,
                };
                state.fulfill(&node_id, output.clone());
                debug!(exit_node = %node_id, steps = state.trace.len(), "VM fulfilled");
                return Ok(VmOutcome {
                    output,
                    exit_node: node_id,
                    trace: state.trace,
                });
            }
        }
    }
}
