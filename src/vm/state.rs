//! Protocol execution state.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::entity::JsonMap;
use crate::error::ErrorKind;

/// Lifecycle of one protocol run.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecStatus {
    /// Constructed, not yet stepped.
    Pending,
    /// Stepping.
    Running,
    /// Reached a RETURN node.
    Fulfilled,
    /// Terminated with an error kind.
    Failed,
}

/// The mutable state of one protocol run.
///
/// `trace` records every visited node id in order, for debuggability;
/// `exit_node` is set exactly when a RETURN node fulfills the run, so
/// callers that need branch-specific output can key off it.
#[derive(Clone, Debug)]
pub struct ExecState {
    /// The protocol entity being executed.
    pub protocol_id: String,
    /// Named execution bindings.
    pub bindings: JsonMap,
    /// The node about to execute (or last executed, once terminal).
    pub current_node: String,
    /// Every node visited, in order.
    pub trace: Vec<String>,
    /// The RETURN node that fulfilled the run.
    pub exit_node: Option<String>,
    /// Run lifecycle.
    pub status: ExecStatus,
    /// Resolved output template, once fulfilled.
    pub output: Option<Value>,
    /// Failure kind and message, once failed.
    pub failure: Option<(ErrorKind, String)>,
}

impl ExecState {
    /// Creates a pending run positioned at the start node.
    pub fn new(protocol_id: &str, bindings: JsonMap, start_node: &str) -> Self {
        Self {
            protocol_id: protocol_id.to_string(),
            bindings,
            current_node: start_node.to_string(),
            trace: Vec::new(),
            exit_node: None,
            status: ExecStatus::Pending,
            output: None,
            failure: None,
        }
    }

    /// Marks the run fulfilled at the given RETURN node.
    pub fn fulfill(&mut self, exit_node: &str, output: Value) {
        self.status = ExecStatus::Fulfilled;
        self.exit_node = Some(exit_node.to_string());
        self.output = Some(output);
    }

    /// Marks the run failed.
    pub fn fail(&mut self, kind: ErrorKind, message: impl Into<String>) {
        self.status = ExecStatus::Failed;
        self.failure = Some((kind, message.into()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_new_state_is_pending() {
        let state = ExecState::new("protocol-x", JsonMap::new(), "start");
        assert_eq!(state.status, ExecStatus::Pending);
        assert_eq!(state.current_node, "start");
        assert!(state.trace.is_empty());
        assert!(state.exit_node.is_none());
    }

    #[test]
    fn test_fulfill_records_exit_node() {
        let mut state = ExecState::new("protocol-x", JsonMap::new(), "start");
        state.fulfill("return-a", json!({"ok": true}));
        assert_eq!(state.status, ExecStatus::Fulfilled);
        assert_eq!(state.exit_node.as_deref(), Some("return-a"));
        assert_eq!(state.output, Some(json!({"ok": true})));
    }

    #[test]
    fn test_fail_records_kind() {
        let mut state = ExecState::new("protocol-x", JsonMap::new(), "start");
        state.fail(ErrorKind::ExecutionError, "no_branch");
        assert_eq!(state.status, ExecStatus::Failed);
        let (kind, message) = state.failure.unwrap();
        assert_eq!(kind, ErrorKind::ExecutionError);
        assert_eq!(message, "no_branch");
    }
}
