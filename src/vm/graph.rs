//! Protocol graph parsing and validation.
//!
//! A protocol entity's `data.graph` field is `{nodes: [...], edges: [...]}`.
//! Parsing validates the closed node-kind set, the START uniqueness rule,
//! kind-specific required fields, and edge endpoint references, so the
//! interpreter never meets a structurally malformed graph.

use std::collections::HashMap;

use serde_json::Value;

use crate::entity::JsonMap;
use crate::error::{ChoraError, Result};

/// Node kinds. Closed set.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NodeKind {
    /// Entry point; exactly one per graph.
    Start,
    /// Invoke a primitive and bind its response.
    Call,
    /// Evaluate a predicate and pick a labelled edge.
    Branch,
    /// Join point; no behavior of its own.
    Merge,
    /// Terminal; resolves the output template and fulfills the run.
    Return,
    /// Bind a computed value.
    Set,
}

impl NodeKind {
    /// Parses the uppercase kind tag.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "START" => Some(Self::Start),
            "CALL" => Some(Self::Call),
            "BRANCH" => Some(Self::Branch),
            "MERGE" => Some(Self::Merge),
            "RETURN" => Some(Self::Return),
            "SET" => Some(Self::Set),
            _ => None,
        }
    }

    /// Returns the uppercase kind tag.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Start => "START",
            Self::Call => "CALL",
            Self::Branch => "BRANCH",
            Self::Merge => "MERGE",
            Self::Return => "RETURN",
            Self::Set => "SET",
        }
    }
}

/// One parsed node.
#[derive(Clone, Debug)]
pub struct Node {
    /// Node id, unique within the graph.
    pub id: String,
    /// The node's kind.
    pub kind: NodeKind,
    /// CALL: the primitive to invoke.
    pub primitive: Option<String>,
    /// CALL: argument template rendered against bindings.
    pub args: Option<Value>,
    /// CALL/SET: the binding name to write (CALL defaults to `result`).
    pub output: Option<String>,
    /// BRANCH: the predicate expression.
    pub predicate: Option<String>,
    /// SET: the value template.
    pub value: Option<Value>,
    /// RETURN: the output template.
    pub output_template: Option<Value>,
}

/// One directed edge, optionally labelled (BRANCH arms).
#[derive(Clone, Debug)]
pub struct Edge {
    /// Target node id.
    pub to: String,
    /// Label matched against the branch predicate's value, or `default`.
    pub label: Option<String>,
}

/// A validated protocol graph.
#[derive(Clone, Debug)]
pub struct ProtocolGraph {
    nodes: HashMap<String, Node>,
    edges_from: HashMap<String, Vec<Edge>>,
    start: String,
}

impl ProtocolGraph {
    /// Parses and validates a protocol entity's `data`.
    ///
    /// # Errors
    ///
    /// Structural problems (missing graph, unknown kinds, duplicate or
    /// missing START, dangling edges, missing kind-specific fields) are
    /// execution errors: the protocol entity is malformed.
    pub fn from_entity_data(data: &JsonMap) -> Result<Self> {
        let graph = data
            .get("graph")
            .and_then(Value::as_object)
            .ok_or_else(|| ChoraError::execution("protocol has no graph object"))?;

        let raw_nodes = graph
            .get("nodes")
            .and_then(Value::as_array)
            .ok_or_else(|| ChoraError::execution("protocol graph has no nodes array"))?;
        let raw_edges = graph
            .get("edges")
            .and_then(Value::as_array)
            .ok_or_else(|| ChoraError::execution("protocol graph has no edges array"))?;

        let mut nodes = HashMap::with_capacity(raw_nodes.len());
        let mut start = None;

        for raw in raw_nodes {
            let node = Self::parse_node(raw)?;
            if node.kind == NodeKind::Start {
                if start.is_some() {
                    return Err(ChoraError::execution("protocol graph has multiple START nodes"));
                }
                start = Some(node.id.clone());
            }
            if nodes.insert(node.id.clone(), node).is_some() {
                return Err(ChoraError::execution("protocol graph has duplicate node ids"));
            }
        }

        let start =
            start.ok_or_else(|| ChoraError::execution("protocol graph has no START node"))?;

        let mut edges_from: HashMap<String, Vec<Edge>> = HashMap::new();
        for raw in raw_edges {
            let edge = raw
                .as_object()
                .ok_or_else(|| ChoraError::execution("protocol edge must be an object"))?;
            let from = str_field(edge, "from")
                .ok_or_else(|| ChoraError::execution("protocol edge missing 'from'"))?;
            let to = str_field(edge, "to")
                .ok_or_else(|| ChoraError::execution("protocol edge missing 'to'"))?;
            if !nodes.contains_key(&from) || !nodes.contains_key(&to) {
                return Err(ChoraError::execution(format!(
                    "protocol edge {} -> {} references unknown node",
                    from, to
                )));
            }
            edges_from.entry(from).or_default().push(Edge {
                to,
                label: str_field(edge, "label"),
            });
        }

        Ok(Self {
            nodes,
            edges_from,
            start,
        })
    }

    fn parse_node(raw: &Value) -> Result<Node> {
        let obj = raw
            .as_object()
            .ok_or_else(|| ChoraError::execution("protocol node must be an object"))?;
        let id = str_field(obj, "id")
            .ok_or_else(|| ChoraError::execution("protocol node missing 'id'"))?;
        let kind_tag = str_field(obj, "kind")
            .ok_or_else(|| ChoraError::execution(format!("node '{}' missing 'kind'", id)))?;
        let kind = NodeKind::parse(&kind_tag).ok_or_else(|| {
            ChoraError::execution(format!("node '{}' has unknown kind '{}'", id, kind_tag))
        })?;

        let node = Node {
            id: id.clone(),
            kind,
            primitive: str_field(obj, "primitive"),
            args: obj.get("args").cloned(),
            output: str_field(obj, "output"),
            predicate: str_field(obj, "predicate"),
            value: obj.get("value").cloned(),
            output_template: if kind == NodeKind::Return {
                obj.get("output").cloned()
            } else {
                None
            },
        };

        match kind {
            NodeKind::Call if node.primitive.is_none() => Err(ChoraError::execution(format!(
                "CALL node '{}' missing 'primitive'",
                id
            ))),
            NodeKind::Branch if node.predicate.is_none() => Err(ChoraError::execution(format!(
                "BRANCH node '{}' missing 'predicate'",
                id
            ))),
            NodeKind::Set if node.output.is_none() || node.value.is_none() => {
                Err(ChoraError::execution(format!(
                    "SET node '{}' needs 'output' and 'value'",
                    id
                )))
            }
            _ => Ok(node),
        }
    }

    /// The unique START node's id.
    pub fn start(&self) -> &str {
        &self.start
    }

    /// A node by id.
    pub fn node(&self, id: &str) -> Option<&Node> {
        self.nodes.get(id)
    }

    /// Outgoing edges of a node, in declaration order.
    pub fn edges_from(&self, id: &str) -> &[Edge] {
        self.edges_from.get(id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// The single successor of a non-branch node.
    pub fn successor(&self, id: &str) -> Result<&str> {
        self.edges_from(id)
            .first()
            .map(|e| e.to.as_str())
            .ok_or_else(|| ChoraError::execution(format!("node '{}' has no outgoing edge", id)))
    }

    /// The branch arm matching the given label, else the `default` edge.
    pub fn branch_target(&self, id: &str, label: &str) -> Option<&Edge> {
        let edges = self.edges_from(id);
        edges
            .iter()
            .find(|e| e.label.as_deref() == Some(label))
            .or_else(|| edges.iter().find(|e| e.label.as_deref() == Some("default")))
    }
}

fn str_field(obj: &serde_json::Map<String, Value>, key: &str) -> Option<String> {
    obj.get(key).and_then(Value::as_str).map(str::to_string)
}
