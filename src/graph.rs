//! Graph model and edge resolution for authored bot scripts.
//!
//! An authored script arrives as loosely-typed JSON produced by the visual
//! editor: a list of `{id, type, data}` nodes and `{source, target,
//! sourceHandle}` edges. This module keeps that raw shape ([`GraphData`])
//! for storage round-trips and validates it into a typed, read-only view
//! ([`ScriptGraph`]) before execution:
//!
//! - node ids must be unique,
//! - node types must be one of the closed set (`start`, `message`,
//!   `question`, `single_choice`, `condition`); unknown types are
//!   rejected at load rather than silently skipped,
//! - each variant's `data` payload is decoded into an explicit field
//!   schema with editor-friendly defaults.
//!
//! Edge resolution lives here too, as pure lookups over the validated
//! view:
//!
//! - **entry policy**: the unique `start` node, falling back to the first
//!   node in authoring order for scripts that predate the start-node
//!   concept;
//! - **handle matching**: a named outgoing port matches exactly
//!   (case-sensitive); `None` is a wildcard taking the first edge from the
//!   source in authoring order;
//! - **dangling edges**: a target id with no node resolves to "no next
//!   node" (terminal) instead of an error, tolerating graphs the editor
//!   left half-wired.
//!
//! When several edges satisfy the same criteria, the first in authored
//! order wins, so routing is deterministic, never random.

use miette::Diagnostic;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::condition::ConditionOp;

/// Raw authored graph, exactly as the editor saved it.
///
/// Kept serde-transparent so script rows round-trip byte-for-byte through
/// storage; validation happens when a [`ScriptGraph`] is built for a step.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GraphData {
    #[serde(default)]
    pub nodes: Vec<RawNode>,
    #[serde(default)]
    pub edges: Vec<Edge>,
}

/// One node as authored: id, type tag, and an untyped data payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawNode {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub data: Value,
}

/// A directed, optionally port-labeled connection between two nodes.
///
/// `source_handle` names the outgoing port (`option-<i>`, `true`,
/// `default`, ...); `None` means unconditional. Accepts both the editor's
/// `sourceHandle` spelling and snake_case.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Edge {
    pub source: String,
    pub target: String,
    #[serde(
        rename = "sourceHandle",
        alias = "source_handle",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub source_handle: Option<String>,
}

/// One selectable option of a `single_choice` node.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChoiceOption {
    #[serde(default)]
    pub label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
}

/// A validated node: id plus its typed body.
#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub id: String,
    pub body: NodeBody,
}

/// The closed set of node kinds the interpreter understands.
#[derive(Debug, Clone, PartialEq)]
pub enum NodeBody {
    /// Entry marker; produces no output and pauses nothing.
    Start,
    /// Sends text. Pauses for input only when `interactive` is set.
    Message { text: String, interactive: bool },
    /// Sends text and pauses; the reply is recorded under `variable`.
    Question {
        text: String,
        variable: Option<String>,
    },
    /// Sends text plus options and pauses; the reply routes by option.
    SingleChoice {
        text: String,
        variable: Option<String>,
        options: Vec<ChoiceOption>,
    },
    /// Branches on a session variable; never pauses.
    Condition {
        variable: Option<String>,
        operator: ConditionOp,
        value: String,
    },
}

impl NodeBody {
    /// The authored type tag for this body.
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self {
            NodeBody::Start => "start",
            NodeBody::Message { .. } => "message",
            NodeBody::Question { .. } => "question",
            NodeBody::SingleChoice { .. } => "single_choice",
            NodeBody::Condition { .. } => "condition",
        }
    }

    /// Whether a reply to this node is captured as an answer.
    #[must_use]
    pub fn records_input(&self) -> bool {
        matches!(self, NodeBody::Question { .. } | NodeBody::SingleChoice { .. })
    }
}

/// Validation errors raised while building a [`ScriptGraph`].
#[derive(Debug, Error, Diagnostic)]
pub enum GraphError {
    #[error("duplicate node id: {id}")]
    #[diagnostic(
        code(botflow::graph::duplicate_node),
        help("Node ids must be unique within a script; re-save the script in the editor.")
    )]
    DuplicateNodeId { id: String },

    #[error("unknown node type `{kind}` on node {id}")]
    #[diagnostic(
        code(botflow::graph::unknown_node_type),
        help("Supported node types: start, message, question, single_choice, condition.")
    )]
    UnknownNodeType { id: String, kind: String },

    #[error("malformed data payload on node {id}: {source}")]
    #[diagnostic(code(botflow::graph::node_data))]
    NodeData {
        id: String,
        #[source]
        source: serde_json::Error,
    },
}

// Per-variant payload schemas. Defaults mirror what the editor omits on
// freshly dropped nodes.
#[derive(Debug, Deserialize)]
struct MessageData {
    #[serde(default)]
    text: String,
    #[serde(default)]
    interactive: bool,
}

#[derive(Debug, Deserialize)]
struct QuestionData {
    #[serde(default)]
    text: String,
    #[serde(default)]
    variable: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SingleChoiceData {
    #[serde(default)]
    text: String,
    #[serde(default)]
    variable: Option<String>,
    #[serde(default)]
    options: Vec<ChoiceOption>,
}

#[derive(Debug, Deserialize)]
struct ConditionData {
    #[serde(default)]
    variable: Option<String>,
    #[serde(default)]
    operator: ConditionOp,
    #[serde(default)]
    value: Value,
}

/// Validated, read-only view over an authored graph.
///
/// Owned by the step executor for the duration of one step; it never
/// mutates the underlying script.
#[derive(Debug, Clone)]
pub struct ScriptGraph {
    nodes: Vec<Node>,
    by_id: FxHashMap<String, usize>,
    edges: Vec<Edge>,
}

impl TryFrom<&GraphData> for ScriptGraph {
    type Error = GraphError;

    fn try_from(data: &GraphData) -> Result<Self, GraphError> {
        let mut nodes = Vec::with_capacity(data.nodes.len());
        let mut by_id = FxHashMap::default();

        for raw in &data.nodes {
            let body = decode_body(raw)?;
            if by_id
                .insert(raw.id.clone(), nodes.len())
                .is_some()
            {
                return Err(GraphError::DuplicateNodeId { id: raw.id.clone() });
            }
            nodes.push(Node {
                id: raw.id.clone(),
                body,
            });
        }

        Ok(ScriptGraph {
            nodes,
            by_id,
            edges: data.edges.clone(),
        })
    }
}

impl ScriptGraph {
    /// Look up a node by id.
    #[must_use]
    pub fn node(&self, id: &str) -> Option<&Node> {
        self.by_id.get(id).map(|&idx| &self.nodes[idx])
    }

    /// All nodes in authoring order.
    #[must_use]
    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    /// All edges in authoring order.
    #[must_use]
    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    /// Entry policy: the `start` node if one exists, otherwise the first
    /// node in authoring order (scripts created before the start-node
    /// concept), otherwise none.
    #[must_use]
    pub fn entry_node(&self) -> Option<&Node> {
        self.nodes
            .iter()
            .find(|n| matches!(n.body, NodeBody::Start))
            .or_else(|| self.nodes.first())
    }

    /// First edge out of `source` matching `handle`.
    ///
    /// A named handle matches exactly; `None` takes the first edge from
    /// the source regardless of its handle.
    #[must_use]
    pub fn edge_from(&self, source: &str, handle: Option<&str>) -> Option<&Edge> {
        self.edges.iter().find(|e| {
            e.source == source
                && match handle {
                    Some(h) => e.source_handle.as_deref() == Some(h),
                    None => true,
                }
        })
    }

    /// Resolve the next node from `current` along `handle`.
    ///
    /// `current == None` applies the entry policy. A matching edge whose
    /// target id has no node (dangling edge) resolves to `None`:
    /// terminal, not an error.
    #[must_use]
    pub fn next_node(&self, current: Option<&str>, handle: Option<&str>) -> Option<&Node> {
        match current {
            None => self.entry_node(),
            Some(source) => {
                let edge = self.edge_from(source, handle)?;
                self.node(&edge.target)
            }
        }
    }
}

fn decode_body(raw: &RawNode) -> Result<NodeBody, GraphError> {
    // The editor omits `data` entirely on some nodes; treat that as {}.
    let payload = if raw.data.is_null() {
        Value::Object(serde_json::Map::new())
    } else {
        raw.data.clone()
    };
    let node_data = |source| GraphError::NodeData {
        id: raw.id.clone(),
        source,
    };

    match raw.kind.as_str() {
        "start" => Ok(NodeBody::Start),
        "message" => {
            let d: MessageData = serde_json::from_value(payload).map_err(node_data)?;
            Ok(NodeBody::Message {
                text: d.text,
                interactive: d.interactive,
            })
        }
        "question" => {
            let d: QuestionData = serde_json::from_value(payload).map_err(node_data)?;
            Ok(NodeBody::Question {
                text: d.text,
                variable: non_empty(d.variable),
            })
        }
        "single_choice" => {
            let d: SingleChoiceData = serde_json::from_value(payload).map_err(node_data)?;
            Ok(NodeBody::SingleChoice {
                text: d.text,
                variable: non_empty(d.variable),
                options: d.options,
            })
        }
        "condition" => {
            let d: ConditionData = serde_json::from_value(payload).map_err(node_data)?;
            Ok(NodeBody::Condition {
                variable: non_empty(d.variable),
                operator: d.operator,
                value: value_to_string(&d.value),
            })
        }
        other => Err(GraphError::UnknownNodeType {
            id: raw.id.clone(),
            kind: other.to_string(),
        }),
    }
}

/// An empty `variable` field from the editor means "not set".
fn non_empty(v: Option<String>) -> Option<String> {
    v.filter(|s| !s.is_empty())
}

/// Authored check values may arrive as JSON numbers; comparisons are
/// string-based, so coerce here.
fn value_to_string(v: &Value) -> String {
    match v {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn graph(value: Value) -> GraphData {
        serde_json::from_value(value).expect("valid graph json")
    }

    #[test]
    fn parses_typed_nodes_with_defaults() {
        let data = graph(json!({
            "nodes": [
                {"id": "1", "type": "start"},
                {"id": "2", "type": "message", "data": {"text": "Hi"}},
                {"id": "3", "type": "question", "data": {"text": "Name?", "variable": "name"}},
                {"id": "4", "type": "condition", "data": {"variable": "age", "operator": "gt", "value": 18}}
            ],
            "edges": []
        }));
        let g = ScriptGraph::try_from(&data).unwrap();
        assert_eq!(g.nodes().len(), 4);
        assert_eq!(
            g.node("2").unwrap().body,
            NodeBody::Message {
                text: "Hi".into(),
                interactive: false
            }
        );
        // Numeric check values are coerced to strings.
        assert_eq!(
            g.node("4").unwrap().body,
            NodeBody::Condition {
                variable: Some("age".into()),
                operator: ConditionOp::Gt,
                value: "18".into()
            }
        );
    }

    #[test]
    fn duplicate_node_id_is_rejected() {
        let data = graph(json!({
            "nodes": [
                {"id": "1", "type": "start"},
                {"id": "1", "type": "message", "data": {}}
            ],
            "edges": []
        }));
        assert!(matches!(
            ScriptGraph::try_from(&data),
            Err(GraphError::DuplicateNodeId { id }) if id == "1"
        ));
    }

    #[test]
    fn unknown_node_type_is_rejected() {
        let data = graph(json!({
            "nodes": [{"id": "1", "type": "teleport", "data": {}}],
            "edges": []
        }));
        assert!(matches!(
            ScriptGraph::try_from(&data),
            Err(GraphError::UnknownNodeType { kind, .. }) if kind == "teleport"
        ));
    }

    #[test]
    fn edge_handle_accepts_both_spellings() {
        let camel: Edge =
            serde_json::from_value(json!({"source": "a", "target": "b", "sourceHandle": "true"}))
                .unwrap();
        let snake: Edge =
            serde_json::from_value(json!({"source": "a", "target": "b", "source_handle": "true"}))
                .unwrap();
        assert_eq!(camel, snake);
    }

    #[test]
    fn entry_policy_prefers_start_then_first_authored() {
        let with_start = graph(json!({
            "nodes": [
                {"id": "m", "type": "message", "data": {}},
                {"id": "s", "type": "start"}
            ],
            "edges": []
        }));
        let g = ScriptGraph::try_from(&with_start).unwrap();
        assert_eq!(g.entry_node().unwrap().id, "s");

        let without_start = graph(json!({
            "nodes": [
                {"id": "m1", "type": "message", "data": {}},
                {"id": "m2", "type": "message", "data": {}}
            ],
            "edges": []
        }));
        let g = ScriptGraph::try_from(&without_start).unwrap();
        assert_eq!(g.entry_node().unwrap().id, "m1");

        let empty = graph(json!({"nodes": [], "edges": []}));
        let g = ScriptGraph::try_from(&empty).unwrap();
        assert!(g.entry_node().is_none());
    }

    #[test]
    fn handle_matching_is_exact_and_wildcard_takes_first() {
        let data = graph(json!({
            "nodes": [
                {"id": "c", "type": "condition", "data": {}},
                {"id": "t", "type": "message", "data": {}},
                {"id": "f", "type": "message", "data": {}}
            ],
            "edges": [
                {"source": "c", "target": "t", "sourceHandle": "true"},
                {"source": "c", "target": "f", "sourceHandle": "false"}
            ]
        }));
        let g = ScriptGraph::try_from(&data).unwrap();
        assert_eq!(g.next_node(Some("c"), Some("true")).unwrap().id, "t");
        assert_eq!(g.next_node(Some("c"), Some("false")).unwrap().id, "f");
        // Case-sensitive: no match for "True".
        assert!(g.next_node(Some("c"), Some("True")).is_none());
        // Wildcard picks the first authored edge.
        assert_eq!(g.next_node(Some("c"), None).unwrap().id, "t");
    }

    #[test]
    fn first_matching_edge_wins_deterministically() {
        let data = graph(json!({
            "nodes": [
                {"id": "a", "type": "message", "data": {}},
                {"id": "b", "type": "message", "data": {}},
                {"id": "c", "type": "message", "data": {}}
            ],
            "edges": [
                {"source": "a", "target": "b"},
                {"source": "a", "target": "c"}
            ]
        }));
        let g = ScriptGraph::try_from(&data).unwrap();
        assert_eq!(g.next_node(Some("a"), None).unwrap().id, "b");
    }

    #[test]
    fn dangling_edge_target_is_terminal_not_an_error() {
        let data = graph(json!({
            "nodes": [{"id": "a", "type": "message", "data": {}}],
            "edges": [{"source": "a", "target": "ghost"}]
        }));
        let g = ScriptGraph::try_from(&data).unwrap();
        assert!(g.next_node(Some("a"), None).is_none());
    }
}
