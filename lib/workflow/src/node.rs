//! Workflow node types.
//!
//! A node is one step of a workflow graph: a reference to an
//! [`Agent`](crate::agent::Agent) capability, an input template that gets
//! resolved against upstream outputs at dispatch time, and the set of
//! node ids it depends on.

use loomwright_core::AgentId;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::BTreeSet;
use ulid::Ulid;

/// A unique identifier for a node within a workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(Ulid);

impl NodeId {
    /// Creates a new random node ID.
    #[must_use]
    pub fn new() -> Self {
        Self(Ulid::new())
    }

    /// Creates a node ID from a ULID.
    #[must_use]
    pub const fn from_ulid(ulid: Ulid) -> Self {
        Self(ulid)
    }
}

impl Default for NodeId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "node_{}", self.0)
    }
}

/// A single node in a workflow graph.
///
/// `input_template` is an arbitrary JSON value that may contain
/// `{{node.output.path}}` placeholders referring to the outputs of nodes
/// named in `depends_on`; the [`TemplateResolver`](crate::template) fills
/// them in immediately before dispatch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowNode {
    /// Unique identifier for this node within the workflow.
    pub id: NodeId,
    /// Human-readable name for this node.
    pub name: String,
    /// The agent this node dispatches to.
    pub agent_id: AgentId,
    /// The capability name on that agent to invoke.
    pub action: String,
    /// Input template, resolved against upstream outputs before dispatch.
    pub input_template: JsonValue,
    /// Node ids that must complete before this node becomes ready.
    pub depends_on: BTreeSet<NodeId>,
    /// Whether this node must clear human approval before dispatch, in
    /// addition to any approval requirement carried by the agent itself.
    pub approval_required: bool,
}

impl WorkflowNode {
    /// Creates a new node with no dependencies and an empty input template.
    #[must_use]
    pub fn new(name: impl Into<String>, agent_id: AgentId, action: impl Into<String>) -> Self {
        Self {
            id: NodeId::new(),
            name: name.into(),
            agent_id,
            action: action.into(),
            input_template: JsonValue::Null,
            depends_on: BTreeSet::new(),
            approval_required: false,
        }
    }

    /// Creates a new node with a specific id, useful when reconstructing
    /// a workflow from storage.
    #[must_use]
    pub fn with_id(
        id: NodeId,
        name: impl Into<String>,
        agent_id: AgentId,
        action: impl Into<String>,
    ) -> Self {
        Self {
            id,
            name: name.into(),
            agent_id,
            action: action.into(),
            input_template: JsonValue::Null,
            depends_on: BTreeSet::new(),
            approval_required: false,
        }
    }

    /// Sets the input template.
    #[must_use]
    pub fn with_input_template(mut self, input_template: JsonValue) -> Self {
        self.input_template = input_template;
        self
    }

    /// Adds a dependency on another node.
    #[must_use]
    pub fn depends_on(mut self, node_id: NodeId) -> Self {
        self.depends_on.insert(node_id);
        self
    }

    /// Marks this node as requiring approval before dispatch.
    #[must_use]
    pub fn with_approval_required(mut self, approval_required: bool) -> Self {
        self.approval_required = approval_required;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_id_display() {
        let id = NodeId::new();
        assert!(id.to_string().starts_with("node_"));
    }

    #[test]
    fn builder_accumulates_dependencies() {
        let upstream = NodeId::new();
        let node = WorkflowNode::new("step", AgentId::new(), "run")
            .depends_on(upstream)
            .with_approval_required(true);

        assert!(node.depends_on.contains(&upstream));
        assert!(node.approval_required);
    }

    #[test]
    fn node_serde_roundtrip() {
        let node = WorkflowNode::new("step", AgentId::new(), "run")
            .with_input_template(serde_json::json!({ "path": "{{trigger.output.path}}" }));
        let json = serde_json::to_string(&node).expect("serialize");
        let parsed: WorkflowNode = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(node, parsed);
    }
}
