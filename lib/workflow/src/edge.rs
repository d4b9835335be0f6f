//! Dependency edges for workflow graphs.
//!
//! Unlike the port-wired graphs of a dataflow engine, a dependency edge
//! carries no payload: it only asserts that the target node must wait for
//! the source node to reach a terminal state. Data flows through
//! [`input_template`](crate::node::WorkflowNode::input_template)
//! placeholders, not edge weights.
use serde::{Deserialize, Serialize};

/// A dependency edge between two workflow nodes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencyEdge;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dependency_edge_serde_roundtrip() {
        let edge = DependencyEdge;
        let json = serde_json::to_string(&edge).expect("serialize");
        let parsed: DependencyEdge = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(edge, parsed);
    }
}
