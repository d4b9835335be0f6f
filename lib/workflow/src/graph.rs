//! Workflow graph implementation using petgraph.
//!
//! Workflows are directed acyclic graphs where nodes are
//! [`WorkflowNode`](crate::node::WorkflowNode)s and edges encode a
//! `depends_on` relationship: an edge from A to B means B depends on A,
//! so A must reach a terminal state before B may be dispatched. The graph
//! structure is stored as JSONB in the database for flexible schema
//! evolution.

use crate::edge::DependencyEdge;
use crate::error::GraphError;
use crate::node::{NodeId, WorkflowNode};
use petgraph::Direction;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A workflow graph using petgraph's directed graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowGraph {
    /// The underlying directed graph.
    #[serde(with = "graph_serde")]
    graph: DiGraph<WorkflowNode, DependencyEdge>,
    /// Map from NodeId to petgraph's NodeIndex for O(1) lookup.
    #[serde(skip)]
    node_index_map: HashMap<NodeId, NodeIndex>,
}

impl WorkflowGraph {
    /// Creates a new empty workflow graph.
    #[must_use]
    pub fn new() -> Self {
        Self {
            graph: DiGraph::new(),
            node_index_map: HashMap::new(),
        }
    }

    /// Builds a graph from a flat list of nodes, wiring edges from each
    /// node's `depends_on` set.
    ///
    /// # Errors
    ///
    /// Returns an error if a node depends on an id not present in `nodes`.
    pub fn from_nodes(nodes: Vec<WorkflowNode>) -> Result<Self, GraphError> {
        let mut graph = Self::new();
        for node in &nodes {
            graph.add_node(node.clone());
        }
        for node in &nodes {
            for dep in &node.depends_on {
                graph.add_dependency(*dep, node.id)?;
            }
        }
        Ok(graph)
    }

    /// Adds a node to the graph.
    ///
    /// Returns the node ID.
    pub fn add_node(&mut self, node: WorkflowNode) -> NodeId {
        let node_id = node.id;
        let index = self.graph.add_node(node);
        self.node_index_map.insert(node_id, index);
        node_id
    }

    /// Removes a node from the graph.
    ///
    /// Also removes all edges connected to this node. Petgraph invalidates
    /// node indices on removal, so callers must call
    /// [`rebuild_index_map`](Self::rebuild_index_map) afterward if they
    /// continue to reference other nodes by id across mutation boundaries;
    /// this method keeps `node_index_map` internally consistent for its own
    /// subsequent calls by rebuilding it immediately.
    pub fn remove_node(&mut self, node_id: NodeId) -> Option<WorkflowNode> {
        let index = self.node_index_map.remove(&node_id)?;
        let removed = self.graph.remove_node(index);
        self.rebuild_index_map();
        removed
    }

    /// Returns a reference to a node by its ID.
    #[must_use]
    pub fn get_node(&self, node_id: NodeId) -> Option<&WorkflowNode> {
        let index = self.node_index_map.get(&node_id)?;
        self.graph.node_weight(*index)
    }

    /// Returns a mutable reference to a node by its ID.
    pub fn get_node_mut(&mut self, node_id: NodeId) -> Option<&mut WorkflowNode> {
        let index = self.node_index_map.get(&node_id)?;
        self.graph.node_weight_mut(*index)
    }

    /// Adds a dependency edge: `dependent` waits on `dependency`.
    ///
    /// # Errors
    ///
    /// Returns an error if either node doesn't exist in the graph.
    pub fn add_dependency(&mut self, dependency: NodeId, dependent: NodeId) -> Result<(), GraphError> {
        let dep_index = self
            .node_index_map
            .get(&dependency)
            .ok_or(GraphError::NodeNotFound { node_id: dependency })?;
        let dependent_index = self
            .node_index_map
            .get(&dependent)
            .ok_or(GraphError::NodeNotFound { node_id: dependent })?;

        self.graph.add_edge(*dep_index, *dependent_index, DependencyEdge);
        Ok(())
    }

    /// Returns all nodes in the graph.
    pub fn nodes(&self) -> impl Iterator<Item = &WorkflowNode> {
        self.graph.node_weights()
    }

    /// Returns the number of nodes in the graph.
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    /// Returns the number of edges in the graph.
    #[must_use]
    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    /// Returns nodes that have no dependencies (entry points).
    pub fn entry_nodes(&self) -> Vec<&WorkflowNode> {
        self.graph
            .node_indices()
            .filter(|&idx| self.graph.edges_directed(idx, Direction::Incoming).count() == 0)
            .filter_map(|idx| self.graph.node_weight(idx))
            .collect()
    }

    /// Returns nodes that nothing depends on (terminal nodes).
    pub fn terminal_nodes(&self) -> Vec<&WorkflowNode> {
        self.graph
            .node_indices()
            .filter(|&idx| self.graph.edges_directed(idx, Direction::Outgoing).count() == 0)
            .filter_map(|idx| self.graph.node_weight(idx))
            .collect()
    }

    /// Returns the nodes that directly depend on the given node.
    pub fn dependents(&self, node_id: NodeId) -> Vec<&WorkflowNode> {
        let Some(&index) = self.node_index_map.get(&node_id) else {
            return Vec::new();
        };

        self.graph
            .edges_directed(index, Direction::Outgoing)
            .filter_map(|edge| self.graph.node_weight(edge.target()))
            .collect()
    }

    /// Returns the nodes the given node directly depends on.
    pub fn dependencies(&self, node_id: NodeId) -> Vec<&WorkflowNode> {
        let Some(&index) = self.node_index_map.get(&node_id) else {
            return Vec::new();
        };

        self.graph
            .edges_directed(index, Direction::Incoming)
            .filter_map(|edge| self.graph.node_weight(edge.source()))
            .collect()
    }

    /// Returns a topological order of node ids via Kahn's algorithm.
    ///
    /// # Errors
    ///
    /// Returns [`GraphError::CycleDetected`] if the graph is not a DAG.
    pub fn topological_order(&self) -> Result<Vec<NodeId>, GraphError> {
        let sorted = petgraph::algo::toposort(&self.graph, None)
            .map_err(|_| GraphError::CycleDetected)?;
        Ok(sorted
            .into_iter()
            .filter_map(|idx| self.graph.node_weight(idx).map(|n| n.id))
            .collect())
    }

    /// Validates the workflow graph.
    ///
    /// Checks that every `depends_on` reference resolves to a node present
    /// in the graph, and that the graph is acyclic.
    ///
    /// # Errors
    ///
    /// Returns an error describing the validation failure.
    pub fn validate(&self) -> Result<(), GraphError> {
        for node in self.nodes() {
            for dep in &node.depends_on {
                if self.get_node(*dep).is_none() {
                    return Err(GraphError::NodeNotFound { node_id: *dep });
                }
            }
        }

        if petgraph::algo::is_cyclic_directed(&self.graph) {
            return Err(GraphError::CycleDetected);
        }

        Ok(())
    }

    /// Rebuilds the node index map after deserialization or node removal.
    pub fn rebuild_index_map(&mut self) {
        self.node_index_map.clear();
        for index in self.graph.node_indices() {
            if let Some(node) = self.graph.node_weight(index) {
                self.node_index_map.insert(node.id, index);
            }
        }
    }
}

impl Default for WorkflowGraph {
    fn default() -> Self {
        Self::new()
    }
}

/// Custom serde for petgraph DiGraph.
mod graph_serde {
    use super::*;
    use serde::de::{MapAccess, Visitor};
    use serde::ser::SerializeStruct;

    pub fn serialize<S>(
        graph: &DiGraph<WorkflowNode, DependencyEdge>,
        serializer: S,
    ) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        let nodes: Vec<_> = graph.node_weights().cloned().collect();
        let edges: Vec<_> = graph
            .edge_references()
            .map(|e| {
                let source_id = graph.node_weight(e.source()).map(|n| n.id);
                let target_id = graph.node_weight(e.target()).map(|n| n.id);
                (source_id, target_id)
            })
            .collect();

        let mut state = serializer.serialize_struct("Graph", 2)?;
        state.serialize_field("nodes", &nodes)?;
        state.serialize_field("edges", &edges)?;
        state.end()
    }

    pub fn deserialize<'de, D>(
        deserializer: D,
    ) -> Result<DiGraph<WorkflowNode, DependencyEdge>, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        type EdgeTuple = (Option<NodeId>, Option<NodeId>);

        struct GraphVisitor;

        impl<'de> Visitor<'de> for GraphVisitor {
            type Value = DiGraph<WorkflowNode, DependencyEdge>;

            fn expecting(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
                formatter.write_str("a workflow graph with nodes and edges")
            }

            fn visit_map<M>(self, mut map: M) -> Result<Self::Value, M::Error>
            where
                M: MapAccess<'de>,
            {
                let mut nodes: Option<Vec<WorkflowNode>> = None;
                let mut edges: Option<Vec<EdgeTuple>> = None;

                while let Some(key) = map.next_key::<String>()? {
                    match key.as_str() {
                        "nodes" => nodes = Some(map.next_value()?),
                        "edges" => edges = Some(map.next_value()?),
                        _ => {
                            let _ = map.next_value::<serde::de::IgnoredAny>()?;
                        }
                    }
                }

                let nodes = nodes.unwrap_or_default();
                let edges = edges.unwrap_or_default();

                let mut graph = DiGraph::new();
                let mut id_to_index = HashMap::new();

                for node in nodes {
                    let id = node.id;
                    let index = graph.add_node(node);
                    id_to_index.insert(id, index);
                }

                for (source_id, target_id) in edges {
                    let (Some(source), Some(target)) = (source_id, target_id) else {
                        continue;
                    };
                    let (Some(&source_idx), Some(&target_idx)) =
                        (id_to_index.get(&source), id_to_index.get(&target))
                    else {
                        continue;
                    };
                    graph.add_edge(source_idx, target_idx, DependencyEdge);
                }

                Ok(graph)
            }
        }

        deserializer.deserialize_struct("Graph", &["nodes", "edges"], GraphVisitor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use loomwright_core::AgentId;

    fn create_node(name: &str) -> WorkflowNode {
        WorkflowNode::new(name, AgentId::new(), "run")
    }

    #[test]
    fn add_and_get_node() {
        let mut graph = WorkflowGraph::new();
        let node = create_node("trigger");
        let node_id = node.id;
        graph.add_node(node);

        let retrieved = graph.get_node(node_id);
        assert!(retrieved.is_some());
        assert_eq!(retrieved.unwrap().name, "trigger");
    }

    #[test]
    fn from_nodes_wires_depends_on_edges() {
        let upstream = create_node("upstream");
        let upstream_id = upstream.id;
        let downstream = create_node("downstream").depends_on(upstream_id);

        let graph = WorkflowGraph::from_nodes(vec![upstream, downstream.clone()]).unwrap();
        assert_eq!(graph.node_count(), 2);
        assert_eq!(graph.edge_count(), 1);
        assert_eq!(graph.dependents(upstream_id)[0].id, downstream.id);
    }

    #[test]
    fn from_nodes_rejects_dangling_dependency() {
        let dangling = NodeId::new();
        let node = create_node("orphan").depends_on(dangling);
        let result = WorkflowGraph::from_nodes(vec![node]);
        assert!(result.is_err());
    }

    #[test]
    fn entry_nodes_returns_nodes_without_dependencies() {
        let upstream = create_node("upstream");
        let upstream_id = upstream.id;
        let downstream = create_node("downstream").depends_on(upstream_id);

        let graph = WorkflowGraph::from_nodes(vec![upstream, downstream]).unwrap();
        let entries = graph.entry_nodes();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].name, "upstream");
    }

    #[test]
    fn topological_order_respects_dependencies() {
        let upstream = create_node("upstream");
        let upstream_id = upstream.id;
        let downstream = create_node("downstream").depends_on(upstream_id);
        let downstream_id = downstream.id;

        let graph = WorkflowGraph::from_nodes(vec![downstream, upstream]).unwrap();
        let order = graph.topological_order().unwrap();
        let upstream_pos = order.iter().position(|id| *id == upstream_id).unwrap();
        let downstream_pos = order.iter().position(|id| *id == downstream_id).unwrap();
        assert!(upstream_pos < downstream_pos);
    }

    #[test]
    fn validate_detects_cycle() {
        let mut graph = WorkflowGraph::new();
        let a = create_node("a");
        let b = create_node("b");
        let a_id = a.id;
        let b_id = b.id;
        graph.add_node(a);
        graph.add_node(b);
        graph.add_dependency(a_id, b_id).unwrap();
        graph.add_dependency(b_id, a_id).unwrap();

        assert_eq!(graph.validate(), Err(GraphError::CycleDetected));
    }

    #[test]
    fn graph_serde_roundtrip() {
        let upstream = create_node("upstream");
        let upstream_id = upstream.id;
        let downstream = create_node("downstream").depends_on(upstream_id);

        let graph = WorkflowGraph::from_nodes(vec![upstream, downstream]).unwrap();

        let json = serde_json::to_string(&graph).expect("serialize");
        let mut parsed: WorkflowGraph = serde_json::from_str(&json).expect("deserialize");
        parsed.rebuild_index_map();

        assert_eq!(parsed.node_count(), 2);
        assert_eq!(parsed.edge_count(), 1);
        assert!(parsed.get_node(upstream_id).is_some());
    }
}
