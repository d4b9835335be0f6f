//! Remaining work graph for workflow execution.
//!
//! Execution tracks a "remaining work graph" derived from the workflow's
//! dependency graph:
//! - Start with the full graph.
//! - Completed or skipped nodes are removed, unblocking their dependents.
//! - Failed nodes get a self-edge so they never become ready again and
//!   permanently block their dependents.
//! - A node with zero incoming edges, not currently executing, is ready.
//! - Execution is complete once nothing is ready and nothing is executing.

use crate::execution::AgentRunStatus;
use crate::graph::WorkflowGraph;
use crate::node::NodeId;
use petgraph::Direction;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use std::collections::{HashMap, HashSet};

/// Tracks which nodes of a run still need to execute.
#[derive(Debug, Clone)]
pub struct RemainingWorkGraph {
    graph: DiGraph<NodeId, ()>,
    node_to_index: HashMap<NodeId, NodeIndex>,
    executing: HashSet<NodeId>,
    failed: HashSet<NodeId>,
}

impl RemainingWorkGraph {
    /// Creates a new remaining work graph from a workflow graph.
    ///
    /// Initially every node is pending.
    #[must_use]
    pub fn from_workflow(workflow_graph: &WorkflowGraph) -> Self {
        let mut graph = DiGraph::new();
        let mut node_to_index = HashMap::new();

        for node in workflow_graph.nodes() {
            let idx = graph.add_node(node.id);
            node_to_index.insert(node.id, idx);
        }

        for node in workflow_graph.nodes() {
            let source_idx = node_to_index[&node.id];
            for dependent in workflow_graph.dependents(node.id) {
                let target_idx = node_to_index[&dependent.id];
                graph.add_edge(source_idx, target_idx, ());
            }
        }

        Self {
            graph,
            node_to_index,
            executing: HashSet::new(),
            failed: HashSet::new(),
        }
    }

    /// Marks a node as currently executing.
    pub fn mark_executing(&mut self, node_id: NodeId) {
        if self.node_to_index.contains_key(&node_id) {
            self.executing.insert(node_id);
        }
    }

    /// Marks a node as completed and removes it from the graph, unblocking
    /// its dependents.
    pub fn mark_completed(&mut self, node_id: NodeId) {
        self.executing.remove(&node_id);
        if let Some(idx) = self.node_to_index.remove(&node_id) {
            self.graph.remove_node(idx);
            self.rebuild_index_map();
        }
    }

    /// Marks a node as failed: it gets a self-edge so it can never become
    /// ready again, and stays in the graph to permanently block descendants.
    pub fn mark_failed(&mut self, node_id: NodeId) {
        self.executing.remove(&node_id);
        if let Some(&idx) = self.node_to_index.get(&node_id) {
            self.graph.add_edge(idx, idx, ());
            self.failed.insert(node_id);
        }
    }

    /// Marks a node as skipped and removes it from the graph, same as
    /// completion — skipped nodes unblock their dependents.
    pub fn mark_skipped(&mut self, node_id: NodeId) {
        self.mark_completed(node_id);
    }

    /// Returns nodes with zero incoming edges that are not already
    /// executing.
    #[must_use]
    pub fn ready_nodes(&self) -> Vec<NodeId> {
        self.graph
            .node_indices()
            .filter(|&idx| self.graph.edges_directed(idx, Direction::Incoming).count() == 0)
            .filter_map(|idx| {
                let node_id = self.graph.node_weight(idx)?;
                if self.executing.contains(node_id) {
                    return None;
                }
                Some(*node_id)
            })
            .collect()
    }

    /// Returns true if nothing is ready and nothing is executing.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.executing.is_empty() && self.ready_nodes().is_empty()
    }

    /// Returns true if any node has failed.
    #[must_use]
    pub fn has_failures(&self) -> bool {
        !self.failed.is_empty()
    }

    /// Returns the set of failed node IDs.
    #[must_use]
    pub fn failed_nodes(&self) -> &HashSet<NodeId> {
        &self.failed
    }

    /// Returns the set of nodes currently executing.
    #[must_use]
    pub fn executing_nodes(&self) -> &HashSet<NodeId> {
        &self.executing
    }

    /// Returns the number of nodes remaining in the graph, including
    /// executing and permanently-blocked (failed) nodes.
    #[must_use]
    pub fn remaining_count(&self) -> usize {
        self.graph.node_count()
    }

    /// Returns true if the given node is still in the remaining work graph.
    #[must_use]
    pub fn contains(&self, node_id: NodeId) -> bool {
        self.node_to_index.contains_key(&node_id)
    }

    /// Returns the current status of a node as seen by the work graph.
    #[must_use]
    pub fn node_status(&self, node_id: NodeId) -> AgentRunStatus {
        if !self.contains(node_id) {
            return AgentRunStatus::Success;
        }
        if self.executing.contains(&node_id) {
            return AgentRunStatus::Running;
        }
        if self.failed.contains(&node_id) {
            return AgentRunStatus::Failed;
        }
        if self.ready_nodes().contains(&node_id) {
            return AgentRunStatus::Pending;
        }
        AgentRunStatus::Pending
    }

    /// Returns all nodes reachable from a failed node (excluding the
    /// failed node itself) — these get marked SKIPPED by the scheduler.
    #[must_use]
    pub fn blocked_nodes(&self) -> Vec<NodeId> {
        let mut blocked = HashSet::new();

        for &failed_id in &self.failed {
            if let Some(&start_idx) = self.node_to_index.get(&failed_id) {
                let mut to_visit = vec![start_idx];
                while let Some(idx) = to_visit.pop() {
                    for edge in self.graph.edges_directed(idx, Direction::Outgoing) {
                        let target_idx = edge.target();
                        if target_idx == idx {
                            continue;
                        }
                        if let Some(&target_id) = self.graph.node_weight(target_idx)
                            && !self.failed.contains(&target_id)
                            && blocked.insert(target_id)
                        {
                            to_visit.push(target_idx);
                        }
                    }
                }
            }
        }

        blocked.into_iter().collect()
    }

    fn rebuild_index_map(&mut self) {
        self.node_to_index.clear();
        for idx in self.graph.node_indices() {
            if let Some(&node_id) = self.graph.node_weight(idx) {
                self.node_to_index.insert(node_id, idx);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use loomwright_core::AgentId;

    fn create_node(name: &str) -> crate::node::WorkflowNode {
        crate::node::WorkflowNode::new(name, AgentId::new(), "run")
    }

    #[test]
    fn empty_workflow_is_immediately_complete() {
        let workflow = WorkflowGraph::new();
        let work = RemainingWorkGraph::from_workflow(&workflow);

        assert!(work.is_complete());
        assert!(!work.has_failures());
        assert_eq!(work.remaining_count(), 0);
    }

    #[test]
    fn single_node_workflow() {
        let mut workflow = WorkflowGraph::new();
        let trigger = create_node("trigger");
        let trigger_id = trigger.id;
        workflow.add_node(trigger);

        let mut work = RemainingWorkGraph::from_workflow(&workflow);

        assert_eq!(work.ready_nodes(), vec![trigger_id]);
        assert!(!work.is_complete());

        work.mark_executing(trigger_id);
        assert!(work.ready_nodes().is_empty());
        assert!(!work.is_complete());

        work.mark_completed(trigger_id);
        assert!(work.is_complete());
        assert_eq!(work.remaining_count(), 0);
    }

    #[test]
    fn linear_workflow_execution() {
        let node_a = create_node("a");
        let id_a = node_a.id;
        let node_b = create_node("b").depends_on(id_a);
        let id_b = node_b.id;
        let node_c = create_node("c").depends_on(id_b);
        let id_c = node_c.id;

        let workflow = WorkflowGraph::from_nodes(vec![node_a, node_b, node_c]).unwrap();
        let mut work = RemainingWorkGraph::from_workflow(&workflow);

        assert_eq!(work.ready_nodes(), vec![id_a]);

        work.mark_executing(id_a);
        work.mark_completed(id_a);
        assert_eq!(work.ready_nodes(), vec![id_b]);

        work.mark_executing(id_b);
        work.mark_completed(id_b);
        assert_eq!(work.ready_nodes(), vec![id_c]);

        work.mark_executing(id_c);
        work.mark_completed(id_c);
        assert!(work.is_complete());
    }

    #[test]
    fn parallel_workflow_execution() {
        let node_a = create_node("a");
        let id_a = node_a.id;
        let node_b = create_node("b").depends_on(id_a);
        let id_b = node_b.id;
        let node_c = create_node("c").depends_on(id_a);
        let id_c = node_c.id;

        let workflow = WorkflowGraph::from_nodes(vec![node_a, node_b, node_c]).unwrap();
        let mut work = RemainingWorkGraph::from_workflow(&workflow);

        work.mark_executing(id_a);
        work.mark_completed(id_a);

        let ready = work.ready_nodes();
        assert_eq!(ready.len(), 2);
        assert!(ready.contains(&id_b));
        assert!(ready.contains(&id_c));
    }

    #[test]
    fn join_waits_for_all_predecessors() {
        let node_a = create_node("a");
        let id_a = node_a.id;
        let node_b = create_node("b").depends_on(id_a);
        let id_b = node_b.id;
        let node_c = create_node("c").depends_on(id_a);
        let id_c = node_c.id;
        let node_d = create_node("d").depends_on(id_b).depends_on(id_c);
        let id_d = node_d.id;

        let workflow = WorkflowGraph::from_nodes(vec![node_a, node_b, node_c, node_d]).unwrap();
        let mut work = RemainingWorkGraph::from_workflow(&workflow);

        work.mark_executing(id_a);
        work.mark_completed(id_a);

        let ready = work.ready_nodes();
        assert!(ready.contains(&id_b));
        assert!(ready.contains(&id_c));
        assert!(!ready.contains(&id_d));

        work.mark_executing(id_b);
        work.mark_completed(id_b);

        let ready = work.ready_nodes();
        assert!(ready.contains(&id_c));
        assert!(!ready.contains(&id_d));

        work.mark_executing(id_c);
        work.mark_completed(id_c);

        assert_eq!(work.ready_nodes(), vec![id_d]);
    }

    #[test]
    fn failed_node_blocks_downstream() {
        let node_a = create_node("a");
        let id_a = node_a.id;
        let node_b = create_node("b").depends_on(id_a);
        let id_b = node_b.id;
        let node_c = create_node("c").depends_on(id_b);
        let id_c = node_c.id;

        let workflow = WorkflowGraph::from_nodes(vec![node_a, node_b, node_c]).unwrap();
        let mut work = RemainingWorkGraph::from_workflow(&workflow);

        work.mark_executing(id_a);
        work.mark_completed(id_a);

        work.mark_executing(id_b);
        work.mark_failed(id_b);

        assert!(work.is_complete());
        assert!(work.has_failures());
        assert!(work.failed_nodes().contains(&id_b));

        let blocked = work.blocked_nodes();
        assert!(blocked.contains(&id_c));
    }

    #[test]
    fn partial_completion_with_independent_branches() {
        let node_a = create_node("a");
        let id_a = node_a.id;
        let node_b = create_node("b").depends_on(id_a);
        let id_b = node_b.id;
        let node_c = create_node("c").depends_on(id_b);
        let id_c = node_c.id;
        let node_d = create_node("d");
        let id_d = node_d.id;
        let node_e = create_node("e").depends_on(id_d);
        let id_e = node_e.id;
        let node_f = create_node("f").depends_on(id_e);
        let id_f = node_f.id;

        let workflow =
            WorkflowGraph::from_nodes(vec![node_a, node_b, node_c, node_d, node_e, node_f]).unwrap();
        let mut work = RemainingWorkGraph::from_workflow(&workflow);

        let ready = work.ready_nodes();
        assert!(ready.contains(&id_a));
        assert!(ready.contains(&id_d));

        work.mark_executing(id_a);
        work.mark_completed(id_a);
        work.mark_executing(id_b);
        work.mark_failed(id_b);

        work.mark_executing(id_d);
        work.mark_completed(id_d);
        work.mark_executing(id_e);
        work.mark_completed(id_e);
        work.mark_executing(id_f);
        work.mark_completed(id_f);

        assert!(work.is_complete());
        assert!(work.has_failures());
        assert!(work.blocked_nodes().contains(&id_c));
    }

    #[test]
    fn node_status_tracking() {
        let node_a = create_node("trigger");
        let trigger_id = node_a.id;
        let node_b = create_node("ai").depends_on(trigger_id);
        let ai_id = node_b.id;

        let workflow = WorkflowGraph::from_nodes(vec![node_a, node_b]).unwrap();
        let mut work = RemainingWorkGraph::from_workflow(&workflow);

        assert_eq!(work.node_status(trigger_id), AgentRunStatus::Pending);
        assert_eq!(work.node_status(ai_id), AgentRunStatus::Pending);

        work.mark_executing(trigger_id);
        assert_eq!(work.node_status(trigger_id), AgentRunStatus::Running);

        work.mark_completed(trigger_id);
        assert_eq!(work.node_status(trigger_id), AgentRunStatus::Success);
        assert_eq!(work.node_status(ai_id), AgentRunStatus::Pending);
    }
}
