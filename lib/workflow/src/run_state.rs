//! Run state reconstruction from events.
//!
//! The [`ExecutionEvent`] log is the source of truth for a run's state.
//! On crash recovery, state is reconstructed by replaying events rather
//! than trusting any cached snapshot.
//!
//! This module provides:
//! - [`RunState`]: the reconstructed state of a workflow run
//! - [`RunStateBuilder`]: replays an event stream into a [`RunState`]

use crate::approval::{ApprovalStatus, WorkflowApproval};
use crate::execution::{AgentRun, AgentRunStatus, ExecutionEvent, RunStatus, WorkflowRun};
use crate::graph::WorkflowGraph;
use crate::node::NodeId;
use crate::remaining_work::RemainingWorkGraph;
use loomwright_core::ApprovalId;
use std::collections::HashMap;

/// Complete reconstructed state of a workflow run.
#[derive(Debug, Clone)]
pub struct RunState {
    /// The run's own record.
    pub run: WorkflowRun,
    /// Per-node invocation records, keyed by node id.
    pub agent_runs: HashMap<NodeId, AgentRun>,
    /// Approvals raised for this run, keyed by approval id.
    pub approvals: HashMap<ApprovalId, WorkflowApproval>,
    /// The remaining work graph driving scheduling decisions.
    remaining_work: RemainingWorkGraph,
}

impl RunState {
    /// Returns nodes that are ready to dispatch.
    #[must_use]
    pub fn ready_nodes(&self) -> Vec<NodeId> {
        self.remaining_work.ready_nodes()
    }

    /// Returns true if the run has reached a terminal status or there is
    /// no more work left to schedule.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.run.status.is_terminal() || self.remaining_work.is_complete()
    }

    /// Returns true if any node in this run has failed.
    #[must_use]
    pub fn has_failures(&self) -> bool {
        self.remaining_work.has_failures()
    }

    /// Returns the remaining work graph for inspection.
    #[must_use]
    pub fn remaining_work(&self) -> &RemainingWorkGraph {
        &self.remaining_work
    }

    /// Returns the pending approvals for this run.
    #[must_use]
    pub fn pending_approvals(&self) -> Vec<&WorkflowApproval> {
        self.approvals.values().filter(|a| a.status == ApprovalStatus::Pending).collect()
    }
}

/// Reconstructs [`RunState`] by replaying an [`ExecutionEvent`] stream
/// against a workflow's dependency graph.
pub struct RunStateBuilder {
    workflow_graph: WorkflowGraph,
}

impl RunStateBuilder {
    /// Creates a new builder scoped to the given workflow graph.
    #[must_use]
    pub fn new(workflow_graph: WorkflowGraph) -> Self {
        Self { workflow_graph }
    }

    /// Reconstructs run state from a sequence of events, earliest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the event sequence does not start with
    /// `RunQueued`, contains a duplicate `RunQueued`, or references a node
    /// absent from the workflow graph.
    pub fn build_from_events(
        &self,
        events: impl IntoIterator<Item = ExecutionEvent>,
    ) -> Result<RunState, RunStateError> {
        let mut events_iter = events.into_iter();

        let first_event = events_iter.next().ok_or(RunStateError::NoEvents)?;
        let (run_id, workflow_id, trigger, context, queued_at) = match first_event {
            ExecutionEvent::RunQueued { run_id, workflow_id, trigger, context, timestamp } => {
                (run_id, workflow_id, trigger, context, timestamp)
            }
            _ => return Err(RunStateError::MissingRunQueued),
        };

        let remaining_work = RemainingWorkGraph::from_workflow(&self.workflow_graph);

        let mut agent_runs = HashMap::new();
        for node in self.workflow_graph.nodes() {
            agent_runs.insert(node.id, AgentRun::new(run_id, node.id, node.agent_id, 0));
        }

        let mut state = RunState {
            run: WorkflowRun {
                id: run_id,
                workflow_id,
                trigger,
                context,
                status: RunStatus::Pending,
                queued_at,
                started_at: None,
                finished_at: None,
            },
            agent_runs,
            approvals: HashMap::new(),
            remaining_work,
        };

        for event in events_iter {
            apply_event(&mut state, event)?;
        }

        Ok(state)
    }
}

fn apply_event(state: &mut RunState, event: ExecutionEvent) -> Result<(), RunStateError> {
    match event {
        ExecutionEvent::RunQueued { .. } => return Err(RunStateError::DuplicateRunQueued),
        ExecutionEvent::RunStarted { timestamp, .. } => {
            state.run.status = RunStatus::Running;
            state.run.started_at = Some(timestamp);
        }
        ExecutionEvent::AgentStarted { node_id, agent_id, resolved_input, attempt, timestamp, .. } => {
            state.remaining_work.mark_executing(node_id);
            let agent_run = state
                .agent_runs
                .get_mut(&node_id)
                .ok_or_else(|| RunStateError::UnknownNode { node_id: node_id.to_string() })?;
            agent_run.agent_id = agent_id;
            agent_run.status = AgentRunStatus::Running;
            agent_run.resolved_input = Some(resolved_input);
            agent_run.started_at = Some(timestamp);
            agent_run.attempt = attempt;
        }
        ExecutionEvent::AgentSucceeded { node_id, output, timestamp } => {
            state.remaining_work.mark_completed(node_id);
            let agent_run = state
                .agent_runs
                .get_mut(&node_id)
                .ok_or_else(|| RunStateError::UnknownNode { node_id: node_id.to_string() })?;
            agent_run.status = AgentRunStatus::Success;
            agent_run.output = Some(output);
            agent_run.finished_at = Some(timestamp);
        }
        ExecutionEvent::AgentFailed { node_id, error, timestamp } => {
            state.remaining_work.mark_failed(node_id);
            let agent_run = state
                .agent_runs
                .get_mut(&node_id)
                .ok_or_else(|| RunStateError::UnknownNode { node_id: node_id.to_string() })?;
            agent_run.status = AgentRunStatus::Failed;
            agent_run.error = Some(error);
            agent_run.finished_at = Some(timestamp);
        }
        ExecutionEvent::NodeSkipped { node_id, timestamp } => {
            state.remaining_work.mark_skipped(node_id);
            if let Some(agent_run) = state.agent_runs.get_mut(&node_id) {
                agent_run.status = AgentRunStatus::Skipped;
                agent_run.finished_at = Some(timestamp);
            }
        }
        ExecutionEvent::ApprovalRequested { run_id, node_id, approval_id, timestamp } => {
            state.run.status = RunStatus::WaitingApproval;
            state.approvals.insert(
                approval_id,
                WorkflowApproval {
                    id: approval_id,
                    run_id,
                    node_id,
                    status: ApprovalStatus::Pending,
                    requested_at: timestamp,
                    responded_at: None,
                    responded_by: None,
                    notes: None,
                },
            );
        }
        ExecutionEvent::ApprovalResolved { approval_id, approved, timestamp } => {
            let approval = state
                .approvals
                .get_mut(&approval_id)
                .ok_or(RunStateError::UnknownApproval { approval_id })?;
            approval.status = if approved { ApprovalStatus::Approved } else { ApprovalStatus::Rejected };
            approval.responded_at = Some(timestamp);

            let still_waiting = state.approvals.values().any(|a| a.status == ApprovalStatus::Pending);
            if !still_waiting && state.run.status == RunStatus::WaitingApproval {
                state.run.status = RunStatus::Running;
            }
        }
        ExecutionEvent::RunSucceeded { timestamp, .. } => {
            state.run.status = RunStatus::Success;
            state.run.finished_at = Some(timestamp);
        }
        ExecutionEvent::RunFailed { timestamp, .. } => {
            state.run.status = RunStatus::Failed;
            state.run.finished_at = Some(timestamp);
        }
        ExecutionEvent::RunCancelled { timestamp, .. } => {
            state.run.status = RunStatus::Cancelled;
            state.run.finished_at = Some(timestamp);
        }
    }
    Ok(())
}

/// Errors that can occur while reconstructing run state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunStateError {
    /// No events were provided.
    NoEvents,
    /// The first event was not `RunQueued`.
    MissingRunQueued,
    /// A second `RunQueued` event was encountered.
    DuplicateRunQueued,
    /// An event referenced a node absent from the workflow graph.
    UnknownNode { node_id: String },
    /// An `ApprovalResolved` event referenced an unknown approval.
    UnknownApproval { approval_id: ApprovalId },
}

impl std::fmt::Display for RunStateError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NoEvents => write!(f, "no events provided"),
            Self::MissingRunQueued => write!(f, "first event must be RunQueued"),
            Self::DuplicateRunQueued => write!(f, "duplicate RunQueued event"),
            Self::UnknownNode { node_id } => write!(f, "unknown node: {node_id}"),
            Self::UnknownApproval { approval_id } => write!(f, "unknown approval: {approval_id}"),
        }
    }
}

impl std::error::Error for RunStateError {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::WorkflowNode;
    use crate::trigger::RunTrigger;
    use loomwright_core::AgentId;

    fn create_simple_workflow() -> (WorkflowGraph, NodeId, NodeId) {
        let node_a = WorkflowNode::new("a", AgentId::new(), "run");
        let id_a = node_a.id;
        let node_b = WorkflowNode::new("b", AgentId::new(), "run").depends_on(id_a);
        let id_b = node_b.id;

        let graph = WorkflowGraph::from_nodes(vec![node_a, node_b]).unwrap();
        (graph, id_a, id_b)
    }

    #[test]
    fn build_from_run_queued_only() {
        let (graph, id_a, _id_b) = create_simple_workflow();
        let builder = RunStateBuilder::new(graph);

        let run_id = loomwright_core::WorkflowRunId::new();
        let workflow_id = loomwright_core::WorkflowId::new();
        let timestamp = chrono::Utc::now();

        let events = vec![ExecutionEvent::RunQueued {
            run_id,
            workflow_id,
            trigger: RunTrigger::Manual,
            context: serde_json::json!({}),
            timestamp,
        }];

        let state = builder.build_from_events(events).unwrap();

        assert_eq!(state.run.id, run_id);
        assert_eq!(state.run.workflow_id, workflow_id);
        assert_eq!(state.run.status, RunStatus::Pending);
        assert!(state.run.started_at.is_none());
        assert!(!state.is_complete());

        let ready = state.ready_nodes();
        assert_eq!(ready, vec![id_a]);
    }

    #[test]
    fn build_from_started_run() {
        let (graph, id_a, id_b) = create_simple_workflow();
        let builder = RunStateBuilder::new(graph);

        let run_id = loomwright_core::WorkflowRunId::new();
        let workflow_id = loomwright_core::WorkflowId::new();
        let t1 = chrono::Utc::now();
        let t2 = t1 + chrono::Duration::seconds(1);
        let t3 = t2 + chrono::Duration::seconds(1);

        let events = vec![
            ExecutionEvent::RunQueued {
                run_id,
                workflow_id,
                trigger: RunTrigger::Manual,
                context: serde_json::json!({}),
                timestamp: t1,
            },
            ExecutionEvent::RunStarted { run_id, timestamp: t2 },
            ExecutionEvent::AgentStarted {
                run_id,
                node_id: id_a,
                agent_id: loomwright_core::AgentId::new(),
                resolved_input: serde_json::json!({}),
                attempt: 1,
                timestamp: t3,
            },
        ];

        let state = builder.build_from_events(events).unwrap();

        assert_eq!(state.run.status, RunStatus::Running);
        assert!(state.run.started_at.is_some());
        assert!(!state.ready_nodes().contains(&id_a));
        assert!(state.remaining_work().executing_nodes().contains(&id_a));
        assert_eq!(state.agent_runs.get(&id_b).unwrap().status, AgentRunStatus::Pending);
    }

    #[test]
    fn build_from_partial_execution() {
        let (graph, id_a, id_b) = create_simple_workflow();
        let builder = RunStateBuilder::new(graph);

        let run_id = loomwright_core::WorkflowRunId::new();
        let workflow_id = loomwright_core::WorkflowId::new();
        let t1 = chrono::Utc::now();

        let events = vec![
            ExecutionEvent::RunQueued {
                run_id,
                workflow_id,
                trigger: RunTrigger::Manual,
                context: serde_json::json!({}),
                timestamp: t1,
            },
            ExecutionEvent::RunStarted { run_id, timestamp: t1 },
            ExecutionEvent::AgentStarted {
                run_id,
                node_id: id_a,
                agent_id: loomwright_core::AgentId::new(),
                resolved_input: serde_json::json!({}),
                attempt: 1,
                timestamp: t1,
            },
            ExecutionEvent::AgentSucceeded {
                run_id,
                node_id: id_a,
                output: serde_json::json!({"result": "ok"}),
                timestamp: t1,
            },
        ];

        let state = builder.build_from_events(events).unwrap();

        let ready = state.ready_nodes();
        assert_eq!(ready, vec![id_b]);

        let a_run = state.agent_runs.get(&id_a).unwrap();
        assert_eq!(a_run.status, AgentRunStatus::Success);
        assert_eq!(a_run.output, Some(serde_json::json!({"result": "ok"})));
    }

    #[test]
    fn build_from_completed_run() {
        let (graph, id_a, id_b) = create_simple_workflow();
        let builder = RunStateBuilder::new(graph);

        let run_id = loomwright_core::WorkflowRunId::new();
        let workflow_id = loomwright_core::WorkflowId::new();
        let t1 = chrono::Utc::now();
        let agent_a = loomwright_core::AgentId::new();
        let agent_b = loomwright_core::AgentId::new();

        let events = vec![
            ExecutionEvent::RunQueued {
                run_id,
                workflow_id,
                trigger: RunTrigger::Manual,
                context: serde_json::json!({}),
                timestamp: t1,
            },
            ExecutionEvent::RunStarted { run_id, timestamp: t1 },
            ExecutionEvent::AgentStarted {
                run_id,
                node_id: id_a,
                agent_id: agent_a,
                resolved_input: serde_json::json!({}),
                attempt: 1,
                timestamp: t1,
            },
            ExecutionEvent::AgentSucceeded { run_id, node_id: id_a, output: serde_json::json!({}), timestamp: t1 },
            ExecutionEvent::AgentStarted {
                run_id,
                node_id: id_b,
                agent_id: agent_b,
                resolved_input: serde_json::json!({"from": "a"}),
                attempt: 1,
                timestamp: t1,
            },
            ExecutionEvent::AgentSucceeded { run_id, node_id: id_b, output: serde_json::json!({}), timestamp: t1 },
            ExecutionEvent::RunSucceeded { run_id, timestamp: t1 },
        ];

        let state = builder.build_from_events(events).unwrap();

        assert_eq!(state.run.status, RunStatus::Success);
        assert!(state.is_complete());
        assert!(state.run.finished_at.is_some());
    }

    #[test]
    fn build_from_failed_run() {
        let (graph, id_a, _id_b) = create_simple_workflow();
        let builder = RunStateBuilder::new(graph);

        let run_id = loomwright_core::WorkflowRunId::new();
        let workflow_id = loomwright_core::WorkflowId::new();
        let t1 = chrono::Utc::now();

        let events = vec![
            ExecutionEvent::RunQueued {
                run_id,
                workflow_id,
                trigger: RunTrigger::Manual,
                context: serde_json::json!({}),
                timestamp: t1,
            },
            ExecutionEvent::RunStarted { run_id, timestamp: t1 },
            ExecutionEvent::AgentStarted {
                run_id,
                node_id: id_a,
                agent_id: loomwright_core::AgentId::new(),
                resolved_input: serde_json::json!({}),
                attempt: 1,
                timestamp: t1,
            },
            ExecutionEvent::AgentFailed {
                run_id,
                node_id: id_a,
                error: crate::execution::AgentRunError {
                    kind: crate::error::AgentFailureKind::Timeout,
                    message: "deadline exceeded".to_string(),
                },
                timestamp: t1,
            },
            ExecutionEvent::RunFailed { run_id, reason: "node a failed".to_string(), timestamp: t1 },
        ];

        let state = builder.build_from_events(events).unwrap();

        assert_eq!(state.run.status, RunStatus::Failed);
        assert!(state.is_complete());
        assert!(state.has_failures());
    }

    #[test]
    fn approval_cycle_resumes_run() {
        let (graph, id_a, _id_b) = create_simple_workflow();
        let builder = RunStateBuilder::new(graph);

        let run_id = loomwright_core::WorkflowRunId::new();
        let workflow_id = loomwright_core::WorkflowId::new();
        let approval_id = loomwright_core::ApprovalId::new();
        let t1 = chrono::Utc::now();

        let events = vec![
            ExecutionEvent::RunQueued {
                run_id,
                workflow_id,
                trigger: RunTrigger::Manual,
                context: serde_json::json!({}),
                timestamp: t1,
            },
            ExecutionEvent::RunStarted { run_id, timestamp: t1 },
            ExecutionEvent::ApprovalRequested { run_id, node_id: id_a, approval_id, timestamp: t1 },
        ];
        let state = builder.build_from_events(events).unwrap();
        assert_eq!(state.run.status, RunStatus::WaitingApproval);
        assert_eq!(state.pending_approvals().len(), 1);

        let (graph2, _, _) = create_simple_workflow();
        let events2 = vec![
            ExecutionEvent::RunQueued {
                run_id,
                workflow_id,
                trigger: RunTrigger::Manual,
                context: serde_json::json!({}),
                timestamp: t1,
            },
            ExecutionEvent::RunStarted { run_id, timestamp: t1 },
            ExecutionEvent::ApprovalRequested { run_id, node_id: id_a, approval_id, timestamp: t1 },
            ExecutionEvent::ApprovalResolved { run_id, approval_id, approved: true, timestamp: t1 },
        ];
        let state2 = RunStateBuilder::new(graph2).build_from_events(events2).unwrap();
        assert_eq!(state2.run.status, RunStatus::Running);
        assert!(state2.pending_approvals().is_empty());
    }

    #[test]
    fn error_on_no_events() {
        let (graph, _, _) = create_simple_workflow();
        let builder = RunStateBuilder::new(graph);
        let result = builder.build_from_events(Vec::new());
        assert_eq!(result, Err(RunStateError::NoEvents));
    }

    #[test]
    fn error_on_missing_run_queued() {
        let (graph, _, _) = create_simple_workflow();
        let builder = RunStateBuilder::new(graph);

        let events = vec![ExecutionEvent::RunStarted {
            run_id: loomwright_core::WorkflowRunId::new(),
            timestamp: chrono::Utc::now(),
        }];
        let result = builder.build_from_events(events);
        assert_eq!(result, Err(RunStateError::MissingRunQueued));
    }

    #[test]
    fn error_on_duplicate_run_queued() {
        let (graph, _, _) = create_simple_workflow();
        let builder = RunStateBuilder::new(graph);

        let run_id = loomwright_core::WorkflowRunId::new();
        let workflow_id = loomwright_core::WorkflowId::new();
        let t1 = chrono::Utc::now();

        let events = vec![
            ExecutionEvent::RunQueued {
                run_id,
                workflow_id,
                trigger: RunTrigger::Manual,
                context: serde_json::json!({}),
                timestamp: t1,
            },
            ExecutionEvent::RunQueued {
                run_id,
                workflow_id,
                trigger: RunTrigger::Manual,
                context: serde_json::json!({}),
                timestamp: t1,
            },
        ];

        let result = builder.build_from_events(events);
        assert_eq!(result, Err(RunStateError::DuplicateRunQueued));
    }
}
