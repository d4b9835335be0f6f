//! Workflow and agent run state machines.
//!
//! Execution uses event sourcing with per-node completion persistence: the
//! [`ExecutionEvent`] log is the source of truth, and [`WorkflowRun`] /
//! [`AgentRun`] snapshots are views rebuilt from it (see
//! [`crate::run_state`]).

use crate::error::AgentFailureKind;
use crate::node::NodeId;
use crate::trigger::RunTrigger;
use chrono::{DateTime, Utc};
use loomwright_core::{AgentId, AgentRunId, WorkflowId, WorkflowRunId};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// The overall state of a workflow run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Run is queued, waiting for a scheduler to claim it.
    Pending,
    /// Run is actively executing.
    Running,
    /// Run is suspended: at least one node is blocked on a pending approval.
    WaitingApproval,
    /// Run completed successfully (all reachable nodes completed or skipped).
    Success,
    /// Run failed (at least one node failed, or an approval was rejected).
    Failed,
    /// Run was cancelled by user or system.
    Cancelled,
}

impl RunStatus {
    /// Returns true if this is a terminal state.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Success | Self::Failed | Self::Cancelled)
    }
}

/// The execution status of a single node's invocation within a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentRunStatus {
    /// Waiting for prerequisites or approval.
    Pending,
    /// Container is executing.
    Running,
    /// Completed successfully; output is present.
    Success,
    /// Failed; error is present.
    Failed,
    /// Skipped because a transitive prerequisite failed or was rejected.
    Skipped,
}

impl AgentRunStatus {
    /// Returns true if this is a terminal state.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Success | Self::Failed | Self::Skipped)
    }

    /// Returns true if this status blocks downstream nodes.
    #[must_use]
    pub fn blocks_downstream(&self) -> bool {
        matches!(self, Self::Failed)
    }
}

/// A structured error recorded against a failed [`AgentRun`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentRunError {
    /// The kind of failure.
    pub kind: AgentFailureKind,
    /// A human-readable message, e.g. captured stderr or a parse error.
    pub message: String,
}

/// A record of a single workflow run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowRun {
    /// Unique identifier for this run.
    pub id: WorkflowRunId,
    /// The workflow being executed.
    pub workflow_id: WorkflowId,
    /// How this run was started.
    pub trigger: RunTrigger,
    /// Free-form context supplied at dispatch time; the initial
    /// substitution environment under the `context` root.
    pub context: JsonValue,
    /// Current execution state.
    pub status: RunStatus,
    /// When the run was queued.
    pub queued_at: DateTime<Utc>,
    /// When the run started executing.
    pub started_at: Option<DateTime<Utc>>,
    /// When the run finished (success, failed, or cancelled).
    pub finished_at: Option<DateTime<Utc>>,
}

impl WorkflowRun {
    /// Creates a new workflow run in `Pending` state.
    #[must_use]
    pub fn new(workflow_id: WorkflowId, trigger: RunTrigger, context: JsonValue) -> Self {
        Self {
            id: WorkflowRunId::new(),
            workflow_id,
            trigger,
            context,
            status: RunStatus::Pending,
            queued_at: Utc::now(),
            started_at: None,
            finished_at: None,
        }
    }

    /// Claims the run, transitioning Pending -> Running.
    ///
    /// # Errors
    ///
    /// Returns the run's current status if it isn't `Pending` — a
    /// concurrent claimant already moved it, or it isn't claimable at all.
    pub fn claim(&mut self) -> Result<(), RunStatus> {
        if self.status != RunStatus::Pending {
            return Err(self.status);
        }
        self.status = RunStatus::Running;
        self.started_at = Some(Utc::now());
        Ok(())
    }

    /// Suspends the run pending human approval.
    pub fn await_approval(&mut self) {
        self.status = RunStatus::WaitingApproval;
    }

    /// Resumes the run after all pending approvals for it have cleared.
    pub fn resume(&mut self) {
        self.status = RunStatus::Running;
    }

    /// Marks the run as succeeded.
    pub fn succeed(&mut self) {
        self.status = RunStatus::Success;
        self.finished_at = Some(Utc::now());
    }

    /// Marks the run as failed.
    pub fn fail(&mut self) {
        self.status = RunStatus::Failed;
        self.finished_at = Some(Utc::now());
    }

    /// Marks the run as cancelled.
    pub fn cancel(&mut self) {
        self.status = RunStatus::Cancelled;
        self.finished_at = Some(Utc::now());
    }

    /// Returns the duration of the run, if it has started.
    #[must_use]
    pub fn duration(&self) -> Option<chrono::Duration> {
        let start = self.started_at?;
        let end = self.finished_at.unwrap_or_else(Utc::now);
        Some(end - start)
    }
}

/// One invocation of a node within a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentRun {
    /// Unique identifier for this invocation.
    pub id: AgentRunId,
    /// The run this invocation belongs to.
    pub run_id: WorkflowRunId,
    /// The node being executed.
    pub node_id: NodeId,
    /// The agent being invoked.
    pub agent_id: AgentId,
    /// Current status.
    pub status: AgentRunStatus,
    /// Input after template resolution.
    pub resolved_input: Option<JsonValue>,
    /// Output, present iff status is Success.
    pub output: Option<JsonValue>,
    /// Structured error, present iff status is Failed.
    pub error: Option<AgentRunError>,
    /// When execution started.
    pub started_at: Option<DateTime<Utc>>,
    /// When execution finished.
    pub finished_at: Option<DateTime<Utc>>,
    /// The attempt number, starting at 1.
    pub attempt: u32,
}

impl AgentRun {
    /// Creates a new agent run in `Pending` state.
    #[must_use]
    pub fn new(run_id: WorkflowRunId, node_id: NodeId, agent_id: AgentId, attempt: u32) -> Self {
        Self {
            id: AgentRunId::new(),
            run_id,
            node_id,
            agent_id,
            status: AgentRunStatus::Pending,
            resolved_input: None,
            output: None,
            error: None,
            started_at: None,
            finished_at: None,
            attempt,
        }
    }

    /// Starts execution with the resolved input.
    pub fn start(&mut self, resolved_input: JsonValue) {
        self.status = AgentRunStatus::Running;
        self.started_at = Some(Utc::now());
        self.resolved_input = Some(resolved_input);
    }

    /// Marks the invocation as succeeded.
    pub fn succeed(&mut self, output: JsonValue) {
        self.status = AgentRunStatus::Success;
        self.finished_at = Some(Utc::now());
        self.output = Some(output);
    }

    /// Marks the invocation as failed.
    pub fn fail(&mut self, error: AgentRunError) {
        self.status = AgentRunStatus::Failed;
        self.finished_at = Some(Utc::now());
        self.error = Some(error);
    }

    /// Marks the invocation as skipped.
    pub fn skip(&mut self) {
        self.status = AgentRunStatus::Skipped;
        self.finished_at = Some(Utc::now());
    }

    /// Returns the duration in milliseconds, if finished.
    #[must_use]
    pub fn duration_ms(&self) -> Option<i64> {
        let start = self.started_at?;
        let end = self.finished_at?;
        Some((end - start).num_milliseconds())
    }
}

/// Events for workflow execution (the event-sourcing log).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ExecutionEvent {
    /// Run was queued.
    RunQueued {
        run_id: WorkflowRunId,
        workflow_id: WorkflowId,
        trigger: RunTrigger,
        context: JsonValue,
        timestamp: DateTime<Utc>,
    },
    /// Run was claimed and started executing.
    RunStarted { run_id: WorkflowRunId, timestamp: DateTime<Utc> },
    /// A node's agent started executing.
    AgentStarted {
        run_id: WorkflowRunId,
        node_id: NodeId,
        agent_id: AgentId,
        resolved_input: JsonValue,
        attempt: u32,
        timestamp: DateTime<Utc>,
    },
    /// A node's agent completed successfully.
    AgentSucceeded {
        run_id: WorkflowRunId,
        node_id: NodeId,
        output: JsonValue,
        timestamp: DateTime<Utc>,
    },
    /// A node's agent failed.
    AgentFailed {
        run_id: WorkflowRunId,
        node_id: NodeId,
        error: AgentRunError,
        timestamp: DateTime<Utc>,
    },
    /// A node was skipped because a transitive prerequisite failed.
    NodeSkipped {
        run_id: WorkflowRunId,
        node_id: NodeId,
        timestamp: DateTime<Utc>,
    },
    /// An approval was requested for a node.
    ApprovalRequested {
        run_id: WorkflowRunId,
        node_id: NodeId,
        approval_id: loomwright_core::ApprovalId,
        timestamp: DateTime<Utc>,
    },
    /// A pending approval was resolved.
    ApprovalResolved {
        run_id: WorkflowRunId,
        approval_id: loomwright_core::ApprovalId,
        approved: bool,
        timestamp: DateTime<Utc>,
    },
    /// Run completed successfully.
    RunSucceeded { run_id: WorkflowRunId, timestamp: DateTime<Utc> },
    /// Run failed.
    RunFailed { run_id: WorkflowRunId, reason: String, timestamp: DateTime<Utc> },
    /// Run was cancelled.
    RunCancelled { run_id: WorkflowRunId, timestamp: DateTime<Utc> },
}

impl ExecutionEvent {
    /// Returns the run ID associated with this event.
    #[must_use]
    pub fn run_id(&self) -> WorkflowRunId {
        match self {
            Self::RunQueued { run_id, .. }
            | Self::RunStarted { run_id, .. }
            | Self::AgentStarted { run_id, .. }
            | Self::AgentSucceeded { run_id, .. }
            | Self::AgentFailed { run_id, .. }
            | Self::NodeSkipped { run_id, .. }
            | Self::ApprovalRequested { run_id, .. }
            | Self::ApprovalResolved { run_id, .. }
            | Self::RunSucceeded { run_id, .. }
            | Self::RunFailed { run_id, .. }
            | Self::RunCancelled { run_id, .. } => *run_id,
        }
    }

    /// Returns the timestamp of this event.
    #[must_use]
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            Self::RunQueued { timestamp, .. }
            | Self::RunStarted { timestamp, .. }
            | Self::AgentStarted { timestamp, .. }
            | Self::AgentSucceeded { timestamp, .. }
            | Self::AgentFailed { timestamp, .. }
            | Self::NodeSkipped { timestamp, .. }
            | Self::ApprovalRequested { timestamp, .. }
            | Self::ApprovalResolved { timestamp, .. }
            | Self::RunSucceeded { timestamp, .. }
            | Self::RunFailed { timestamp, .. }
            | Self::RunCancelled { timestamp, .. } => *timestamp,
        }
    }
}
