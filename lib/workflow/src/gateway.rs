//! Persistence Gateway (C1).
//!
//! The single write path into durable storage for runs, agent
//! invocations, and approvals. The scheduler never writes to a database
//! directly; it calls through this trait so the same scheduling logic
//! runs against Postgres in production and an in-memory double in tests.

use crate::approval::WorkflowApproval;
use crate::execution::{AgentRun, AgentRunError, ExecutionEvent, RunStatus, WorkflowRun};
use crate::node::NodeId;
use async_trait::async_trait;
use loomwright_core::{ApprovalId, WorkflowRunId};
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::sync::Mutex;

/// The durable operations the scheduler needs to drive a run.
#[async_trait]
pub trait PersistenceGateway: Send + Sync {
    /// Persists a newly queued run.
    async fn create_run(&self, run: WorkflowRun) -> Result<(), GatewayError>;

    /// Claims a pending run for execution, transitioning it to `Running`.
    async fn claim_run(&self, run_id: WorkflowRunId) -> Result<WorkflowRun, GatewayError>;

    /// Records that an agent invocation started.
    async fn start_agent_run(&self, agent_run: AgentRun) -> Result<(), GatewayError>;

    /// Records the terminal outcome of an agent invocation.
    async fn finish_agent_run(
        &self,
        run_id: WorkflowRunId,
        node_id: NodeId,
        output: Option<JsonValue>,
        error: Option<AgentRunError>,
    ) -> Result<(), GatewayError>;

    /// Persists a new pending approval and suspends the run.
    async fn request_approval(&self, approval: WorkflowApproval) -> Result<(), GatewayError>;

    /// Records a human decision against a pending approval.
    async fn record_decision(
        &self,
        approval_id: ApprovalId,
        approved: bool,
        responded_by: String,
        notes: Option<String>,
    ) -> Result<WorkflowApproval, GatewayError>;

    /// Finalizes a run with its terminal status.
    async fn finish_run(&self, run_id: WorkflowRunId, status: RunStatus) -> Result<(), GatewayError>;

    /// Lists runs currently in the given status, oldest first.
    async fn list_runs_by_status(&self, status: RunStatus) -> Result<Vec<WorkflowRun>, GatewayError>;

    /// Appends an event to a run's durable execution log. The scheduler
    /// treats this log as the source of truth for rebuilding run state,
    /// so it must survive a process restart.
    async fn append_event(&self, event: ExecutionEvent) -> Result<(), GatewayError>;

    /// Returns the full execution event log for a run, in append order.
    async fn load_events(&self, run_id: WorkflowRunId) -> Result<Vec<ExecutionEvent>, GatewayError>;
}

/// Errors surfaced by the persistence gateway.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayError {
    /// No run exists with the given id.
    RunNotFound { run_id: WorkflowRunId },
    /// No approval exists with the given id.
    ApprovalNotFound { approval_id: ApprovalId },
    /// The underlying store rejected the write.
    StorageFailed { message: String },
    /// A guarded write found the run in a different status than expected
    /// — another caller already transitioned it.
    StateConflict { run_id: WorkflowRunId, expected: RunStatus, actual: RunStatus },
}

impl std::fmt::Display for GatewayError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::RunNotFound { run_id } => write!(f, "run not found: {run_id}"),
            Self::ApprovalNotFound { approval_id } => write!(f, "approval not found: {approval_id}"),
            Self::StorageFailed { message } => write!(f, "storage failed: {message}"),
            Self::StateConflict { run_id, expected, actual } => {
                write!(f, "run {run_id} expected status {expected:?} but found {actual:?}")
            }
        }
    }
}

impl std::error::Error for GatewayError {}

/// An in-memory [`PersistenceGateway`] for tests.
#[derive(Default)]
pub struct InMemoryGateway {
    runs: Mutex<HashMap<WorkflowRunId, WorkflowRun>>,
    agent_runs: Mutex<HashMap<(WorkflowRunId, NodeId), AgentRun>>,
    approvals: Mutex<HashMap<ApprovalId, WorkflowApproval>>,
    events: Mutex<HashMap<WorkflowRunId, Vec<ExecutionEvent>>>,
}

impl InMemoryGateway {
    /// Creates an empty gateway.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PersistenceGateway for InMemoryGateway {
    async fn create_run(&self, run: WorkflowRun) -> Result<(), GatewayError> {
        self.runs.lock().expect("gateway mutex poisoned").insert(run.id, run);
        Ok(())
    }

    async fn claim_run(&self, run_id: WorkflowRunId) -> Result<WorkflowRun, GatewayError> {
        let mut runs = self.runs.lock().expect("gateway mutex poisoned");
        let run = runs.get_mut(&run_id).ok_or(GatewayError::RunNotFound { run_id })?;
        run.claim().map_err(|actual| GatewayError::StateConflict { run_id, expected: RunStatus::Pending, actual })?;
        Ok(run.clone())
    }

    async fn start_agent_run(&self, agent_run: AgentRun) -> Result<(), GatewayError> {
        self.agent_runs
            .lock()
            .expect("gateway mutex poisoned")
            .insert((agent_run.run_id, agent_run.node_id), agent_run);
        Ok(())
    }

    async fn finish_agent_run(
        &self,
        run_id: WorkflowRunId,
        node_id: NodeId,
        output: Option<JsonValue>,
        error: Option<AgentRunError>,
    ) -> Result<(), GatewayError> {
        let mut agent_runs = self.agent_runs.lock().expect("gateway mutex poisoned");
        let agent_run = agent_runs
            .get_mut(&(run_id, node_id))
            .ok_or(GatewayError::RunNotFound { run_id })?;
        match (output, error) {
            (Some(output), None) => agent_run.succeed(output),
            (None, Some(error)) => agent_run.fail(error),
            _ => agent_run.skip(),
        }
        Ok(())
    }

    async fn request_approval(&self, approval: WorkflowApproval) -> Result<(), GatewayError> {
        let run_id = approval.run_id;
        self.approvals.lock().expect("gateway mutex poisoned").insert(approval.id, approval);
        if let Some(run) = self.runs.lock().expect("gateway mutex poisoned").get_mut(&run_id) {
            run.await_approval();
        }
        Ok(())
    }

    async fn record_decision(
        &self,
        approval_id: ApprovalId,
        approved: bool,
        responded_by: String,
        notes: Option<String>,
    ) -> Result<WorkflowApproval, GatewayError> {
        let mut approvals = self.approvals.lock().expect("gateway mutex poisoned");
        let approval = approvals
            .get_mut(&approval_id)
            .ok_or(GatewayError::ApprovalNotFound { approval_id })?;
        approval
            .record_decision(approved, responded_by, notes)
            .map_err(|e| GatewayError::StorageFailed { message: e.to_string() })?;
        let resolved = approval.clone();

        let still_pending = approvals
            .values()
            .any(|a| a.run_id == resolved.run_id && a.status == crate::approval::ApprovalStatus::Pending);
        if !still_pending
            && let Some(run) = self.runs.lock().expect("gateway mutex poisoned").get_mut(&resolved.run_id)
        {
            run.resume();
        }

        Ok(resolved)
    }

    async fn finish_run(&self, run_id: WorkflowRunId, status: RunStatus) -> Result<(), GatewayError> {
        let mut runs = self.runs.lock().expect("gateway mutex poisoned");
        let run = runs.get_mut(&run_id).ok_or(GatewayError::RunNotFound { run_id })?;
        match status {
            RunStatus::Success => run.succeed(),
            RunStatus::Failed => run.fail(),
            RunStatus::Cancelled => run.cancel(),
            other => {
                return Err(GatewayError::StorageFailed {
                    message: format!("{other:?} is not a terminal status"),
                });
            }
        }
        Ok(())
    }

    async fn list_runs_by_status(&self, status: RunStatus) -> Result<Vec<WorkflowRun>, GatewayError> {
        Ok(self
            .runs
            .lock()
            .expect("gateway mutex poisoned")
            .values()
            .filter(|r| r.status == status)
            .cloned()
            .collect())
    }

    async fn append_event(&self, event: ExecutionEvent) -> Result<(), GatewayError> {
        let run_id = event.run_id();
        self.events.lock().expect("gateway mutex poisoned").entry(run_id).or_default().push(event);
        Ok(())
    }

    async fn load_events(&self, run_id: WorkflowRunId) -> Result<Vec<ExecutionEvent>, GatewayError> {
        Ok(self.events.lock().expect("gateway mutex poisoned").get(&run_id).cloned().unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trigger::RunTrigger;
    use chrono::Utc;

    fn new_run() -> WorkflowRun {
        WorkflowRun::new(loomwright_core::WorkflowId::new(), RunTrigger::Manual, serde_json::json!({}))
    }

    #[tokio::test]
    async fn claim_run_transitions_to_running() {
        let gateway = InMemoryGateway::new();
        let run = new_run();
        let run_id = run.id;
        gateway.create_run(run).await.unwrap();

        let claimed = gateway.claim_run(run_id).await.unwrap();
        assert_eq!(claimed.status, RunStatus::Running);
    }

    #[tokio::test]
    async fn claiming_an_already_claimed_run_fails_with_state_conflict() {
        let gateway = InMemoryGateway::new();
        let run = new_run();
        let run_id = run.id;
        gateway.create_run(run).await.unwrap();

        gateway.claim_run(run_id).await.unwrap();
        let result = gateway.claim_run(run_id).await;
        assert!(matches!(
            result,
            Err(GatewayError::StateConflict { expected: RunStatus::Pending, actual: RunStatus::Running, .. })
        ));
    }

    #[tokio::test]
    async fn claim_unknown_run_fails() {
        let gateway = InMemoryGateway::new();
        let result = gateway.claim_run(loomwright_core::WorkflowRunId::new()).await;
        assert!(matches!(result, Err(GatewayError::RunNotFound { .. })));
    }

    #[tokio::test]
    async fn approval_decision_resumes_run() {
        let gateway = InMemoryGateway::new();
        let run = new_run();
        let run_id = run.id;
        gateway.create_run(run).await.unwrap();
        gateway.claim_run(run_id).await.unwrap();

        let approval = WorkflowApproval::new(run_id, NodeId::new());
        let approval_id = approval.id;
        gateway.request_approval(approval).await.unwrap();

        let runs = gateway.list_runs_by_status(RunStatus::WaitingApproval).await.unwrap();
        assert_eq!(runs.len(), 1);

        gateway.record_decision(approval_id, true, "alice".to_string(), None).await.unwrap();

        let runs = gateway.list_runs_by_status(RunStatus::Running).await.unwrap();
        assert_eq!(runs.len(), 1);
    }

    #[tokio::test]
    async fn finish_run_marks_terminal_status() {
        let gateway = InMemoryGateway::new();
        let run = new_run();
        let run_id = run.id;
        gateway.create_run(run).await.unwrap();
        gateway.claim_run(run_id).await.unwrap();
        gateway.finish_run(run_id, RunStatus::Success).await.unwrap();

        let runs = gateway.list_runs_by_status(RunStatus::Success).await.unwrap();
        assert_eq!(runs.len(), 1);
    }

    #[tokio::test]
    async fn appended_events_load_back_in_order() {
        let gateway = InMemoryGateway::new();
        let run_id = WorkflowRunId::new();
        gateway.append_event(ExecutionEvent::RunStarted { run_id, timestamp: Utc::now() }).await.unwrap();
        gateway.append_event(ExecutionEvent::RunSucceeded { run_id, timestamp: Utc::now() }).await.unwrap();

        let events = gateway.load_events(run_id).await.unwrap();
        assert_eq!(events.len(), 2);
        assert!(matches!(events[0], ExecutionEvent::RunStarted { .. }));
        assert!(matches!(events[1], ExecutionEvent::RunSucceeded { .. }));
    }
}
