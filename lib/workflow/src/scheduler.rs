//! DAG Scheduler (C6).
//!
//! Drives a single workflow run to completion. Each tick rebuilds the
//! run's state from its event log, propagates SKIPPED to nodes blocked
//! by a failed prerequisite, gates nodes that need approval, resolves
//! templates against upstream outputs, and dispatches the rest to the
//! container executor in parallel. The scheduler suspends (returns
//! without erroring) whenever nothing is left to dispatch this tick;
//! [`resolve_approval`](DagScheduler::resolve_approval) is the only way
//! a suspended run resumes.

use crate::agent::Agent;
use crate::approval::{ApprovalCoordinator, ApprovalError, ApprovalStatus};
use crate::definition::Workflow;
use crate::error::{AgentFailureKind, GraphError};
use crate::executor::{AgentDescriptor, ContractExecutor, ExecutionResult};
use crate::execution::{AgentRunError, AgentRunStatus, ExecutionEvent, RunStatus, WorkflowRun};
use crate::gateway::{GatewayError, PersistenceGateway};
use crate::nats::EventBusClient;
use crate::node::{NodeId, WorkflowNode};
use crate::run_state::{RunState, RunStateBuilder, RunStateError};
use crate::template::{self, Environment};
use crate::trigger::RunTrigger;
use chrono::{DateTime, Utc};
use loomwright_core::{AgentId, ApprovalId, WorkflowId, WorkflowRunId};
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::Instrument;

/// Default maximum dispatch attempts for a node before a retryable
/// failure is treated as terminal. v1 default is 1: no automatic retry.
/// Callers that want per-node or per-deployment retry budgets set this
/// explicitly via [`DagScheduler::with_max_node_attempts`].
pub const DEFAULT_MAX_NODE_ATTEMPTS: u32 = 1;
/// Maximum immediate retries when the executor itself is unavailable,
/// before it's recorded as a terminal failure.
const MAX_UNAVAILABLE_ATTEMPTS: u32 = 3;

fn now() -> DateTime<Utc> {
    Utc::now()
}

/// Milliseconds elapsed from `start` to now, floored at zero (clock
/// skew or a zero-duration attempt should never report negative).
fn duration_ms_since(start: DateTime<Utc>) -> u64 {
    (now() - start).num_milliseconds().max(0) as u64
}

/// Hook for the Observability Surface (C8). The scheduler drives its own
/// `tracing` spans directly since `tracing` is already part of its
/// dependency stack; metric instruments live with whatever backend the
/// hosting binary chooses, so they're surfaced here instead as plain
/// callbacks the scheduler invokes at each lifecycle point.
pub trait SchedulerObserver: Send + Sync {
    /// Called once a queued run transitions to `Running`.
    fn run_started(&self, _run_id: WorkflowRunId, _workflow_id: WorkflowId, _workflow_name: &str, _trigger: &str) {}
    /// Called once a run reaches a terminal status.
    fn run_finished(&self, _run_id: WorkflowRunId, _status: RunStatus, _duration_ms: u64) {}
    /// Called before each dispatch attempt of a node.
    fn agent_started(&self, _run_id: WorkflowRunId, _agent_id: AgentId, _agent_name: &str, _action: &str, _attempt: u32) {}
    /// Called once a node's dispatch attempt reaches a terminal outcome.
    fn agent_finished(
        &self,
        _run_id: WorkflowRunId,
        _agent_name: &str,
        _status: AgentRunStatus,
        _failure_kind: Option<&str>,
        _duration_ms: u64,
    ) {
    }
    /// Called each time a node attempt is retried.
    fn agent_retried(&self, _agent_name: &str) {}
}

/// The default observer: does nothing. Used when a hosting binary has no
/// metrics backend wired in (tests, and any caller that only needs the
/// spans the scheduler produces on its own).
#[derive(Default)]
pub struct NoopObserver;

impl SchedulerObserver for NoopObserver {}

/// Returns whether a failure kind is worth retrying at the node level.
/// A non-zero exit is the agent's own deliberate failure signal and is
/// never retried.
fn is_retryable(kind: &AgentFailureKind) -> bool {
    matches!(
        kind,
        AgentFailureKind::Timeout
            | AgentFailureKind::InvalidOutput
            | AgentFailureKind::RuntimeError { .. }
            | AgentFailureKind::OutputSchemaViolation
    )
}

/// Errors raised while scheduling a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchedulerError {
    Graph(GraphError),
    Gateway(GatewayError),
    Approval(ApprovalError),
    RunState(RunStateError),
    UnknownAgent { agent_id: AgentId },
    /// Another invocation already claimed this run; across concurrent
    /// callers of `drive_run` on the same run id, exactly one performs
    /// PENDING->RUNNING and proceeds.
    AlreadyClaimed { run_id: WorkflowRunId },
}

impl std::fmt::Display for SchedulerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Graph(e) => write!(f, "{e}"),
            Self::Gateway(e) => write!(f, "{e}"),
            Self::Approval(e) => write!(f, "{e}"),
            Self::RunState(e) => write!(f, "{e}"),
            Self::UnknownAgent { agent_id } => write!(f, "node references unregistered agent {agent_id}"),
            Self::AlreadyClaimed { run_id } => write!(f, "run {run_id} was already claimed by another invocation"),
        }
    }
}

impl std::error::Error for SchedulerError {}

/// Drives workflow runs through the dependency graph to completion.
pub struct DagScheduler<G, A, X, B> {
    gateway: Arc<G>,
    approvals: Arc<A>,
    executor: Arc<X>,
    bus: Arc<B>,
    max_node_attempts: u32,
    observer: Arc<dyn SchedulerObserver>,
}

impl<G, A, X, B> DagScheduler<G, A, X, B>
where
    G: PersistenceGateway,
    A: ApprovalCoordinator,
    X: ContractExecutor,
    B: EventBusClient,
{
    /// Creates a new scheduler wired to its collaborators. No metrics
    /// observer is attached; use [`with_observer`](Self::with_observer)
    /// to wire one in.
    pub fn new(gateway: Arc<G>, approvals: Arc<A>, executor: Arc<X>, bus: Arc<B>) -> Self {
        Self {
            gateway,
            approvals,
            executor,
            bus,
            max_node_attempts: DEFAULT_MAX_NODE_ATTEMPTS,
            observer: Arc::new(NoopObserver),
        }
    }

    /// Attaches an observer that receives run/agent lifecycle callbacks
    /// for metrics purposes, alongside the spans the scheduler always
    /// produces on its own.
    #[must_use]
    pub fn with_observer(mut self, observer: Arc<dyn SchedulerObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// Overrides the default dispatch attempt budget for retryable node
    /// failures. v1 ships with a default of 1 (no automatic retry); call
    /// this to opt a deployment or test into a higher budget.
    #[must_use]
    pub fn with_max_node_attempts(mut self, max_node_attempts: u32) -> Self {
        self.max_node_attempts = max_node_attempts;
        self
    }

    /// Queues and drives a new run for `workflow` until it completes,
    /// fails, or suspends for approval.
    ///
    /// # Errors
    ///
    /// Returns an error if the workflow graph is invalid, persistence
    /// fails, or a node references an agent absent from `agents`.
    pub async fn start_run(
        &self,
        workflow: &Workflow,
        agents: &HashMap<AgentId, Agent>,
        trigger: RunTrigger,
        context: JsonValue,
    ) -> Result<WorkflowRunId, SchedulerError> {
        let run_id = self.queue_run(workflow, trigger, context).await?;
        self.drive_run(workflow, agents, run_id).await?;
        Ok(run_id)
    }

    /// Persists a new PENDING run without driving it. Callers that must
    /// not block on execution (the webhook mapper) queue the run here
    /// and hand the returned id to [`drive_run`](Self::drive_run) on a
    /// spawned task.
    ///
    /// # Errors
    ///
    /// Returns an error if the workflow graph is invalid or persistence fails.
    pub async fn queue_run(
        &self,
        workflow: &Workflow,
        trigger: RunTrigger,
        context: JsonValue,
    ) -> Result<WorkflowRunId, SchedulerError> {
        workflow.validate().map_err(SchedulerError::Graph)?;

        let run = WorkflowRun::new(workflow.id, trigger.clone(), context.clone());
        let run_id = run.id;
        let queued_at = run.queued_at;
        self.gateway.create_run(run).await.map_err(SchedulerError::Gateway)?;
        self.record(ExecutionEvent::RunQueued {
            run_id,
            workflow_id: workflow.id,
            trigger,
            context,
            timestamp: queued_at,
        })
        .await;
        Ok(run_id)
    }

    /// Drives an already-queued run to completion or suspension.
    ///
    /// # Errors
    ///
    /// Returns an error if persistence or the executor fails unrecoverably.
    pub async fn drive_run(
        &self,
        workflow: &Workflow,
        agents: &HashMap<AgentId, Agent>,
        run_id: WorkflowRunId,
    ) -> Result<(), SchedulerError> {
        self.drive(workflow, agents, run_id).await
    }

    /// Records a human decision against a pending approval and resumes
    /// the run it gates.
    ///
    /// # Errors
    ///
    /// Returns an error if the approval is unknown or already resolved,
    /// or if driving the resumed run fails.
    pub async fn resolve_approval(
        &self,
        workflow: &Workflow,
        agents: &HashMap<AgentId, Agent>,
        approval_id: ApprovalId,
        approved: bool,
        responded_by: String,
        notes: Option<String>,
    ) -> Result<(), SchedulerError> {
        let resolved = self
            .gateway
            .record_decision(approval_id, approved, responded_by, notes)
            .await
            .map_err(SchedulerError::Gateway)?;
        self.record(ExecutionEvent::ApprovalResolved {
            run_id: resolved.run_id,
            approval_id,
            approved,
            timestamp: now(),
        })
        .await;

        self.drive(workflow, agents, resolved.run_id).await
    }

    /// Cancels a run in place, regardless of its current status.
    ///
    /// # Errors
    ///
    /// Returns an error if the run is unknown.
    pub async fn cancel_run(&self, run_id: WorkflowRunId) -> Result<(), SchedulerError> {
        self.gateway.finish_run(run_id, RunStatus::Cancelled).await.map_err(SchedulerError::Gateway)?;
        self.record(ExecutionEvent::RunCancelled { run_id, timestamp: now() }).await;
        Ok(())
    }

    /// Returns the full event log recorded for a run so far. The gateway
    /// is the durable source of truth; a restart rebuilds state purely
    /// from what's persisted here.
    ///
    /// # Errors
    ///
    /// Returns an error if the gateway can't be read.
    pub async fn events_for(&self, run_id: WorkflowRunId) -> Result<Vec<ExecutionEvent>, SchedulerError> {
        self.gateway.load_events(run_id).await.map_err(SchedulerError::Gateway)
    }

    async fn record(&self, event: ExecutionEvent) {
        if let Err(e) = self.gateway.append_event(event.clone()).await {
            tracing::error!(error = %e, "failed to persist execution event");
        }
        let _ = self.bus.publish(&event).await;
    }

    async fn rebuild_state(&self, workflow: &Workflow, run_id: WorkflowRunId) -> Result<RunState, SchedulerError> {
        let events = self.events_for(run_id).await?;
        RunStateBuilder::new(workflow.graph.clone()).build_from_events(events).map_err(SchedulerError::RunState)
    }

    async fn drive(
        &self,
        workflow: &Workflow,
        agents: &HashMap<AgentId, Agent>,
        run_id: WorkflowRunId,
    ) -> Result<(), SchedulerError> {
        let span = tracing::info_span!(
            "workflow.execute",
            "workflow.id" = %workflow.id,
            "workflow.name" = %workflow.metadata.name,
            "workflow.run.id" = %run_id,
            "workflow.status" = tracing::field::Empty,
            "workflow.duration.ms" = tracing::field::Empty,
        );
        self.drive_inner(workflow, agents, run_id).instrument(span).await
    }

    async fn drive_inner(
        &self,
        workflow: &Workflow,
        agents: &HashMap<AgentId, Agent>,
        run_id: WorkflowRunId,
    ) -> Result<(), SchedulerError> {
        {
            let initial = self.rebuild_state(workflow, run_id).await?;
            if initial.run.status == RunStatus::Pending {
                match self.gateway.claim_run(run_id).await {
                    Ok(_) => {}
                    Err(GatewayError::StateConflict { run_id, .. }) => {
                        return Err(SchedulerError::AlreadyClaimed { run_id });
                    }
                    Err(e) => return Err(SchedulerError::Gateway(e)),
                }
                self.record(ExecutionEvent::RunStarted { run_id, timestamp: now() }).await;
                self.observer.run_started(
                    run_id,
                    workflow.id,
                    &workflow.metadata.name,
                    &format!("{:?}", initial.run.trigger),
                );
            }
        }

        loop {
            let state = self.rebuild_state(workflow, run_id).await?;
            if state.run.status.is_terminal() {
                return Ok(());
            }

            let newly_blocked = state.remaining_work().blocked_nodes();
            if !newly_blocked.is_empty() {
                for node_id in newly_blocked {
                    self.record(ExecutionEvent::NodeSkipped { run_id, node_id, timestamp: now() }).await;
                    self.gateway.finish_agent_run(run_id, node_id, None, None).await.map_err(SchedulerError::Gateway)?;
                }
                continue;
            }

            if state.is_complete() {
                self.finalize(run_id, &state).await?;
                return Ok(());
            }

            let mut ready = state.ready_nodes();
            ready.sort();
            if ready.is_empty() {
                return Ok(());
            }

            let env = build_environment(workflow, &state);
            let mut dispatchable: Vec<(&WorkflowNode, &Agent)> = Vec::new();
            let mut rejected = false;

            for node_id in ready {
                let node = workflow
                    .graph
                    .get_node(node_id)
                    .ok_or(SchedulerError::Graph(GraphError::NodeNotFound { node_id }))?;
                let agent = agents.get(&node.agent_id).ok_or(SchedulerError::UnknownAgent { agent_id: node.agent_id })?;

                if node.approval_required || agent.requires_approval() {
                    match state.approvals.values().find(|a| a.node_id == node_id) {
                        None => {
                            let approval = self
                                .approvals
                                .request_approval(run_id, node_id)
                                .await
                                .map_err(SchedulerError::Approval)?;
                            self.gateway.request_approval(approval.clone()).await.map_err(SchedulerError::Gateway)?;
                            self.record(ExecutionEvent::ApprovalRequested {
                                run_id,
                                node_id,
                                approval_id: approval.id,
                                timestamp: now(),
                            })
                            .await;
                            continue;
                        }
                        Some(a) if a.status == ApprovalStatus::Rejected => {
                            rejected = true;
                            continue;
                        }
                        Some(a) if a.status == ApprovalStatus::Approved => {}
                        _ => continue,
                    }
                }

                dispatchable.push((node, agent));
            }

            if rejected {
                self.record(ExecutionEvent::RunFailed {
                    run_id,
                    reason: "an approval was rejected".to_string(),
                    timestamp: now(),
                })
                .await;
                self.gateway.finish_run(run_id, RunStatus::Failed).await.map_err(SchedulerError::Gateway)?;
                let duration_ms = duration_ms_since(state.run.started_at.unwrap_or(state.run.queued_at));
                tracing::Span::current().record("workflow.status", "failed").record("workflow.duration.ms", duration_ms);
                self.observer.run_finished(run_id, RunStatus::Failed, duration_ms);
                return Ok(());
            }

            if dispatchable.is_empty() {
                return Ok(());
            }

            let attempts: HashMap<NodeId, u32> = state.agent_runs.iter().map(|(id, run)| (*id, run.attempt)).collect();
            let dispatches = dispatchable.into_iter().map(|(node, agent)| {
                let starting_attempt = attempts.get(&node.id).copied().unwrap_or(0);
                self.dispatch_node(&env, run_id, node, agent, starting_attempt)
            });
            for result in futures::future::join_all(dispatches).await {
                result?;
            }
        }
    }

    async fn dispatch_node(
        &self,
        env: &Environment,
        run_id: WorkflowRunId,
        node: &WorkflowNode,
        agent: &Agent,
        starting_attempt: u32,
    ) -> Result<(), SchedulerError> {
        let resolved = match template::resolve(&node.input_template, env) {
            Ok(value) => value,
            Err(e) => {
                let error = AgentRunError { kind: AgentFailureKind::InvalidOutput, message: e.to_string() };
                self.record(ExecutionEvent::AgentFailed { run_id, node_id: node.id, error: error.clone(), timestamp: now() })
                    .await;
                self.gateway
                    .finish_agent_run(run_id, node.id, None, Some(error))
                    .await
                    .map_err(SchedulerError::Gateway)?;
                return Ok(());
            }
        };

        let descriptor = AgentDescriptor::new(agent.entry_path.clone(), format!("{}:{}", agent.name, agent.version));
        let capability = agent.capability(&node.action);

        let mut attempt = starting_attempt;
        loop {
            attempt += 1;
            let span = tracing::info_span!(
                "agent.execute",
                "agent.id" = %agent.id,
                "agent.name" = %agent.name,
                "agent.action" = %node.action,
                "workflow.run.id" = %run_id,
                "agent.attempt" = attempt,
                "agent.status" = tracing::field::Empty,
            );
            self.observer.agent_started(run_id, agent.id, &agent.name, &node.action, attempt);

            let retry = self
                .run_attempt(run_id, node, agent, capability, &descriptor, &resolved, attempt)
                .instrument(span)
                .await?;
            if retry {
                self.observer.agent_retried(&agent.name);
                tokio::time::sleep(Duration::from_millis(200 * u64::from(attempt))).await;
                continue;
            }
            return Ok(());
        }
    }

    /// Runs a single dispatch attempt for a node, recording its outcome
    /// and reporting it to the observer. Returns `true` if the caller
    /// should retry with a fresh attempt.
    async fn run_attempt(
        &self,
        run_id: WorkflowRunId,
        node: &WorkflowNode,
        agent: &Agent,
        capability: Option<&crate::agent::AgentCapability>,
        descriptor: &AgentDescriptor,
        resolved: &JsonValue,
        attempt: u32,
    ) -> Result<bool, SchedulerError> {
        let attempt_start = now();
        self.record(ExecutionEvent::AgentStarted {
            run_id,
            node_id: node.id,
            agent_id: agent.id,
            resolved_input: resolved.clone(),
            attempt,
            timestamp: attempt_start,
        })
        .await;

        let mut result = self.dispatch_with_unavailable_retry(descriptor, resolved.clone()).await;
        if let ExecutionResult::Success(output) = &result
            && let Some(cap) = capability
            && !cap.output_schema.conforms(output)
        {
            result = ExecutionResult::Failure {
                kind: AgentFailureKind::OutputSchemaViolation,
                message: "output did not conform to the capability's declared output schema".to_string(),
            };
        }

        let span = tracing::Span::current();
        match result {
            ExecutionResult::Success(output) => {
                self.record(ExecutionEvent::AgentSucceeded { run_id, node_id: node.id, output: output.clone(), timestamp: now() })
                    .await;
                self.gateway.finish_agent_run(run_id, node.id, Some(output), None).await.map_err(SchedulerError::Gateway)?;
                let duration_ms = duration_ms_since(attempt_start);
                span.record("agent.status", "success").record("agent.duration.ms", duration_ms);
                self.observer.agent_finished(run_id, &agent.name, AgentRunStatus::Success, None, duration_ms);
                Ok(false)
            }
            ExecutionResult::Failure { kind, message } => {
                if is_retryable(&kind) && attempt < self.max_node_attempts {
                    tracing::warn!(node_id = %node.id, attempt, %kind, "agent failed, retrying");
                    span.record("agent.status", "retrying");
                    return Ok(true);
                }
                let failure_tag = kind.tag();
                let error = AgentRunError { kind, message };
                self.record(ExecutionEvent::AgentFailed { run_id, node_id: node.id, error: error.clone(), timestamp: now() })
                    .await;
                self.gateway.finish_agent_run(run_id, node.id, None, Some(error)).await.map_err(SchedulerError::Gateway)?;
                let duration_ms = duration_ms_since(attempt_start);
                span.record("agent.status", "failed").record("agent.duration.ms", duration_ms);
                self.observer.agent_finished(run_id, &agent.name, AgentRunStatus::Failed, Some(failure_tag), duration_ms);
                Ok(false)
            }
            ExecutionResult::Unavailable { .. } => {
                unreachable!("dispatch_with_unavailable_retry never returns Unavailable")
            }
        }
    }

    /// Retries an executor-unavailable result a bounded number of times
    /// without consuming a node-level retry attempt, then folds it into
    /// a terminal [`ExecutionResult::Failure`].
    async fn dispatch_with_unavailable_retry(&self, descriptor: &AgentDescriptor, input: JsonValue) -> ExecutionResult {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.executor.execute(descriptor, input.clone()).await {
                ExecutionResult::Unavailable { reason } if attempt < MAX_UNAVAILABLE_ATTEMPTS => {
                    tracing::warn!(attempt, %reason, "executor unavailable, retrying");
                    tokio::time::sleep(Duration::from_millis(300 * u64::from(attempt))).await;
                }
                ExecutionResult::Unavailable { reason } => {
                    return ExecutionResult::Failure {
                        kind: AgentFailureKind::RuntimeError { reason: reason.clone() },
                        message: reason,
                    };
                }
                other => return other,
            }
        }
    }

    async fn finalize(&self, run_id: WorkflowRunId, state: &RunState) -> Result<(), SchedulerError> {
        let duration_ms = duration_ms_since(state.run.started_at.unwrap_or(state.run.queued_at));
        let span = tracing::Span::current();
        span.record("workflow.duration.ms", duration_ms);
        if state.has_failures() {
            self.record(ExecutionEvent::RunFailed {
                run_id,
                reason: "one or more nodes failed".to_string(),
                timestamp: now(),
            })
            .await;
            self.gateway.finish_run(run_id, RunStatus::Failed).await.map_err(SchedulerError::Gateway)?;
            span.record("workflow.status", "failed");
            self.observer.run_finished(run_id, RunStatus::Failed, duration_ms);
        } else {
            self.record(ExecutionEvent::RunSucceeded { run_id, timestamp: now() }).await;
            self.gateway.finish_run(run_id, RunStatus::Success).await.map_err(SchedulerError::Gateway)?;
            span.record("workflow.status", "success");
            self.observer.run_finished(run_id, RunStatus::Success, duration_ms);
        }
        Ok(())
    }
}

fn build_environment(workflow: &Workflow, state: &RunState) -> Environment {
    let mut env = Environment::new();
    env.insert("context".to_string(), state.run.context.clone());
    for node in workflow.graph.nodes() {
        if let Some(run) = state.agent_runs.get(&node.id)
            && let Some(output) = &run.output
        {
            env.insert(node.name.clone(), output.clone());
        }
    }
    env
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::AgentKind;
    use crate::approval::InMemoryApprovalCoordinator;
    use crate::executor::{EchoExecutor, MockExecutor};
    use crate::gateway::InMemoryGateway;
    use crate::nats::InMemoryEventBusClient;
    use crate::node::WorkflowNode;
    use crate::schema::CapabilitySchema;
    use crate::trigger::TriggerDescriptor;
    use async_trait::async_trait;
    use loomwright_core::ProjectId;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn echo_agent(name: &str) -> Agent {
        Agent::new(ProjectId::new(1), name, AgentKind::Script, "/bin/echo-agent", "1.0.0")
    }

    fn approval_agent(name: &str) -> Agent {
        echo_agent(name).with_risk_level(crate::agent::RiskLevel::ApprovalRequired)
    }

    type TestScheduler = DagScheduler<InMemoryGateway, InMemoryApprovalCoordinator, EchoExecutor, InMemoryEventBusClient>;

    fn new_scheduler_with_executor<X: ContractExecutor>(
        executor: X,
    ) -> DagScheduler<InMemoryGateway, InMemoryApprovalCoordinator, X, InMemoryEventBusClient> {
        DagScheduler::new(
            Arc::new(InMemoryGateway::new()),
            Arc::new(InMemoryApprovalCoordinator::new()),
            Arc::new(executor),
            Arc::new(InMemoryEventBusClient::new()),
        )
    }

    fn new_scheduler() -> TestScheduler {
        new_scheduler_with_executor(EchoExecutor)
    }

    #[tokio::test]
    async fn linear_workflow_runs_to_success() {
        let scheduler = new_scheduler();

        let upstream_agent = echo_agent("upstream");
        let downstream_agent = echo_agent("downstream");
        let mut agents = HashMap::new();
        agents.insert(upstream_agent.id, upstream_agent.clone());
        agents.insert(downstream_agent.id, downstream_agent.clone());

        let upstream = WorkflowNode::new("upstream", upstream_agent.id, "run")
            .with_input_template(serde_json::json!({"from": "{{context.seed}}"}));
        let upstream_id = upstream.id;
        let downstream = WorkflowNode::new("downstream", downstream_agent.id, "run")
            .depends_on(upstream_id)
            .with_input_template(serde_json::json!({"from": "{{upstream.from}}"}));

        let mut workflow = Workflow::new(ProjectId::new(1), "pipeline", TriggerDescriptor::Manual);
        workflow.graph.add_node(upstream);
        workflow.graph.add_node(downstream);
        workflow.graph.add_dependency(upstream_id, workflow.graph.nodes().find(|n| n.name == "downstream").unwrap().id).unwrap();

        let run_id = scheduler
            .start_run(&workflow, &agents, RunTrigger::Manual, serde_json::json!({"seed": "hello"}))
            .await
            .unwrap();

        let state = scheduler.rebuild_state(&workflow, run_id).await.unwrap();
        assert_eq!(state.run.status, RunStatus::Success);
        assert!(state.is_complete());
        assert!(!state.has_failures());
    }

    #[tokio::test]
    async fn failed_node_skips_downstream_and_fails_run() {
        let scheduler = new_scheduler_with_executor(MockExecutor::failing(AgentFailureKind::NonZeroExit { code: 1 }, "boom"));

        let agent = echo_agent("worker");
        let mut agents = HashMap::new();
        agents.insert(agent.id, agent.clone());

        let a = WorkflowNode::new("a", agent.id, "run");
        let a_id = a.id;
        let b = WorkflowNode::new("b", agent.id, "run").depends_on(a_id);

        let mut workflow = Workflow::new(ProjectId::new(1), "pipeline", TriggerDescriptor::Manual);
        workflow.graph.add_node(a);
        workflow.graph.add_node(b);
        workflow.graph.add_dependency(a_id, workflow.graph.nodes().find(|n| n.name == "b").unwrap().id).unwrap();

        let run_id = scheduler.start_run(&workflow, &agents, RunTrigger::Manual, serde_json::json!({})).await.unwrap();

        let state = scheduler.rebuild_state(&workflow, run_id).await.unwrap();
        assert_eq!(state.run.status, RunStatus::Failed);
        assert!(state.has_failures());
        let b_id = workflow.graph.nodes().find(|n| n.name == "b").unwrap().id;
        assert_eq!(state.agent_runs.get(&b_id).unwrap().status, crate::execution::AgentRunStatus::Skipped);
    }

    #[tokio::test]
    async fn approval_required_node_suspends_then_resumes() {
        let scheduler = new_scheduler();

        let agent = approval_agent("reviewer");
        let mut agents = HashMap::new();
        agents.insert(agent.id, agent.clone());

        let node = WorkflowNode::new("gate", agent.id, "run");

        let mut workflow = Workflow::new(ProjectId::new(1), "gated", TriggerDescriptor::Manual);
        workflow.graph.add_node(node);

        let run_id = scheduler.start_run(&workflow, &agents, RunTrigger::Manual, serde_json::json!({})).await.unwrap();

        let state = scheduler.rebuild_state(&workflow, run_id).await.unwrap();
        assert_eq!(state.run.status, RunStatus::WaitingApproval);
        let approval = state.pending_approvals()[0].clone();

        scheduler
            .resolve_approval(&workflow, &agents, approval.id, true, "alice".to_string(), None)
            .await
            .unwrap();

        let state = scheduler.rebuild_state(&workflow, run_id).await.unwrap();
        assert_eq!(state.run.status, RunStatus::Success);
    }

    #[tokio::test]
    async fn approval_rejection_fails_run() {
        let scheduler = new_scheduler();

        let agent = approval_agent("reviewer");
        let mut agents = HashMap::new();
        agents.insert(agent.id, agent.clone());

        let node = WorkflowNode::new("gate", agent.id, "run");
        let mut workflow = Workflow::new(ProjectId::new(1), "gated", TriggerDescriptor::Manual);
        workflow.graph.add_node(node);

        let run_id = scheduler.start_run(&workflow, &agents, RunTrigger::Manual, serde_json::json!({})).await.unwrap();
        let state = scheduler.rebuild_state(&workflow, run_id).await.unwrap();
        let approval = state.pending_approvals()[0].clone();

        scheduler
            .resolve_approval(&workflow, &agents, approval.id, false, "bob".to_string(), Some("nope".to_string()))
            .await
            .unwrap();

        let state = scheduler.rebuild_state(&workflow, run_id).await.unwrap();
        assert_eq!(state.run.status, RunStatus::Failed);
    }

    struct FlakyExecutor {
        remaining_failures: AtomicU32,
    }

    #[async_trait]
    impl ContractExecutor for FlakyExecutor {
        async fn execute(&self, _descriptor: &AgentDescriptor, input: JsonValue) -> ExecutionResult {
            if self.remaining_failures.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1)).is_ok() {
                ExecutionResult::Failure { kind: AgentFailureKind::Timeout, message: "slow".to_string() }
            } else {
                ExecutionResult::Success(input)
            }
        }
    }

    #[tokio::test]
    async fn retryable_failure_eventually_succeeds_with_a_raised_attempt_budget() {
        let scheduler = new_scheduler_with_executor(FlakyExecutor { remaining_failures: AtomicU32::new(1) })
            .with_max_node_attempts(2);

        let agent = echo_agent("worker");
        let mut agents = HashMap::new();
        agents.insert(agent.id, agent.clone());

        let node = WorkflowNode::new("a", agent.id, "run");
        let mut workflow = Workflow::new(ProjectId::new(1), "pipeline", TriggerDescriptor::Manual);
        workflow.graph.add_node(node);

        let run_id = scheduler.start_run(&workflow, &agents, RunTrigger::Manual, serde_json::json!({})).await.unwrap();
        let state = scheduler.rebuild_state(&workflow, run_id).await.unwrap();
        assert_eq!(state.run.status, RunStatus::Success);
    }

    #[tokio::test]
    async fn default_attempt_budget_does_not_retry_a_retryable_failure() {
        let scheduler = new_scheduler_with_executor(FlakyExecutor { remaining_failures: AtomicU32::new(1) });

        let agent = echo_agent("worker");
        let mut agents = HashMap::new();
        agents.insert(agent.id, agent.clone());

        let node = WorkflowNode::new("a", agent.id, "run");
        let mut workflow = Workflow::new(ProjectId::new(1), "pipeline", TriggerDescriptor::Manual);
        workflow.graph.add_node(node);

        let run_id = scheduler.start_run(&workflow, &agents, RunTrigger::Manual, serde_json::json!({})).await.unwrap();
        let state = scheduler.rebuild_state(&workflow, run_id).await.unwrap();
        assert_eq!(state.run.status, RunStatus::Failed);
    }

    #[tokio::test]
    async fn output_schema_violation_is_retried_then_fails() {
        let scheduler = new_scheduler_with_executor(MockExecutor::succeeding(serde_json::json!("not an object")))
            .with_max_node_attempts(2);

        let agent = echo_agent("worker").with_capability(crate::agent::AgentCapability::new(
            "run",
            CapabilitySchema::any(),
            CapabilitySchema::from_json(serde_json::json!({"type": "object"})),
        ));
        let mut agents = HashMap::new();
        agents.insert(agent.id, agent.clone());

        let node = WorkflowNode::new("a", agent.id, "run");
        let mut workflow = Workflow::new(ProjectId::new(1), "pipeline", TriggerDescriptor::Manual);
        workflow.graph.add_node(node);

        let run_id = scheduler.start_run(&workflow, &agents, RunTrigger::Manual, serde_json::json!({})).await.unwrap();
        let state = scheduler.rebuild_state(&workflow, run_id).await.unwrap();
        assert_eq!(state.run.status, RunStatus::Failed);
        assert!(state.has_failures());
    }
}
