//! Shared application state handed to every route handler.

use crate::alert_directory::SqlAlertDirectory;
use crate::db::{SqlxGateway, SqlxWorkflowRepository, WorkflowRepository};
use crate::error::ApiError;
use crate::observability::Metrics;
use loomwright_core::WorkflowRunId;
use loomwright_safety::{RateLimiter, SafetyEnvelope};
use loomwright_trigger::WebhookMapper;
use loomwright_workflow::{
    DagScheduler, InMemoryApprovalCoordinator, NatsEventBusClient, PersistenceGateway, ProcessContainerExecutor,
    RunStatus, WorkflowRun,
};
use axum::http::HeaderMap;
use sqlx::PgPool;
use std::sync::Arc;

/// Identifies the caller a rate-limit quota is tracked against. There is
/// no auth layer in front of this API (out of scope per the orchestrator's
/// external-interfaces contract), so the caller-supplied `x-caller-id`
/// header is trusted as the rate-limit key, falling back to a shared
/// bucket for anonymous callers.
#[must_use]
pub fn caller_id(headers: &HeaderMap) -> String {
    headers.get("x-caller-id").and_then(|v| v.to_str().ok()).unwrap_or("anonymous").to_string()
}

/// Container executor wrapped in the rate-limit/circuit-breaker envelope.
pub type Executor = SafetyEnvelope<ProcessContainerExecutor>;

/// The concrete scheduler type this server wires up. The approval
/// coordinator is kept in-memory even though the gateway is
/// Postgres-backed: a single server process is the only writer of
/// approval decisions reachable through this binary, and splitting that
/// bookkeeping into its own table would duplicate what
/// `workflow_approvals` already tracks. See DESIGN.md.
pub type Scheduler = DagScheduler<SqlxGateway, InMemoryApprovalCoordinator, Executor, NatsEventBusClient>;

#[derive(Clone)]
pub struct AppState {
    pub db: PgPool,
    pub registry: Arc<dyn WorkflowRepository>,
    pub gateway: Arc<SqlxGateway>,
    pub scheduler: Arc<Scheduler>,
    pub bus: Arc<NatsEventBusClient>,
    pub rate_limiter: Arc<RateLimiter<String>>,
    pub metrics: Arc<Metrics>,
}

impl AppState {
    #[must_use]
    pub fn new(
        db: PgPool,
        gateway: Arc<SqlxGateway>,
        scheduler: Arc<Scheduler>,
        bus: Arc<NatsEventBusClient>,
        rate_limiter: Arc<RateLimiter<String>>,
        metrics: Arc<Metrics>,
    ) -> Self {
        let registry: Arc<dyn WorkflowRepository> = Arc::new(SqlxWorkflowRepository::new(db.clone()));
        Self { db, registry, gateway, scheduler, bus, rate_limiter, metrics }
    }

    /// Lists runs in a given status, for the run-listing and detail routes.
    pub async fn scheduler_runs_by_status(&self, status: RunStatus) -> Result<Vec<WorkflowRun>, ApiError> {
        Ok(self.gateway.list_runs_by_status(status).await?)
    }

    /// Finds a single run by id by scanning each non-terminal-then-terminal
    /// status bucket. The gateway has no direct by-id read path outside of
    /// `claim_run` (which mutates), so route handlers needing a read-only
    /// lookup go through this helper instead.
    pub async fn scheduler_find_run(&self, run_id: WorkflowRunId) -> Result<Option<WorkflowRun>, ApiError> {
        for status in [
            RunStatus::Pending,
            RunStatus::Running,
            RunStatus::WaitingApproval,
            RunStatus::Success,
            RunStatus::Failed,
            RunStatus::Cancelled,
        ] {
            if let Some(run) = self.gateway.list_runs_by_status(status).await?.into_iter().find(|r| r.id == run_id) {
                return Ok(Some(run));
            }
        }
        Ok(None)
    }

    /// Builds a webhook mapper wired to this state's scheduler and a
    /// fresh SQL-backed alert-workflow directory. Cheap to construct per
    /// request: both fields are `Arc` clones.
    #[must_use]
    pub fn webhook_mapper(&self) -> WebhookMapper<SqlxGateway, InMemoryApprovalCoordinator, Executor, NatsEventBusClient> {
        let directory = Arc::new(SqlAlertDirectory::new(Arc::clone(&self.registry)));
        WebhookMapper::new(Arc::clone(&self.scheduler), directory)
    }
}
