//! Postgres-backed [`PersistenceGateway`].
//!
//! Runs, agent runs, and approvals are each stored as a JSONB snapshot
//! plus the columns needed to filter and join — `finish_agent_run` and
//! `record_decision` both apply their mutation to the deserialized
//! struct via its own state-machine methods, then write the snapshot
//! back, so the row never drifts from what the in-memory types allow.

use async_trait::async_trait;
use loomwright_core::{ApprovalId, WorkflowRunId};
use loomwright_workflow::{
    AgentRun, AgentRunError, ExecutionEvent, GatewayError, NodeId, PersistenceGateway, RunStatus, WorkflowApproval,
    WorkflowRun,
};
use serde_json::Value as JsonValue;
use sqlx::{FromRow, PgPool};

#[derive(FromRow)]
struct JsonRow {
    body: JsonValue,
}

fn storage_failed(e: sqlx::Error) -> GatewayError {
    GatewayError::StorageFailed { message: e.to_string() }
}

fn decode<T: serde::de::DeserializeOwned>(row: JsonRow) -> Result<T, GatewayError> {
    serde_json::from_value(row.body).map_err(|e| GatewayError::StorageFailed { message: e.to_string() })
}

pub struct SqlxGateway {
    pool: PgPool,
}

impl SqlxGateway {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn load_run(&self, run_id: WorkflowRunId) -> Result<WorkflowRun, GatewayError> {
        let row: JsonRow = sqlx::query_as("SELECT body FROM workflow_runs WHERE id = $1")
            .bind(run_id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(storage_failed)?
            .ok_or(GatewayError::RunNotFound { run_id })?;
        decode(row)
    }

    async fn save_run(&self, run: &WorkflowRun) -> Result<(), GatewayError> {
        let body = serde_json::to_value(run).map_err(|e| GatewayError::StorageFailed { message: e.to_string() })?;
        sqlx::query("UPDATE workflow_runs SET status = $2, body = $3 WHERE id = $1")
            .bind(run.id.to_string())
            .bind(format!("{:?}", run.status).to_lowercase())
            .bind(&body)
            .execute(&self.pool)
            .await
            .map_err(storage_failed)?;
        Ok(())
    }

    async fn load_agent_run(&self, run_id: WorkflowRunId, node_id: NodeId) -> Result<AgentRun, GatewayError> {
        let row: JsonRow = sqlx::query_as("SELECT body FROM agent_runs WHERE run_id = $1 AND node_id = $2")
            .bind(run_id.to_string())
            .bind(node_id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(storage_failed)?
            .ok_or(GatewayError::RunNotFound { run_id })?;
        decode(row)
    }

    async fn save_agent_run(&self, agent_run: &AgentRun) -> Result<(), GatewayError> {
        let body = serde_json::to_value(agent_run).map_err(|e| GatewayError::StorageFailed { message: e.to_string() })?;
        sqlx::query("UPDATE agent_runs SET status = $3, body = $4 WHERE run_id = $1 AND node_id = $2")
            .bind(agent_run.run_id.to_string())
            .bind(agent_run.node_id.to_string())
            .bind(format!("{:?}", agent_run.status).to_lowercase())
            .bind(&body)
            .execute(&self.pool)
            .await
            .map_err(storage_failed)?;
        Ok(())
    }
}

#[async_trait]
impl PersistenceGateway for SqlxGateway {
    async fn create_run(&self, run: WorkflowRun) -> Result<(), GatewayError> {
        let body = serde_json::to_value(&run).map_err(|e| GatewayError::StorageFailed { message: e.to_string() })?;
        sqlx::query("INSERT INTO workflow_runs (id, workflow_id, status, body) VALUES ($1, $2, $3, $4)")
            .bind(run.id.to_string())
            .bind(run.workflow_id.to_string())
            .bind(format!("{:?}", run.status).to_lowercase())
            .bind(&body)
            .execute(&self.pool)
            .await
            .map_err(storage_failed)?;
        Ok(())
    }

    async fn claim_run(&self, run_id: WorkflowRunId) -> Result<WorkflowRun, GatewayError> {
        let mut run = self.load_run(run_id).await?;
        run.claim().map_err(|actual| GatewayError::StateConflict { run_id, expected: RunStatus::Pending, actual })?;

        let body = serde_json::to_value(&run).map_err(|e| GatewayError::StorageFailed { message: e.to_string() })?;
        let result = sqlx::query("UPDATE workflow_runs SET status = $2, body = $3 WHERE id = $1 AND status = 'pending'")
            .bind(run.id.to_string())
            .bind(format!("{:?}", run.status).to_lowercase())
            .bind(&body)
            .execute(&self.pool)
            .await
            .map_err(storage_failed)?;

        if result.rows_affected() == 0 {
            let current = self.load_run(run_id).await?;
            return Err(GatewayError::StateConflict { run_id, expected: RunStatus::Pending, actual: current.status });
        }
        Ok(run)
    }

    async fn start_agent_run(&self, agent_run: AgentRun) -> Result<(), GatewayError> {
        let body = serde_json::to_value(&agent_run).map_err(|e| GatewayError::StorageFailed { message: e.to_string() })?;
        sqlx::query(
            "INSERT INTO agent_runs (id, run_id, node_id, agent_id, status, body) VALUES ($1, $2, $3, $4, $5, $6) \
             ON CONFLICT (run_id, node_id) DO UPDATE SET status = EXCLUDED.status, body = EXCLUDED.body",
        )
        .bind(agent_run.id.to_string())
        .bind(agent_run.run_id.to_string())
        .bind(agent_run.node_id.to_string())
        .bind(agent_run.agent_id.to_string())
        .bind(format!("{:?}", agent_run.status).to_lowercase())
        .bind(&body)
        .execute(&self.pool)
        .await
        .map_err(storage_failed)?;
        Ok(())
    }

    async fn finish_agent_run(
        &self,
        run_id: WorkflowRunId,
        node_id: NodeId,
        output: Option<JsonValue>,
        error: Option<AgentRunError>,
    ) -> Result<(), GatewayError> {
        let mut agent_run = self.load_agent_run(run_id, node_id).await?;
        match (output, error) {
            (Some(output), None) => agent_run.succeed(output),
            (None, Some(error)) => agent_run.fail(error),
            _ => agent_run.skip(),
        }
        self.save_agent_run(&agent_run).await
    }

    async fn request_approval(&self, approval: WorkflowApproval) -> Result<(), GatewayError> {
        let body = serde_json::to_value(&approval).map_err(|e| GatewayError::StorageFailed { message: e.to_string() })?;
        sqlx::query("INSERT INTO workflow_approvals (id, run_id, node_id, status, body) VALUES ($1, $2, $3, $4, $5)")
            .bind(approval.id.to_string())
            .bind(approval.run_id.to_string())
            .bind(approval.node_id.to_string())
            .bind("pending")
            .bind(&body)
            .execute(&self.pool)
            .await
            .map_err(storage_failed)?;

        let mut run = self.load_run(approval.run_id).await?;
        run.await_approval();
        self.save_run(&run).await
    }

    async fn record_decision(
        &self,
        approval_id: ApprovalId,
        approved: bool,
        responded_by: String,
        notes: Option<String>,
    ) -> Result<WorkflowApproval, GatewayError> {
        let row: JsonRow = sqlx::query_as("SELECT body FROM workflow_approvals WHERE id = $1")
            .bind(approval_id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(storage_failed)?
            .ok_or(GatewayError::ApprovalNotFound { approval_id })?;
        let mut approval: WorkflowApproval = decode(row)?;
        approval
            .record_decision(approved, responded_by, notes)
            .map_err(|e| GatewayError::StorageFailed { message: e.to_string() })?;

        let body = serde_json::to_value(&approval).map_err(|e| GatewayError::StorageFailed { message: e.to_string() })?;
        sqlx::query("UPDATE workflow_approvals SET status = $2, body = $3 WHERE id = $1")
            .bind(approval.id.to_string())
            .bind(format!("{:?}", approval.status).to_lowercase())
            .bind(&body)
            .execute(&self.pool)
            .await
            .map_err(storage_failed)?;

        let (pending,): (i64,) = sqlx::query_as(
            "SELECT count(*) FROM workflow_approvals WHERE run_id = $1 AND status = 'pending'",
        )
        .bind(approval.run_id.to_string())
        .fetch_one(&self.pool)
        .await
        .map_err(storage_failed)?;

        if pending == 0 {
            let mut run = self.load_run(approval.run_id).await?;
            run.resume();
            self.save_run(&run).await?;
        }

        Ok(approval)
    }

    async fn finish_run(&self, run_id: WorkflowRunId, status: RunStatus) -> Result<(), GatewayError> {
        let mut run = self.load_run(run_id).await?;
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
        self.save_run(&run).await
    }

    async fn list_runs_by_status(&self, status: RunStatus) -> Result<Vec<WorkflowRun>, GatewayError> {
        let rows: Vec<JsonRow> = sqlx::query_as("SELECT body FROM workflow_runs WHERE status = $1 ORDER BY id")
            .bind(format!("{status:?}").to_lowercase())
            .fetch_all(&self.pool)
            .await
            .map_err(storage_failed)?;
        rows.into_iter().map(decode).collect()
    }

    async fn append_event(&self, event: ExecutionEvent) -> Result<(), GatewayError> {
        let run_id = event.run_id();
        let body = serde_json::to_value(&event).map_err(|e| GatewayError::StorageFailed { message: e.to_string() })?;
        sqlx::query("INSERT INTO execution_events (run_id, body) VALUES ($1, $2)")
            .bind(run_id.to_string())
            .bind(&body)
            .execute(&self.pool)
            .await
            .map_err(storage_failed)?;
        Ok(())
    }

    async fn load_events(&self, run_id: WorkflowRunId) -> Result<Vec<ExecutionEvent>, GatewayError> {
        let rows: Vec<JsonRow> = sqlx::query_as("SELECT body FROM execution_events WHERE run_id = $1 ORDER BY seq")
            .bind(run_id.to_string())
            .fetch_all(&self.pool)
            .await
            .map_err(storage_failed)?;
        rows.into_iter().map(decode).collect()
    }
}
