//! `/api/approvals` handlers.

use crate::error::ApiError;
use crate::state::AppState;
use axum::extract::{Path, Query, State};
use loomwright_core::{AgentId, ApprovalId, WorkflowRunId};
use loomwright_workflow::{ApprovalStatus, RunStatus};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::str::FromStr;

#[derive(Deserialize)]
pub struct ListApprovalsQuery {
    pub status: Option<ApprovalStatus>,
    #[serde(rename = "workflowRunId")]
    pub workflow_run_id: Option<String>,
}

/// Approvals don't have their own listing table in this gateway (they're
/// embedded in each run's replayed state), so this scans runs currently
/// `WAITING_APPROVAL` — the only status an approval can be pending
/// against — and flattens their pending approvals.
pub async fn list(State(state): State<AppState>, Query(query): Query<ListApprovalsQuery>) -> Result<axum::Json<Vec<JsonValue>>, ApiError> {
    let runs = state.scheduler_runs_by_status(RunStatus::WaitingApproval).await?;
    let mut out = Vec::new();
    for run in runs {
        if let Some(filter_run_id) = &query.workflow_run_id {
            let filter_run_id = WorkflowRunId::from_str(filter_run_id)
                .map_err(|_| ApiError::BadRequest(format!("invalid workflowRunId: {filter_run_id}")))?;
            if run.id != filter_run_id {
                continue;
            }
        }
        for event in state.scheduler.events_for(run.id).await? {
            if let loomwright_workflow::ExecutionEvent::ApprovalRequested { approval_id, node_id, .. } = event {
                if query.status.is_some_and(|s| s != ApprovalStatus::Pending) {
                    continue;
                }
                out.push(serde_json::json!({
                    "id": approval_id,
                    "runId": run.id,
                    "nodeId": node_id,
                    "status": "pending",
                }));
            }
        }
    }
    Ok(axum::Json(out))
}

#[derive(Deserialize)]
pub struct DecisionRequest {
    pub decision: Decision,
    #[serde(rename = "respondedBy")]
    pub responded_by: String,
    pub notes: Option<String>,
}

#[derive(Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Decision {
    Approved,
    Rejected,
}

#[derive(Serialize)]
pub struct DecisionResponse {
    pub id: ApprovalId,
    pub status: &'static str,
}

pub async fn decide(
    State(state): State<AppState>,
    Path(id): Path<String>,
    axum::Json(req): axum::Json<DecisionRequest>,
) -> Result<axum::Json<DecisionResponse>, ApiError> {
    let approval_id = ApprovalId::from_str(&id).map_err(|_| ApiError::BadRequest(format!("invalid approval id: {id}")))?;

    // The caller only has an approval id; find the run it gates by
    // scanning currently-suspended runs (the only place an unresolved
    // approval can live), then the workflow behind that run.
    let suspended = state.scheduler_runs_by_status(RunStatus::WaitingApproval).await?;
    let mut found = None;
    for run in suspended {
        let events = state.scheduler.events_for(run.id).await?;
        if events
            .iter()
            .any(|e| matches!(e, loomwright_workflow::ExecutionEvent::ApprovalRequested { approval_id: a, .. } if *a == approval_id))
        {
            found = Some(run);
            break;
        }
    }
    let run = found.ok_or_else(|| ApiError::NotFound(format!("approval not found or already resolved: {approval_id}")))?;

    let workflow = state.registry.get_workflow(run.workflow_id).await?;
    let agent_ids: Vec<AgentId> = workflow.graph.nodes().map(|n| n.agent_id).collect();
    let agents = state.registry.agents_by_id(&agent_ids).await?;

    let approved = req.decision == Decision::Approved;
    state
        .scheduler
        .resolve_approval(&workflow, &agents, approval_id, approved, req.responded_by, req.notes)
        .await?;

    Ok(axum::Json(DecisionResponse {
        id: approval_id,
        status: if approved { "approved" } else { "rejected" },
    }))
}
