//! `/api/webhooks/*` ingestion endpoints.
//!
//! Both payload shapes are source-specific; parsing happens here and the
//! normalized [`AlertEnvelope`] is handed to the mapper, which is
//! transport-agnostic.

use crate::error::ApiError;
use crate::state::AppState;
use axum::extract::State;
use axum::Json;
use loomwright_trigger::{AlertEnvelope, WebhookMapperError};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::HashMap;

#[derive(Deserialize)]
pub struct AlertmanagerPayload {
    pub alerts: Vec<AlertmanagerAlert>,
}

#[derive(Deserialize)]
pub struct AlertmanagerAlert {
    pub status: String,
    #[serde(default)]
    pub labels: HashMap<String, String>,
    #[serde(default)]
    pub annotations: HashMap<String, String>,
}

#[derive(Serialize)]
pub struct AlertmanagerResponse {
    #[serde(rename = "workflowRuns")]
    pub workflow_runs: Vec<JsonValue>,
}

pub async fn alertmanager(State(state): State<AppState>, Json(payload): Json<AlertmanagerPayload>) -> Result<Json<AlertmanagerResponse>, ApiError> {
    let mapper = state.webhook_mapper();
    let mut runs = Vec::with_capacity(payload.alerts.len());
    for alert in payload.alerts {
        let envelope = AlertEnvelope { status: alert.status, labels: alert.labels, annotations: alert.annotations };
        let run_id = mapper.map_alertmanager_alert(envelope).await.map_err(map_mapper_error)?;
        runs.push(serde_json::json!({ "runId": run_id }));
    }
    Ok(Json(AlertmanagerResponse { workflow_runs: runs }))
}

#[derive(Deserialize)]
pub struct GrafanaPayload {
    pub status: String,
    #[serde(default)]
    pub labels: HashMap<String, String>,
    #[serde(default)]
    pub annotations: HashMap<String, String>,
}

#[derive(Serialize)]
pub struct GrafanaResponse {
    #[serde(rename = "workflowRunId")]
    pub workflow_run_id: loomwright_core::WorkflowRunId,
}

pub async fn grafana(State(state): State<AppState>, Json(payload): Json<GrafanaPayload>) -> Result<Json<GrafanaResponse>, ApiError> {
    let mapper = state.webhook_mapper();
    let envelope = AlertEnvelope { status: payload.status, labels: payload.labels, annotations: payload.annotations };
    let workflow_run_id = mapper.map_grafana_alert(envelope).await.map_err(map_mapper_error)?;
    Ok(Json(GrafanaResponse { workflow_run_id }))
}

fn map_mapper_error(e: WebhookMapperError) -> ApiError {
    match e {
        WebhookMapperError::NotifierAgentMissing => ApiError::Internal(e.to_string()),
        WebhookMapperError::WorkflowUnavailable { .. } => ApiError::NotFound(e.to_string()),
    }
}
