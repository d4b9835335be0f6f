//! HTTP route handlers, one module per resource family.

pub mod agents;
pub mod approvals;
pub mod health;
pub mod webhooks;
pub mod workflows;

use crate::state::AppState;
use axum::routing::{get, post};
use axum::Router;

/// Builds the full router described in the external interfaces section
/// of the orchestrator's design: agents, workflows, runs, approvals,
/// webhooks, and health.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/agents", post(agents::create).get(agents::list))
        .route(
            "/api/agents/{id}",
            get(agents::get).put(agents::update).delete(agents::delete),
        )
        .route("/api/workflows", post(workflows::create).get(workflows::list))
        .route(
            "/api/workflows/{id}",
            get(workflows::get).put(workflows::update).delete(workflows::delete),
        )
        .route("/api/workflows/{id}/trigger", post(workflows::trigger))
        .route("/api/workflows/{id}/runs", get(workflows::list_runs))
        .route("/api/workflows/{wf_id}/runs/{run_id}", get(workflows::run_detail))
        .route("/api/workflows/runs/{run_id}/agent-runs", get(workflows::list_agent_runs))
        .route("/api/workflows/runs/{run_id}/retry", post(workflows::retry))
        .route("/api/approvals", get(approvals::list))
        .route("/api/approvals/{id}/decision", post(approvals::decide))
        .route("/api/webhooks/alertmanager", post(webhooks::alertmanager))
        .route("/api/webhooks/grafana", post(webhooks::grafana))
        .route("/health", get(health::health))
        .with_state(state)
}
