//! `/api/agents` handlers.

use crate::db::RegistryError;
use crate::error::ApiError;
use crate::state::AppState;
use axum::extract::{Path, Query, State};
use axum::Json;
use loomwright_core::{AgentId, ProjectId};
use loomwright_workflow::{Agent, AgentCapability, AgentKind, RiskLevel};
use serde::Deserialize;
use std::str::FromStr;

#[derive(Deserialize)]
pub struct CreateAgentRequest {
    pub project_id: i64,
    pub name: String,
    pub kind: AgentKind,
    pub entry_path: String,
    pub version: String,
    #[serde(default)]
    pub risk_level: Option<RiskLevel>,
    #[serde(default)]
    pub capabilities: Vec<AgentCapability>,
}

pub async fn create(State(state): State<AppState>, Json(req): Json<CreateAgentRequest>) -> Result<Json<Agent>, ApiError> {
    if req.name.trim().is_empty() || req.entry_path.trim().is_empty() {
        return Err(ApiError::BadRequest("name and entry_path are required".to_string()));
    }

    let mut agent = Agent::new(ProjectId::new(req.project_id), req.name, req.kind, req.entry_path, req.version);
    if let Some(risk_level) = req.risk_level {
        agent = agent.with_risk_level(risk_level);
    }
    for capability in req.capabilities {
        agent = agent.with_capability(capability);
    }

    let created = state.registry.create_agent(agent).await?;
    Ok(Json(created))
}

#[derive(Deserialize)]
pub struct ListAgentsQuery {
    #[serde(rename = "projectId")]
    pub project_id: Option<i64>,
}

pub async fn list(State(state): State<AppState>, Query(query): Query<ListAgentsQuery>) -> Result<Json<Vec<Agent>>, ApiError> {
    let project_id = query.project_id.ok_or_else(|| ApiError::BadRequest("projectId is required".to_string()))?;
    let agents = state.registry.list_agents(ProjectId::new(project_id)).await?;
    Ok(Json(agents))
}

pub async fn get(State(state): State<AppState>, Path(id): Path<String>) -> Result<Json<Agent>, ApiError> {
    let id = parse_agent_id(&id)?;
    let agent = state.registry.get_agent(id).await?;
    Ok(Json(agent))
}

#[derive(Deserialize)]
pub struct UpdateAgentRequest {
    pub name: Option<String>,
    pub version: Option<String>,
    pub risk_level: Option<RiskLevel>,
    pub capabilities: Option<Vec<AgentCapability>>,
}

pub async fn update(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<UpdateAgentRequest>,
) -> Result<Json<Agent>, ApiError> {
    let id = parse_agent_id(&id)?;
    let mut agent = state.registry.get_agent(id).await?;
    if let Some(name) = req.name {
        agent.name = name;
    }
    if let Some(version) = req.version {
        agent.version = version;
    }
    if let Some(risk_level) = req.risk_level {
        agent.risk_level = risk_level;
    }
    if let Some(capabilities) = req.capabilities {
        agent.capabilities = capabilities;
    }
    let updated = state.registry.update_agent(agent).await?;
    Ok(Json(updated))
}

pub async fn delete(State(state): State<AppState>, Path(id): Path<String>) -> Result<(), ApiError> {
    let id = parse_agent_id(&id)?;
    state.registry.delete_agent(id).await?;
    Ok(())
}

fn parse_agent_id(raw: &str) -> Result<AgentId, ApiError> {
    AgentId::from_str(raw).map_err(|_| ApiError::BadRequest(format!("invalid agent id: {raw}")))
}

impl From<RegistryError> for ApiError {
    fn from(e: RegistryError) -> Self {
        match e {
            RegistryError::NotFound => Self::NotFound(e.to_string()),
            RegistryError::DuplicateName { .. } | RegistryError::AgentInUse { .. } => Self::Conflict(e.to_string()),
            RegistryError::StorageFailed { .. } => Self::Internal(e.to_string()),
        }
    }
}
