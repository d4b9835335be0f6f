//! Workflow and agent registry CRUD.
//!
//! The scheduler never touches these tables directly — it only needs a
//! `&Workflow` and an agent map handed to it by the HTTP layer. This
//! repository is how the HTTP layer gets them.

use async_trait::async_trait;
use loomwright_core::{AgentId, ProjectId, WorkflowId};
use loomwright_workflow::{Agent, Workflow, WorkflowStatus};
use sqlx::{FromRow, PgPool};

/// Errors from the workflow/agent registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    /// No workflow or agent exists with the given id.
    NotFound,
    /// A unique constraint (project, name) was violated.
    DuplicateName { name: String },
    /// An agent is referenced by an active workflow and cannot be deleted.
    AgentInUse { agent_id: AgentId },
    /// The underlying store rejected the operation.
    StorageFailed { message: String },
}

impl std::fmt::Display for RegistryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotFound => write!(f, "record not found"),
            Self::DuplicateName { name } => write!(f, "name '{name}' already in use for this project"),
            Self::AgentInUse { agent_id } => write!(f, "agent {agent_id} is referenced by an active workflow"),
            Self::StorageFailed { message } => write!(f, "storage failed: {message}"),
        }
    }
}

impl std::error::Error for RegistryError {}

/// CRUD for workflows and agents.
#[async_trait]
pub trait WorkflowRepository: Send + Sync {
    async fn create_workflow(&self, workflow: Workflow) -> Result<Workflow, RegistryError>;
    async fn get_workflow(&self, id: WorkflowId) -> Result<Workflow, RegistryError>;
    async fn update_workflow(&self, workflow: Workflow) -> Result<Workflow, RegistryError>;
    async fn delete_workflow(&self, id: WorkflowId) -> Result<(), RegistryError>;
    async fn list_workflows(&self, project_id: ProjectId, status: Option<WorkflowStatus>) -> Result<Vec<Workflow>, RegistryError>;
    async fn find_workflow_by_name(&self, project_id: ProjectId, name: &str) -> Result<Option<Workflow>, RegistryError>;

    async fn create_agent(&self, agent: Agent) -> Result<Agent, RegistryError>;
    async fn get_agent(&self, id: AgentId) -> Result<Agent, RegistryError>;
    async fn update_agent(&self, agent: Agent) -> Result<Agent, RegistryError>;
    async fn delete_agent(&self, id: AgentId) -> Result<(), RegistryError>;
    async fn list_agents(&self, project_id: ProjectId) -> Result<Vec<Agent>, RegistryError>;
    /// Loads every agent in `ids` into a lookup map, as the scheduler needs.
    async fn agents_by_id(&self, ids: &[AgentId]) -> Result<std::collections::HashMap<AgentId, Agent>, RegistryError>;
}

#[derive(FromRow)]
struct JsonRow {
    body: serde_json::Value,
}

/// Postgres-backed [`WorkflowRepository`]. Each entity is stored as a
/// single JSONB column plus the columns needed for uniqueness and
/// listing — the graph's authoring-time shape doesn't need a
/// normalized node table to satisfy the contracts above.
pub struct SqlxWorkflowRepository {
    pool: PgPool,
}

impl SqlxWorkflowRepository {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn decode<T: serde::de::DeserializeOwned>(row: JsonRow) -> Result<T, RegistryError> {
        serde_json::from_value(row.body).map_err(|e| RegistryError::StorageFailed { message: e.to_string() })
    }
}

#[async_trait]
impl WorkflowRepository for SqlxWorkflowRepository {
    async fn create_workflow(&self, workflow: Workflow) -> Result<Workflow, RegistryError> {
        let body = serde_json::to_value(&workflow).map_err(|e| RegistryError::StorageFailed { message: e.to_string() })?;
        sqlx::query(
            "INSERT INTO workflows (id, project_id, name, status, body) VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(workflow.id.to_string())
        .bind(workflow.project_id.as_i64())
        .bind(workflow.name().to_string())
        .bind(format!("{:?}", workflow.metadata.status).to_lowercase())
        .bind(&body)
        .execute(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                RegistryError::DuplicateName { name: workflow.name().to_string() }
            }
            other => RegistryError::StorageFailed { message: other.to_string() },
        })?;
        Ok(workflow)
    }

    async fn get_workflow(&self, id: WorkflowId) -> Result<Workflow, RegistryError> {
        let row: JsonRow = sqlx::query_as("SELECT body FROM workflows WHERE id = $1")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| RegistryError::StorageFailed { message: e.to_string() })?
            .ok_or(RegistryError::NotFound)?;
        Self::decode(row)
    }

    async fn update_workflow(&self, workflow: Workflow) -> Result<Workflow, RegistryError> {
        let body = serde_json::to_value(&workflow).map_err(|e| RegistryError::StorageFailed { message: e.to_string() })?;
        let result = sqlx::query("UPDATE workflows SET name = $2, status = $3, body = $4 WHERE id = $1")
            .bind(workflow.id.to_string())
            .bind(workflow.name().to_string())
            .bind(format!("{:?}", workflow.metadata.status).to_lowercase())
            .bind(&body)
            .execute(&self.pool)
            .await
            .map_err(|e| RegistryError::StorageFailed { message: e.to_string() })?;
        if result.rows_affected() == 0 {
            return Err(RegistryError::NotFound);
        }
        Ok(workflow)
    }

    async fn delete_workflow(&self, id: WorkflowId) -> Result<(), RegistryError> {
        let result = sqlx::query("DELETE FROM workflows WHERE id = $1")
            .bind(id.to_string())
            .execute(&self.pool)
            .await
            .map_err(|e| RegistryError::StorageFailed { message: e.to_string() })?;
        if result.rows_affected() == 0 {
            return Err(RegistryError::NotFound);
        }
        Ok(())
    }

    async fn list_workflows(&self, project_id: ProjectId, status: Option<WorkflowStatus>) -> Result<Vec<Workflow>, RegistryError> {
        let rows: Vec<JsonRow> = sqlx::query_as(
            "SELECT body FROM workflows WHERE project_id = $1 AND ($2::text IS NULL OR status = $2) ORDER BY id",
        )
        .bind(project_id.as_i64())
        .bind(status.map(|s| format!("{s:?}").to_lowercase()))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| RegistryError::StorageFailed { message: e.to_string() })?;
        rows.into_iter().map(Self::decode).collect()
    }

    async fn find_workflow_by_name(&self, project_id: ProjectId, name: &str) -> Result<Option<Workflow>, RegistryError> {
        let row: Option<JsonRow> = sqlx::query_as("SELECT body FROM workflows WHERE project_id = $1 AND name = $2")
            .bind(project_id.as_i64())
            .bind(name)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| RegistryError::StorageFailed { message: e.to_string() })?;
        row.map(Self::decode).transpose()
    }

    async fn create_agent(&self, agent: Agent) -> Result<Agent, RegistryError> {
        let body = serde_json::to_value(&agent).map_err(|e| RegistryError::StorageFailed { message: e.to_string() })?;
        sqlx::query("INSERT INTO agents (id, project_id, name, body) VALUES ($1, $2, $3, $4)")
            .bind(agent.id.to_string())
            .bind(agent.project_id.as_i64())
            .bind(&agent.name)
            .bind(&body)
            .execute(&self.pool)
            .await
            .map_err(|e| match e {
                sqlx::Error::Database(db) if db.is_unique_violation() => {
                    RegistryError::DuplicateName { name: agent.name.clone() }
                }
                other => RegistryError::StorageFailed { message: other.to_string() },
            })?;
        Ok(agent)
    }

    async fn get_agent(&self, id: AgentId) -> Result<Agent, RegistryError> {
        let row: JsonRow = sqlx::query_as("SELECT body FROM agents WHERE id = $1")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| RegistryError::StorageFailed { message: e.to_string() })?
            .ok_or(RegistryError::NotFound)?;
        Self::decode(row)
    }

    async fn update_agent(&self, agent: Agent) -> Result<Agent, RegistryError> {
        let body = serde_json::to_value(&agent).map_err(|e| RegistryError::StorageFailed { message: e.to_string() })?;
        let result = sqlx::query("UPDATE agents SET name = $2, body = $3 WHERE id = $1")
            .bind(agent.id.to_string())
            .bind(&agent.name)
            .bind(&body)
            .execute(&self.pool)
            .await
            .map_err(|e| RegistryError::StorageFailed { message: e.to_string() })?;
        if result.rows_affected() == 0 {
            return Err(RegistryError::NotFound);
        }
        Ok(agent)
    }

    async fn delete_agent(&self, id: AgentId) -> Result<(), RegistryError> {
        let in_use: (i64,) = sqlx::query_as(
            "SELECT count(*) FROM workflows WHERE status = 'active' AND body::text LIKE '%' || $1 || '%'",
        )
        .bind(id.to_string())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| RegistryError::StorageFailed { message: e.to_string() })?;
        if in_use.0 > 0 {
            return Err(RegistryError::AgentInUse { agent_id: id });
        }
        let result = sqlx::query("DELETE FROM agents WHERE id = $1")
            .bind(id.to_string())
            .execute(&self.pool)
            .await
            .map_err(|e| RegistryError::StorageFailed { message: e.to_string() })?;
        if result.rows_affected() == 0 {
            return Err(RegistryError::NotFound);
        }
        Ok(())
    }

    async fn list_agents(&self, project_id: ProjectId) -> Result<Vec<Agent>, RegistryError> {
        let rows: Vec<JsonRow> = sqlx::query_as("SELECT body FROM agents WHERE project_id = $1 ORDER BY id")
            .bind(project_id.as_i64())
            .fetch_all(&self.pool)
            .await
            .map_err(|e| RegistryError::StorageFailed { message: e.to_string() })?;
        rows.into_iter().map(Self::decode).collect()
    }

    async fn agents_by_id(&self, ids: &[AgentId]) -> Result<std::collections::HashMap<AgentId, Agent>, RegistryError> {
        let mut out = std::collections::HashMap::with_capacity(ids.len());
        for id in ids {
            out.insert(*id, self.get_agent(*id).await?);
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_name_error_mentions_the_name() {
        let err = RegistryError::DuplicateName { name: "scan".to_string() };
        assert!(err.to_string().contains("scan"));
    }
}
