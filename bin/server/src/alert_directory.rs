//! Lazily provisions the dedicated alert-notification workflow the
//! webhook mapper (C7) dispatches every ingested alert against.

use crate::db::WorkflowRepository;
use async_trait::async_trait;
use loomwright_core::{AgentId, ProjectId};
use loomwright_trigger::{AlertWorkflowDirectory, WebhookMapperError, ALERT_WORKFLOW_NAME, NOTIFIER_ACTION};
use loomwright_workflow::{
    Agent, AgentCapability, AgentKind, CapabilitySchema, TriggerDescriptor, Workflow, WorkflowNode,
};
use std::collections::HashMap;
use std::sync::Arc;

/// Alerts are a system-level concern, not owned by any caller project.
const SYSTEM_PROJECT: ProjectId = ProjectId::new(0);
const NOTIFIER_AGENT_NAME: &str = "alert-notifier";

pub struct SqlAlertDirectory {
    registry: Arc<dyn WorkflowRepository>,
}

impl SqlAlertDirectory {
    #[must_use]
    pub fn new(registry: Arc<dyn WorkflowRepository>) -> Self {
        Self { registry }
    }

    async fn notifier_agent(&self) -> Result<Agent, WebhookMapperError> {
        let agents = self
            .registry
            .list_agents(SYSTEM_PROJECT)
            .await
            .map_err(|e| WebhookMapperError::WorkflowUnavailable { reason: e.to_string() })?;
        if let Some(agent) = agents.into_iter().find(|a| a.name == NOTIFIER_AGENT_NAME) {
            return Ok(agent);
        }
        Err(WebhookMapperError::NotifierAgentMissing)
    }
}

#[async_trait]
impl AlertWorkflowDirectory for SqlAlertDirectory {
    async fn ensure_alert_workflow(&self) -> Result<(Workflow, HashMap<AgentId, Agent>), WebhookMapperError> {
        let notifier = self.notifier_agent().await?;

        let existing = self
            .registry
            .find_workflow_by_name(SYSTEM_PROJECT, ALERT_WORKFLOW_NAME)
            .await
            .map_err(|e| WebhookMapperError::WorkflowUnavailable { reason: e.to_string() })?;

        let workflow = match existing {
            Some(workflow) => workflow,
            None => {
                let node = WorkflowNode::new("notify", notifier.id, NOTIFIER_ACTION).with_input_template(serde_json::json!({
                    "channel": "{{context.channel}}",
                    "summary": "{{context.summary}}",
                }));
                let mut workflow = Workflow::new(
                    SYSTEM_PROJECT,
                    ALERT_WORKFLOW_NAME,
                    TriggerDescriptor::Webhook { path: "/api/webhooks/alertmanager".to_string() },
                );
                workflow.graph.add_node(node);
                workflow.activate();
                self.registry
                    .create_workflow(workflow)
                    .await
                    .map_err(|e| WebhookMapperError::WorkflowUnavailable { reason: e.to_string() })?
            }
        };

        let mut agents = HashMap::new();
        agents.insert(notifier.id, notifier);
        Ok((workflow, agents))
    }
}

/// Seeds the system notifier agent used by [`SqlAlertDirectory`] if it
/// doesn't already exist. Called once at startup.
pub async fn ensure_notifier_agent_seeded(registry: &dyn WorkflowRepository) -> Result<(), crate::db::RegistryError> {
    let agents = registry.list_agents(SYSTEM_PROJECT).await?;
    if agents.iter().any(|a| a.name == NOTIFIER_AGENT_NAME) {
        return Ok(());
    }
    let agent = Agent::new(SYSTEM_PROJECT, NOTIFIER_AGENT_NAME, AgentKind::Script, "/usr/local/bin/notify", "1.0.0")
        .with_capability(AgentCapability::new(NOTIFIER_ACTION, CapabilitySchema::any(), CapabilitySchema::any()));
    registry.create_agent(agent).await?;
    Ok(())
}
