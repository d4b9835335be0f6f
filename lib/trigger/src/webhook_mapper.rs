//! Webhook-to-Workflow Mapper (C7).
//!
//! A thin producer: turns an inbound alert payload into a queued
//! [`WorkflowRun`](loomwright_workflow::WorkflowRun) bound to a dedicated
//! "alert-notification" workflow, then returns immediately. Driving the
//! run to completion happens on a spawned task — this mapper never
//! awaits [`DagScheduler::drive_run`] before answering its caller.

use crate::error::WebhookMapperError;
use async_trait::async_trait;
use loomwright_core::{AgentId, WorkflowRunId};
use loomwright_workflow::{
    Agent, ApprovalCoordinator, ContractExecutor, DagScheduler, EventBusClient, PersistenceGateway, RunTrigger,
    Workflow,
};
use serde_json::{Map as JsonMap, Value as JsonValue};
use std::collections::HashMap;
use std::sync::Arc;

/// The name of the dedicated workflow every mapped alert runs against.
pub const ALERT_WORKFLOW_NAME: &str = "alert-notification";
/// The capability/action name the single node in that workflow invokes.
pub const NOTIFIER_ACTION: &str = "notify";

/// A normalized alert payload, shared by the Alertmanager and Grafana
/// ingestion paths after their source-specific parsing.
#[derive(Debug, Clone)]
pub struct AlertEnvelope {
    /// `"firing"` or `"resolved"`.
    pub status: String,
    /// Alert labels (e.g. `alertname`, `severity`, `component`).
    pub labels: HashMap<String, String>,
    /// Alert annotations (e.g. `summary`, `description`, `runbook_url`).
    pub annotations: HashMap<String, String>,
}

impl AlertEnvelope {
    /// Derives the severity bucket from the `severity` label, defaulting
    /// to `"info"` when absent or unrecognised.
    #[must_use]
    pub fn severity(&self) -> &str {
        match self.labels.get("severity").map(String::as_str) {
            Some("critical") => "critical",
            Some("warning") => "warning",
            _ => "info",
        }
    }

    /// The notification channel this alert routes to.
    #[must_use]
    pub fn channel(&self) -> &'static str {
        if self.severity() == "critical" { "slack" } else { "console" }
    }

    /// Flattens this alert into the context a run's templates reference
    /// as `{{context.<field>}}`.
    #[must_use]
    pub fn to_context(&self) -> JsonValue {
        let mut context = JsonMap::new();
        context.insert("status".to_string(), JsonValue::String(self.status.clone()));
        context.insert("severity".to_string(), JsonValue::String(self.severity().to_string()));
        context.insert("channel".to_string(), JsonValue::String(self.channel().to_string()));
        context.insert("alert_name".to_string(), field(&self.labels, "alertname"));
        context.insert("component".to_string(), field(&self.labels, "component"));
        context.insert("summary".to_string(), field(&self.annotations, "summary"));
        context.insert("description".to_string(), field(&self.annotations, "description"));
        context.insert("runbook_url".to_string(), field(&self.annotations, "runbook_url"));
        context.insert("dashboard_url".to_string(), field(&self.annotations, "dashboard_url"));
        context.insert("labels".to_string(), map_to_json(&self.labels));
        context.insert("annotations".to_string(), map_to_json(&self.annotations));
        JsonValue::Object(context)
    }
}

fn field(map: &HashMap<String, String>, key: &str) -> JsonValue {
    map.get(key).cloned().map_or(JsonValue::Null, JsonValue::String)
}

fn map_to_json(map: &HashMap<String, String>) -> JsonValue {
    JsonValue::Object(map.iter().map(|(k, v)| (k.clone(), JsonValue::String(v.clone()))).collect())
}

/// Resolves (and lazily creates) the dedicated alert-notification
/// workflow and the agent map the scheduler needs to run it.
#[async_trait]
pub trait AlertWorkflowDirectory: Send + Sync {
    /// Returns the alert-notification workflow and its agent registry,
    /// creating the workflow on first use.
    ///
    /// # Errors
    ///
    /// Returns [`WebhookMapperError::NotifierAgentMissing`] if no
    /// notifier agent is registered to back the workflow's single node.
    async fn ensure_alert_workflow(&self) -> Result<(Workflow, HashMap<AgentId, Agent>), WebhookMapperError>;
}

/// Maps inbound alert envelopes onto queued workflow runs.
pub struct WebhookMapper<G, A, X, B> {
    scheduler: Arc<DagScheduler<G, A, X, B>>,
    directory: Arc<dyn AlertWorkflowDirectory>,
}

impl<G, A, X, B> WebhookMapper<G, A, X, B>
where
    G: PersistenceGateway + 'static,
    A: ApprovalCoordinator + 'static,
    X: ContractExecutor + 'static,
    B: EventBusClient + 'static,
{
    /// Creates a mapper wired to a scheduler and a workflow directory.
    pub fn new(scheduler: Arc<DagScheduler<G, A, X, B>>, directory: Arc<dyn AlertWorkflowDirectory>) -> Self {
        Self { scheduler, directory }
    }

    /// Maps an Alertmanager webhook payload into a queued run and
    /// returns its id without waiting for it to execute.
    ///
    /// # Errors
    ///
    /// Returns an error if the alert workflow is unavailable or queuing fails.
    pub async fn map_alertmanager_alert(&self, alert: AlertEnvelope) -> Result<WorkflowRunId, WebhookMapperError> {
        self.queue(alert, RunTrigger::AlertmanagerWebhook).await
    }

    /// Maps a Grafana webhook payload into a queued run and returns its
    /// id without waiting for it to execute.
    ///
    /// # Errors
    ///
    /// Returns an error if the alert workflow is unavailable or queuing fails.
    pub async fn map_grafana_alert(&self, alert: AlertEnvelope) -> Result<WorkflowRunId, WebhookMapperError> {
        self.queue(alert, RunTrigger::GrafanaWebhook).await
    }

    async fn queue(&self, alert: AlertEnvelope, trigger: RunTrigger) -> Result<WorkflowRunId, WebhookMapperError> {
        let (workflow, agents) = self.directory.ensure_alert_workflow().await?;
        let context = alert.to_context();

        let run_id = self
            .scheduler
            .queue_run(&workflow, trigger, context)
            .await
            .map_err(|e| WebhookMapperError::WorkflowUnavailable { reason: e.to_string() })?;

        let scheduler = Arc::clone(&self.scheduler);
        tokio::spawn(async move {
            if let Err(e) = scheduler.drive_run(&workflow, &agents, run_id).await {
                tracing::error!(%run_id, error = %e, "alert-notification run failed to drive");
            }
        });

        Ok(run_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use loomwright_workflow::{
        AgentKind, CapabilitySchema, EchoExecutor, InMemoryApprovalCoordinator, InMemoryEventBusClient,
        InMemoryGateway, TriggerDescriptor, WorkflowNode,
    };
    use loomwright_core::ProjectId;
    use tokio::sync::Mutex as AsyncMutex;

    struct FixedDirectory {
        workflow: Workflow,
        agents: HashMap<AgentId, Agent>,
        calls: AsyncMutex<u32>,
    }

    #[async_trait]
    impl AlertWorkflowDirectory for FixedDirectory {
        async fn ensure_alert_workflow(&self) -> Result<(Workflow, HashMap<AgentId, Agent>), WebhookMapperError> {
            *self.calls.lock().await += 1;
            Ok((self.workflow.clone(), self.agents.clone()))
        }
    }

    fn build_directory() -> FixedDirectory {
        let agent = Agent::new(ProjectId::new(1), "notifier", AgentKind::Script, "/bin/notifier", "1.0.0")
            .with_capability(loomwright_workflow::AgentCapability::new(
                NOTIFIER_ACTION,
                CapabilitySchema::any(),
                CapabilitySchema::any(),
            ));
        let node = WorkflowNode::new("notify", agent.id, NOTIFIER_ACTION)
            .with_input_template(serde_json::json!({"channel": "{{context.channel}}"}));
        let mut workflow = Workflow::new(ProjectId::new(1), ALERT_WORKFLOW_NAME, TriggerDescriptor::Webhook {
            path: "/api/webhooks/alertmanager".to_string(),
        });
        workflow.graph.add_node(node);
        workflow.activate();

        let mut agents = HashMap::new();
        agents.insert(agent.id, agent);

        FixedDirectory { workflow, agents, calls: AsyncMutex::new(0) }
    }

    fn critical_alert() -> AlertEnvelope {
        let mut labels = HashMap::new();
        labels.insert("alertname".to_string(), "DiskFull".to_string());
        labels.insert("severity".to_string(), "critical".to_string());
        labels.insert("component".to_string(), "storage".to_string());
        let mut annotations = HashMap::new();
        annotations.insert("summary".to_string(), "disk is full".to_string());
        AlertEnvelope { status: "firing".to_string(), labels, annotations }
    }

    #[test]
    fn critical_severity_routes_to_slack() {
        assert_eq!(critical_alert().channel(), "slack");
    }

    #[test]
    fn missing_severity_label_defaults_to_info_and_console() {
        let alert = AlertEnvelope { status: "firing".to_string(), labels: HashMap::new(), annotations: HashMap::new() };
        assert_eq!(alert.severity(), "info");
        assert_eq!(alert.channel(), "console");
    }

    #[test]
    fn to_context_flattens_known_fields() {
        let context = critical_alert().to_context();
        assert_eq!(context["severity"], "critical");
        assert_eq!(context["alert_name"], "DiskFull");
        assert_eq!(context["channel"], "slack");
    }

    #[tokio::test]
    async fn map_alertmanager_alert_queues_a_run_without_waiting_for_it() {
        let directory = Arc::new(build_directory());
        let scheduler = Arc::new(DagScheduler::new(
            Arc::new(InMemoryGateway::new()),
            Arc::new(InMemoryApprovalCoordinator::new()),
            Arc::new(EchoExecutor),
            Arc::new(InMemoryEventBusClient::new()),
        ));
        let mapper = WebhookMapper::new(Arc::clone(&scheduler), Arc::clone(&directory) as Arc<dyn AlertWorkflowDirectory>);

        let run_id = mapper.map_alertmanager_alert(critical_alert()).await.unwrap();
        assert_ne!(run_id, WorkflowRunId::new());
        assert_eq!(*directory.calls.lock().await, 1);
    }
}
