//! Workflow definition types.
//!
//! A workflow is an immutable graph definition: a project-scoped name, a
//! trigger descriptor, a lifecycle status, and a DAG of
//! [`WorkflowNode`](crate::node::WorkflowNode)s.

use crate::graph::WorkflowGraph;
use crate::trigger::TriggerDescriptor;
use chrono::{DateTime, Utc};
use loomwright_core::{ProjectId, WorkflowId};
use serde::{Deserialize, Serialize};

/// Lifecycle status of a workflow definition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    /// Being authored; cannot be run.
    Draft,
    /// Runnable; the scheduler will accept new runs.
    Active,
    /// Retired; existing runs may finish but no new runs may start.
    Archived,
}

/// Metadata for a workflow definition, distinct from its graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowMetadata {
    /// Human-readable name for this workflow, unique per project.
    pub name: String,
    /// Description of what this workflow does.
    pub description: Option<String>,
    /// How this workflow is configured to be started.
    pub trigger: TriggerDescriptor,
    /// Lifecycle status.
    pub status: WorkflowStatus,
    /// When this workflow was created.
    pub created_at: DateTime<Utc>,
    /// When this workflow was last updated.
    pub updated_at: DateTime<Utc>,
}

impl WorkflowMetadata {
    /// Creates new metadata in `Draft` status.
    #[must_use]
    pub fn new(name: impl Into<String>, trigger: TriggerDescriptor) -> Self {
        let now = Utc::now();
        Self {
            name: name.into(),
            description: None,
            trigger,
            status: WorkflowStatus::Draft,
            created_at: now,
            updated_at: now,
        }
    }

    /// Sets the description.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// A complete workflow definition: metadata plus its node graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workflow {
    /// Unique identifier for this workflow.
    pub id: WorkflowId,
    /// Owning project (tenant boundary).
    pub project_id: ProjectId,
    /// Workflow metadata.
    pub metadata: WorkflowMetadata,
    /// The workflow graph (nodes and dependency edges).
    pub graph: WorkflowGraph,
}

impl Workflow {
    /// Creates a new workflow with an empty graph, in `Draft` status.
    #[must_use]
    pub fn new(project_id: ProjectId, name: impl Into<String>, trigger: TriggerDescriptor) -> Self {
        Self {
            id: WorkflowId::new(),
            project_id,
            metadata: WorkflowMetadata::new(name, trigger),
            graph: WorkflowGraph::new(),
        }
    }

    /// Returns the workflow name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    /// Returns whether the workflow accepts new runs.
    #[must_use]
    pub fn is_active(&self) -> bool {
        matches!(self.metadata.status, WorkflowStatus::Active)
    }

    /// Activates the workflow, allowing new runs.
    pub fn activate(&mut self) {
        self.metadata.status = WorkflowStatus::Active;
        self.metadata.updated_at = Utc::now();
    }

    /// Archives the workflow, rejecting new runs.
    pub fn archive(&mut self) {
        self.metadata.status = WorkflowStatus::Archived;
        self.metadata.updated_at = Utc::now();
    }

    /// Validates the workflow's graph: acyclicity and dependency resolution.
    ///
    /// # Errors
    ///
    /// Returns an error describing the first validation failure found.
    pub fn validate(&self) -> Result<(), crate::error::GraphError> {
        self.graph.validate()
    }

    /// Marks the workflow as updated (bumps updated_at timestamp).
    pub fn touch(&mut self) {
        self.metadata.updated_at = Utc::now();
    }
}

/// Summary information about a workflow, for listings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowSummary {
    /// Workflow ID.
    pub id: WorkflowId,
    /// Workflow name.
    pub name: String,
    /// Description, if any.
    pub description: Option<String>,
    /// Lifecycle status.
    pub status: WorkflowStatus,
    /// Number of nodes in the graph.
    pub node_count: usize,
    /// Last updated timestamp.
    pub updated_at: DateTime<Utc>,
}

impl From<&Workflow> for WorkflowSummary {
    fn from(workflow: &Workflow) -> Self {
        Self {
            id: workflow.id,
            name: workflow.metadata.name.clone(),
            description: workflow.metadata.description.clone(),
            status: workflow.metadata.status,
            node_count: workflow.graph.node_count(),
            updated_at: workflow.metadata.updated_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn workflow_starts_in_draft() {
        let workflow = Workflow::new(ProjectId::new(1), "Test Workflow", TriggerDescriptor::Manual);
        assert_eq!(workflow.name(), "Test Workflow");
        assert!(!workflow.is_active());
        assert_eq!(workflow.graph.node_count(), 0);
    }

    #[test]
    fn workflow_activate_archive() {
        let mut workflow = Workflow::new(ProjectId::new(1), "Test", TriggerDescriptor::Manual);

        workflow.activate();
        assert!(workflow.is_active());

        workflow.archive();
        assert!(!workflow.is_active());
    }

    #[test]
    fn workflow_summary_from_workflow() {
        let workflow = Workflow::new(ProjectId::new(1), "Summary Test", TriggerDescriptor::Manual);
        let summary = WorkflowSummary::from(&workflow);

        assert_eq!(summary.id, workflow.id);
        assert_eq!(summary.name, "Summary Test");
        assert_eq!(summary.node_count, 0);
    }

    #[test]
    fn workflow_serde_roundtrip() {
        let workflow = Workflow::new(ProjectId::new(1), "Serialization Test", TriggerDescriptor::Manual);
        let json = serde_json::to_string(&workflow).expect("serialize");
        let mut parsed: Workflow = serde_json::from_str(&json).expect("deserialize");
        parsed.graph.rebuild_index_map();

        assert_eq!(workflow.id, parsed.id);
        assert_eq!(workflow.name(), parsed.name());
    }
}
