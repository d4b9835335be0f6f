//! Agent registration records.
//!
//! An agent is a registered, container-packaged executable with declared
//! input/output schemas per capability. The workflow graph never embeds
//! agent behavior directly — a [`WorkflowNode`](crate::node::WorkflowNode)
//! only references an agent by id and names one of its capabilities.

use crate::schema::CapabilitySchema;
use loomwright_core::{AgentId, ProjectId};
use serde::{Deserialize, Serialize};

/// The kind of executable an agent wraps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentKind {
    /// Invokes a large language model.
    Llm,
    /// Evaluates a deterministic rule set.
    Rule,
    /// Calls an external HTTP API.
    Api,
    /// Runs a user-supplied script.
    Script,
}

/// Whether a node invoking this agent may be dispatched automatically or
/// must first clear human approval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    /// Dispatched without gating.
    Auto,
    /// Every node referencing this agent requires approval, regardless of
    /// the node's own `approval_required` flag.
    ApprovalRequired,
}

/// One capability an agent declares: a named action plus its input and
/// output shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentCapability {
    /// The action name a [`WorkflowNode`](crate::node::WorkflowNode) refers to.
    pub name: String,
    /// Schema the resolved input template must conform to.
    pub input_schema: CapabilitySchema,
    /// Schema the container's parsed stdout must conform to.
    pub output_schema: CapabilitySchema,
}

impl AgentCapability {
    /// Creates a new capability declaration.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        input_schema: CapabilitySchema,
        output_schema: CapabilitySchema,
    ) -> Self {
        Self {
            name: name.into(),
            input_schema,
            output_schema,
        }
    }
}

/// A registered agent: name, container entry point, version, and declared
/// capabilities.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Agent {
    /// Unique identifier.
    pub id: AgentId,
    /// Owning project (tenant boundary).
    pub project_id: ProjectId,
    /// Human-readable name, unique per project.
    pub name: String,
    /// Kind of executable.
    pub kind: AgentKind,
    /// Container build input (image spec / entry path).
    pub entry_path: String,
    /// Agent version string, surfaced for display on nodes that reference it.
    pub version: String,
    /// Risk level gating automatic dispatch.
    pub risk_level: RiskLevel,
    /// Declared capabilities (name + input/output schema).
    pub capabilities: Vec<AgentCapability>,
}

impl Agent {
    /// Creates a new agent registration with no declared capabilities yet.
    #[must_use]
    pub fn new(
        project_id: ProjectId,
        name: impl Into<String>,
        kind: AgentKind,
        entry_path: impl Into<String>,
        version: impl Into<String>,
    ) -> Self {
        Self {
            id: AgentId::new(),
            project_id,
            name: name.into(),
            kind,
            entry_path: entry_path.into(),
            version: version.into(),
            risk_level: RiskLevel::Auto,
            capabilities: Vec::new(),
        }
    }

    /// Sets the risk level.
    #[must_use]
    pub fn with_risk_level(mut self, risk_level: RiskLevel) -> Self {
        self.risk_level = risk_level;
        self
    }

    /// Adds a declared capability.
    #[must_use]
    pub fn with_capability(mut self, capability: AgentCapability) -> Self {
        self.capabilities.push(capability);
        self
    }

    /// Looks up a capability by action name.
    #[must_use]
    pub fn capability(&self, action: &str) -> Option<&AgentCapability> {
        self.capabilities.iter().find(|c| c.name == action)
    }

    /// Returns whether every node referencing this agent must go through
    /// approval regardless of the node's own flag.
    #[must_use]
    pub fn requires_approval(&self) -> bool {
        matches!(self.risk_level, RiskLevel::ApprovalRequired)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_agent() -> Agent {
        Agent::new(ProjectId::new(1), "scanner", AgentKind::Script, "agents/scanner", "1.0.0")
            .with_capability(AgentCapability::new(
                "scan",
                CapabilitySchema::any(),
                CapabilitySchema::from_json(serde_json::json!({ "type": "object" })),
            ))
    }

    #[test]
    fn capability_lookup_by_action() {
        let agent = sample_agent();
        assert!(agent.capability("scan").is_some());
        assert!(agent.capability("missing").is_none());
    }

    #[test]
    fn auto_risk_does_not_require_approval() {
        let agent = sample_agent();
        assert!(!agent.requires_approval());
    }

    #[test]
    fn approval_required_risk_level_propagates() {
        let agent = sample_agent().with_risk_level(RiskLevel::ApprovalRequired);
        assert!(agent.requires_approval());
    }
}
