//! Error types for the workflow crate.
//!
//! - `GraphError`: low-level graph operations (nodes, dependencies)
//! - `TemplateError`: placeholder resolution failures
//! - `AgentFailureKind`: the kind of failure a dispatched agent produced

use crate::node::NodeId;
use std::fmt;

/// Errors from graph operations.
///
/// These errors contain only information available at the graph layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GraphError {
    /// Node with the given ID was not found in the graph.
    NodeNotFound { node_id: NodeId },
    /// Graph contains cycles.
    CycleDetected,
}

impl fmt::Display for GraphError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NodeNotFound { node_id } => {
                write!(f, "node not found: {node_id}")
            }
            Self::CycleDetected => write!(f, "graph contains cycles"),
        }
    }
}

impl std::error::Error for GraphError {}

/// Errors resolving `{{node.output.path}}` placeholders in a node's input
/// template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TemplateError {
    /// The referenced node id is not one of the node's declared dependencies.
    UnknownReference { reference: String },
    /// The referenced node produced an output, but it has no value at the
    /// given field path.
    MissingField { reference: String, path: String },
    /// The referenced path descends into an array with an out-of-range
    /// index.
    OutOfRange { reference: String, path: String },
    /// The referenced value exists but has an incompatible JSON type for
    /// the position it's substituted into.
    TypeMismatch { reference: String, expected: String },
}

impl fmt::Display for TemplateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownReference { reference } => {
                write!(f, "unknown template reference: {reference}")
            }
            Self::MissingField { reference, path } => {
                write!(f, "template reference {reference} has no field at '{path}'")
            }
            Self::OutOfRange { reference, path } => {
                write!(f, "template reference {reference} index out of range at '{path}'")
            }
            Self::TypeMismatch { reference, expected } => {
                write!(f, "template reference {reference} did not resolve to expected type {expected}")
            }
        }
    }
}

impl std::error::Error for TemplateError {}

/// The kind of failure produced by a dispatched agent.
///
/// Distinct from [`crate::executor::ExecutionResult::Unavailable`], which
/// means the container never started at all and so never reaches the
/// scheduler as a `Failure` — it's retried without consuming an attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AgentFailureKind {
    /// The container exited with a non-zero status.
    NonZeroExit { code: i32 },
    /// Stdout could not be parsed as JSON, or didn't conform to the
    /// agent's declared output schema for any field-level reason other
    /// than the capability-schema check (see `OutputSchemaViolation`).
    InvalidOutput,
    /// The container did not complete within its wall-clock budget.
    Timeout,
    /// The container started but a runtime fault prevented it from
    /// completing normally (stdin/stdout I/O failure, process wait
    /// failure). Distinct from `Unavailable`: the container did start.
    RuntimeError { reason: String },
    /// Parsed stdout did not conform to the capability's declared output
    /// schema.
    OutputSchemaViolation,
}

impl AgentFailureKind {
    /// A stable, machine-readable tag for this kind, suitable as a
    /// metric label value. Distinct from `Display`, whose text is meant
    /// for logs/messages and may include per-instance detail.
    #[must_use]
    pub fn tag(&self) -> &'static str {
        match self {
            Self::NonZeroExit { .. } => "NonZeroExit",
            Self::InvalidOutput => "InvalidOutput",
            Self::Timeout => "Timeout",
            Self::RuntimeError { .. } => "RuntimeError",
            Self::OutputSchemaViolation => "OutputSchemaViolation",
        }
    }
}

impl fmt::Display for AgentFailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NonZeroExit { code } => write!(f, "container exited with status {code}"),
            Self::InvalidOutput => write!(f, "container stdout was not valid JSON"),
            Self::Timeout => write!(f, "container exceeded its wall-clock budget"),
            Self::RuntimeError { reason } => write!(f, "container runtime error: {reason}"),
            Self::OutputSchemaViolation => write!(f, "container output violated its declared schema"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn graph_error_display() {
        let node_id = NodeId::new();
        let err = GraphError::NodeNotFound { node_id };
        assert!(err.to_string().contains("node not found"));
    }

    #[test]
    fn template_error_display() {
        let err = TemplateError::MissingField {
            reference: "scan.output".to_string(),
            path: "summary".to_string(),
        };
        assert!(err.to_string().contains("no field at 'summary'"));
    }

    #[test]
    fn agent_failure_kind_display() {
        assert!(AgentFailureKind::Timeout.to_string().contains("wall-clock"));
    }

    #[test]
    fn agent_failure_kind_tag_is_stable_and_distinct_from_display() {
        let err = AgentFailureKind::RuntimeError { reason: "stdin closed".to_string() };
        assert_eq!(err.tag(), "RuntimeError");
        assert_ne!(err.tag(), err.to_string());
    }
}
