//! Error types for the trigger crate.
//!
//! - `WebhookMapperError`: errors from alert-to-run mapping

use std::fmt;

/// Errors from mapping an inbound alert into a workflow run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookMapperError {
    /// The "alert-notification" workflow has no registered notifier agent.
    NotifierAgentMissing,
    /// Creating or loading the alert workflow failed.
    WorkflowUnavailable { reason: String },
}

impl fmt::Display for WebhookMapperError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotifierAgentMissing => write!(f, "notifier agent is not registered"),
            Self::WorkflowUnavailable { reason } => write!(f, "alert workflow unavailable: {reason}"),
        }
    }
}

impl std::error::Error for WebhookMapperError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn webhook_mapper_error_display() {
        assert!(WebhookMapperError::NotifierAgentMissing.to_string().contains("notifier"));
    }
}
