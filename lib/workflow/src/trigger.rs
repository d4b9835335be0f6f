//! Trigger descriptors.
//!
//! A workflow declares how it is meant to be started (its
//! [`TriggerDescriptor`]); a particular run records how it actually was
//! started (its [`RunTrigger`]). The two are distinct because a workflow
//! configured for `Schedule` can still be started manually for a one-off
//! retry.

use loomwright_core::{TriggerId, WorkflowRunId};
use serde::{Deserialize, Serialize};

/// How a workflow is configured to be started.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TriggerDescriptor {
    /// Started only by explicit user action.
    Manual,
    /// Started by an upstream integration event.
    Event {
        /// Identifier of the upstream source (e.g. an integration account).
        source: String,
        /// The event type to listen for.
        event_type: String,
    },
    /// Started on a cron schedule.
    Schedule {
        /// Cron expression (e.g., "0 7 * * *" for 7am daily).
        cron: String,
        /// Timezone for the schedule.
        timezone: Option<String>,
    },
    /// Started by an inbound HTTP webhook.
    Webhook {
        /// The webhook path (e.g., "/hooks/my-workflow").
        path: String,
    },
}

/// How a specific run was actually started.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RunTrigger {
    /// Started by explicit user action.
    Manual,
    /// Re-dispatched from a previously terminal run.
    Retry { original_run_id: WorkflowRunId },
    /// Started by a registered schedule trigger.
    Schedule { trigger_id: TriggerId },
    /// Started by a registered webhook trigger.
    Webhook { trigger_id: TriggerId },
    /// Started by the Alertmanager-to-workflow mapper.
    AlertmanagerWebhook,
    /// Started by the Grafana-to-workflow mapper.
    GrafanaWebhook,
}

impl RunTrigger {
    /// Returns the short tag used in logs and event payloads, matching
    /// the examples given for `WorkflowRun.trigger` (e.g. `"manual"`,
    /// `"retry"`, `"alertmanager_webhook"`).
    #[must_use]
    pub fn tag(&self) -> &'static str {
        match self {
            Self::Manual => "manual",
            Self::Retry { .. } => "retry",
            Self::Schedule { .. } => "schedule",
            Self::Webhook { .. } => "webhook",
            Self::AlertmanagerWebhook => "alertmanager_webhook",
            Self::GrafanaWebhook => "grafana_webhook",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_trigger_tag_matches_examples() {
        assert_eq!(RunTrigger::Manual.tag(), "manual");
        assert_eq!(RunTrigger::AlertmanagerWebhook.tag(), "alertmanager_webhook");
        assert_eq!(
            RunTrigger::Retry { original_run_id: WorkflowRunId::new() }.tag(),
            "retry"
        );
    }

    #[test]
    fn trigger_descriptor_serde_roundtrip() {
        let descriptor = TriggerDescriptor::Schedule {
            cron: "0 7 * * *".to_string(),
            timezone: Some("America/New_York".to_string()),
        };
        let json = serde_json::to_string(&descriptor).expect("serialize");
        let parsed: TriggerDescriptor = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(descriptor, parsed);
    }
}
