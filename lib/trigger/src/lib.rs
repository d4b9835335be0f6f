//! Trigger plumbing for loomwright workflows.
//!
//! This crate provides:
//!
//! - **Webhook-to-Workflow Mapper**: maps inbound alert payloads onto
//!   queued runs against the alert-notification workflow (`webhook_mapper`)

pub mod error;
pub mod webhook_mapper;

pub use error::WebhookMapperError;
pub use webhook_mapper::{AlertEnvelope, AlertWorkflowDirectory, WebhookMapper, ALERT_WORKFLOW_NAME, NOTIFIER_ACTION};
