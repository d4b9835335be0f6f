//! Core domain types shared across the loomwright workspace.
//!
//! This crate provides the foundational ULID-backed ID types every other
//! crate in the orchestrator keys its entities by.

pub mod id;

pub use id::{AgentId, AgentRunId, ApprovalId, ParseIdError, ProjectId, TriggerId, WorkflowId, WorkflowRunId};
