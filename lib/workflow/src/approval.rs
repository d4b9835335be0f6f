//! Approval Coordinator (C5).
//!
//! Tracks pending human decisions gating a [`WorkflowNode`](crate::node::WorkflowNode)
//! whose agent has risk level `APPROVAL_REQUIRED`, or which itself carries
//! `approval_required`. A run stays `WAITING_APPROVAL` until every approval
//! raised for it has resolved.

use crate::node::NodeId;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use loomwright_core::{ApprovalId, WorkflowRunId};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Mutex;

/// The state of a human decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalStatus {
    /// Awaiting a decision.
    Pending,
    /// Approved; the node may be dispatched.
    Approved,
    /// Rejected; the run is finalised FAILED.
    Rejected,
}

/// A pending or resolved human decision on a node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowApproval {
    /// Unique identifier for this approval.
    pub id: ApprovalId,
    /// The run this approval gates.
    pub run_id: WorkflowRunId,
    /// The node awaiting approval.
    pub node_id: NodeId,
    /// Current status.
    pub status: ApprovalStatus,
    /// When the approval was requested.
    pub requested_at: DateTime<Utc>,
    /// When a decision was recorded.
    pub responded_at: Option<DateTime<Utc>>,
    /// The opaque principal identifier that recorded the decision.
    pub responded_by: Option<String>,
    /// Free-form notes attached to the decision.
    pub notes: Option<String>,
}

impl WorkflowApproval {
    /// Creates a new pending approval.
    #[must_use]
    pub fn new(run_id: WorkflowRunId, node_id: NodeId) -> Self {
        Self {
            id: ApprovalId::new(),
            run_id,
            node_id,
            status: ApprovalStatus::Pending,
            requested_at: Utc::now(),
            responded_at: None,
            responded_by: None,
            notes: None,
        }
    }

    /// Records a decision, mutating this approval in place.
    ///
    /// # Errors
    ///
    /// Returns [`ApprovalError::AlreadyResolved`] if the approval is not
    /// currently pending.
    pub fn record_decision(
        &mut self,
        approved: bool,
        responded_by: impl Into<String>,
        notes: Option<String>,
    ) -> Result<(), ApprovalError> {
        if self.status != ApprovalStatus::Pending {
            return Err(ApprovalError::AlreadyResolved { approval_id: self.id });
        }

        self.status = if approved {
            ApprovalStatus::Approved
        } else {
            ApprovalStatus::Rejected
        };
        self.responded_at = Some(Utc::now());
        self.responded_by = Some(responded_by.into());
        self.notes = notes;
        Ok(())
    }
}

/// Errors from the approval coordinator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApprovalError {
    /// A decision was recorded against an approval that already resolved.
    AlreadyResolved { approval_id: ApprovalId },
    /// No approval exists with the given id.
    NotFound { approval_id: ApprovalId },
}

impl std::fmt::Display for ApprovalError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::AlreadyResolved { approval_id } => {
                write!(f, "approval {approval_id} is already resolved")
            }
            Self::NotFound { approval_id } => write!(f, "approval {approval_id} not found"),
        }
    }
}

impl std::error::Error for ApprovalError {}

/// Coordinates creation and resolution of approvals.
///
/// Production deployments back this with the persistence gateway;
/// `record_decision` there both updates the approval and flips the run
/// back to `Running` within the same transaction once all of the run's
/// approvals have cleared.
#[async_trait]
pub trait ApprovalCoordinator: Send + Sync {
    /// Creates a new pending approval for a node.
    async fn request_approval(
        &self,
        run_id: WorkflowRunId,
        node_id: NodeId,
    ) -> Result<WorkflowApproval, ApprovalError>;

    /// Records a decision on a pending approval.
    async fn decide(
        &self,
        approval_id: ApprovalId,
        approved: bool,
        responded_by: String,
        notes: Option<String>,
    ) -> Result<WorkflowApproval, ApprovalError>;

    /// Lists all approvals for a run that are still pending.
    async fn list_pending_for_run(&self, run_id: WorkflowRunId) -> Vec<WorkflowApproval>;
}

/// An in-memory [`ApprovalCoordinator`] for tests.
#[derive(Debug, Default)]
pub struct InMemoryApprovalCoordinator {
    approvals: Mutex<HashMap<ApprovalId, WorkflowApproval>>,
}

impl InMemoryApprovalCoordinator {
    /// Creates an empty coordinator.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ApprovalCoordinator for InMemoryApprovalCoordinator {
    async fn request_approval(
        &self,
        run_id: WorkflowRunId,
        node_id: NodeId,
    ) -> Result<WorkflowApproval, ApprovalError> {
        let approval = WorkflowApproval::new(run_id, node_id);
        self.approvals
            .lock()
            .expect("approval coordinator mutex poisoned")
            .insert(approval.id, approval.clone());
        Ok(approval)
    }

    async fn decide(
        &self,
        approval_id: ApprovalId,
        approved: bool,
        responded_by: String,
        notes: Option<String>,
    ) -> Result<WorkflowApproval, ApprovalError> {
        let mut approvals = self.approvals.lock().expect("approval coordinator mutex poisoned");
        let approval = approvals
            .get_mut(&approval_id)
            .ok_or(ApprovalError::NotFound { approval_id })?;
        approval.record_decision(approved, responded_by, notes)?;
        Ok(approval.clone())
    }

    async fn list_pending_for_run(&self, run_id: WorkflowRunId) -> Vec<WorkflowApproval> {
        self.approvals
            .lock()
            .expect("approval coordinator mutex poisoned")
            .values()
            .filter(|a| a.run_id == run_id && a.status == ApprovalStatus::Pending)
            .cloned()
            .collect()
    }
}
