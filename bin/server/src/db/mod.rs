//! Database repositories for the loomwright server.
//!
//! - [`workflow`]: CRUD for workflow and agent registrations.
//! - [`gateway`]: the Postgres [`PersistenceGateway`](loomwright_workflow::PersistenceGateway)
//!   implementation the scheduler drives runs through.

pub mod gateway;
pub mod workflow;

pub use gateway::SqlxGateway;
pub use workflow::{RegistryError, SqlxWorkflowRepository, WorkflowRepository};
