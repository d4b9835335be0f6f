//! Workflow execution engine for loomwright.
//!
//! This crate provides:
//!
//! - **Graph model**: a petgraph-backed DAG of [`node::WorkflowNode`]s
//!   connected by dependency edges (`graph`, `node`, `edge`)
//! - **Definitions**: workflow metadata and trigger configuration
//!   (`definition`, `trigger`)
//! - **Agents**: registered, container-packaged executables with declared
//!   capability schemas (`agent`, `schema`)
//! - **Execution**: event-sourced run/agent-run state machines, replayed
//!   from an [`execution::ExecutionEvent`] log (`execution`, `run_state`,
//!   `remaining_work`)
//! - **Dispatch**: template resolution, approval gating, container
//!   execution, and the scheduler that ties them together (`template`,
//!   `approval`, `executor`, `scheduler`)
//! - **Integration**: persistence and event bus clients (`gateway`, `nats`)

pub mod agent;
pub mod approval;
pub mod definition;
pub mod edge;
pub mod error;
pub mod execution;
pub mod executor;
pub mod gateway;
pub mod graph;
pub mod nats;
pub mod node;
pub mod remaining_work;
pub mod run_state;
pub mod scheduler;
pub mod schema;
pub mod template;
pub mod trigger;

pub use agent::{Agent, AgentCapability, AgentKind, RiskLevel};
pub use approval::{ApprovalCoordinator, ApprovalError, ApprovalStatus, InMemoryApprovalCoordinator, WorkflowApproval};
pub use definition::{Workflow, WorkflowMetadata, WorkflowStatus, WorkflowSummary};
pub use edge::DependencyEdge;
pub use error::{AgentFailureKind, GraphError, TemplateError};
pub use execution::{AgentRun, AgentRunError, AgentRunStatus, ExecutionEvent, RunStatus, WorkflowRun};
pub use executor::{AgentDescriptor, ContractExecutor, EchoExecutor, ExecutionResult, ProcessContainerExecutor};
pub use gateway::{GatewayError, InMemoryGateway, PersistenceGateway};
pub use graph::WorkflowGraph;
pub use nats::{EventBusClient, EventBusError, InMemoryEventBusClient, NatsEventBusClient};
pub use node::{NodeId, WorkflowNode};
pub use remaining_work::RemainingWorkGraph;
pub use run_state::{RunState, RunStateBuilder, RunStateError};
pub use scheduler::{DagScheduler, NoopObserver, SchedulerError, SchedulerObserver};
pub use schema::CapabilitySchema;
pub use template::{Environment, resolve as resolve_template};
pub use trigger::{RunTrigger, TriggerDescriptor};
