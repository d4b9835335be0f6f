//! Event Bus Client (C2).
//!
//! Publishes [`ExecutionEvent`]s to a fixed set of NATS subjects so other
//! services (notification fan-out, audit log, the UI's live feed) can
//! subscribe without depending on the scheduler. The event log persisted
//! by the [`PersistenceGateway`](crate::gateway::PersistenceGateway)
//! remains the source of truth; the bus is a best-effort broadcast.
//!
//! On disconnect, published events are buffered locally rather than
//! dropped outright. The buffer is bounded: once full, the oldest
//! buffered event is dropped and a warning is logged, since an
//! unbounded buffer would turn a NATS outage into an OOM.

use crate::execution::ExecutionEvent;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;

/// Maximum number of events buffered while disconnected before the
/// oldest is dropped.
const MAX_BUFFERED_EVENTS: usize = 1024;

/// Returns the fixed subject an event publishes to.
#[must_use]
pub fn subject_for(event: &ExecutionEvent) -> &'static str {
    match event {
        ExecutionEvent::RunQueued { .. } | ExecutionEvent::RunStarted { .. } => "workflow.run.started",
        ExecutionEvent::RunSucceeded { .. } | ExecutionEvent::RunFailed { .. } | ExecutionEvent::RunCancelled { .. } => {
            "workflow.run.finished"
        }
        ExecutionEvent::AgentStarted { .. } => "workflow.agent.started",
        ExecutionEvent::AgentSucceeded { .. } | ExecutionEvent::AgentFailed { .. } | ExecutionEvent::NodeSkipped { .. } => {
            "workflow.agent.finished"
        }
        ExecutionEvent::ApprovalRequested { .. } => "workflow.approval.requested",
        ExecutionEvent::ApprovalResolved { .. } => "workflow.approval.resolved",
    }
}

/// Errors from event bus operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventBusError {
    /// The bus is disconnected; the event was buffered instead.
    Buffered,
    /// Publishing failed for a reason other than disconnection.
    PublishFailed { message: String },
}

impl std::fmt::Display for EventBusError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Buffered => write!(f, "bus disconnected; event buffered for later delivery"),
            Self::PublishFailed { message } => write!(f, "event publish failed: {message}"),
        }
    }
}

impl std::error::Error for EventBusError {}

/// Publishes execution events onto the event bus.
#[async_trait]
pub trait EventBusClient: Send + Sync {
    /// Publishes a single event. Implementations should buffer rather
    /// than fail outright on a transient disconnect.
    async fn publish(&self, event: &ExecutionEvent) -> Result<(), EventBusError>;

    /// Returns whether the underlying transport is currently connected.
    fn is_connected(&self) -> bool;

    /// Returns the number of events dropped from the local buffer
    /// because it was full while disconnected.
    fn dropped_count(&self) -> u64 {
        0
    }
}

/// NATS-backed event bus client.
///
/// Wraps an [`async_nats::Client`] and a bounded drop-oldest buffer for
/// events published while the connection is down.
pub struct NatsEventBusClient {
    client: async_nats::Client,
    connected: AtomicBool,
    buffer: Mutex<VecDeque<ExecutionEvent>>,
    dropped: AtomicU64,
}

impl NatsEventBusClient {
    /// Connects to a NATS server at `url`.
    ///
    /// # Errors
    ///
    /// Returns an error if the initial connection fails.
    pub async fn connect(url: &str) -> Result<Self, EventBusError> {
        let client = async_nats::connect(url)
            .await
            .map_err(|e| EventBusError::PublishFailed { message: e.to_string() })?;
        Ok(Self {
            client,
            connected: AtomicBool::new(true),
            buffer: Mutex::new(VecDeque::new()),
            dropped: AtomicU64::new(0),
        })
    }

    fn buffer_event(&self, event: ExecutionEvent) {
        let mut buffer = self.buffer.lock().expect("event bus buffer poisoned");
        if buffer.len() >= MAX_BUFFERED_EVENTS {
            buffer.pop_front();
            let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
            tracing::warn!(dropped_total = dropped, "event bus buffer full; dropping oldest buffered event");
        }
        buffer.push_back(event);
    }

    /// Flushes buffered events, publishing each in order. Stops at the
    /// first failure, leaving the remainder buffered.
    ///
    /// # Errors
    ///
    /// Returns an error if a buffered event fails to publish.
    pub async fn flush_buffer(&self) -> Result<usize, EventBusError> {
        let mut flushed = 0;
        loop {
            let next = self.buffer.lock().expect("event bus buffer poisoned").pop_front();
            let Some(event) = next else { break };
            if let Err(e) = self.publish_now(&event).await {
                self.buffer.lock().expect("event bus buffer poisoned").push_front(event);
                return Err(e);
            }
            flushed += 1;
        }
        Ok(flushed)
    }

    async fn publish_now(&self, event: &ExecutionEvent) -> Result<(), EventBusError> {
        let subject = subject_for(event);
        let bytes = serde_json::to_vec(event).map_err(|e| EventBusError::PublishFailed { message: e.to_string() })?;
        self.client
            .publish(subject, bytes.into())
            .await
            .map_err(|e| EventBusError::PublishFailed { message: e.to_string() })?;
        self.connected.store(true, Ordering::Relaxed);
        Ok(())
    }
}

#[async_trait]
impl EventBusClient for NatsEventBusClient {
    async fn publish(&self, event: &ExecutionEvent) -> Result<(), EventBusError> {
        match self.publish_now(event).await {
            Ok(()) => Ok(()),
            Err(e) => {
                self.connected.store(false, Ordering::Relaxed);
                self.buffer_event(event.clone());
                tracing::warn!(error = %e, "event bus publish failed, buffering event");
                Err(EventBusError::Buffered)
            }
        }
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// An in-memory [`EventBusClient`] for tests.
#[derive(Default)]
pub struct InMemoryEventBusClient {
    published: Mutex<Vec<ExecutionEvent>>,
}

impl InMemoryEventBusClient {
    /// Creates an empty client.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns all events published so far, in order.
    #[must_use]
    pub fn published(&self) -> Vec<ExecutionEvent> {
        self.published.lock().expect("event bus mutex poisoned").clone()
    }
}

#[async_trait]
impl EventBusClient for InMemoryEventBusClient {
    async fn publish(&self, event: &ExecutionEvent) -> Result<(), EventBusError> {
        self.published.lock().expect("event bus mutex poisoned").push(event.clone());
        Ok(())
    }

    fn is_connected(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use loomwright_core::WorkflowRunId;

    fn run_queued(run_id: WorkflowRunId) -> ExecutionEvent {
        ExecutionEvent::RunQueued {
            run_id,
            workflow_id: loomwright_core::WorkflowId::new(),
            trigger: crate::trigger::RunTrigger::Manual,
            context: serde_json::json!({}),
            timestamp: chrono::Utc::now(),
        }
    }

    #[test]
    fn subject_mapping_covers_run_and_agent_lifecycle() {
        let run_id = WorkflowRunId::new();
        assert_eq!(subject_for(&run_queued(run_id)), "workflow.run.started");
        assert_eq!(
            subject_for(&ExecutionEvent::RunSucceeded { run_id, timestamp: chrono::Utc::now() }),
            "workflow.run.finished"
        );
        assert_eq!(
            subject_for(&ExecutionEvent::AgentStarted {
                run_id,
                node_id: crate::node::NodeId::new(),
                agent_id: loomwright_core::AgentId::new(),
                resolved_input: serde_json::json!({}),
                attempt: 1,
                timestamp: chrono::Utc::now(),
            }),
            "workflow.agent.started"
        );
    }

    #[tokio::test]
    async fn in_memory_bus_records_published_events() {
        let bus = InMemoryEventBusClient::new();
        let run_id = WorkflowRunId::new();
        bus.publish(&run_queued(run_id)).await.unwrap();

        let published = bus.published();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].run_id(), run_id);
        assert!(bus.is_connected());
    }
}
