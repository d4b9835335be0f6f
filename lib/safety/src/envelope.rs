//! Wraps a [`ContractExecutor`] with the circuit breaker so callers get
//! `Unavailable` instead of a hung or failing container invocation once
//! the breaker has tripped.

use crate::circuit_breaker::CircuitBreaker;
use async_trait::async_trait;
use chrono::Utc;
use loomwright_workflow::{AgentDescriptor, ContractExecutor, ExecutionResult};
use serde_json::Value as JsonValue;

/// A [`ContractExecutor`] guarded by a circuit breaker.
///
/// Successes and failures recorded by the inner executor feed the
/// breaker; `Unavailable` results are treated as failures too, since
/// they indicate the runtime itself is struggling.
pub struct SafetyEnvelope<X> {
    inner: X,
    breaker: CircuitBreaker,
}

impl<X: ContractExecutor> SafetyEnvelope<X> {
    /// Wraps `executor` with a fresh, closed circuit breaker.
    #[must_use]
    pub fn new(executor: X) -> Self {
        Self { inner: executor, breaker: CircuitBreaker::new() }
    }

    /// Returns whether the breaker is currently open.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.breaker.is_open()
    }
}

#[async_trait]
impl<X: ContractExecutor + Send + Sync> ContractExecutor for SafetyEnvelope<X> {
    async fn execute(&self, descriptor: &AgentDescriptor, input: JsonValue) -> ExecutionResult {
        let now = Utc::now();
        if self.breaker.check(now).is_err() {
            return ExecutionResult::Unavailable { reason: "circuit breaker open".to_string() };
        }

        let result = self.inner.execute(descriptor, input).await;
        match &result {
            ExecutionResult::Success(_) => self.breaker.record_success(now),
            ExecutionResult::Failure { .. } | ExecutionResult::Unavailable { .. } => self.breaker.record_failure(now),
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::circuit_breaker::FAILURE_THRESHOLD;
    use loomwright_workflow::executor::MockExecutor;
    use loomwright_workflow::AgentFailureKind;

    fn descriptor() -> AgentDescriptor {
        AgentDescriptor::new("/usr/bin/true", "loomwright/agent-base:latest")
    }

    #[tokio::test]
    async fn passes_through_while_closed() {
        let envelope = SafetyEnvelope::new(MockExecutor::succeeding(serde_json::json!({"ok": true})));
        let result = envelope.execute(&descriptor(), serde_json::json!({})).await;
        assert_eq!(result, ExecutionResult::Success(serde_json::json!({"ok": true})));
        assert!(!envelope.is_open());
    }

    #[tokio::test]
    async fn opens_after_repeated_failures_and_short_circuits() {
        let envelope = SafetyEnvelope::new(MockExecutor::failing(AgentFailureKind::Timeout, "slow"));
        for _ in 0..FAILURE_THRESHOLD {
            envelope.execute(&descriptor(), serde_json::json!({})).await;
        }
        assert!(envelope.is_open());

        let result = envelope.execute(&descriptor(), serde_json::json!({})).await;
        assert_eq!(result, ExecutionResult::Unavailable { reason: "circuit breaker open".to_string() });
    }
}
