//! Container Executor (C3).
//!
//! Dispatches a single agent invocation into an isolated container and
//! reports back one of three outcomes: the agent's JSON output, a
//! structured failure, or an executor-level unavailability (the
//! container never ran at all, so the scheduler should not consume a
//! retry attempt for it).
//!
//! The runtime image and resource ceiling are fixed by policy, not by
//! the node: every agent gets the same base image, `memory_mb` capped
//! at 512 and `wall_clock_secs` capped at 300 unless an operator raises
//! the policy default.

use crate::error::AgentFailureKind;
use async_trait::async_trait;
use serde_json::Value as JsonValue;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

/// Default memory ceiling for a container invocation, in megabytes.
pub const DEFAULT_MEMORY_MB: u32 = 512;
/// Default wall-clock budget for a container invocation, in seconds.
pub const DEFAULT_WALL_CLOCK_SECS: u64 = 300;

/// Describes how to invoke an agent's entry point inside a container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentDescriptor {
    /// Path to the agent's entry point within its runtime image.
    pub entry_path: String,
    /// Memory ceiling in megabytes.
    pub memory_mb: u32,
    /// Wall-clock budget in seconds.
    pub wall_clock_secs: u64,
    /// The runtime image to launch the entry point in.
    pub runtime_image: String,
}

impl AgentDescriptor {
    /// Creates a descriptor using the policy defaults for resource limits.
    #[must_use]
    pub fn new(entry_path: impl Into<String>, runtime_image: impl Into<String>) -> Self {
        Self {
            entry_path: entry_path.into(),
            memory_mb: DEFAULT_MEMORY_MB,
            wall_clock_secs: DEFAULT_WALL_CLOCK_SECS,
            runtime_image: runtime_image.into(),
        }
    }
}

/// The outcome of one container invocation.
#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionResult {
    /// The agent produced well-formed JSON output.
    Success(JsonValue),
    /// The agent ran but failed; the scheduler decides whether to retry
    /// based on `kind` (see the retry policy in the DAG scheduler).
    Failure { kind: AgentFailureKind, message: String },
    /// The container never started. Does not consume a retry attempt.
    Unavailable { reason: String },
}

/// Dispatches agent invocations into isolated containers.
#[async_trait]
pub trait ContractExecutor: Send + Sync {
    /// Runs `descriptor`'s entry point with `input` as its stdin payload
    /// and parses its stdout as the execution result.
    async fn execute(&self, descriptor: &AgentDescriptor, input: JsonValue) -> ExecutionResult;
}

/// Executes agents as host subprocesses under a wall-clock timeout.
///
/// Production deployments front this with `bollard` to launch the
/// process inside the policy's runtime image rather than on the host;
/// this type implements the same contract so it drops in unchanged
/// once container launch is wired up.
pub struct ProcessContainerExecutor;

#[async_trait]
impl ContractExecutor for ProcessContainerExecutor {
    async fn execute(&self, descriptor: &AgentDescriptor, input: JsonValue) -> ExecutionResult {
        let mut child = match Command::new(&descriptor.entry_path)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
        {
            Ok(child) => child,
            Err(e) => {
                return ExecutionResult::Unavailable { reason: e.to_string() };
            }
        };

        let input_bytes = match serde_json::to_vec(&input) {
            Ok(bytes) => bytes,
            Err(e) => {
                return ExecutionResult::Failure {
                    kind: AgentFailureKind::RuntimeError { reason: format!("failed to serialize input: {e}") },
                    message: format!("failed to serialize input: {e}"),
                };
            }
        };

        if let Some(mut stdin) = child.stdin.take()
            && let Err(e) = stdin.write_all(&input_bytes).await
        {
            return ExecutionResult::Failure {
                kind: AgentFailureKind::RuntimeError { reason: format!("failed to write stdin: {e}") },
                message: format!("failed to write stdin: {e}"),
            };
        }

        let budget = Duration::from_secs(descriptor.wall_clock_secs);
        let outcome = tokio::time::timeout(budget, child.wait_with_output()).await;

        let output = match outcome {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                return ExecutionResult::Failure {
                    kind: AgentFailureKind::RuntimeError { reason: e.to_string() },
                    message: e.to_string(),
                };
            }
            Err(_) => return ExecutionResult::Failure { kind: AgentFailureKind::Timeout, message: format!("exceeded {}s wall-clock budget", descriptor.wall_clock_secs) },
        };

        if !output.status.success() {
            let code = output.status.code().unwrap_or(-1);
            return ExecutionResult::Failure {
                kind: AgentFailureKind::NonZeroExit { code },
                message: String::from_utf8_lossy(&output.stderr).into_owned(),
            };
        }

        match serde_json::from_slice::<JsonValue>(&output.stdout) {
            Ok(value) => ExecutionResult::Success(value),
            Err(e) => ExecutionResult::Failure {
                kind: AgentFailureKind::InvalidOutput,
                message: e.to_string(),
            },
        }
    }
}

/// Echoes the input back as output. Useful for wiring tests end to end.
pub struct EchoExecutor;

#[async_trait]
impl ContractExecutor for EchoExecutor {
    async fn execute(&self, _descriptor: &AgentDescriptor, input: JsonValue) -> ExecutionResult {
        ExecutionResult::Success(input)
    }
}

/// An executor that always returns a fixed, configured result.
pub struct MockExecutor {
    result: ExecutionResult,
}

impl MockExecutor {
    /// Creates a mock executor that always succeeds with `output`.
    #[must_use]
    pub fn succeeding(output: JsonValue) -> Self {
        Self { result: ExecutionResult::Success(output) }
    }

    /// Creates a mock executor that always fails with `kind`/`message`.
    #[must_use]
    pub fn failing(kind: AgentFailureKind, message: impl Into<String>) -> Self {
        Self { result: ExecutionResult::Failure { kind, message: message.into() } }
    }

    /// Creates a mock executor that always reports unavailability.
    #[must_use]
    pub fn unavailable(reason: impl Into<String>) -> Self {
        Self { result: ExecutionResult::Unavailable { reason: reason.into() } }
    }
}

#[async_trait]
impl ContractExecutor for MockExecutor {
    async fn execute(&self, _descriptor: &AgentDescriptor, _input: JsonValue) -> ExecutionResult {
        self.result.clone()
    }
}
