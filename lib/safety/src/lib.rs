//! Safety Envelope (C9).
//!
//! Cross-cutting protection wrapped around externally-triggered
//! operations and the container executor:
//!
//! - [`rate_limiter::RateLimiter`]: token-bucket rate limiting keyed by
//!   caller identity, guarding workflow creation and manual triggers.
//! - [`circuit_breaker::CircuitBreaker`]: a three-state breaker around
//!   container executor calls.
//! - [`envelope::SafetyEnvelope`]: a [`ContractExecutor`](loomwright_workflow::ContractExecutor)
//!   decorator that applies the circuit breaker transparently.

pub mod circuit_breaker;
pub mod envelope;
pub mod error;
pub mod rate_limiter;

pub use circuit_breaker::CircuitBreaker;
pub use envelope::SafetyEnvelope;
pub use error::SafetyError;
pub use rate_limiter::RateLimiter;
