//! Error types for the safety envelope.

use std::fmt;
use std::time::Duration;

/// Errors raised by the rate limiter or circuit breaker before a call
/// reaches its target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SafetyError {
    /// The caller exceeded its rate limit; retry after the given delay.
    RateLimited { retry_after: Duration },
    /// The circuit breaker is open; calls are failing fast.
    CircuitOpen,
}

impl fmt::Display for SafetyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RateLimited { retry_after } => {
                write!(f, "rate limited, retry after {:.1}s", retry_after.as_secs_f64())
            }
            Self::CircuitOpen => write!(f, "circuit breaker is open"),
        }
    }
}

impl std::error::Error for SafetyError {}
