//! Circuit breaker guarding the container executor.
//!
//! Three states: `Closed` (normal operation), `Open` (calls fail fast
//! with [`SafetyError::CircuitOpen`]), `HalfOpen` (a limited number of
//! probe calls are let through to test recovery). The scheduler treats
//! a circuit-open rejection the same way it treats an executor-reported
//! `Unavailable`: a backoff-and-retry signal, never a node failure.

use crate::error::SafetyError;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::collections::VecDeque;
use std::sync::Mutex;

/// Failures within this rolling window trip the breaker.
pub const FAILURE_WINDOW_SECS: i64 = 120;
/// Failure count within the window that trips the breaker open.
pub const FAILURE_THRESHOLD: usize = 5;
/// How long the breaker stays open before allowing a probe call.
pub const OPEN_COOLDOWN_SECS: i64 = 60;
/// Consecutive half-open successes required to close the breaker.
pub const HALF_OPEN_SUCCESS_THRESHOLD: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Closed,
    Open,
    HalfOpen,
}

struct Inner {
    state: State,
    /// Timestamps of recent failures observed while closed, used to
    /// evaluate the rolling-window threshold.
    recent_failures: VecDeque<DateTime<Utc>>,
    opened_at: Option<DateTime<Utc>>,
    half_open_successes: u32,
}

/// A circuit breaker protecting a single downstream dependency.
pub struct CircuitBreaker {
    inner: Mutex<Inner>,
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new()
    }
}

impl CircuitBreaker {
    /// Creates a breaker in the `Closed` state.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner { state: State::Closed, recent_failures: VecDeque::new(), opened_at: None, half_open_successes: 0 }),
        }
    }

    /// Checks whether a call may proceed right now, given the current
    /// time. `Open` transitions to `HalfOpen` once the cooldown elapses.
    ///
    /// # Errors
    ///
    /// Returns [`SafetyError::CircuitOpen`] while still cooling down.
    pub fn check(&self, now: DateTime<Utc>) -> Result<(), SafetyError> {
        let mut inner = self.inner.lock().expect("circuit breaker mutex poisoned");
        match inner.state {
            State::Closed => Ok(()),
            State::HalfOpen => Ok(()),
            State::Open => {
                let opened_at = inner.opened_at.expect("Open state always has opened_at set");
                if now - opened_at >= ChronoDuration::seconds(OPEN_COOLDOWN_SECS) {
                    inner.state = State::HalfOpen;
                    inner.half_open_successes = 0;
                    Ok(())
                } else {
                    Err(SafetyError::CircuitOpen)
                }
            }
        }
    }

    /// Records a successful call.
    pub fn record_success(&self, now: DateTime<Utc>) {
        let mut inner = self.inner.lock().expect("circuit breaker mutex poisoned");
        match inner.state {
            State::Closed => {
                inner.recent_failures.clear();
            }
            State::HalfOpen => {
                inner.half_open_successes += 1;
                if inner.half_open_successes >= HALF_OPEN_SUCCESS_THRESHOLD {
                    inner.state = State::Closed;
                    inner.recent_failures.clear();
                    inner.opened_at = None;
                    inner.half_open_successes = 0;
                }
            }
            State::Open => {
                let _ = now;
            }
        }
    }

    /// Records a failed call, possibly tripping the breaker open.
    pub fn record_failure(&self, now: DateTime<Utc>) {
        let mut inner = self.inner.lock().expect("circuit breaker mutex poisoned");
        match inner.state {
            State::Closed => {
                let cutoff = now - ChronoDuration::seconds(FAILURE_WINDOW_SECS);
                while inner.recent_failures.front().is_some_and(|t| *t < cutoff) {
                    inner.recent_failures.pop_front();
                }
                inner.recent_failures.push_back(now);
                if inner.recent_failures.len() >= FAILURE_THRESHOLD {
                    inner.state = State::Open;
                    inner.opened_at = Some(now);
                    inner.recent_failures.clear();
                }
            }
            State::HalfOpen => {
                inner.state = State::Open;
                inner.opened_at = Some(now);
                inner.half_open_successes = 0;
            }
            State::Open => {}
        }
    }

    /// Returns whether the breaker is currently open (not counting a
    /// cooldown-elapsed transition, which only happens via `check`).
    #[must_use]
    pub fn is_open(&self) -> bool {
        matches!(self.inner.lock().expect("circuit breaker mutex poisoned").state, State::Open)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stays_closed_below_failure_threshold() {
        let breaker = CircuitBreaker::new();
        let now = Utc::now();
        for _ in 0..FAILURE_THRESHOLD - 1 {
            breaker.record_failure(now);
        }
        assert!(breaker.check(now).is_ok());
        assert!(!breaker.is_open());
    }

    #[test]
    fn trips_open_after_threshold_failures_in_window() {
        let breaker = CircuitBreaker::new();
        let now = Utc::now();
        for _ in 0..FAILURE_THRESHOLD {
            breaker.record_failure(now);
        }
        assert!(breaker.is_open());
        assert!(matches!(breaker.check(now), Err(SafetyError::CircuitOpen)));
    }

    #[test]
    fn old_failures_age_out_of_the_window() {
        let breaker = CircuitBreaker::new();
        let start = Utc::now();
        for _ in 0..FAILURE_THRESHOLD - 1 {
            breaker.record_failure(start);
        }
        let later = start + ChronoDuration::seconds(FAILURE_WINDOW_SECS + 1);
        breaker.record_failure(later);
        assert!(!breaker.is_open());
    }

    #[test]
    fn half_open_after_cooldown_closes_after_enough_successes() {
        let breaker = CircuitBreaker::new();
        let now = Utc::now();
        for _ in 0..FAILURE_THRESHOLD {
            breaker.record_failure(now);
        }
        assert!(breaker.is_open());

        let after_cooldown = now + ChronoDuration::seconds(OPEN_COOLDOWN_SECS + 1);
        assert!(breaker.check(after_cooldown).is_ok());

        for _ in 0..HALF_OPEN_SUCCESS_THRESHOLD {
            breaker.record_success(after_cooldown);
        }
        assert!(!breaker.is_open());
        assert!(breaker.check(after_cooldown).is_ok());
    }

    #[test]
    fn failure_during_half_open_reopens_the_breaker() {
        let breaker = CircuitBreaker::new();
        let now = Utc::now();
        for _ in 0..FAILURE_THRESHOLD {
            breaker.record_failure(now);
        }
        let after_cooldown = now + ChronoDuration::seconds(OPEN_COOLDOWN_SECS + 1);
        breaker.check(after_cooldown).unwrap();
        breaker.record_failure(after_cooldown);
        assert!(breaker.is_open());
    }
}
