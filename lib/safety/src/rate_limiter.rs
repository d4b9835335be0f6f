//! Token-bucket rate limiting, keyed by caller identity.
//!
//! Externally-triggered operations (workflow creation, manual trigger)
//! pass through this before reaching the persistence gateway. Backed by
//! `governor`'s keyed rate limiter so the quota is enforced per caller
//! rather than globally.

use crate::error::SafetyError;
use governor::clock::{Clock, DefaultClock};
use governor::state::keyed::DefaultKeyedStateStore;
use governor::{Quota, RateLimiter as GovernorRateLimiter};
use std::hash::Hash;
use std::num::NonZeroU32;
use std::time::Duration;

/// Default quota for externally-triggered operations: 100 requests per
/// caller per minute.
pub const DEFAULT_REQUESTS_PER_MINUTE: u32 = 100;

/// A token-bucket rate limiter keyed by caller identity `K`.
pub struct RateLimiter<K: Clone + Eq + Hash> {
    inner: GovernorRateLimiter<K, DefaultKeyedStateStore<K>, DefaultClock>,
}

impl<K: Clone + Eq + Hash> RateLimiter<K> {
    /// Creates a limiter with the given per-caller quota.
    ///
    /// # Panics
    ///
    /// Panics if `requests_per_minute` is zero.
    #[must_use]
    pub fn new(requests_per_minute: u32) -> Self {
        let quota = Quota::per_minute(NonZeroU32::new(requests_per_minute).expect("requests_per_minute must be nonzero"));
        Self { inner: GovernorRateLimiter::keyed(quota) }
    }

    /// Creates a limiter using [`DEFAULT_REQUESTS_PER_MINUTE`].
    #[must_use]
    pub fn with_defaults() -> Self {
        Self::new(DEFAULT_REQUESTS_PER_MINUTE)
    }

    /// Checks whether `key` may proceed right now, consuming a token if so.
    ///
    /// # Errors
    ///
    /// Returns [`SafetyError::RateLimited`] with the wait time until the
    /// next token becomes available.
    pub fn check(&self, key: &K) -> Result<(), SafetyError> {
        self.inner.check_key(key).map_err(|not_until| {
            let wait: Duration = not_until.wait_time_from(DefaultClock::default().now());
            SafetyError::RateLimited { retry_after: wait }
        })
    }
}
