//! Step timeouts and retry backoff.

use std::time::Duration;

/// How the coordinator bounds and retries downstream calls.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts per forward step before giving up with `timeout_exceeded`.
    pub max_attempts: u32,
    /// Upper bound on a single downstream call.
    pub step_timeout: Duration,
    /// Delay before the first retry.
    pub base_backoff: Duration,
    /// Cap on the delay between retries.
    pub max_backoff: Duration,
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (0-indexed): `base × 2^attempt`,
    /// capped at `max_backoff`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let multiplier = 2u64.saturating_pow(attempt);
        let millis = (self.base_backoff.as_millis() as u64).saturating_mul(multiplier);
        Duration::from_millis(millis).min(self.max_backoff)
    }

    /// Longest a forward call can take before it is abandoned. Each attempt
    /// may wait out the timeout twice, once on the call and once on the
    /// re-query, then back off.
    ///
    /// Returns None if the result does not fit in a `Duration`.
    pub fn worst_case_step(&self) -> Option<Duration> {
        self.step_timeout
            .checked_mul(2)?
            .checked_add(self.max_backoff)?
            .checked_mul(self.max_attempts)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            step_timeout: Duration::from_millis(2000),
            base_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_millis(5000),
        }
    }
}
