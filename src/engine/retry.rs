//! Retry schedule for fetch lineages.
//!
//! A lineage is one fetch plus its automatic retries. Each failed attempt
//! consumes the next delay of a fixed escalating schedule until the attempt
//! cap is reached; after that the caller falls back to the cached feed.

use std::time::Duration;

/// Default delays between retries, indexed by attempt.
pub const DEFAULT_RETRY_DELAYS: [Duration; 3] = [
    Duration::from_millis(1000),
    Duration::from_millis(2000),
    Duration::from_millis(5000),
];

/// Default number of automatic retries per lineage.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Escalating fixed-delay retry schedule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    delays: Vec<Duration>,
    max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_RETRY_DELAYS.to_vec(), DEFAULT_MAX_ATTEMPTS)
    }
}

impl RetryPolicy {
    pub fn new(delays: Vec<Duration>, max_attempts: u32) -> Self {
        Self {
            delays,
            max_attempts,
        }
    }

    /// Policy that never retries.
    pub fn disabled() -> Self {
        Self::new(Vec::new(), 0)
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Delay before retry number `attempt` (0-based), or `None` once the cap
    /// is reached. Attempts past the end of the schedule reuse its last delay.
    pub fn schedule_retry(&self, attempt: u32) -> Option<Duration> {
        if attempt >= self.max_attempts {
            return None;
        }
        let last = self.delays.len().checked_sub(1)?;
        let index = usize::try_from(attempt).map_or(last, |a| a.min(last));
        Some(self.delays[index])
    }
}

/// Consecutive failure count of one fetch lineage.
#[derive(Debug, Default)]
pub struct RetryState {
    attempt: u32,
}

impl RetryState {
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Record a failure and return how long to wait before retrying, or
    /// `None` when the lineage is exhausted.
    pub fn record_failure(&mut self, policy: &RetryPolicy) -> Option<Duration> {
        let delay = policy.schedule_retry(self.attempt)?;
        self.attempt += 1;
        Some(delay)
    }
}
