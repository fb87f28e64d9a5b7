/*!
 * Bounded retry policies.
 *
 * Every polling loop in the orchestration engine (pod status polling,
 * capacity backoff, worker job polling) is described by a `RetryPolicy`
 * value rather than by loop constants, so the policy can be configured
 * and tested on its own.
 */

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// A fixed-interval retry policy with a hard attempt ceiling
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum number of attempts (never less than one is useful)
    pub max_attempts: u32,
    /// Delay between attempts in milliseconds
    pub interval_ms: u64,
}

impl RetryPolicy {
    /// Create a new policy
    pub const fn new(max_attempts: u32, interval: Duration) -> Self {
        Self {
            max_attempts,
            interval_ms: interval.as_millis() as u64,
        }
    }

    /// Create a policy from whole seconds
    pub const fn from_secs(max_attempts: u32, interval_secs: u64) -> Self {
        Self {
            max_attempts,
            interval_ms: interval_secs * 1000,
        }
    }

    /// Delay between attempts
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    /// Worst-case wall time spent sleeping if every attempt is used
    pub fn ceiling(&self) -> Duration {
        self.interval() * self.max_attempts
    }

    /// Attempt numbers, 1-based
    pub fn attempts(&self) -> impl Iterator<Item = u32> {
        1..=self.max_attempts
    }

    /// Whether another attempt is allowed after `attempt` (1-based)
    pub fn has_next(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }

    /// Sleep for one interval
    pub async fn wait(&self) {
        tokio::time::sleep(self.interval()).await;
    }
}
