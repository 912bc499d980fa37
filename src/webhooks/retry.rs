// Exponential backoff for webhook delivery sequences
//
// Delay before attempt k+1 of a sequence is unit * 2^k, where k is the
// number of attempts already made in that sequence. With the default unit
// of one second that gives 2s, 4s, 8s, ... No jitter and no cap: the
// retry budget is bounded by the webhook's retry_count instead.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

/// Default backoff unit (one second)
pub const DEFAULT_BACKOFF_UNIT_MS: u64 = 1000;

/// Backoff policy shared by every delivery sequence
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackoffPolicy {
    /// Multiplied by 2^k to get the delay
    pub unit: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            unit: Duration::from_millis(DEFAULT_BACKOFF_UNIT_MS),
        }
    }
}

impl BackoffPolicy {
    pub fn new(unit: Duration) -> Self {
        Self { unit }
    }

    /// Policy with the unit expressed in milliseconds
    pub fn from_millis(unit_ms: u64) -> Self {
        Self::new(Duration::from_millis(unit_ms))
    }

    /// Delay before the next attempt, given attempts already made
    pub fn delay_after(&self, attempts_made: u32) -> Duration {
        let factor = 2_u32.checked_pow(attempts_made).unwrap_or(u32::MAX);
        self.unit.saturating_mul(factor)
    }

    /// Decide what follows a failed attempt
    ///
    /// # Arguments
    /// * `attempts_made` - Attempts completed in this sequence (>= 1)
    /// * `max_attempts` - The webhook's retry_count
    pub fn next(&self, attempts_made: u32, max_attempts: u32) -> RetryDecision {
        if attempts_made >= max_attempts {
            debug!(
                "Max attempts ({}) reached, giving up",
                max_attempts
            );
            return RetryDecision::GiveUp;
        }

        let delay = self.delay_after(attempts_made);
        debug!(
            "Attempt {} of {} failed - backing off {} ms",
            attempts_made,
            max_attempts,
            delay.as_millis()
        );
        RetryDecision::Retry(delay)
    }

    /// Sum of all backoff sleeps in a sequence that exhausts `max_attempts`
    pub fn total_backoff(&self, max_attempts: u32) -> Duration {
        (1..max_attempts).fold(Duration::ZERO, |acc, k| {
            acc.saturating_add(self.delay_after(k))
        })
    }
}

/// What to do after a failed attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Sleep this long, then attempt again
    Retry(Duration),
    /// Attempts exhausted; the sequence ends failed
    GiveUp,
}
