//! Retry policy for a task's execute phase.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// How often and how patiently a node re-runs `execute` after a
/// [`TaskError::Retryable`](crate::TaskError::Retryable) failure.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RetryPolicy {
    /// Fail on the first error.
    #[default]
    None,

    /// Same delay before every retry.
    Fixed {
        /// Retries allowed after the first attempt.
        max_retries: u32,
        delay: Duration,
    },

    /// Delay doubles before every retry.
    Exponential {
        /// Retries allowed after the first attempt.
        max_retries: u32,
        initial_delay: Duration,
        /// Upper bound for any single delay.
        max_delay: Duration,
    },
}

impl RetryPolicy {
    /// Exponential backoff starting at 100ms, capped at 10 seconds.
    pub fn exponential(max_retries: u32) -> Self {
        Self::Exponential {
            max_retries,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(10),
        }
    }

    pub fn fixed(max_retries: u32, delay: Duration) -> Self {
        Self::Fixed { max_retries, delay }
    }

    /// Delay to wait after the given failed attempt (1-indexed).
    ///
    /// `None` means the attempt was the last one allowed.
    pub fn delay_after(&self, failed_attempt: u32) -> Option<Duration> {
        if failed_attempt == 0 || failed_attempt > self.max_retries() {
            return None;
        }
        match self {
            Self::None => None,
            Self::Fixed { delay, .. } => Some(*delay),
            Self::Exponential {
                initial_delay,
                max_delay,
                ..
            } => {
                let factor = 2u32.saturating_pow(failed_attempt - 1);
                let delay = initial_delay.saturating_mul(factor);
                Some(delay.min(*max_delay))
            }
        }
    }

    pub fn max_retries(&self) -> u32 {
        match self {
            Self::None => 0,
            Self::Fixed { max_retries, .. } | Self::Exponential { max_retries, .. } => {
                *max_retries
            }
        }
    }
}
