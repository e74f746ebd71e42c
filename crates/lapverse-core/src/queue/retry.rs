//! Retry policy: decides backoff delays and whether a failed job gets another attempt.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Retry policy for failed jobs.
///
/// `max_retries` counts re-executions after the first attempt, so a job runs
/// at most `max_retries + 1` times.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub max_retries: u32,

    /// Delay before the first retry.
    pub base_delay_ms: u64,

    /// Backoff multiplier for exponential backoff.
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    /// 3 retries at 1000ms, 2000ms, 4000ms.
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 1_000,
            multiplier: 2.0,
        }
    }
}

/// What to do with a job whose attempt just failed.
#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    Retry { delay: Duration, reason: String },
    MarkDead { reason: String },
}

impl RetryPolicy {
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// delay = base_delay * multiplier^(attempts - 1)
    ///
    /// `attempts` is the number of attempts already made (1-indexed).
    pub fn next_delay(&self, attempts: u32) -> Duration {
        let base = self.base_delay_ms as f64;
        let exponent = attempts.saturating_sub(1).min(i32::MAX as u32) as i32;
        Duration::from_millis((base * self.multiplier.powi(exponent)).round() as u64)
    }

    /// Pure decision; applying it is the queue's job.
    pub fn decide(&self, attempts: u32, max_attempts: u32, retryable: bool) -> Decision {
        if !retryable {
            Decision::MarkDead {
                reason: "non-retryable failure".to_string(),
            }
        } else if attempts >= max_attempts {
            Decision::MarkDead {
                reason: format!("max attempts reached: {attempts}/{max_attempts}"),
            }
        } else {
            let delay = self.next_delay(attempts);
            Decision::Retry {
                delay,
                reason: format!("retry attempt {}/{} after {:?}", attempts + 1, max_attempts, delay),
            }
        }
    }
}
