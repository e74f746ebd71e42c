//! Job state machine for the queue.

use serde::{Deserialize, Serialize};

/// Job state.
///
/// State transitions:
/// - Queued -> Running -> Succeeded
/// - Queued -> Running -> RetryScheduled -> Queued (loop until max_attempts)
/// - Queued -> Running -> Dead (retries exhausted, or a non-retryable failure)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    /// Ready to run immediately.
    Queued,

    /// Claimed by exactly one worker.
    Running,

    Succeeded,

    /// Waiting for retry (delayed due to backoff).
    RetryScheduled,

    /// In the dead-letter set.
    Dead,
}

impl JobState {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobState::Succeeded | JobState::Dead)
    }

    pub fn is_runnable(self) -> bool {
        matches!(self, JobState::Queued)
    }
}
