//! Queue module: job state, retry decisions and the in-memory implementation.
//!
//! Three logical queues (`tasks`, `self-compete`, `kaggle`) share this code;
//! each gets its own [`InMemoryQueue`] and worker group.

mod memory;
mod name;
mod record;
mod retry;
mod state;

pub use memory::InMemoryQueue;
pub use name::{JobKind, QueueName, kinds};
pub use record::{DecisionRecord, JobRecord, JobView, NewJob};
pub use retry::{Decision, RetryPolicy};
pub use state::JobState;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::domain::JobId;
use crate::error::CoreError;
use crate::finops::FinOpsTags;

/// Immutable view of a leased job, handed to handlers.
#[derive(Debug, Clone)]
pub struct JobContext {
    pub job_id: JobId,
    pub queue: QueueName,
    pub kind: JobKind,
    pub payload: serde_json::Value,
    /// 1-indexed attempt number of this execution.
    pub attempt: u32,
    pub max_attempts: u32,
    pub tags: FinOpsTags,
}

impl JobContext {
    /// No retry will follow a failure of this attempt.
    pub fn is_final_attempt(&self) -> bool {
        self.attempt >= self.max_attempts
    }
}

/// Why an attempt failed, as reported by the worker.
#[derive(Debug, Clone, PartialEq)]
pub struct JobFailure {
    pub message: String,
    pub retryable: bool,
}

impl JobFailure {
    pub fn from_error(err: &CoreError) -> Self {
        Self {
            message: err.to_string(),
            retryable: err.is_retryable(),
        }
    }
}

/// A leased job. The worker owns the lease and must either `ack` or `fail`.
///
/// - The queue owns state transitions (Queued -> Running -> ...).
/// - The worker runs side effects and reports the result.
#[async_trait]
pub trait JobLease: Send {
    fn job(&self) -> &JobContext;

    async fn ack(self: Box<Self>) -> Result<(), CoreError>;

    /// The queue decides between retry and dead-letter.
    async fn fail(self: Box<Self>, failure: JobFailure) -> Result<(), CoreError>;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueCounts {
    pub queued: usize,
    pub running: usize,
    pub succeeded: usize,
    pub retry_scheduled: usize,
    pub dead: usize,
}

/// How many finished jobs a queue keeps for inspection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetentionPolicy {
    pub keep_completed: usize,
    pub keep_failed: usize,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            keep_completed: 100,
            keep_failed: 50,
        }
    }
}

/// Queue port. In-memory here; a broker-backed queue implements the same trait.
#[async_trait]
pub trait Queue: Send + Sync {
    fn name(&self) -> QueueName;

    async fn enqueue(&self, job: NewJob) -> Result<JobId, CoreError>;

    /// Lease one ready job, waiting until one is available.
    /// Returns `None` once the queue is closed.
    async fn lease(&self) -> Option<Box<dyn JobLease>>;

    /// Stop handing out leases and wake every waiting worker.
    async fn close(&self);

    async fn counts_by_state(&self) -> Result<QueueCounts, CoreError>;

    async fn job(&self, job_id: JobId) -> Option<JobView>;

    /// Retained dead-lettered jobs, oldest first.
    async fn dead_letters(&self) -> Vec<JobView>;

    async fn decisions(&self, job_id: JobId) -> Vec<DecisionRecord>;
}
