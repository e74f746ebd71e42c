//! Job record: metadata + payload for a job in a queue.

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use super::{JobKind, JobState, QueueName};
use crate::domain::{JobId, Priority};
use crate::finops::FinOpsTags;

/// What a producer hands to [`super::Queue::enqueue`].
#[derive(Debug, Clone)]
pub struct NewJob {
    pub kind: JobKind,
    pub payload: serde_json::Value,
    pub priority: Priority,
    pub tags: FinOpsTags,
}

impl NewJob {
    pub fn new(kind: JobKind, payload: serde_json::Value, tags: FinOpsTags) -> Self {
        Self {
            kind,
            payload,
            priority: Priority::default(),
            tags,
        }
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }
}

/// The single source of truth for a job's state.
///
/// Ready/scheduled structures hold `JobId` only; all transitions happen here.
#[derive(Debug, Clone)]
pub struct JobRecord {
    pub job_id: JobId,
    pub queue: QueueName,
    pub kind: JobKind,
    pub payload: serde_json::Value,
    pub priority: Priority,
    pub tags: FinOpsTags,
    pub state: JobState,

    /// Executions so far, including the current one while Running.
    pub attempts: u32,
    pub max_attempts: u32,

    /// Backoff chosen by the last retry decision.
    pub backoff_ms: u64,
    pub last_error: Option<String>,
    pub next_run_at: Option<Instant>,

    pub created_at: Instant,
    pub updated_at: Instant,
}

impl JobRecord {
    pub fn new(job_id: JobId, queue: QueueName, job: NewJob, max_attempts: u32) -> Self {
        let now = Instant::now();
        Self {
            job_id,
            queue,
            kind: job.kind,
            payload: job.payload,
            priority: job.priority,
            tags: job.tags,
            state: JobState::Queued,
            attempts: 0,
            max_attempts,
            backoff_ms: 0,
            last_error: None,
            next_run_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn start_attempt(&mut self) {
        self.state = JobState::Running;
        self.attempts += 1;
        self.updated_at = Instant::now();
    }

    pub fn mark_succeeded(&mut self) {
        self.state = JobState::Succeeded;
        self.updated_at = Instant::now();
    }

    pub fn mark_dead(&mut self, error: String) {
        self.state = JobState::Dead;
        self.last_error = Some(error);
        self.updated_at = Instant::now();
    }

    pub fn schedule_retry(&mut self, next_run_at: Instant, backoff_ms: u64, error: String) {
        self.state = JobState::RetryScheduled;
        self.next_run_at = Some(next_run_at);
        self.backoff_ms = backoff_ms;
        self.last_error = Some(error);
        self.updated_at = Instant::now();
    }

    /// RetryScheduled -> Queued.
    pub fn requeue(&mut self) {
        self.state = JobState::Queued;
        self.next_run_at = None;
        self.updated_at = Instant::now();
    }

    pub fn view(&self) -> JobView {
        JobView {
            job_id: self.job_id,
            queue_name: self.queue,
            kind: self.kind.clone(),
            payload: self.payload.clone(),
            state: self.state,
            attempts: self.attempts,
            max_attempts: self.max_attempts,
            backoff_ms: self.backoff_ms,
            next_run_in_ms: self
                .next_run_at
                .map(|at| at.saturating_duration_since(Instant::now()).as_millis() as u64),
            last_error: self.last_error.clone(),
            tags: self.tags.clone(),
        }
    }
}

/// Serializable projection of a [`JobRecord`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobView {
    pub job_id: JobId,
    pub queue_name: QueueName,
    pub kind: JobKind,
    pub payload: serde_json::Value,
    pub state: JobState,
    pub attempts: u32,
    pub max_attempts: u32,
    pub backoff_ms: u64,
    pub next_run_in_ms: Option<u64>,
    pub last_error: Option<String>,
    pub tags: FinOpsTags,
}

/// A decision the queue made about a job.
///
/// Records what triggered it, which policy applied and what was decided, so
/// "why was this job dead-lettered" can be answered after the fact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionRecord {
    pub job_id: JobId,
    pub trigger: serde_json::Value,
    pub policy: String,
    pub decision: String,
    pub context: Option<serde_json::Value>,

    #[serde(skip_serializing, skip_deserializing, default = "Instant::now")]
    pub decided_at: Instant,
}

impl DecisionRecord {
    pub fn new(
        job_id: JobId,
        trigger: serde_json::Value,
        policy: impl Into<String>,
        decision: impl Into<String>,
        context: Option<serde_json::Value>,
    ) -> Self {
        Self {
            job_id,
            trigger,
            policy: policy.into(),
            decision: decision.into(),
            context,
            decided_at: Instant::now(),
        }
    }
}
