//! In-memory queue implementation.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;
use tracing::{debug, warn};

use super::{
    Decision, DecisionRecord, JobContext, JobFailure, JobLease, JobRecord, JobState, JobView,
    NewJob, Queue, QueueCounts, QueueName, RetentionPolicy, RetryPolicy,
};
use crate::domain::{JobId, Priority};
use crate::error::CoreError;
use crate::ports::IdGenerator;

/// Ready entry: higher priority first, FIFO (by sequence) within a priority.
#[derive(Debug, Clone, PartialEq, Eq)]
struct ReadyJob {
    priority: Priority,
    seq: u64,
    job_id: JobId,
}

impl PartialOrd for ReadyJob {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ReadyJob {
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

/// Scheduled (backoff) entry. Reverse ordering makes the max-heap yield the earliest first.
#[derive(Debug, Clone, PartialEq, Eq)]
struct ScheduledJob {
    next_run_at: Instant,
    job_id: JobId,
}

impl PartialOrd for ScheduledJob {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ScheduledJob {
    fn cmp(&self, other: &Self) -> Ordering {
        other.next_run_at.cmp(&self.next_run_at)
    }
}

struct InMemoryQueueState {
    jobs: HashMap<JobId, JobRecord>,
    ready: BinaryHeap<ReadyJob>,
    scheduled: BinaryHeap<ScheduledJob>,
    decisions: HashMap<JobId, Vec<DecisionRecord>>,

    /// Finished jobs in completion order, for retention pruning.
    succeeded: VecDeque<JobId>,
    dead: VecDeque<JobId>,

    next_seq: u64,
    closed: bool,
}

impl InMemoryQueueState {
    fn new() -> Self {
        Self {
            jobs: HashMap::new(),
            ready: BinaryHeap::new(),
            scheduled: BinaryHeap::new(),
            decisions: HashMap::new(),
            succeeded: VecDeque::new(),
            dead: VecDeque::new(),
            next_seq: 0,
            closed: false,
        }
    }

    fn push_ready(&mut self, job_id: JobId, priority: Priority) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.ready.push(ReadyJob {
            priority,
            seq,
            job_id,
        });
    }

    /// Move jobs whose backoff elapsed back to the ready heap.
    fn promote_scheduled(&mut self, now: Instant) {
        while let Some(entry) = self.scheduled.peek() {
            if entry.next_run_at > now {
                break;
            }
            let Some(entry) = self.scheduled.pop() else {
                break;
            };
            let priority = match self.jobs.get_mut(&entry.job_id) {
                Some(record) if record.state == JobState::RetryScheduled => {
                    record.requeue();
                    record.priority
                }
                _ => continue,
            };
            self.push_ready(entry.job_id, priority);
        }
    }

    /// Exclusive claim: the popped job is Running before the lock is released.
    fn claim_next(&mut self) -> Option<JobContext> {
        while let Some(entry) = self.ready.pop() {
            let Some(record) = self.jobs.get_mut(&entry.job_id) else {
                continue;
            };
            if !record.state.is_runnable() {
                continue;
            }
            record.start_attempt();
            return Some(JobContext {
                job_id: record.job_id,
                queue: record.queue,
                kind: record.kind.clone(),
                payload: record.payload.clone(),
                attempt: record.attempts,
                max_attempts: record.max_attempts,
                tags: record.tags.clone(),
            });
        }
        None
    }

    fn record_decision(&mut self, decision: DecisionRecord) {
        self.decisions
            .entry(decision.job_id)
            .or_default()
            .push(decision);
    }

    fn retire(&mut self, job_id: JobId, state: JobState, retention: RetentionPolicy) {
        let (finished, keep) = match state {
            JobState::Succeeded => (&mut self.succeeded, retention.keep_completed),
            JobState::Dead => (&mut self.dead, retention.keep_failed),
            _ => return,
        };
        finished.push_back(job_id);
        let mut pruned = Vec::new();
        while finished.len() > keep {
            if let Some(old) = finished.pop_front() {
                pruned.push(old);
            }
        }
        for old in pruned {
            self.jobs.remove(&old);
            self.decisions.remove(&old);
        }
    }

    fn counts_by_state(&self) -> QueueCounts {
        let mut counts = QueueCounts::default();
        for record in self.jobs.values() {
            match record.state {
                JobState::Queued => counts.queued += 1,
                JobState::Running => counts.running += 1,
                JobState::Succeeded => counts.succeeded += 1,
                JobState::RetryScheduled => counts.retry_scheduled += 1,
                JobState::Dead => counts.dead += 1,
            }
        }
        counts
    }
}

/// In-memory, priority-aware queue with retry backoff and bounded retention.
pub struct InMemoryQueue {
    name: QueueName,
    state: Arc<Mutex<InMemoryQueueState>>,
    notify: Arc<Notify>,
    retry_policy: RetryPolicy,
    retention: RetentionPolicy,
    ids: Arc<dyn IdGenerator>,
}

impl InMemoryQueue {
    pub fn new(
        name: QueueName,
        retry_policy: RetryPolicy,
        retention: RetentionPolicy,
        ids: Arc<dyn IdGenerator>,
    ) -> Self {
        Self {
            name,
            state: Arc::new(Mutex::new(InMemoryQueueState::new())),
            notify: Arc::new(Notify::new()),
            retry_policy,
            retention,
            ids,
        }
    }
}

#[async_trait]
impl Queue for InMemoryQueue {
    fn name(&self) -> QueueName {
        self.name
    }

    async fn enqueue(&self, job: NewJob) -> Result<JobId, CoreError> {
        let job_id = self.ids.job_id();
        {
            let mut state = self.state.lock().await;
            if state.closed {
                return Err(CoreError::Transient(format!("queue {} is closed", self.name)));
            }
            let priority = job.priority;
            let record = JobRecord::new(job_id, self.name, job, self.retry_policy.max_attempts());
            state.jobs.insert(job_id, record);
            state.push_ready(job_id, priority);
        }
        debug!(queue = %self.name, %job_id, "job enqueued");
        self.notify.notify_one();
        Ok(job_id)
    }

    async fn lease(&self) -> Option<Box<dyn JobLease>> {
        loop {
            // Register before inspecting state so a close() in between is not missed.
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let next_wake = {
                let mut state = self.state.lock().await;
                if state.closed {
                    return None;
                }
                state.promote_scheduled(Instant::now());

                if let Some(job) = state.claim_next() {
                    return Some(Box::new(InMemoryLease {
                        job,
                        queue: Arc::clone(&self.state),
                        notify: Arc::clone(&self.notify),
                        retry_policy: self.retry_policy.clone(),
                        retention: self.retention,
                    }));
                }

                state.scheduled.peek().map(|entry| entry.next_run_at)
            };

            match next_wake {
                Some(wake_at) => {
                    tokio::select! {
                        _ = notified.as_mut() => {},
                        _ = tokio::time::sleep_until(wake_at) => {},
                    }
                }
                None => notified.await,
            }
        }
    }

    async fn close(&self) {
        self.state.lock().await.closed = true;
        self.notify.notify_waiters();
    }

    async fn counts_by_state(&self) -> Result<QueueCounts, CoreError> {
        Ok(self.state.lock().await.counts_by_state())
    }

    async fn job(&self, job_id: JobId) -> Option<JobView> {
        self.state.lock().await.jobs.get(&job_id).map(JobRecord::view)
    }

    async fn dead_letters(&self) -> Vec<JobView> {
        let state = self.state.lock().await;
        state
            .dead
            .iter()
            .filter_map(|id| state.jobs.get(id))
            .map(JobRecord::view)
            .collect()
    }

    async fn decisions(&self, job_id: JobId) -> Vec<DecisionRecord> {
        let state = self.state.lock().await;
        state.decisions.get(&job_id).cloned().unwrap_or_default()
    }
}

struct InMemoryLease {
    job: JobContext,
    queue: Arc<Mutex<InMemoryQueueState>>,
    notify: Arc<Notify>,
    retry_policy: RetryPolicy,
    retention: RetentionPolicy,
}

#[async_trait]
impl JobLease for InMemoryLease {
    fn job(&self) -> &JobContext {
        &self.job
    }

    async fn ack(self: Box<Self>) -> Result<(), CoreError> {
        let mut state = self.queue.lock().await;
        let Some(record) = state.jobs.get_mut(&self.job.job_id) else {
            return Ok(());
        };
        record.mark_succeeded();
        state.retire(self.job.job_id, JobState::Succeeded, self.retention);
        Ok(())
    }

    async fn fail(self: Box<Self>, failure: JobFailure) -> Result<(), CoreError> {
        let job_id = self.job.job_id;
        let should_notify = {
            let mut state = self.queue.lock().await;
            let Some(record) = state.jobs.get_mut(&job_id) else {
                return Ok(());
            };

            let trigger = json!({
                "error": failure.message,
                "retryable": failure.retryable,
                "attempts": record.attempts,
                "max_attempts": record.max_attempts,
            });

            match self
                .retry_policy
                .decide(record.attempts, record.max_attempts, failure.retryable)
            {
                Decision::MarkDead { reason } => {
                    warn!(
                        queue = %self.job.queue,
                        %job_id,
                        kind = %self.job.kind,
                        attempts = record.attempts,
                        error = %failure.message,
                        "job dead-lettered: {reason}"
                    );
                    record.mark_dead(failure.message);
                    let decision = DecisionRecord::new(
                        job_id,
                        trigger,
                        "retry_policy",
                        "mark_dead",
                        Some(json!({ "reason": reason })),
                    );
                    state.record_decision(decision);
                    state.retire(job_id, JobState::Dead, self.retention);
                    false
                }
                Decision::Retry { delay, reason } => {
                    let next_run_at = Instant::now() + delay;
                    let backoff_ms = delay.as_millis() as u64;
                    debug!(
                        queue = %self.job.queue,
                        %job_id,
                        attempts = record.attempts,
                        backoff_ms,
                        "job retry scheduled"
                    );
                    record.schedule_retry(next_run_at, backoff_ms, failure.message);
                    let decision = DecisionRecord::new(
                        job_id,
                        trigger,
                        "retry_policy",
                        "schedule_retry",
                        Some(json!({ "backoff_ms": backoff_ms, "reason": reason })),
                    );
                    state.record_decision(decision);
                    state.scheduled.push(ScheduledJob {
                        next_run_at,
                        job_id,
                    });
                    true
                }
            }
        };

        // Waiting workers recompute their wake-up time.
        if should_notify {
            self.notify.notify_one();
        }
        Ok(())
    }
}
