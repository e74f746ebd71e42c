//! `task.execute` ハンドラー
//!
//! キュー上の Task を TaskExecutor で実行し、レコードと予算台帳を更新します。
//! at-least-once 配送なので、終端状態のタスクが再配送されたら何もしません。

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::admission::MarginGuardrail;
use crate::domain::{Task, TaskId, TaskStatus};
use crate::error::CoreError;
use crate::metrics::{self, Metrics};
use crate::ports::{Clock, TaskExecutor};
use crate::queue::JobContext;
use crate::repository::RecordStore;
use crate::runtime::JobHandler;

/// Payload of a `task.execute` job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskJob {
    pub task_id: TaskId,
}

pub struct TaskJobHandler {
    tasks: RecordStore<Task>,
    executor: Arc<dyn TaskExecutor>,
    guardrail: Arc<MarginGuardrail>,
    clock: Arc<dyn Clock>,
    metrics: Arc<Metrics>,
}

impl TaskJobHandler {
    pub fn new(
        tasks: RecordStore<Task>,
        executor: Arc<dyn TaskExecutor>,
        guardrail: Arc<MarginGuardrail>,
        clock: Arc<dyn Clock>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            tasks,
            executor,
            guardrail,
            clock,
            metrics,
        }
    }

    /// Moves the task into a terminal status. `None` if another delivery got there first.
    async fn finish(
        &self,
        task_id: &TaskId,
        status: TaskStatus,
        apply: impl Fn(&mut Task) + Send + Sync,
    ) -> Result<Option<Task>, CoreError> {
        let now = self.clock.now();
        let (task, changed) = self
            .tasks
            .update(task_id, |t| {
                if t.is_terminal() {
                    return Ok(false);
                }
                t.advance(status, now)?;
                apply(t);
                Ok(true)
            })
            .await?;
        Ok(changed.then_some(task))
    }
}

#[async_trait]
impl JobHandler for TaskJobHandler {
    async fn handle(&self, job: &JobContext) -> Result<(), CoreError> {
        let TaskJob { task_id } = serde_json::from_value(job.payload.clone())?;

        let now = self.clock.now();
        let attempt = job.attempt;
        let (task, started) = self
            .tasks
            .update(&task_id, |t| {
                if t.is_terminal() {
                    return Ok(false);
                }
                t.advance(TaskStatus::Processing, now)?;
                t.attempts = attempt;
                Ok(true)
            })
            .await?;
        if !started {
            debug!(%task_id, status = task.status.as_str(), "task already finished; skipping redelivery");
            return Ok(());
        }

        let started_at = tokio::time::Instant::now();
        let tenant = task.tenant_id.as_str();
        match self.executor.execute(&task).await {
            Ok(execution) => {
                let output = execution.output.clone();
                let cost = execution.cost_actual;
                let Some(done) = self
                    .finish(&task_id, TaskStatus::Completed, |t| {
                        t.output = Some(output.clone());
                        t.cost_actual = Some(cost);
                        t.last_error = None;
                    })
                    .await?
                else {
                    return Ok(());
                };
                self.guardrail
                    .reconcile(&done.tenant_id, done.created_at, done.cost_estimate, cost)
                    .await?;

                let elapsed_ms = started_at.elapsed().as_secs_f64() * 1_000.0;
                self.metrics.incr(
                    metrics::TASKS_TOTAL,
                    &[("status", "completed"), ("tenant", tenant)],
                );
                self.metrics.observe(
                    metrics::TASK_DURATION_MS,
                    &[("type", done.task_type.as_str())],
                    elapsed_ms,
                );
                info!(
                    %task_id,
                    %tenant,
                    cost_center = %done.cost_center,
                    estimate = %done.cost_estimate,
                    actual = %cost,
                    attempt,
                    "task completed"
                );
                Ok(())
            }
            Err(err) if err.is_retryable() && !job.is_final_attempt() => {
                warn!(%task_id, attempt, error = %err, "task attempt failed; will retry");
                Err(err)
            }
            Err(err) => {
                let reason = err.to_string();
                if let Some(failed) = self
                    .finish(&task_id, TaskStatus::Failed, |t| t.last_error = Some(reason.clone()))
                    .await?
                {
                    self.guardrail
                        .release(&failed.tenant_id, failed.created_at, failed.cost_estimate)
                        .await?;
                    self.metrics.incr(
                        metrics::TASKS_TOTAL,
                        &[("status", "failed"), ("tenant", tenant)],
                    );
                }
                warn!(%task_id, attempt, error = %err, kind = err.kind().as_str(), "task failed");
                Err(err)
            }
        }
    }
}
