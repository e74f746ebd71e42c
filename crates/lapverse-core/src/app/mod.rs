//! App - アプリケーション層
//!
//! ports と各コンポーネントを組み合わせて、外部から見える操作を提供します。
//!
//! # 主要コンポーネント
//! - **CoreBuilder**: コラボレーターの注入と起動時検証
//! - **LapVerseCore**: 受付（冪等性 → コスト → SLO → enqueue）と状態照会
//! - **RunningCore**: キューごとのワーカーグループと burn rate 更新ループ
//! - **TaskJobHandler**: `task.execute` の実行

pub mod builder;
pub mod submission;
pub mod task_handler;

pub use self::builder::{BuildError, CoreBuilder};
pub use self::submission::{CompetitionSubmission, Competitor, Submission, TaskSubmission};
pub use self::task_handler::{TaskJob, TaskJobHandler};

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::{Value, json};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::admission::{AdmissionControl, GateResponse, IdempotencyGate, SloTracker};
use crate::config::CoreConfig;
use crate::domain::{
    BudgetState, Competition, CompetitionId, CompetitionStatus, IdempotencyKey, Task, TaskId,
    TaskPayload, TaskStatus, TenantId,
};
use crate::error::CoreError;
use crate::finops::FinOpsTagger;
use crate::metrics::{self, Metrics, MetricsSnapshot};
use crate::ports::{Clock, FeatureFlags, IdGenerator};
use crate::queue::{JobKind, JobView, NewJob, Queue, QueueCounts, QueueName, kinds};
use crate::repository::RecordStore;
use crate::resilience::{CircuitBreaker, CircuitBreakerState};
use crate::runtime::Runtime;
use crate::tournament::TournamentEngine;
use crate::worker::WorkerGroup;

/// The three logical queues.
#[derive(Clone)]
pub struct Queues {
    pub tasks: Arc<dyn Queue>,
    pub self_compete: Arc<dyn Queue>,
    pub kaggle: Arc<dyn Queue>,
}

impl Queues {
    pub fn get(&self, name: QueueName) -> &Arc<dyn Queue> {
        match name {
            QueueName::Tasks => &self.tasks,
            QueueName::SelfCompete => &self.self_compete,
            QueueName::Kaggle => &self.kaggle,
        }
    }
}

/// Admission and query surface of the control plane.
pub struct LapVerseCore {
    config: CoreConfig,
    gate: IdempotencyGate,
    admission: AdmissionControl,
    tagger: FinOpsTagger,
    flags: Arc<dyn FeatureFlags>,
    tasks: RecordStore<Task>,
    competitions: RecordStore<Competition>,
    engine: Arc<TournamentEngine>,
    queues: Queues,
    runtime: Arc<Runtime>,
    breakers: Vec<Arc<CircuitBreaker>>,
    ids: Arc<dyn IdGenerator>,
    clock: Arc<dyn Clock>,
    metrics: Arc<Metrics>,
}

fn accepted(id: impl std::fmt::Display) -> Value {
    json!({ "id": id.to_string(), "status": "accepted" })
}

impl LapVerseCore {
    pub fn config(&self) -> &CoreConfig {
        &self.config
    }

    pub fn slo(&self) -> &Arc<SloTracker> {
        &self.admission.slo
    }

    pub fn flags(&self) -> &Arc<dyn FeatureFlags> {
        &self.flags
    }

    pub fn queues(&self) -> &Queues {
        &self.queues
    }

    /// Runs a submission through the idempotency gate.
    ///
    /// The first caller for a (tenant, key) pair is admitted; every later or
    /// concurrent caller gets the same `{id, status}` response back.
    pub async fn submit(
        &self,
        tenant: &TenantId,
        key: &IdempotencyKey,
        submission: Submission,
    ) -> Result<GateResponse, CoreError> {
        if key.as_str().trim().is_empty() {
            return Err(CoreError::Validation("missing header: Idempotency-Key".into()));
        }
        if tenant.as_str().trim().is_empty() {
            return Err(CoreError::Validation("missing header: X-Tenant-ID".into()));
        }
        self.gate
            .run(tenant, key, move || async move {
                match submission {
                    Submission::Task(body) => self.admit_task(tenant, key, body).await,
                    Submission::Competition(body) => self.admit_competition(tenant, key, body).await,
                }
            })
            .await
    }

    async fn admit_task(
        &self,
        tenant: &TenantId,
        key: &IdempotencyKey,
        body: TaskSubmission,
    ) -> Result<Value, CoreError> {
        body.validate(tenant)?;
        let task_type = body.task_type();
        let estimate = self
            .admission
            .estimator
            .estimate_task(&task_type, body.requirements.complexity);
        self.admission.admit(tenant, estimate).await?;

        let now = self.clock.now();
        let cost_center = self.tagger.cost_center(body.cost_center.as_deref());
        let task = Task {
            id: self.ids.task_id(),
            task_type,
            tenant_id: tenant.clone(),
            priority: body.priority,
            payload: TaskPayload {
                description: body.description,
                requirements: body.requirements,
            },
            tags: self.tagger.tag(tenant, &cost_center),
            cost_center,
            idempotency_key: key.clone(),
            status: TaskStatus::Queued,
            attempts: 0,
            cost_estimate: estimate,
            cost_actual: None,
            output: None,
            last_error: None,
            created_at: now,
            updated_at: now,
        };
        if let Err(e) = self.tasks.insert(&task).await {
            self.admission.guardrail.release(tenant, now, estimate).await?;
            return Err(e);
        }

        let job = NewJob::new(
            JobKind::new(kinds::TASK_EXECUTE),
            serde_json::to_value(TaskJob { task_id: task.id })?,
            task.tags.clone(),
        )
        .with_priority(task.priority);
        if let Err(e) = self.queues.tasks.enqueue(job).await {
            error!(task_id = %task.id, %tenant, error = %e, "task enqueue failed; releasing reservation");
            let reason = e.to_string();
            self.tasks
                .update(&task.id, |t| {
                    t.advance(TaskStatus::Failed, now)?;
                    t.last_error = Some(reason.clone());
                    Ok(true)
                })
                .await?;
            self.admission.guardrail.release(tenant, now, estimate).await?;
            return Err(e);
        }

        info!(
            task_id = %task.id,
            %tenant,
            cost_center = %task.cost_center,
            task_type = %task.task_type,
            priority = task.priority.as_str(),
            %estimate,
            "task admitted"
        );
        Ok(accepted(task.id))
    }

    async fn admit_competition(
        &self,
        tenant: &TenantId,
        key: &IdempotencyKey,
        body: CompetitionSubmission,
    ) -> Result<Value, CoreError> {
        body.validate(tenant)?;
        let tournament = self.engine.config();
        let variants = body.variants(&tournament.variants, tournament.min_completed_variants)?;

        let feature = &tournament.feature_flag;
        if !self.flags.is_enabled(feature, tenant).await? {
            info!(%tenant, %feature, "admission rejected: feature disabled");
            return Err(CoreError::FeatureDisabled {
                feature: feature.clone(),
                tenant: tenant.clone(),
            });
        }

        let estimate = self.admission.estimator.estimate_competition(variants.len());
        self.admission.admit(tenant, estimate).await?;

        let now = self.clock.now();
        let cost_center = self.tagger.cost_center(body.cost_center.as_deref());
        let competition = Competition {
            id: self.ids.competition_id(),
            tenant_id: tenant.clone(),
            content: body.content,
            platforms: body.platforms,
            priority: body.priority,
            variants,
            champion_id: None,
            tags: self.tagger.tag(tenant, &cost_center),
            cost_center,
            idempotency_key: key.clone(),
            status: CompetitionStatus::Pending,
            cost_estimate: estimate,
            previous_champion_score: None,
            win_rate_delta: None,
            failure: None,
            created_at: now,
            updated_at: now,
        };
        if let Err(e) = self.competitions.insert(&competition).await {
            self.admission.guardrail.release(tenant, now, estimate).await?;
            return Err(e);
        }
        if let Err(e) = self.engine.start(&competition).await {
            error!(competition_id = %competition.id, %tenant, error = %e, "fan-out failed; aborting");
            self.engine.abort(&competition.id, &e.to_string()).await?;
            return Err(e);
        }

        info!(
            competition_id = %competition.id,
            %tenant,
            cost_center = %competition.cost_center,
            variants = competition.variants.len(),
            platforms = competition.platforms.len(),
            %estimate,
            "competition admitted"
        );
        Ok(accepted(competition.id))
    }

    pub async fn task_status(&self, id: &TaskId) -> Result<Task, CoreError> {
        self.tasks
            .get(id)
            .await?
            .ok_or_else(|| CoreError::NotFound(format!("task {id}")))
    }

    pub async fn competition_status(&self, id: &CompetitionId) -> Result<Competition, CoreError> {
        self.competitions
            .get(id)
            .await?
            .ok_or_else(|| CoreError::NotFound(format!("competition {id}")))
    }

    pub async fn budget_state(&self, tenant: &TenantId) -> Result<BudgetState, CoreError> {
        self.admission
            .guardrail
            .budget_state(tenant, self.slo().burn_rate())
            .await
    }

    pub fn breaker_states(&self) -> Vec<CircuitBreakerState> {
        self.breakers.iter().map(|b| b.snapshot()).collect()
    }

    pub async fn queue_counts(&self) -> Result<BTreeMap<String, QueueCounts>, CoreError> {
        let mut counts = BTreeMap::new();
        for name in QueueName::ALL {
            counts.insert(name.to_string(), self.queues.get(name).counts_by_state().await?);
        }
        Ok(counts)
    }

    pub async fn dead_letters(&self, queue: QueueName) -> Vec<JobView> {
        self.queues.get(queue).dead_letters().await
    }

    pub fn api_call_totals(&self) -> BTreeMap<String, u64> {
        self.slo().api_call_totals()
    }

    /// Registry snapshot with the current burn rate folded in.
    pub fn metrics_snapshot(&self) -> MetricsSnapshot {
        self.metrics
            .set_gauge(metrics::BUDGET_BURN_RATE, &[], self.slo().burn_rate());
        self.metrics.snapshot()
    }

    /// Spawns the worker groups and the burn-rate refresh loop.
    pub fn start(self: &Arc<Self>) -> RunningCore {
        let queues = &self.config.queues;
        let groups = QueueName::ALL
            .into_iter()
            .map(|name| {
                let n = queues.concurrency_for(name);
                info!(queue = %name, workers = n, "starting worker group");
                WorkerGroup::spawn(n, Arc::clone(self.queues.get(name)), Arc::clone(&self.runtime))
            })
            .collect();

        let (refresh_tx, refresh_rx) = watch::channel(false);
        let interval = Duration::from_millis(self.config.slo.refresh_interval_ms.max(1));
        let refresh = Arc::clone(self.slo()).spawn_refresh(interval, refresh_rx);

        RunningCore {
            core: Arc::clone(self),
            groups,
            refresh,
            refresh_tx,
        }
    }
}

/// Handle to a started core.
pub struct RunningCore {
    core: Arc<LapVerseCore>,
    groups: Vec<WorkerGroup>,
    refresh: JoinHandle<()>,
    refresh_tx: watch::Sender<bool>,
}

impl RunningCore {
    pub fn core(&self) -> &Arc<LapVerseCore> {
        &self.core
    }

    /// Stops leasing, lets in-flight jobs finish, then closes the queues and
    /// stops the burn-rate refresh.
    ///
    /// Groups stop in queue order, so a promotion enqueued by the last
    /// self-compete job is still accepted by the kaggle queue.
    pub async fn shutdown(self) {
        for group in self.groups {
            group.shutdown_and_join().await;
        }
        for name in QueueName::ALL {
            self.core.queues.get(name).close().await;
        }
        let _ = self.refresh_tx.send(true);
        let _ = self.refresh.await;
        info!("core stopped");
    }
}
