//! Tournament engine.
//!
//! Flow of one competition:
//! 1. `start`: Pending -> Running, one `competition.variant` job per variant
//! 2. `run_variant`: execute, record the outcome on the competition record (CAS)
//! 3. completion barrier: the worker that observes every variant terminal and
//!    wins the Running -> Scoring CAS is the only one that finalizes
//! 4. `finalize`: score, pick the champion, decide evolution, commit the
//!    verdict, reconcile cost. A finalize that cannot complete fails the
//!    competition instead of leaving it in Scoring.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{error, info, warn};

use super::TournamentConfig;
use super::selection;
use crate::admission::{MarginGuardrail, SloTracker};
use crate::domain::{Competition, CompetitionId, CompetitionStatus, Lifecycle, TenantId, VariantOutcome};
use crate::error::CoreError;
use crate::metrics::{self, Metrics};
use crate::ports::{Clock, FeatureFlags, PromotionRequest, SharedStore, VariantExecutor, VariantScorer};
use crate::queue::{JobContext, JobKind, NewJob, Queue, kinds};
use crate::repository::RecordStore;

/// Payload of a `competition.variant` job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VariantJob {
    pub competition_id: CompetitionId,
    pub variant: String,
}

pub struct TournamentEngine {
    pub(crate) competitions: RecordStore<Competition>,
    executor: Arc<dyn VariantExecutor>,
    scorer: Arc<dyn VariantScorer>,
    flags: Arc<dyn FeatureFlags>,
    slo: Arc<SloTracker>,
    guardrail: Arc<MarginGuardrail>,
    store: Arc<dyn SharedStore>,
    self_compete: Arc<dyn Queue>,
    kaggle: Arc<dyn Queue>,
    clock: Arc<dyn Clock>,
    metrics: Arc<Metrics>,
    config: TournamentConfig,
}

/// What scoring decided, before it is written back.
struct Verdict {
    scores: Vec<(String, f64)>,
    champion: Option<String>,
    champion_score: Option<f64>,
    previous: Option<f64>,
    delta: Option<f64>,
    status: CompetitionStatus,
    failure: Option<String>,
}

impl TournamentEngine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        competitions: RecordStore<Competition>,
        executor: Arc<dyn VariantExecutor>,
        scorer: Arc<dyn VariantScorer>,
        flags: Arc<dyn FeatureFlags>,
        slo: Arc<SloTracker>,
        guardrail: Arc<MarginGuardrail>,
        store: Arc<dyn SharedStore>,
        self_compete: Arc<dyn Queue>,
        kaggle: Arc<dyn Queue>,
        clock: Arc<dyn Clock>,
        metrics: Arc<Metrics>,
        config: TournamentConfig,
    ) -> Self {
        Self {
            competitions,
            executor,
            scorer,
            flags,
            slo,
            guardrail,
            store,
            self_compete,
            kaggle,
            clock,
            metrics,
            config,
        }
    }

    pub fn config(&self) -> &TournamentConfig {
        &self.config
    }

    fn champion_key(tenant: &TenantId) -> String {
        format!("champion:{tenant}:score")
    }

    /// Score of the tenant's reigning champion, if any.
    pub async fn champion_score(&self, tenant: &TenantId) -> Result<Option<f64>, CoreError> {
        Ok(self
            .store
            .get(&Self::champion_key(tenant))
            .await?
            .and_then(|v| v.as_f64()))
    }

    /// Fan-out: marks the competition Running and enqueues one job per variant.
    pub async fn start(&self, competition: &Competition) -> Result<(), CoreError> {
        let now = self.clock.now();
        self.competitions
            .update(&competition.id, |c| {
                c.advance(CompetitionStatus::Running, now)?;
                Ok(true)
            })
            .await?;

        for variant in &competition.variants {
            let payload = serde_json::to_value(VariantJob {
                competition_id: competition.id,
                variant: variant.name.clone(),
            })?;
            let job = NewJob::new(
                JobKind::new(kinds::COMPETITION_VARIANT),
                payload,
                competition.tags.clone(),
            )
            .with_priority(competition.priority);
            self.self_compete.enqueue(job).await?;
        }
        info!(
            competition_id = %competition.id,
            tenant = %competition.tenant_id,
            variants = competition.variants.len(),
            "competition fanned out"
        );
        Ok(())
    }

    /// Marks a competition that could not be started as Failed and gives its
    /// reservation back.
    pub async fn abort(&self, id: &CompetitionId, reason: &str) -> Result<(), CoreError> {
        let now = self.clock.now();
        let (competition, changed) = self
            .competitions
            .update(id, |c| {
                if c.status.is_terminal() {
                    return Ok(false);
                }
                c.advance(CompetitionStatus::Failed, now)?;
                c.failure = Some(reason.to_string());
                Ok(true)
            })
            .await?;
        if changed {
            self.guardrail
                .release(&competition.tenant_id, competition.created_at, competition.cost_estimate)
                .await?;
            self.metrics
                .incr(metrics::COMPETITIONS_TOTAL, &[("status", "failed")]);
        }
        Ok(())
    }

    /// Executes one variant and records its outcome.
    ///
    /// Retryable errors are returned before anything is recorded, unless this
    /// is the last attempt; then the variant is recorded as failed (score 0)
    /// so the barrier can still complete.
    pub async fn run_variant(&self, job: &JobContext) -> Result<(), CoreError> {
        let VariantJob {
            competition_id,
            variant,
        } = serde_json::from_value(job.payload.clone())?;

        let Some(competition) = self.competitions.get(&competition_id).await? else {
            return Err(CoreError::NotFound(format!("competition {competition_id}")));
        };
        let Some(current) = competition.variants.iter().find(|v| v.name == variant) else {
            return Err(CoreError::Validation(format!(
                "competition {competition_id} has no variant {variant}"
            )));
        };
        if competition.status.is_terminal() || current.is_terminal() {
            // Redelivery of a variant that already finished.
            return self.try_finalize(&competition_id).await;
        }

        let outcome = self.executor.execute(&competition, current).await;
        let result = match outcome {
            Ok(execution) => {
                self.competitions
                    .update(&competition_id, |c| {
                        let Some(v) = c.variant_mut(&variant) else {
                            return Ok(false);
                        };
                        if v.is_terminal() {
                            return Ok(false);
                        }
                        v.outcome = VariantOutcome::Succeeded;
                        v.cost = execution.cost;
                        v.output_artifact = Some(execution.output_artifact.clone());
                        v.degraded = execution.degraded;
                        Ok(true)
                    })
                    .await?;
                info!(
                    %competition_id,
                    variant = %variant,
                    degraded = execution.degraded,
                    "variant completed"
                );
                Ok(())
            }
            Err(err) if err.is_retryable() && !job.is_final_attempt() => return Err(err),
            Err(err) => {
                let reason = err.to_string();
                self.competitions
                    .update(&competition_id, |c| {
                        let Some(v) = c.variant_mut(&variant) else {
                            return Ok(false);
                        };
                        if v.is_terminal() {
                            return Ok(false);
                        }
                        v.outcome = VariantOutcome::Failed {
                            reason: reason.clone(),
                        };
                        v.score = Some(0.0);
                        Ok(true)
                    })
                    .await?;
                warn!(%competition_id, variant = %variant, error = %err, "variant failed");
                Err(err)
            }
        };

        self.try_finalize(&competition_id).await?;
        result
    }

    /// Completion barrier. Finalizes only when every variant is terminal and
    /// this caller wins the Running -> Scoring transition.
    pub async fn try_finalize(&self, id: &CompetitionId) -> Result<(), CoreError> {
        let now = self.clock.now();
        let (competition, won) = self
            .competitions
            .update(id, |c| {
                if c.status != CompetitionStatus::Running || !c.all_variants_terminal() {
                    return Ok(false);
                }
                c.advance(CompetitionStatus::Scoring, now)?;
                Ok(true)
            })
            .await?;
        if !won {
            return Ok(());
        }
        self.finalize(competition).await
    }

    /// Runs scoring for a competition this caller moved into Scoring.
    ///
    /// If scoring cannot complete, the competition is failed and the ledger is
    /// reconciled against what the variants actually cost, so it never stays in
    /// Scoring.
    async fn finalize(&self, competition: Competition) -> Result<(), CoreError> {
        let id = competition.id;
        let Err(err) = self.conclude(&competition).await else {
            return Ok(());
        };
        error!(competition_id = %id, error = %err, "finalize failed");
        if self.fail_scoring(&id, &err).await? {
            Ok(())
        } else {
            Err(err)
        }
    }

    /// Scoring -> Failed. Returns false if the competition already left Scoring.
    async fn fail_scoring(&self, id: &CompetitionId, cause: &CoreError) -> Result<bool, CoreError> {
        let now = self.clock.now();
        let reason = format!("scoring failed: {cause}");
        let (competition, changed) = self
            .competitions
            .update(id, |c| {
                if c.status != CompetitionStatus::Scoring {
                    return Ok(false);
                }
                c.advance(CompetitionStatus::Failed, now)?;
                c.failure = Some(reason.clone());
                Ok(true)
            })
            .await?;
        if changed {
            let total = competition.total_cost();
            self.guardrail
                .reconcile(&competition.tenant_id, competition.created_at, competition.cost_estimate, total)
                .await?;
            self.metrics
                .incr(metrics::COMPETITIONS_TOTAL, &[("status", "failed")]);
        }
        Ok(changed)
    }

    /// Judge, enqueue the promotion, commit the verdict, then apply the
    /// champion bookkeeping that depends on the committed status.
    async fn conclude(&self, competition: &Competition) -> Result<(), CoreError> {
        let id = competition.id;
        let tenant = competition.tenant_id.clone();
        let mut verdict = self.judge(competition).await?;
        if verdict.status == CompetitionStatus::Promoted && !self.enqueue_promotion(competition, &verdict).await {
            verdict.status = CompetitionStatus::CompletedNoEvolution;
        }

        let now = self.clock.now();
        let (finished, _) = self
            .competitions
            .update(&id, |c| {
                for (name, score) in &verdict.scores {
                    if let Some(v) = c.variant_mut(name) {
                        v.score = Some(*score);
                    }
                }
                c.champion_id = verdict.champion.clone();
                c.previous_champion_score = verdict.previous;
                c.win_rate_delta = verdict.delta;
                c.failure = verdict.failure.clone();
                c.advance(verdict.status, now)?;
                Ok(true)
            })
            .await?;

        if let Some(score) = verdict.champion_score {
            match finished.status {
                CompetitionStatus::Promoted => {
                    self.record_champion(&tenant, score).await;
                    self.raise_rollout().await;
                }
                // 初回は比較対象がないので、この回のチャンピオンを基準値にする
                CompetitionStatus::CompletedNoEvolution if verdict.previous.is_none() => {
                    self.record_baseline(&tenant, score).await;
                }
                _ => {}
            }
        }

        let total = finished.total_cost();
        self.guardrail
            .reconcile(&tenant, finished.created_at, finished.cost_estimate, total)
            .await?;

        let status = finished.status.as_str();
        self.metrics
            .incr(metrics::COMPETITIONS_TOTAL, &[("status", status)]);
        self.metrics.observe(
            metrics::COST_PER_COMPETITION,
            &[("tenant", tenant.as_str())],
            total.as_dollars(),
        );
        if let Some(delta) = finished.win_rate_delta {
            self.metrics
                .set_gauge(metrics::WIN_RATE, &[("tenant", tenant.as_str())], delta);
        }
        info!(
            competition_id = %id,
            %tenant,
            status,
            champion = finished.champion_id.as_deref().unwrap_or("-"),
            cost = %total,
            "competition finalized"
        );
        Ok(())
    }

    /// Scores variants, selects the champion and applies the evolution rule.
    /// Reads only; nothing is written until the verdict is committed.
    async fn judge(&self, competition: &Competition) -> Result<Verdict, CoreError> {
        let completed = competition.completed_variants();
        let required = self.config.min_completed_variants;
        if completed < required {
            let err = CoreError::InsufficientVariants {
                competition: competition.id,
                completed,
                required,
            };
            warn!(competition_id = %competition.id, completed, required, "insufficient variants");
            return Ok(Verdict {
                scores: Vec::new(),
                champion: None,
                champion_score: None,
                previous: None,
                delta: None,
                status: CompetitionStatus::Failed,
                failure: Some(err.to_string()),
            });
        }

        let mut scored = competition.variants.clone();
        let mut scores = Vec::with_capacity(scored.len());
        for v in scored.iter_mut() {
            let score = if v.completed() {
                match self.scorer.score(competition, v).await {
                    Ok(s) => s,
                    Err(e) => {
                        warn!(competition_id = %competition.id, variant = %v.name, error = %e, "scoring failed; using 0");
                        0.0
                    }
                }
            } else {
                0.0
            };
            v.score = Some(score);
            scores.push((v.name.clone(), score));
        }

        let Some(champion) = selection::select_champion(&scored) else {
            return Err(CoreError::InsufficientVariants {
                competition: competition.id,
                completed: 0,
                required,
            });
        };
        let champion_score = champion.score.unwrap_or(0.0);
        let previous = self.champion_score(&competition.tenant_id).await?;
        let delta = selection::win_rate_delta(champion_score, previous);
        let burn_rate = self.slo.burn_rate();
        self.metrics
            .set_gauge(metrics::BUDGET_BURN_RATE, &[], burn_rate);

        let evolve = selection::should_evolve(burn_rate, delta, self.config.evolution_threshold);
        info!(
            competition_id = %competition.id,
            champion = %champion.name,
            champion_score,
            previous = previous.unwrap_or(0.0),
            delta,
            burn_rate,
            evolve,
            "champion selected"
        );

        Ok(Verdict {
            scores,
            champion: Some(champion.name.clone()),
            champion_score: Some(champion_score),
            previous,
            delta: Some(delta),
            status: if evolve {
                CompetitionStatus::Promoted
            } else {
                CompetitionStatus::CompletedNoEvolution
            },
            failure: None,
        })
    }

    /// Enqueues the `champion.promote` job. The kaggle handler forwards it
    /// only once the competition is committed as Promoted.
    async fn enqueue_promotion(&self, competition: &Competition, verdict: &Verdict) -> bool {
        let Some(champion) = verdict.champion.as_deref() else {
            return false;
        };
        let strategy = competition
            .variants
            .iter()
            .find(|v| v.name == champion)
            .map(|v| v.strategy_params.clone())
            .unwrap_or_default();
        let request = PromotionRequest {
            champion_id: champion.to_string(),
            metadata: json!({
                "competitionId": competition.id,
                "tenantId": competition.tenant_id,
                "score": verdict.champion_score,
                "winRateDelta": verdict.delta,
                "strategyParams": strategy,
                "tags": competition.tags,
            }),
        };
        let payload = match serde_json::to_value(&request) {
            Ok(p) => p,
            Err(e) => {
                error!(competition_id = %competition.id, error = %e, "promotion payload encoding failed");
                return false;
            }
        };
        let job = NewJob::new(JobKind::new(kinds::CHAMPION_PROMOTE), payload, competition.tags.clone())
            .with_priority(competition.priority);
        if let Err(e) = self.kaggle.enqueue(job).await {
            error!(competition_id = %competition.id, error = %e, "promotion enqueue failed");
            return false;
        }
        true
    }

    async fn record_champion(&self, tenant: &TenantId, score: f64) {
        if let Err(e) = self.store.put(&Self::champion_key(tenant), json!(score), None).await {
            warn!(%tenant, error = %e, "champion score not recorded");
        }
    }

    /// Only the first finished competition of a tenant sets the baseline.
    async fn record_baseline(&self, tenant: &TenantId, score: f64) {
        match self
            .store
            .set_if_absent(&Self::champion_key(tenant), json!(score), None)
            .await
        {
            Ok(true) => info!(%tenant, score, "champion baseline recorded"),
            Ok(false) => {}
            Err(e) => warn!(%tenant, error = %e, "champion baseline not recorded"),
        }
    }

    async fn raise_rollout(&self) {
        let flag = &self.config.rollout_flag;
        match self.flags.rollout_percentage(flag).await {
            Ok(current) => {
                let next = current.saturating_add(self.config.rollout_step).min(100);
                if let Err(e) = self.flags.set_rollout_percentage(flag, next).await {
                    warn!(%flag, error = %e, "rollout update failed");
                } else {
                    info!(%flag, from = current, to = next, "rollout raised");
                }
            }
            Err(e) => warn!(%flag, error = %e, "rollout read failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};
    use serde_json::Value;

    use super::*;
    use crate::admission::{CallWindow, SloConfig};
    use crate::domain::{CostCenter, IdempotencyKey, Priority, Usd, Variant};
    use crate::finops::FinOpsTagger;
    use crate::impls::{ArtifactScoreScorer, HashRollout, InMemoryStore, StaticTenantDirectory};
    use crate::ports::{FixedClock, IdGenerator, StoreError, UlidGenerator, VariantExecution};
    use crate::queue::{InMemoryQueue, JobFailure, QueueName, RetentionPolicy, RetryPolicy};

    /// Variant name -> score, or an error message.
    struct Scripted(HashMap<&'static str, Result<f64, &'static str>>);

    #[async_trait]
    impl VariantExecutor for Scripted {
        async fn execute(
            &self,
            _competition: &Competition,
            variant: &Variant,
        ) -> Result<VariantExecution, CoreError> {
            match self.0.get(variant.name.as_str()) {
                Some(Ok(score)) => Ok(VariantExecution {
                    output_artifact: json!({ "score": score }),
                    cost: Usd::from_dollars(0.20),
                    degraded: *score < 0.0,
                }),
                Some(Err(msg)) => Err(CoreError::Validation((*msg).to_string())),
                None => Err(CoreError::Validation("unscripted".into())),
            }
        }
    }

    struct Harness {
        engine: TournamentEngine,
        store: Arc<InMemoryStore>,
        flags: Arc<HashRollout>,
        slo: Arc<SloTracker>,
        guardrail: Arc<MarginGuardrail>,
        self_compete: Arc<InMemoryQueue>,
        kaggle: Arc<InMemoryQueue>,
        ids: Arc<UlidGenerator>,
        clock: FixedClock,
    }

    fn harness(script: &[(&'static str, Result<f64, &'static str>)]) -> Harness {
        harness_with(script, |s| s as Arc<dyn SharedStore>)
    }

    /// `engine_store` wraps the store the engine reads champion scores from.
    fn harness_with(
        script: &[(&'static str, Result<f64, &'static str>)],
        engine_store: impl FnOnce(Arc<InMemoryStore>) -> Arc<dyn SharedStore>,
    ) -> Harness {
        let clock = FixedClock::new(Utc.with_ymd_and_hms(2026, 4, 1, 9, 0, 0).unwrap());
        let dyn_clock: Arc<dyn Clock> = Arc::new(clock.clone());
        let store = Arc::new(InMemoryStore::new(Arc::clone(&dyn_clock)));
        let ids = Arc::new(UlidGenerator::new(Arc::clone(&dyn_clock)));
        let queue = |name| {
            Arc::new(InMemoryQueue::new(
                name,
                RetryPolicy::default(),
                RetentionPolicy::default(),
                ids.clone(),
            ))
        };
        let self_compete = queue(QueueName::SelfCompete);
        let kaggle = queue(QueueName::Kaggle);
        let flags = Arc::new(HashRollout::new(store.clone()));
        let slo = Arc::new(SloTracker::in_process(Arc::new(CallWindow::new(
            Arc::clone(&dyn_clock),
            &SloConfig::default(),
        ))));
        let tenants = StaticTenantDirectory::new().with_tenant("acme", Usd::from_dollars(1_000.0));
        let guardrail = Arc::new(MarginGuardrail::new(
            store.clone(),
            Arc::new(tenants),
            Arc::clone(&dyn_clock),
            7_000,
        ));
        let engine = TournamentEngine::new(
            RecordStore::new(store.clone()),
            Arc::new(Scripted(script.iter().cloned().collect())),
            Arc::new(ArtifactScoreScorer),
            flags.clone(),
            slo.clone(),
            guardrail.clone(),
            engine_store(store.clone()),
            self_compete.clone(),
            kaggle.clone(),
            dyn_clock,
            Arc::new(Metrics::new()),
            TournamentConfig::default(),
        );
        Harness {
            engine,
            store,
            flags,
            slo,
            guardrail,
            self_compete,
            kaggle,
            ids,
            clock,
        }
    }

    impl Harness {
        async fn admit(&self, names: &[&str]) -> CompetitionId {
            let tenant = TenantId::new("acme");
            let cc = CostCenter::new("growth");
            let estimate = Usd::from_dollars(0.25).times(names.len() as u32);
            self.guardrail.reserve(&tenant, estimate).await.unwrap();
            let competition = Competition {
                id: self.ids.competition_id(),
                tags: FinOpsTagger::default().tag(&tenant, &cc),
                tenant_id: tenant,
                content: "launch".into(),
                platforms: vec!["x".into()],
                priority: Priority::Normal,
                variants: names.iter().map(|n| Variant::new(*n, json!({}))).collect(),
                champion_id: None,
                cost_center: cc,
                idempotency_key: IdempotencyKey::new("k"),
                status: CompetitionStatus::Pending,
                cost_estimate: estimate,
                previous_champion_score: None,
                win_rate_delta: None,
                failure: None,
                created_at: self.clock.now(),
                updated_at: self.clock.now(),
            };
            self.engine.competitions.insert(&competition).await.unwrap();
            self.engine.start(&competition).await.unwrap();
            competition.id
        }

        /// Plays the self-compete worker by hand.
        async fn drain(&self) {
            while let Ok(Some(lease)) =
                tokio::time::timeout(Duration::from_millis(50), self.self_compete.lease()).await
            {
                let job = lease.job().clone();
                match self.engine.run_variant(&job).await {
                    Ok(()) => lease.ack().await.unwrap(),
                    Err(e) => lease.fail(JobFailure::from_error(&e)).await.unwrap(),
                }
            }
        }

        async fn competition(&self, id: CompetitionId) -> Competition {
            self.engine.competitions.get(&id).await.unwrap().unwrap()
        }
    }

    /// Refuses the first champion-score read, then behaves like the inner store.
    struct ChampionReadFault {
        inner: Arc<InMemoryStore>,
        armed: AtomicBool,
    }

    #[async_trait]
    impl SharedStore for ChampionReadFault {
        async fn get(&self, key: &str) -> Result<Option<Value>, StoreError> {
            if key.starts_with("champion:") && self.armed.swap(false, Ordering::SeqCst) {
                return Err(StoreError::Unavailable("connection reset".into()));
            }
            self.inner.get(key).await
        }

        async fn put(&self, key: &str, value: Value, ttl: Option<Duration>) -> Result<(), StoreError> {
            self.inner.put(key, value, ttl).await
        }

        async fn set_if_absent(
            &self,
            key: &str,
            value: Value,
            ttl: Option<Duration>,
        ) -> Result<bool, StoreError> {
            self.inner.set_if_absent(key, value, ttl).await
        }

        async fn compare_and_swap(
            &self,
            key: &str,
            expected: &Value,
            new: Value,
            ttl: Option<Duration>,
        ) -> Result<bool, StoreError> {
            self.inner.compare_and_swap(key, expected, new, ttl).await
        }

        async fn remove_if(&self, key: &str, expected: &Value) -> Result<bool, StoreError> {
            self.inner.remove_if(key, expected).await
        }

        async fn incr_by(&self, key: &str, delta: i64) -> Result<i64, StoreError> {
            self.inner.incr_by(key, delta).await
        }
    }

    const FOUR: [&str; 4] = ["aggressive", "conservative", "balanced", "experimental"];

    #[tokio::test]
    async fn better_champion_is_promoted() {
        let h = harness(&[
            ("aggressive", Ok(10.0)),
            ("conservative", Ok(20.0)),
            ("balanced", Ok(15.0)),
            ("experimental", Ok(5.0)),
        ]);
        h.store
            .put("champion:acme:score", json!(18.0), None)
            .await
            .unwrap();
        h.slo.set_burn_rate(0.5);

        let id = h.admit(&FOUR).await;
        h.drain().await;

        let c = h.competition(id).await;
        assert_eq!(c.status, CompetitionStatus::Promoted);
        assert_eq!(c.champion_id.as_deref(), Some("conservative"));
        assert_eq!(c.previous_champion_score, Some(18.0));
        assert!((c.win_rate_delta.unwrap() - 2.0 / 18.0).abs() < 1e-9);

        assert_eq!(h.flags.rollout_percentage("champion_rollout").await.unwrap(), 10);
        assert_eq!(h.engine.champion_score(&c.tenant_id).await.unwrap(), Some(20.0));

        let promotion = h.kaggle.lease().await.unwrap();
        let request: PromotionRequest = serde_json::from_value(promotion.job().payload.clone()).unwrap();
        assert_eq!(request.champion_id, "conservative");
        assert_eq!(request.metadata["competitionId"], json!(id));
    }

    #[tokio::test]
    async fn one_success_of_four_is_insufficient() {
        let h = harness(&[
            ("aggressive", Ok(10.0)),
            ("conservative", Err("model crashed")),
            ("balanced", Err("model crashed")),
            ("experimental", Err("model crashed")),
        ]);
        let id = h.admit(&FOUR).await;
        h.drain().await;

        let c = h.competition(id).await;
        assert_eq!(c.status, CompetitionStatus::Failed);
        assert!(c.champion_id.is_none());
        assert!(c.failure.unwrap().contains("1 completed variants, 2 required"));
        assert_eq!(h.self_compete.dead_letters().await.len(), 3);
        assert_eq!(h.kaggle.counts_by_state().await.unwrap().queued, 0);
    }

    #[tokio::test]
    async fn small_improvement_completes_without_evolution() {
        let h = harness(&[("aggressive", Ok(19.0)), ("balanced", Ok(18.5))]);
        h.store.put("champion:acme:score", json!(18.5), None).await.unwrap();

        let id = h.admit(&["aggressive", "balanced"]).await;
        h.drain().await;

        let c = h.competition(id).await;
        assert_eq!(c.status, CompetitionStatus::CompletedNoEvolution);
        assert_eq!(c.champion_id.as_deref(), Some("aggressive"));
        assert_eq!(h.engine.champion_score(&c.tenant_id).await.unwrap(), Some(18.5));
        assert_eq!(h.flags.rollout_percentage("champion_rollout").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn exhausted_error_budget_blocks_evolution() {
        let h = harness(&[("aggressive", Ok(50.0)), ("balanced", Ok(40.0))]);
        h.store.put("champion:acme:score", json!(10.0), None).await.unwrap();
        h.slo.set_burn_rate(1.5);

        let id = h.admit(&["aggressive", "balanced"]).await;
        h.drain().await;

        assert_eq!(h.competition(id).await.status, CompetitionStatus::CompletedNoEvolution);
    }

    #[tokio::test]
    async fn degraded_variants_count_and_cost_is_reconciled() {
        // negative scores are scripted as degraded outputs
        let h = harness(&[("aggressive", Ok(-1.0)), ("balanced", Ok(-2.0))]);
        let id = h.admit(&["aggressive", "balanced"]).await;
        h.drain().await;

        let c = h.competition(id).await;
        assert_eq!(c.status, CompetitionStatus::CompletedNoEvolution);
        assert!(c.variants.iter().all(|v| v.degraded));
        assert_eq!(c.champion_id.as_deref(), Some("aggressive"));

        // estimate 2 × $0.25 replaced by actual 2 × $0.20
        let spend = h.guardrail.period_spend(&c.tenant_id, "2026-04").await.unwrap();
        assert_eq!(spend, Usd::from_dollars(0.40));
    }

    #[tokio::test]
    async fn redelivered_variant_job_does_not_rerun() {
        let h = harness(&[("aggressive", Ok(3.0)), ("balanced", Ok(4.0))]);
        let id = h.admit(&["aggressive", "balanced"]).await;

        let first = h.self_compete.lease().await.unwrap();
        let job = first.job().clone();
        h.engine.run_variant(&job).await.unwrap();
        let before = h.competition(id).await;

        // at-least-once: the same job delivered again
        h.engine.run_variant(&job).await.unwrap();
        let after = h.competition(id).await;
        assert_eq!(before.variants, after.variants);
        assert_eq!(after.status, CompetitionStatus::Running);
    }

    #[tokio::test]
    async fn first_champion_becomes_the_baseline_for_the_next_round() {
        let h = harness(&[
            ("aggressive", Ok(10.0)),
            ("balanced", Ok(5.0)),
            ("conservative", Ok(20.0)),
            ("experimental", Ok(15.0)),
        ]);
        h.slo.set_burn_rate(0.0);

        let first = h.admit(&["aggressive", "balanced"]).await;
        h.drain().await;
        let first = h.competition(first).await;
        assert_eq!(first.status, CompetitionStatus::CompletedNoEvolution);
        assert_eq!(first.win_rate_delta, Some(0.0));
        assert_eq!(h.engine.champion_score(&first.tenant_id).await.unwrap(), Some(10.0));
        assert_eq!(h.kaggle.counts_by_state().await.unwrap().queued, 0);

        let second = h.admit(&["conservative", "experimental"]).await;
        h.drain().await;
        let second = h.competition(second).await;
        assert_eq!(second.status, CompetitionStatus::Promoted);
        assert_eq!(second.champion_id.as_deref(), Some("conservative"));
        assert_eq!(second.previous_champion_score, Some(10.0));
        assert!((second.win_rate_delta.unwrap() - 1.0).abs() < 1e-9);
        assert_eq!(h.engine.champion_score(&second.tenant_id).await.unwrap(), Some(20.0));
        assert_eq!(h.kaggle.counts_by_state().await.unwrap().queued, 1);
    }

    #[tokio::test]
    async fn scoring_fault_fails_the_competition_and_reconciles() {
        let h = harness_with(&[("aggressive", Ok(3.0)), ("balanced", Ok(4.0))], |inner| {
            Arc::new(ChampionReadFault {
                inner,
                armed: AtomicBool::new(true),
            }) as Arc<dyn SharedStore>
        });
        let id = h.admit(&["aggressive", "balanced"]).await;
        h.drain().await;

        let c = h.competition(id).await;
        assert_eq!(c.status, CompetitionStatus::Failed);
        assert!(c.failure.unwrap().contains("store unavailable"));
        assert!(c.champion_id.is_none());
        assert_eq!(h.kaggle.counts_by_state().await.unwrap().queued, 0);
        assert!(h.self_compete.dead_letters().await.is_empty());

        // estimate 2 × $0.25 replaced by actual 2 × $0.20
        let spend = h.guardrail.period_spend(&c.tenant_id, "2026-04").await.unwrap();
        assert_eq!(spend, Usd::from_dollars(0.40));
    }
}
