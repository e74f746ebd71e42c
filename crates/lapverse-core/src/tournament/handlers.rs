//! Job handlers for the `self-compete` and `kaggle` queues.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};

use super::TournamentEngine;
use crate::domain::{Competition, CompetitionId, CompetitionStatus};
use crate::error::CoreError;
use crate::ports::{PromotionPipeline, PromotionRequest};
use crate::queue::JobContext;
use crate::repository::RecordStore;
use crate::runtime::JobHandler;

/// `competition.variant`
pub struct VariantJobHandler {
    engine: Arc<TournamentEngine>,
}

impl VariantJobHandler {
    pub fn new(engine: Arc<TournamentEngine>) -> Self {
        Self { engine }
    }
}

#[async_trait]
impl JobHandler for VariantJobHandler {
    async fn handle(&self, job: &JobContext) -> Result<(), CoreError> {
        self.engine.run_variant(job).await
    }
}

/// `champion.promote`: forwards `{championId, metadata}` to the pipeline.
///
/// The job is enqueued before the competition commits its verdict, so it is
/// forwarded only once the competition reads Promoted. While it is still
/// Scoring the job is retried; any other outcome drops it.
pub struct PromotionJobHandler {
    pipeline: Arc<dyn PromotionPipeline>,
    competitions: RecordStore<Competition>,
}

impl PromotionJobHandler {
    pub fn new(pipeline: Arc<dyn PromotionPipeline>, competitions: RecordStore<Competition>) -> Self {
        Self {
            pipeline,
            competitions,
        }
    }
}

#[async_trait]
impl JobHandler for PromotionJobHandler {
    async fn handle(&self, job: &JobContext) -> Result<(), CoreError> {
        let request: PromotionRequest = serde_json::from_value(job.payload.clone())?;
        let competition_id: CompetitionId =
            serde_json::from_value(request.metadata["competitionId"].clone())?;
        let competition = self
            .competitions
            .get(&competition_id)
            .await?
            .ok_or_else(|| CoreError::NotFound(format!("competition {competition_id}")))?;

        match competition.status {
            CompetitionStatus::Promoted => {}
            CompetitionStatus::Scoring => {
                return Err(CoreError::Transient(format!(
                    "competition {competition_id} has not committed its verdict"
                )));
            }
            other => {
                warn!(
                    job_id = %job.job_id,
                    %competition_id,
                    status = other.as_str(),
                    "promotion dropped"
                );
                return Ok(());
            }
        }

        self.pipeline.promote(&request).await?;
        info!(job_id = %job.job_id, champion = %request.champion_id, "champion promoted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use chrono::{TimeZone, Utc};
    use serde_json::json;
    use ulid::Ulid;

    use super::*;
    use crate::domain::{CostCenter, IdempotencyKey, Priority, TenantId, Usd, Variant};
    use crate::finops::FinOpsTagger;
    use crate::impls::InMemoryStore;
    use crate::ports::{Clock, FixedClock};
    use crate::queue::{JobKind, QueueName, kinds};

    #[derive(Default)]
    struct Recorder(Mutex<Vec<String>>);

    #[async_trait]
    impl PromotionPipeline for Recorder {
        async fn promote(&self, request: &PromotionRequest) -> Result<(), CoreError> {
            self.0.lock().unwrap().push(request.champion_id.clone());
            Ok(())
        }
    }

    fn competition(status: CompetitionStatus, clock: &FixedClock) -> Competition {
        let tenant = TenantId::new("acme");
        let cc = CostCenter::new("growth");
        Competition {
            id: CompetitionId::from_ulid(Ulid::new()),
            tags: FinOpsTagger::default().tag(&tenant, &cc),
            tenant_id: tenant,
            content: "launch".into(),
            platforms: vec!["x".into()],
            priority: Priority::Normal,
            variants: vec![Variant::new("aggressive", json!({})), Variant::new("balanced", json!({}))],
            champion_id: Some("aggressive".into()),
            cost_center: cc,
            idempotency_key: IdempotencyKey::new("k"),
            status,
            cost_estimate: Usd::from_dollars(0.50),
            previous_champion_score: None,
            win_rate_delta: None,
            failure: None,
            created_at: clock.now(),
            updated_at: clock.now(),
        }
    }

    fn promotion_job(competition: &Competition) -> JobContext {
        let request = PromotionRequest {
            champion_id: "aggressive".into(),
            metadata: json!({ "competitionId": competition.id }),
        };
        JobContext {
            job_id: Ulid::new().into(),
            queue: QueueName::Kaggle,
            kind: JobKind::new(kinds::CHAMPION_PROMOTE),
            payload: serde_json::to_value(request).unwrap(),
            attempt: 1,
            max_attempts: 4,
            tags: competition.tags.clone(),
        }
    }

    async fn handler_with(status: CompetitionStatus) -> (PromotionJobHandler, Arc<Recorder>, JobContext) {
        let clock = FixedClock::new(Utc.with_ymd_and_hms(2026, 4, 1, 9, 0, 0).unwrap());
        let competitions = RecordStore::new(Arc::new(InMemoryStore::new(Arc::new(clock.clone()))));
        let c = competition(status, &clock);
        competitions.insert(&c).await.unwrap();
        let recorder = Arc::new(Recorder::default());
        let handler = PromotionJobHandler::new(recorder.clone(), competitions);
        (handler, recorder, promotion_job(&c))
    }

    #[tokio::test]
    async fn promoted_competition_is_forwarded() {
        let (handler, recorder, job) = handler_with(CompetitionStatus::Promoted).await;
        handler.handle(&job).await.unwrap();
        assert_eq!(*recorder.0.lock().unwrap(), vec!["aggressive".to_string()]);
    }

    #[tokio::test]
    async fn uncommitted_verdict_is_retried() {
        let (handler, recorder, job) = handler_with(CompetitionStatus::Scoring).await;
        let err = handler.handle(&job).await.unwrap_err();
        assert!(err.is_retryable());
        assert!(recorder.0.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn failed_competition_is_not_promoted() {
        let (handler, recorder, job) = handler_with(CompetitionStatus::Failed).await;
        handler.handle(&job).await.unwrap();
        assert!(recorder.0.lock().unwrap().is_empty());
    }
}
