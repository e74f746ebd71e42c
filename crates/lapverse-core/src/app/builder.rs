//! CoreBuilder - コラボレーターの注入とワイヤリング
//!
//! # Fail-fast 設計
//! - 設定は build() の最初に validate() する
//! - 省略できないコラボレーター（TaskExecutor, PromotionPipeline, バリアント実行系）が
//!   欠けていれば BuildError::MissingCollaborator を返す
//! - 省略可能なものは単一プロセス用の既定実装で埋める
//!   （SystemClock, InMemoryStore, UlidGenerator, HashRollout, 設定の MRR テーブル,
//!   ArtifactScoreScorer, CallWindow による burn rate）

use std::sync::Arc;

use crate::admission::{
    AdmissionControl, CallWindow, CostEstimator, IdempotencyGate, MarginGuardrail, SloTracker,
};
use crate::config::{ConfigError, CoreConfig};
use crate::domain::Usd;
use crate::error::CoreError;
use crate::finops::FinOpsTagger;
use crate::impls::{
    ArtifactScoreScorer, ContentVariantExecutor, HashRollout, InMemoryStore, StaticTenantDirectory,
};
use crate::metrics::Metrics;
use crate::ports::{
    BurnRateLoader, Clock, FeatureFlags, IdGenerator, PromotionPipeline, SentimentService,
    SharedStore, SocialPoster, SystemClock, TaskExecutor, TenantDirectory, UlidGenerator,
    VariantExecutor, VariantScorer,
};
use crate::queue::{InMemoryQueue, JobKind, Queue, QueueName, kinds};
use crate::repository::RecordStore;
use crate::resilience::{CircuitBreaker, GuardedNewsAi, GuardedShareApi, NEWS_AI, SHARE_API};
use crate::runtime::{HandlerRegistry, Runtime};
use crate::tournament::{PromotionJobHandler, TournamentEngine, VariantJobHandler};

use super::{LapVerseCore, Queues, TaskJobHandler};

#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("missing collaborator: {0}")]
    MissingCollaborator(&'static str),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("handler registration failed: {0}")]
    Registry(#[from] CoreError),
}

/// Builds a [`LapVerseCore`].
///
/// # 使用例
/// ```ignore
/// let core = CoreBuilder::new(config)
///     .task_executor(Arc::new(MyExecutor))
///     .sentiment_service(Arc::new(NewsAiClient::new(..)))
///     .social_poster(Arc::new(ShareApiClient::new(..)))
///     .promotion_pipeline(Arc::new(KagglePipeline::new(..)))
///     .build()?;
/// ```
#[derive(Default)]
pub struct CoreBuilder {
    config: CoreConfig,
    clock: Option<Arc<dyn Clock>>,
    store: Option<Arc<dyn SharedStore>>,
    ids: Option<Arc<dyn IdGenerator>>,
    tenants: Option<Arc<dyn TenantDirectory>>,
    flags: Option<Arc<dyn FeatureFlags>>,
    burn_rate: Option<Arc<dyn BurnRateLoader>>,
    task_executor: Option<Arc<dyn TaskExecutor>>,
    variant_executor: Option<Arc<dyn VariantExecutor>>,
    sentiment: Option<Arc<dyn SentimentService>>,
    poster: Option<Arc<dyn SocialPoster>>,
    scorer: Option<Arc<dyn VariantScorer>>,
    promotion: Option<Arc<dyn PromotionPipeline>>,
}

impl CoreBuilder {
    pub fn new(config: CoreConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn store(mut self, store: Arc<dyn SharedStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn id_generator(mut self, ids: Arc<dyn IdGenerator>) -> Self {
        self.ids = Some(ids);
        self
    }

    /// Overrides the MRR table from `config.tenants`.
    pub fn tenants(mut self, tenants: Arc<dyn TenantDirectory>) -> Self {
        self.tenants = Some(tenants);
        self
    }

    pub fn feature_flags(mut self, flags: Arc<dyn FeatureFlags>) -> Self {
        self.flags = Some(flags);
        self
    }

    /// Metrics-backed burn-rate source. Without one the burn rate comes from
    /// the in-process window of degraded dependency calls.
    pub fn burn_rate_loader(mut self, loader: Arc<dyn BurnRateLoader>) -> Self {
        self.burn_rate = Some(loader);
        self
    }

    pub fn task_executor(mut self, executor: Arc<dyn TaskExecutor>) -> Self {
        self.task_executor = Some(executor);
        self
    }

    /// Replaces the breaker-guarded content executor entirely.
    pub fn variant_executor(mut self, executor: Arc<dyn VariantExecutor>) -> Self {
        self.variant_executor = Some(executor);
        self
    }

    pub fn sentiment_service(mut self, service: Arc<dyn SentimentService>) -> Self {
        self.sentiment = Some(service);
        self
    }

    pub fn social_poster(mut self, poster: Arc<dyn SocialPoster>) -> Self {
        self.poster = Some(poster);
        self
    }

    pub fn scorer(mut self, scorer: Arc<dyn VariantScorer>) -> Self {
        self.scorer = Some(scorer);
        self
    }

    pub fn promotion_pipeline(mut self, pipeline: Arc<dyn PromotionPipeline>) -> Self {
        self.promotion = Some(pipeline);
        self
    }

    pub fn build(self) -> Result<LapVerseCore, BuildError> {
        self.config.validate()?;
        let config = self.config;

        let task_executor = self
            .task_executor
            .ok_or(BuildError::MissingCollaborator("task executor"))?;
        let promotion = self
            .promotion
            .ok_or(BuildError::MissingCollaborator("promotion pipeline"))?;

        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let store = self
            .store
            .unwrap_or_else(|| Arc::new(InMemoryStore::new(Arc::clone(&clock))));
        let ids = self
            .ids
            .unwrap_or_else(|| Arc::new(UlidGenerator::new(Arc::clone(&clock))));
        let tenants = self.tenants.unwrap_or_else(|| {
            Arc::new(StaticTenantDirectory::from_dollars(
                config.tenants.iter().map(|(t, mrr)| (t.clone(), *mrr)),
            ))
        });
        let flags = self.flags.unwrap_or_else(|| {
            Arc::new(
                HashRollout::new(Arc::clone(&store)).with_default(config.tournament.feature_flag.clone(), 100),
            )
        });

        let calls = Arc::new(CallWindow::new(Arc::clone(&clock), &config.slo));
        let slo = Arc::new(match self.burn_rate {
            Some(loader) => SloTracker::new(loader, calls),
            None => SloTracker::in_process(calls),
        });
        let guardrail = Arc::new(MarginGuardrail::new(
            Arc::clone(&store),
            tenants,
            Arc::clone(&clock),
            config.cost.margin_threshold_bps(),
        ));
        let admission = AdmissionControl::new(
            CostEstimator::new(&config.cost),
            Arc::clone(&guardrail),
            Arc::clone(&slo),
        );

        let mut breakers = Vec::new();
        let variant_executor: Arc<dyn VariantExecutor> = match (self.variant_executor, self.sentiment, self.poster) {
            (Some(executor), _, _) => executor,
            (None, Some(sentiment), Some(poster)) => {
                let news_breaker = Arc::new(CircuitBreaker::new(
                    NEWS_AI,
                    config.breakers.news_ai.clone(),
                    Arc::clone(&clock),
                ));
                let share_breaker = Arc::new(CircuitBreaker::new(
                    SHARE_API,
                    config.breakers.share_api.clone(),
                    Arc::clone(&clock),
                ));
                breakers.push(Arc::clone(&news_breaker));
                breakers.push(Arc::clone(&share_breaker));
                Arc::new(ContentVariantExecutor::new(
                    GuardedNewsAi::new(sentiment, news_breaker),
                    GuardedShareApi::new(poster, share_breaker, Arc::clone(&clock)),
                    Arc::clone(&slo),
                    Usd::from_dollars(config.cost.dependency_call_cost_usd),
                ))
            }
            (None, None, _) => return Err(BuildError::MissingCollaborator("sentiment service")),
            (None, Some(_), None) => return Err(BuildError::MissingCollaborator("social poster")),
        };
        let scorer = self.scorer.unwrap_or_else(|| Arc::new(ArtifactScoreScorer));

        let queue = |name: QueueName| -> Arc<dyn Queue> {
            Arc::new(InMemoryQueue::new(
                name,
                config.queues.retry.clone(),
                config.queues.retention,
                Arc::clone(&ids),
            ))
        };
        let queues = Queues {
            tasks: queue(QueueName::Tasks),
            self_compete: queue(QueueName::SelfCompete),
            kaggle: queue(QueueName::Kaggle),
        };

        let metrics = Arc::new(Metrics::new());
        let tasks = RecordStore::new(Arc::clone(&store));
        let competitions = RecordStore::new(Arc::clone(&store));
        let engine = Arc::new(TournamentEngine::new(
            competitions.clone(),
            variant_executor,
            scorer,
            Arc::clone(&flags),
            Arc::clone(&slo),
            Arc::clone(&guardrail),
            Arc::clone(&store),
            Arc::clone(&queues.self_compete),
            Arc::clone(&queues.kaggle),
            Arc::clone(&clock),
            Arc::clone(&metrics),
            config.tournament.clone(),
        ));

        let mut registry = HandlerRegistry::new();
        registry.register(
            JobKind::new(kinds::TASK_EXECUTE),
            Arc::new(TaskJobHandler::new(
                tasks.clone(),
                task_executor,
                Arc::clone(&guardrail),
                Arc::clone(&clock),
                Arc::clone(&metrics),
            )),
        )?;
        registry.register(
            JobKind::new(kinds::COMPETITION_VARIANT),
            Arc::new(VariantJobHandler::new(Arc::clone(&engine))),
        )?;
        registry.register(
            JobKind::new(kinds::CHAMPION_PROMOTE),
            Arc::new(PromotionJobHandler::new(promotion, competitions.clone())),
        )?;

        Ok(LapVerseCore {
            gate: IdempotencyGate::new(Arc::clone(&store), Arc::clone(&clock), config.idempotency.clone()),
            tagger: FinOpsTagger::new(config.finops.clone()),
            admission,
            flags,
            tasks,
            competitions,
            engine,
            queues,
            runtime: Arc::new(Runtime::new(Arc::new(registry))),
            breakers,
            ids,
            clock,
            metrics,
            config,
        })
    }
}
