//! ContentVariantExecutor - 1 バリアント分のコンテンツ実行
//!
//! News-AI でセンチメントを取り、各プラットフォームへ Share-API で投稿し、
//! 戦略パラメータで重み付けしたスコアを artifact に書きます。
//! どちらかの依存がフォールバックを返したら degraded とし、
//! 劣化した呼び出しは SLO のエラーバジェットを消費します。

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;

use crate::admission::SloTracker;
use crate::domain::{Competition, Usd, Variant};
use crate::error::CoreError;
use crate::ports::{SentimentLabel, VariantExecution, VariantExecutor};
use crate::resilience::{GuardedNewsAi, GuardedShareApi, NEWS_AI, SHARE_API};

pub struct ContentVariantExecutor {
    news: GuardedNewsAi,
    share: GuardedShareApi,
    slo: Arc<SloTracker>,
    cost_per_call: Usd,
}

impl ContentVariantExecutor {
    pub fn new(news: GuardedNewsAi, share: GuardedShareApi, slo: Arc<SloTracker>, cost_per_call: Usd) -> Self {
        Self {
            news,
            share,
            slo,
            cost_per_call,
        }
    }
}

fn weight(params: &serde_json::Value, name: &str) -> f64 {
    params.get(name).and_then(serde_json::Value::as_f64).unwrap_or(1.0)
}

#[async_trait]
impl VariantExecutor for ContentVariantExecutor {
    async fn execute(
        &self,
        competition: &Competition,
        variant: &Variant,
    ) -> Result<VariantExecution, CoreError> {
        let sentiment = self.news.analyze(&competition.content).await;
        if sentiment.degraded {
            self.slo.record_api_call(NEWS_AI, 1);
        }

        let mut posts = Vec::with_capacity(competition.platforms.len());
        let mut live_posts = 0u32;
        let mut degraded = sentiment.degraded;
        for platform in &competition.platforms {
            let receipt = self.share.share(platform, &competition.content).await;
            if receipt.degraded {
                degraded = true;
                self.slo.record_api_call(SHARE_API, 1);
            } else {
                live_posts += 1;
            }
            posts.push(receipt.value);
        }

        let tone = weight(&variant.strategy_params, "tone_weight");
        let reach = weight(&variant.strategy_params, "reach_weight");
        let polarity = match sentiment.value.label {
            SentimentLabel::Positive => 1.0,
            SentimentLabel::Neutral => 0.6,
            SentimentLabel::Negative => 0.3,
        };
        let score = 100.0 * tone * polarity * sentiment.value.confidence
            + 10.0 * reach * f64::from(live_posts);

        let calls = 1 + u32::try_from(competition.platforms.len()).unwrap_or(u32::MAX);
        Ok(VariantExecution {
            output_artifact: json!({
                "score": score,
                "sentiment": sentiment.value,
                "posts": posts,
                "strategy": variant.strategy_params,
            }),
            cost: self.cost_per_call.times(calls),
            degraded,
        })
    }
}
