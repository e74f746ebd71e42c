//! Breaker-wrapped clients for the News-AI and Share-API dependencies.

use std::sync::Arc;

use crate::ports::{Clock, PostReceipt, Sentiment, SentimentService, SocialPoster};

use super::breaker::{CircuitBreaker, Guarded};

pub const NEWS_AI: &str = "news-ai";
pub const SHARE_API: &str = "share-api";

/// News-AI behind its breaker. Fallback: neutral sentiment, confidence 0.5.
#[derive(Clone)]
pub struct GuardedNewsAi {
    service: Arc<dyn SentimentService>,
    breaker: Arc<CircuitBreaker>,
}

impl GuardedNewsAi {
    pub fn new(service: Arc<dyn SentimentService>, breaker: Arc<CircuitBreaker>) -> Self {
        Self { service, breaker }
    }

    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    pub async fn analyze(&self, content: &str) -> Guarded<Sentiment> {
        self.breaker
            .call(|| self.service.analyze(content), Sentiment::neutral)
            .await
    }
}

/// Share-API behind its breaker. Fallback: a synthetic post id.
#[derive(Clone)]
pub struct GuardedShareApi {
    service: Arc<dyn SocialPoster>,
    breaker: Arc<CircuitBreaker>,
    clock: Arc<dyn Clock>,
}

impl GuardedShareApi {
    pub fn new(
        service: Arc<dyn SocialPoster>,
        breaker: Arc<CircuitBreaker>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            service,
            breaker,
            clock,
        }
    }

    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    pub async fn share(&self, platform: &str, content: &str) -> Guarded<PostReceipt> {
        let fallback = || PostReceipt {
            platform: platform.to_string(),
            post_id: format!("fallback-{platform}-{}", self.clock.now().timestamp_millis()),
        };
        self.breaker
            .call(|| self.service.share(platform, content), fallback)
            .await
    }
}
