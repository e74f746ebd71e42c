//! External dependency ports wrapped by circuit breakers.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum DependencyError {
    #[error("request failed: {0}")]
    Failed(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SentimentLabel {
    Positive,
    Neutral,
    Negative,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sentiment {
    pub label: SentimentLabel,
    pub confidence: f64,
}

impl Sentiment {
    /// News-AI fallback value.
    pub fn neutral() -> Self {
        Self {
            label: SentimentLabel::Neutral,
            confidence: 0.5,
        }
    }
}

/// News-AI: sentiment / content analysis.
#[async_trait]
pub trait SentimentService: Send + Sync {
    async fn analyze(&self, content: &str) -> Result<Sentiment, DependencyError>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PostReceipt {
    pub platform: String,
    pub post_id: String,
}

/// Share-API: social posting.
#[async_trait]
pub trait SocialPoster: Send + Sync {
    async fn share(&self, platform: &str, content: &str) -> Result<PostReceipt, DependencyError>;
}
