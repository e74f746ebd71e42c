//! PromotionPipeline port - 外部 ML プロモーションパイプライン

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Payload of the promotion job enqueued to the kaggle queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromotionRequest {
    pub champion_id: String,
    pub metadata: serde_json::Value,
}

#[async_trait]
pub trait PromotionPipeline: Send + Sync {
    async fn promote(&self, request: &PromotionRequest) -> Result<(), CoreError>;
}
