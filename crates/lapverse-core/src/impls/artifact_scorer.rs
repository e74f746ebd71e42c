//! ArtifactScoreScorer - executor が出力した `score` をそのまま使うスコアラー

use async_trait::async_trait;

use crate::domain::{Competition, Variant};
use crate::error::CoreError;
use crate::ports::VariantScorer;

#[derive(Debug, Clone, Copy, Default)]
pub struct ArtifactScoreScorer;

#[async_trait]
impl VariantScorer for ArtifactScoreScorer {
    async fn score(&self, _competition: &Competition, variant: &Variant) -> Result<f64, CoreError> {
        variant
            .output_artifact
            .as_ref()
            .and_then(|a| a.get("score"))
            .and_then(serde_json::Value::as_f64)
            .filter(|s| s.is_finite())
            .ok_or_else(|| {
                CoreError::Validation(format!("variant {} has no numeric score", variant.name))
            })
    }
}
