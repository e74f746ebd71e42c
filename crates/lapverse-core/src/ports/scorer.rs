//! VariantScorer port - ドメイン固有のスコアリング関数
//!
//! スコアは同じ Competition 内でのみ比較可能です。

use async_trait::async_trait;

use crate::domain::{Competition, Variant};
use crate::error::CoreError;

#[async_trait]
pub trait VariantScorer: Send + Sync {
    /// Called only for completed variants; failed variants score 0.
    async fn score(&self, competition: &Competition, variant: &Variant) -> Result<f64, CoreError>;
}
