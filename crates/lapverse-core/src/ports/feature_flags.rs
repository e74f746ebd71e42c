//! FeatureFlags port - テナント単位の機能ゲートとロールアウト率
//!
//! 実装は impls::HashRollout（テナント ID のハッシュでバケット分け）。

use async_trait::async_trait;

use crate::domain::TenantId;
use crate::error::CoreError;

#[async_trait]
pub trait FeatureFlags: Send + Sync {
    async fn is_enabled(&self, flag: &str, tenant: &TenantId) -> Result<bool, CoreError>;

    /// Current rollout in percent (0..=100).
    async fn rollout_percentage(&self, flag: &str) -> Result<u8, CoreError>;

    async fn set_rollout_percentage(&self, flag: &str, percentage: u8) -> Result<(), CoreError>;
}
