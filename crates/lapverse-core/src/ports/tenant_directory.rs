//! TenantDirectory port - テナント MRR の取得元（外部のコストデータソース）

use async_trait::async_trait;

use crate::domain::{TenantId, Usd};
use crate::error::CoreError;

#[async_trait]
pub trait TenantDirectory: Send + Sync {
    /// Monthly recurring revenue committed by the tenant.
    /// Unknown tenants have no committed revenue and report `Usd::ZERO`.
    async fn monthly_recurring_revenue(&self, tenant: &TenantId) -> Result<Usd, CoreError>;
}
