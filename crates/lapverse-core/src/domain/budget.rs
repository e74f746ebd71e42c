use serde::{Deserialize, Serialize};

use super::money::Usd;
use super::tenant::TenantId;

/// Point-in-time view of a tenant's spend against its margin.
///
/// `period_spend` and `burn_rate` are owned by the ledger and the SLO tracker;
/// this struct is a read model assembled from both.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BudgetState {
    pub tenant_id: TenantId,
    /// Billing period (`YYYY-MM`) the spend belongs to.
    pub period: String,
    pub period_spend: Usd,
    pub tenant_mrr: Usd,
    pub margin_threshold: f64,
    pub burn_rate: f64,
}

impl BudgetState {
    pub fn period_spend_usd(&self) -> f64 {
        self.period_spend.as_dollars()
    }

    pub fn tenant_mrr_usd(&self) -> f64 {
        self.tenant_mrr.as_dollars()
    }
}
