//! Admission pipeline: idempotency, cost projection, margin guardrail, SLO check.
//!
//! Nothing here has side effects until every check has passed; the only write
//! on the happy path is the budget reservation itself.

pub mod cost;
pub mod guardrail;
pub mod idempotency;
pub mod slo;

pub use cost::{CostConfig, CostEstimator};
pub use guardrail::{MarginGuardrail, Reservation, billing_period};
pub use idempotency::{GateResponse, IdempotencyConfig, IdempotencyGate, IdempotencyRecord};
pub use slo::{CallWindow, SloConfig, SloTracker};

use std::sync::Arc;

use tracing::debug;

use crate::domain::{TenantId, Usd};
use crate::error::CoreError;

/// Guardrail + SLO checks in admission order.
pub struct AdmissionControl {
    pub estimator: CostEstimator,
    pub guardrail: Arc<MarginGuardrail>,
    pub slo: Arc<SloTracker>,
}

impl AdmissionControl {
    pub fn new(estimator: CostEstimator, guardrail: Arc<MarginGuardrail>, slo: Arc<SloTracker>) -> Self {
        Self {
            estimator,
            guardrail,
            slo,
        }
    }

    /// Margin check, SLO check, then the atomic reservation.
    pub async fn admit(&self, tenant: &TenantId, estimate: Usd) -> Result<Reservation, CoreError> {
        self.guardrail.check(tenant, estimate).await?;
        self.slo.check()?;
        let reservation = self.guardrail.reserve(tenant, estimate).await?;
        debug!(%tenant, %estimate, "admitted");
        Ok(reservation)
    }
}
