//! Margin guardrail and per-tenant spend ledger.
//!
//! Spend lives under one counter key per tenant and billing period
//! (`budget:{tenant}:{YYYY-MM}:spend`), in micro-dollars, changed only with
//! `incr_by`. Reservation is optimistic: a read-only projection check, then an
//! atomic increment that is rolled back if it overshoots the limit.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::domain::{BudgetState, TenantId, Usd};
use crate::error::CoreError;
use crate::ports::{Clock, SharedStore, TenantDirectory};

/// `YYYY-MM` of the given instant.
pub fn billing_period(at: DateTime<Utc>) -> String {
    at.format("%Y-%m").to_string()
}

/// Funds held against a tenant's period spend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reservation {
    pub tenant_id: TenantId,
    pub period: String,
    pub amount: Usd,
}

pub struct MarginGuardrail {
    store: Arc<dyn SharedStore>,
    tenants: Arc<dyn TenantDirectory>,
    clock: Arc<dyn Clock>,
    threshold_bps: u32,
}

impl MarginGuardrail {
    pub fn new(
        store: Arc<dyn SharedStore>,
        tenants: Arc<dyn TenantDirectory>,
        clock: Arc<dyn Clock>,
        threshold_bps: u32,
    ) -> Self {
        Self {
            store,
            tenants,
            clock,
            threshold_bps,
        }
    }

    pub fn margin_threshold(&self) -> f64 {
        f64::from(self.threshold_bps) / 10_000.0
    }

    fn ledger_key(tenant: &TenantId, period: &str) -> String {
        format!("budget:{tenant}:{period}:spend")
    }

    pub async fn limit(&self, tenant: &TenantId) -> Result<Usd, CoreError> {
        let mrr = self.tenants.monthly_recurring_revenue(tenant).await?;
        Ok(mrr.apply_basis_points(self.threshold_bps))
    }

    pub async fn period_spend(&self, tenant: &TenantId, period: &str) -> Result<Usd, CoreError> {
        let spent = self
            .store
            .get(&Self::ledger_key(tenant, period))
            .await?
            .and_then(|v| v.as_i64())
            .unwrap_or(0);
        Ok(Usd::from_micros(spent))
    }

    /// Read-only projection: `spend + estimate > MRR × threshold` is rejected.
    /// Nothing is written.
    pub async fn check(&self, tenant: &TenantId, estimate: Usd) -> Result<(), CoreError> {
        let period = billing_period(self.clock.now());
        let limit = self.limit(tenant).await?;
        let projected = self.period_spend(tenant, &period).await? + estimate;
        if projected > limit {
            info!(%tenant, %projected, %limit, "admission rejected: margin exceeded");
            return Err(CoreError::BudgetExceeded {
                tenant: tenant.clone(),
                projected,
                limit,
            });
        }
        Ok(())
    }

    /// Atomically adds `estimate` to the ledger. If the increment lands above
    /// the limit (a concurrent caller got there first) it is undone.
    pub async fn reserve(&self, tenant: &TenantId, estimate: Usd) -> Result<Reservation, CoreError> {
        let period = billing_period(self.clock.now());
        let limit = self.limit(tenant).await?;
        let key = Self::ledger_key(tenant, &period);

        let after = Usd::from_micros(self.store.incr_by(&key, estimate.micros()).await?);
        if after > limit {
            self.store.incr_by(&key, -estimate.micros()).await?;
            info!(%tenant, projected = %after, %limit, "reservation rolled back: margin exceeded");
            return Err(CoreError::BudgetExceeded {
                tenant: tenant.clone(),
                projected: after,
                limit,
            });
        }
        debug!(%tenant, %period, amount = %estimate, spend = %after, "budget reserved");
        Ok(Reservation {
            tenant_id: tenant.clone(),
            period,
            amount: estimate,
        })
    }

    /// Adjusts the ledger of the period the work was admitted in by
    /// `actual - estimate`.
    pub async fn reconcile(
        &self,
        tenant: &TenantId,
        admitted_at: DateTime<Utc>,
        estimate: Usd,
        actual: Usd,
    ) -> Result<Usd, CoreError> {
        let delta = actual - estimate;
        if delta == Usd::ZERO {
            return Ok(delta);
        }
        let period = billing_period(admitted_at);
        self.store
            .incr_by(&Self::ledger_key(tenant, &period), delta.micros())
            .await?;
        debug!(%tenant, %period, %estimate, %actual, "budget reconciled");
        Ok(delta)
    }

    /// Gives the whole reservation back (work failed without cost).
    pub async fn release(
        &self,
        tenant: &TenantId,
        admitted_at: DateTime<Utc>,
        estimate: Usd,
    ) -> Result<(), CoreError> {
        self.reconcile(tenant, admitted_at, estimate, Usd::ZERO)
            .await
            .map(|_| ())
    }

    pub async fn budget_state(&self, tenant: &TenantId, burn_rate: f64) -> Result<BudgetState, CoreError> {
        let period = billing_period(self.clock.now());
        Ok(BudgetState {
            tenant_id: tenant.clone(),
            period_spend: self.period_spend(tenant, &period).await?,
            tenant_mrr: self.tenants.monthly_recurring_revenue(tenant).await?,
            period,
            margin_threshold: self.margin_threshold(),
            burn_rate,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::impls::{InMemoryStore, StaticTenantDirectory};
    use crate::ports::FixedClock;
    use chrono::TimeZone;

    fn guardrail() -> (MarginGuardrail, FixedClock) {
        let clock = FixedClock::new(Utc.with_ymd_and_hms(2026, 5, 20, 12, 0, 0).unwrap());
        let store = Arc::new(InMemoryStore::new(Arc::new(clock.clone())));
        let tenants = StaticTenantDirectory::new().with_tenant("acme", Usd::from_dollars(1_000.0));
        let g = MarginGuardrail::new(store, Arc::new(tenants), Arc::new(clock.clone()), 7_000);
        (g, clock)
    }

    #[tokio::test]
    async fn boundary_is_inclusive() {
        let (g, _) = guardrail();
        let acme = TenantId::new("acme");
        assert!(g.check(&acme, Usd::from_dollars(700.00)).await.is_ok());

        let err = g.check(&acme, Usd::from_dollars(700.01)).await.unwrap_err();
        assert!(matches!(err, CoreError::BudgetExceeded { .. }));
    }

    #[tokio::test]
    async fn overshooting_reservation_is_rolled_back() {
        let (g, _) = guardrail();
        let acme = TenantId::new("acme");
        g.reserve(&acme, Usd::from_dollars(600.0)).await.unwrap();

        let err = g.reserve(&acme, Usd::from_dollars(100.01)).await.unwrap_err();
        assert!(matches!(err, CoreError::BudgetExceeded { .. }));
        assert_eq!(
            g.period_spend(&acme, "2026-05").await.unwrap(),
            Usd::from_dollars(600.0)
        );
    }

    #[tokio::test]
    async fn concurrent_reservations_never_exceed_limit() {
        let (g, _) = guardrail();
        let g = Arc::new(g);
        let mut joins = Vec::new();
        for _ in 0..20 {
            let g = Arc::clone(&g);
            joins.push(tokio::spawn(async move {
                g.reserve(&TenantId::new("acme"), Usd::from_dollars(50.0)).await.is_ok()
            }));
        }
        let mut admitted = 0;
        for j in joins {
            if j.await.unwrap() {
                admitted += 1;
            }
        }
        assert_eq!(admitted, 14);
        assert_eq!(
            g.period_spend(&TenantId::new("acme"), "2026-05").await.unwrap(),
            Usd::from_dollars(700.0)
        );
    }

    #[tokio::test]
    async fn reconcile_adjusts_by_delta_in_admission_period() {
        let (g, clock) = guardrail();
        let acme = TenantId::new("acme");
        let admitted_at = clock.now();
        g.reserve(&acme, Usd::from_dollars(10.0)).await.unwrap();

        clock.advance(chrono::Duration::days(30));
        g.reconcile(&acme, admitted_at, Usd::from_dollars(10.0), Usd::from_dollars(7.5))
            .await
            .unwrap();

        assert_eq!(g.period_spend(&acme, "2026-05").await.unwrap(), Usd::from_dollars(7.5));
        assert_eq!(g.period_spend(&acme, "2026-06").await.unwrap(), Usd::ZERO);
    }

    #[tokio::test]
    async fn unknown_tenant_has_no_headroom() {
        let (g, _) = guardrail();
        let err = g
            .check(&TenantId::new("ghost"), Usd::from_micros(1))
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::BudgetExceeded { .. }));
    }

    #[tokio::test]
    async fn budget_state_reports_current_period() {
        let (g, _) = guardrail();
        let acme = TenantId::new("acme");
        g.reserve(&acme, Usd::from_dollars(12.5)).await.unwrap();
        let state = g.budget_state(&acme, 0.3).await.unwrap();
        assert_eq!(state.period, "2026-05");
        assert_eq!(state.period_spend_usd(), 12.5);
        assert_eq!(state.tenant_mrr_usd(), 1_000.0);
        assert_eq!(state.margin_threshold, 0.7);
    }
}
