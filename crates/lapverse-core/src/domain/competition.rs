//! Competition and Variant records for the self-compete tournament.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::CompetitionId;
use super::money::Usd;
use super::state::{CompetitionStatus, Lifecycle};
use super::tenant::{CostCenter, IdempotencyKey, Priority, TenantId};
use crate::error::CoreError;
use crate::finops::FinOpsTags;

/// Where a single variant execution ended up.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum VariantOutcome {
    Pending,
    Succeeded,
    Failed { reason: String },
}

/// One competing strategy inside a competition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Variant {
    pub name: String,
    pub strategy_params: serde_json::Value,
    pub score: Option<f64>,
    pub cost: Usd,
    pub output_artifact: Option<serde_json::Value>,
    /// Set when any dependency answered with its fallback value.
    pub degraded: bool,
    pub outcome: VariantOutcome,
}

impl Variant {
    pub fn new(name: impl Into<String>, strategy_params: serde_json::Value) -> Self {
        Self {
            name: name.into(),
            strategy_params,
            score: None,
            cost: Usd::ZERO,
            output_artifact: None,
            degraded: false,
            outcome: VariantOutcome::Pending,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self.outcome, VariantOutcome::Pending)
    }

    /// Degraded outputs still count: the variant produced an artifact.
    pub fn completed(&self) -> bool {
        matches!(self.outcome, VariantOutcome::Succeeded)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Competition {
    pub id: CompetitionId,
    pub tenant_id: TenantId,
    pub content: String,
    pub platforms: Vec<String>,
    pub priority: Priority,
    pub variants: Vec<Variant>,
    pub champion_id: Option<String>,
    pub cost_center: CostCenter,
    pub idempotency_key: IdempotencyKey,
    pub status: CompetitionStatus,
    pub cost_estimate: Usd,
    pub previous_champion_score: Option<f64>,
    pub win_rate_delta: Option<f64>,
    pub failure: Option<String>,
    pub tags: FinOpsTags,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Competition {
    pub fn advance(&mut self, next: CompetitionStatus, now: DateTime<Utc>) -> Result<(), CoreError> {
        self.status = self.status.advance_to(next)?;
        self.updated_at = now;
        Ok(())
    }

    pub fn variant_mut(&mut self, name: &str) -> Option<&mut Variant> {
        self.variants.iter_mut().find(|v| v.name == name)
    }

    /// Completion barrier: every variant reached a terminal outcome.
    pub fn all_variants_terminal(&self) -> bool {
        self.variants.iter().all(Variant::is_terminal)
    }

    pub fn completed_variants(&self) -> usize {
        self.variants.iter().filter(|v| v.completed()).count()
    }

    pub fn total_cost(&self) -> Usd {
        self.variants.iter().map(|v| v.cost).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn barrier_waits_for_pending_variants() {
        let mut variants = vec![
            Variant::new("aggressive", serde_json::json!({})),
            Variant::new("balanced", serde_json::json!({})),
        ];
        variants[0].outcome = VariantOutcome::Succeeded;
        assert!(!variants.iter().all(Variant::is_terminal));

        variants[1].outcome = VariantOutcome::Failed {
            reason: "boom".into(),
        };
        assert!(variants.iter().all(Variant::is_terminal));
        assert_eq!(variants.iter().filter(|v| v.completed()).count(), 1);
    }

    #[test]
    fn outcome_is_tagged_json() {
        let json = serde_json::to_value(VariantOutcome::Failed {
            reason: "timeout".into(),
        })
        .unwrap();
        assert_eq!(json["state"], "failed");
        assert_eq!(json["reason"], "timeout");
    }
}
