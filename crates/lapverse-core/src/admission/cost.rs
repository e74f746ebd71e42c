//! Cost estimation: what a submission is projected to cost before it runs.
//!
//! task        = base_cost(type) × complexity multiplier (1/2/4/8)
//! competition = per_variant_cost × |variants|

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::domain::{Complexity, TaskType, Usd};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CostConfig {
    /// Base cost for task types missing from `base_cost_usd`.
    pub default_base_cost_usd: f64,
    pub base_cost_usd: BTreeMap<String, f64>,
    pub per_variant_cost_usd: f64,
    /// Actual cost of one dependency call made by the content executor.
    pub dependency_call_cost_usd: f64,
    /// Fraction of tenant MRR that period spend may reach.
    pub margin_threshold: f64,
}

impl Default for CostConfig {
    fn default() -> Self {
        let base_cost_usd = BTreeMap::from([
            ("analysis".to_string(), 0.25),
            ("content_generation".to_string(), 0.50),
            ("model_training".to_string(), 2.00),
        ]);
        Self {
            default_base_cost_usd: 0.50,
            base_cost_usd,
            per_variant_cost_usd: 0.25,
            dependency_call_cost_usd: 0.05,
            margin_threshold: 0.70,
        }
    }
}

impl CostConfig {
    /// The threshold as basis points, so ledger comparisons stay in integers.
    pub fn margin_threshold_bps(&self) -> u32 {
        (self.margin_threshold * 10_000.0).round().clamp(0.0, 10_000.0) as u32
    }
}

#[derive(Debug, Clone)]
pub struct CostEstimator {
    default_base: Usd,
    base: BTreeMap<String, Usd>,
    per_variant: Usd,
}

impl CostEstimator {
    pub fn new(config: &CostConfig) -> Self {
        Self {
            default_base: Usd::from_dollars(config.default_base_cost_usd),
            base: config
                .base_cost_usd
                .iter()
                .map(|(k, v)| (k.clone(), Usd::from_dollars(*v)))
                .collect(),
            per_variant: Usd::from_dollars(config.per_variant_cost_usd),
        }
    }

    pub fn base_cost(&self, task_type: &TaskType) -> Usd {
        self.base
            .get(task_type.as_str())
            .copied()
            .unwrap_or(self.default_base)
    }

    pub fn estimate_task(&self, task_type: &TaskType, complexity: Complexity) -> Usd {
        self.base_cost(task_type).times(complexity.multiplier())
    }

    pub fn estimate_competition(&self, variant_count: usize) -> Usd {
        self.per_variant
            .times(u32::try_from(variant_count).unwrap_or(u32::MAX))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(Complexity::Simple, 0.50)]
    #[case(Complexity::Intermediate, 1.00)]
    #[case(Complexity::Advanced, 2.00)]
    #[case(Complexity::Expert, 4.00)]
    fn task_estimate_scales_with_complexity(#[case] complexity: Complexity, #[case] dollars: f64) {
        let estimator = CostEstimator::new(&CostConfig::default());
        let estimate = estimator.estimate_task(&TaskType::new("content_generation"), complexity);
        assert_eq!(estimate, Usd::from_dollars(dollars));
    }

    #[test]
    fn unknown_types_use_default_base() {
        let estimator = CostEstimator::new(&CostConfig::default());
        assert_eq!(
            estimator.base_cost(&TaskType::new("never-seen")),
            Usd::from_dollars(0.50)
        );
    }

    #[test]
    fn competition_estimate_is_per_variant() {
        let estimator = CostEstimator::new(&CostConfig::default());
        assert_eq!(estimator.estimate_competition(4), Usd::from_dollars(1.00));
    }

    #[test]
    fn threshold_in_basis_points() {
        assert_eq!(CostConfig::default().margin_threshold_bps(), 7_000);
    }
}
