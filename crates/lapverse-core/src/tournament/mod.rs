//! Self-compete tournament: variant fan-out, completion barrier, scoring,
//! champion selection and evolution.

mod engine;
mod handlers;
pub mod selection;

pub use engine::{TournamentEngine, VariantJob};
pub use handlers::{PromotionJobHandler, VariantJobHandler};

use serde::{Deserialize, Serialize};
use serde_json::json;

/// A named strategy a competition runs when the submission lists no competitors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariantPreset {
    pub name: String,
    #[serde(default)]
    pub strategy_params: serde_json::Value,
}

impl VariantPreset {
    fn new(name: &str, strategy_params: serde_json::Value) -> Self {
        Self {
            name: name.to_string(),
            strategy_params,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TournamentConfig {
    /// Tenants without this flag get `FeatureDisabled` for competitions.
    pub feature_flag: String,
    /// Rollout raised when a champion evolves.
    pub rollout_flag: String,
    pub rollout_step: u8,
    /// Minimum win-rate improvement (fraction) for evolution.
    pub evolution_threshold: f64,
    pub min_completed_variants: usize,
    pub variants: Vec<VariantPreset>,
}

impl Default for TournamentConfig {
    fn default() -> Self {
        Self {
            feature_flag: "self_compete".to_string(),
            rollout_flag: "champion_rollout".to_string(),
            rollout_step: 10,
            evolution_threshold: 0.05,
            min_completed_variants: 2,
            variants: vec![
                VariantPreset::new("aggressive", json!({ "tone_weight": 1.4, "reach_weight": 1.2 })),
                VariantPreset::new("conservative", json!({ "tone_weight": 0.8, "reach_weight": 0.6 })),
                VariantPreset::new("balanced", json!({ "tone_weight": 1.0, "reach_weight": 1.0 })),
                VariantPreset::new("experimental", json!({ "tone_weight": 1.6, "reach_weight": 0.4 })),
            ],
        }
    }
}

impl TournamentConfig {
    pub fn preset(&self, name: &str) -> Option<&VariantPreset> {
        self.variants.iter().find(|p| p.name == name)
    }
}
