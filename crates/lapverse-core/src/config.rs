//! Core configuration.
//!
//! Every section is `#[serde(default)]`, so a partial JSON file only needs the
//! values it overrides. Defaults carry the documented operating constants.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::admission::{CostConfig, IdempotencyConfig, SloConfig};
use crate::finops::FinOpsConfig;
use crate::queue::{QueueName, RetentionPolicy, RetryPolicy};
use crate::resilience::BreakerConfig;
use crate::tournament::TournamentConfig;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("reading config {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("parsing config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BreakersConfig {
    pub news_ai: BreakerConfig,
    pub share_api: BreakerConfig,
}

impl Default for BreakersConfig {
    fn default() -> Self {
        Self {
            news_ai: BreakerConfig::news_ai(),
            share_api: BreakerConfig::share_api(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueuesConfig {
    /// Workers per queue.
    pub concurrency: BTreeMap<String, usize>,
    pub default_concurrency: usize,
    pub retry: RetryPolicy,
    pub retention: RetentionPolicy,
}

impl Default for QueuesConfig {
    fn default() -> Self {
        Self {
            concurrency: BTreeMap::new(),
            default_concurrency: 10,
            retry: RetryPolicy::default(),
            retention: RetentionPolicy::default(),
        }
    }
}

impl QueuesConfig {
    pub fn concurrency_for(&self, queue: QueueName) -> usize {
        self.concurrency
            .get(queue.as_str())
            .copied()
            .unwrap_or(self.default_concurrency)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    pub finops: FinOpsConfig,
    pub cost: CostConfig,
    pub idempotency: IdempotencyConfig,
    pub slo: SloConfig,
    pub breakers: BreakersConfig,
    pub queues: QueuesConfig,
    pub tournament: TournamentConfig,
    /// Tenant MRR in USD, for the static tenant directory.
    pub tenants: BTreeMap<String, f64>,
}

impl CoreConfig {
    pub fn from_json_str(s: &str) -> Result<Self, ConfigError> {
        let config: CoreConfig = serde_json::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json_str(&raw)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: String| Err(ConfigError::Invalid(msg));

        let m = self.cost.margin_threshold;
        if !(m > 0.0 && m <= 1.0) {
            return invalid(format!("cost.margin_threshold must be in (0, 1], got {m}"));
        }
        if self.cost.per_variant_cost_usd < 0.0
            || self.cost.default_base_cost_usd < 0.0
            || self.cost.dependency_call_cost_usd < 0.0
        {
            return invalid("cost values must not be negative".into());
        }
        if self.idempotency.ttl_secs == 0 {
            return invalid("idempotency.ttl_secs must be positive".into());
        }
        if self.slo.allotted_calls_per_window == 0 || self.slo.window_secs == 0 {
            return invalid("slo window and allotment must be positive".into());
        }
        for (name, b) in [("news_ai", &self.breakers.news_ai), ("share_api", &self.breakers.share_api)] {
            if b.failure_threshold == 0 || b.call_timeout_ms == 0 {
                return invalid(format!("breakers.{name} threshold and call timeout must be positive"));
            }
        }
        for queue in QueueName::ALL {
            if self.queues.concurrency_for(queue) == 0 {
                return invalid(format!("queue {queue} needs at least one worker"));
            }
        }
        for name in self.queues.concurrency.keys() {
            if !QueueName::ALL.iter().any(|q| q.as_str() == name) {
                return invalid(format!("unknown queue {name}"));
            }
        }
        let t = &self.tournament;
        if t.min_completed_variants < 2 {
            return invalid("tournament.min_completed_variants must be at least 2".into());
        }
        if t.variants.len() < t.min_completed_variants {
            return invalid(format!(
                "tournament needs at least {} default variants, got {}",
                t.min_completed_variants,
                t.variants.len()
            ));
        }
        if t.evolution_threshold < 0.0 {
            return invalid("tournament.evolution_threshold must not be negative".into());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_carry_operating_constants() {
        let c = CoreConfig::default();
        c.validate().unwrap();
        assert_eq!(c.cost.margin_threshold, 0.70);
        assert_eq!(c.idempotency.ttl_secs, 86_400);
        assert_eq!(c.queues.concurrency_for(QueueName::Kaggle), 10);
        assert_eq!(c.queues.retry.max_attempts(), 4);
        assert_eq!(c.queues.retention.keep_completed, 100);
        assert_eq!(c.queues.retention.keep_failed, 50);
        assert_eq!(c.breakers.news_ai.failure_threshold, 50);
        assert_eq!(c.breakers.share_api.call_timeout_ms, 2_000);
        assert_eq!(c.tournament.evolution_threshold, 0.05);
    }

    #[test]
    fn partial_json_overrides_only_given_values() {
        let c = CoreConfig::from_json_str(
            r#"{
                "cost": { "margin_threshold": 0.5 },
                "queues": { "concurrency": { "self-compete": 4 } },
                "tenants": { "acme": 1000.0 }
            }"#,
        )
        .unwrap();
        assert_eq!(c.cost.margin_threshold, 0.5);
        assert_eq!(c.cost.per_variant_cost_usd, 0.25);
        assert_eq!(c.queues.concurrency_for(QueueName::SelfCompete), 4);
        assert_eq!(c.queues.concurrency_for(QueueName::Tasks), 10);
        assert_eq!(c.tenants["acme"], 1000.0);
    }

    #[test]
    fn rejects_nonsense() {
        assert!(matches!(
            CoreConfig::from_json_str(r#"{ "cost": { "margin_threshold": 1.5 } }"#),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            CoreConfig::from_json_str(r#"{ "queues": { "default_concurrency": 0 } }"#),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            CoreConfig::from_json_str(r#"{ "tournament": { "variants": [] } }"#),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            CoreConfig::from_json_str("{ not json"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn missing_file_is_io_error() {
        assert!(matches!(
            CoreConfig::from_path("/definitely/not/here.json"),
            Err(ConfigError::Io { .. })
        ));
    }
}
