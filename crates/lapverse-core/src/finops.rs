//! FinOps tagging: cost-attribution metadata attached at admission.
//!
//! Tags are pure decoration. Nothing in the core branches on them; they ride
//! along on records, queue jobs, log fields and metric labels.

use serde::{Deserialize, Serialize};

use crate::domain::{CostCenter, TenantId};

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FinOpsTags {
    pub application: String,
    pub environment: String,
    pub tenant_id: String,
    pub cost_center: String,
    pub owner: String,
    pub version: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FinOpsConfig {
    pub application: String,
    pub environment: String,
    pub owner: String,
    pub version: String,
    /// Used when a submission carries no cost center.
    pub default_cost_center: String,
}

impl Default for FinOpsConfig {
    fn default() -> Self {
        Self {
            application: "lapverse-core".to_string(),
            environment: "development".to_string(),
            owner: "platform".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            default_cost_center: "shared".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct FinOpsTagger {
    config: FinOpsConfig,
}

impl FinOpsTagger {
    pub fn new(config: FinOpsConfig) -> Self {
        Self { config }
    }

    /// Resolves the cost center a submission is billed to.
    pub fn cost_center(&self, supplied: Option<&str>) -> CostCenter {
        match supplied.map(str::trim).filter(|s| !s.is_empty()) {
            Some(cc) => CostCenter::new(cc),
            None => CostCenter::new(self.config.default_cost_center.clone()),
        }
    }

    pub fn tag(&self, tenant: &TenantId, cost_center: &CostCenter) -> FinOpsTags {
        FinOpsTags {
            application: self.config.application.clone(),
            environment: self.config.environment.clone(),
            tenant_id: tenant.to_string(),
            cost_center: cost_center.to_string(),
            owner: self.config.owner.clone(),
            version: self.config.version.clone(),
        }
    }
}
