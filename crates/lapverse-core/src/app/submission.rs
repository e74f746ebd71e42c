//! Submission bodies, validated at the boundary.
//!
//! A submission is either a Task or a Competition. Both are checked here so
//! that nothing downstream has to handle missing or malformed fields.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::{Priority, Requirements, TaskType, TenantId, Variant};
use crate::error::CoreError;
use crate::tournament::VariantPreset;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Submission {
    Task(TaskSubmission),
    Competition(CompetitionSubmission),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TaskSubmission {
    #[serde(rename = "type")]
    pub task_type: String,
    pub priority: Priority,
    pub description: String,
    /// Optional echo of the tenant header; must match it when present.
    pub tenant: Option<String>,
    pub cost_center: Option<String>,
    pub requirements: Requirements,
}

/// A competitor is either the name of a configured preset or an inline strategy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Competitor {
    Named(String),
    Inline {
        name: String,
        #[serde(default, rename = "strategyParams")]
        strategy_params: Value,
    },
}

impl Competitor {
    pub fn name(&self) -> &str {
        match self {
            Competitor::Named(name) | Competitor::Inline { name, .. } => name,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CompetitionSubmission {
    pub content: String,
    pub platforms: Vec<String>,
    pub priority: Priority,
    pub tenant: Option<String>,
    pub cost_center: Option<String>,
    /// Empty means "run every configured preset".
    pub competitors: Vec<Competitor>,
}

fn missing(field: &str) -> CoreError {
    CoreError::Validation(format!("missing field: {field}"))
}

fn check_tenant(body_tenant: Option<&str>, tenant: &TenantId) -> Result<(), CoreError> {
    match body_tenant {
        Some(t) if t != tenant.as_str() => Err(CoreError::Validation(format!(
            "body tenant {t} does not match X-Tenant-ID {tenant}"
        ))),
        _ => Ok(()),
    }
}

impl TaskSubmission {
    pub fn validate(&self, tenant: &TenantId) -> Result<(), CoreError> {
        if self.task_type.trim().is_empty() {
            return Err(missing("type"));
        }
        if self.description.trim().is_empty() {
            return Err(missing("description"));
        }
        check_tenant(self.tenant.as_deref(), tenant)
    }

    pub fn task_type(&self) -> TaskType {
        TaskType::new(self.task_type.trim())
    }
}

impl CompetitionSubmission {
    pub fn validate(&self, tenant: &TenantId) -> Result<(), CoreError> {
        if self.content.trim().is_empty() {
            return Err(missing("content"));
        }
        if self.platforms.is_empty() {
            return Err(missing("platforms"));
        }
        if self.platforms.iter().any(|p| p.trim().is_empty()) {
            return Err(CoreError::Validation("platform names must not be blank".into()));
        }
        check_tenant(self.tenant.as_deref(), tenant)
    }

    /// Turns the competitor list into fresh variants.
    ///
    /// Fails on duplicate or unknown names, and when fewer than `min_variants`
    /// would run (such a competition could never produce a champion).
    pub fn variants(&self, presets: &[VariantPreset], min_variants: usize) -> Result<Vec<Variant>, CoreError> {
        let variants: Vec<Variant> = if self.competitors.is_empty() {
            presets
                .iter()
                .map(|p| Variant::new(p.name.clone(), p.strategy_params.clone()))
                .collect()
        } else {
            self.competitors
                .iter()
                .map(|c| match c {
                    Competitor::Inline {
                        name,
                        strategy_params,
                    } => Ok(Variant::new(name.clone(), strategy_params.clone())),
                    Competitor::Named(name) => presets
                        .iter()
                        .find(|p| &p.name == name)
                        .map(|p| Variant::new(p.name.clone(), p.strategy_params.clone()))
                        .ok_or_else(|| CoreError::Validation(format!("unknown competitor: {name}"))),
                })
                .collect::<Result<_, _>>()?
        };

        let mut seen = BTreeSet::new();
        for v in &variants {
            if v.name.trim().is_empty() {
                return Err(CoreError::Validation("competitor names must not be blank".into()));
            }
            if !seen.insert(v.name.as_str()) {
                return Err(CoreError::Validation(format!("duplicate competitor: {}", v.name)));
            }
        }
        if variants.len() < min_variants {
            return Err(CoreError::Validation(format!(
                "a competition needs at least {min_variants} competitors, got {}",
                variants.len()
            )));
        }
        Ok(variants)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Complexity;
    use crate::tournament::TournamentConfig;
    use serde_json::json;

    fn acme() -> TenantId {
        TenantId::new("acme")
    }

    #[test]
    fn task_body_parses_with_defaults() {
        let body: TaskSubmission = serde_json::from_value(json!({
            "type": "analysis",
            "description": "quarterly summary",
            "costCenter": "marketing",
            "requirements": { "complexity": "advanced" }
        }))
        .unwrap();
        body.validate(&acme()).unwrap();
        assert_eq!(body.priority, Priority::Normal);
        assert_eq!(body.requirements.complexity, Complexity::Advanced);
        assert_eq!(body.cost_center.as_deref(), Some("marketing"));
    }

    #[test]
    fn missing_fields_are_validation_errors() {
        let body: TaskSubmission = serde_json::from_value(json!({ "type": "analysis" })).unwrap();
        let err = body.validate(&acme()).unwrap_err();
        assert_eq!(err.to_string(), "validation failed: missing field: description");

        let body: CompetitionSubmission =
            serde_json::from_value(json!({ "content": "launch post" })).unwrap();
        assert!(matches!(body.validate(&acme()), Err(CoreError::Validation(_))));
    }

    #[test]
    fn body_tenant_must_match_header() {
        let body = TaskSubmission {
            task_type: "analysis".into(),
            description: "x".into(),
            tenant: Some("globex".into()),
            ..TaskSubmission::default()
        };
        assert!(body.validate(&acme()).is_err());
    }

    #[test]
    fn competitors_default_to_presets() {
        let presets = TournamentConfig::default().variants;
        let body = CompetitionSubmission {
            content: "launch".into(),
            platforms: vec!["x".into()],
            ..CompetitionSubmission::default()
        };
        let names: Vec<_> = body.variants(&presets, 2).unwrap().into_iter().map(|v| v.name).collect();
        assert_eq!(names, ["aggressive", "conservative", "balanced", "experimental"]);
    }

    #[test]
    fn competitors_mix_presets_and_inline() {
        let presets = TournamentConfig::default().variants;
        let body: CompetitionSubmission = serde_json::from_value(json!({
            "content": "launch",
            "platforms": ["x"],
            "competitors": ["balanced", { "name": "bold", "strategyParams": { "tone_weight": 2.0 } }]
        }))
        .unwrap();
        let variants = body.variants(&presets, 2).unwrap();
        assert_eq!(variants[0].strategy_params["tone_weight"], 1.0);
        assert_eq!(variants[1].name, "bold");
        assert_eq!(variants[1].strategy_params["tone_weight"], 2.0);
    }

    #[test]
    fn competitor_list_is_checked() {
        let presets = TournamentConfig::default().variants;
        let with = |competitors: Vec<Competitor>| CompetitionSubmission {
            content: "launch".into(),
            platforms: vec!["x".into()],
            competitors,
            ..CompetitionSubmission::default()
        };
        let named = |n: &str| Competitor::Named(n.to_string());

        assert!(with(vec![named("balanced"), named("balanced")]).variants(&presets, 2).is_err());
        assert!(with(vec![named("balanced"), named("nope")]).variants(&presets, 2).is_err());
        assert!(with(vec![named("balanced")]).variants(&presets, 2).is_err());
    }

    #[test]
    fn submission_is_tagged() {
        let s: Submission = serde_json::from_value(json!({
            "kind": "competition",
            "content": "launch",
            "platforms": ["x"]
        }))
        .unwrap();
        assert!(matches!(s, Submission::Competition(_)));
    }
}
