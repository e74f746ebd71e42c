//! Framework-agnostic API boundary.
//!
//! An HTTP layer maps each route to one method here and writes the returned
//! [`ApiReply`] as-is. Headers are passed as `(name, value)` pairs and looked
//! up case-insensitively.
//!
//! | route                    | method                    |
//! |--------------------------|---------------------------|
//! | `POST /tasks`            | `submit(Task, ..)`        |
//! | `POST /competitions`     | `submit(Competition, ..)` |
//! | `GET /competitions/{id}` | `competition`             |
//! | `GET /tasks/{id}`        | `task`                    |
//! | `GET /budget`            | `budget`                  |
//! | `GET /metrics`           | `metrics`                 |

use std::sync::Arc;

use serde::Serialize;
use serde_json::{Value, json};
use tracing::debug;

use crate::app::{LapVerseCore, Submission};
use crate::domain::{Competition, CompetitionId, IdempotencyKey, Task, TaskId, TenantId};
use crate::error::{CoreError, ErrorKind};

pub const IDEMPOTENCY_KEY: &str = "Idempotency-Key";
pub const TENANT_ID: &str = "X-Tenant-ID";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmissionKind {
    Task,
    Competition,
}

/// Status code plus JSON body.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ApiReply {
    pub status: u16,
    pub body: Value,
    /// The body was replayed from an earlier submission with the same key.
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub replayed: bool,
}

impl ApiReply {
    fn new(status: u16, body: Value) -> Self {
        Self {
            status,
            body,
            replayed: false,
        }
    }

    fn ok(body: impl Serialize) -> Self {
        match serde_json::to_value(body) {
            Ok(body) => Self::new(200, body),
            Err(e) => Self::error(&CoreError::from(e)),
        }
    }

    /// `{ "error": { "kind", "message" } }` with the mapped status.
    pub fn error(err: &CoreError) -> Self {
        let kind = err.kind();
        // internal details stay in the log
        let message = match kind {
            ErrorKind::Internal => "internal error".to_string(),
            _ => err.to_string(),
        };
        Self::new(
            status_for(kind),
            json!({ "error": { "kind": kind.as_str(), "message": message } }),
        )
    }
}

pub fn status_for(kind: ErrorKind) -> u16 {
    match kind {
        ErrorKind::ValidationError => 400,
        ErrorKind::BudgetExceeded => 402,
        ErrorKind::FeatureDisabled | ErrorKind::NotFound => 404,
        ErrorKind::InsufficientVariants => 409,
        ErrorKind::BudgetExhausted
        | ErrorKind::DependencyUnavailable
        | ErrorKind::TransientExecutionError => 503,
        ErrorKind::Internal => 500,
    }
}

fn header<'a>(headers: &[(&str, &'a str)], name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.trim())
        .filter(|v| !v.is_empty())
}

/// Headers and body of a submission, decoded into the tagged submission type.
pub fn parse_submission(
    kind: SubmissionKind,
    headers: &[(&str, &str)],
    body: &[u8],
) -> Result<(TenantId, IdempotencyKey, Submission), CoreError> {
    let key = header(headers, IDEMPOTENCY_KEY)
        .ok_or_else(|| CoreError::Validation(format!("missing header: {IDEMPOTENCY_KEY}")))?;
    let tenant = header(headers, TENANT_ID)
        .ok_or_else(|| CoreError::Validation(format!("missing header: {TENANT_ID}")))?;

    let invalid = |e: serde_json::Error| CoreError::Validation(format!("malformed body: {e}"));
    let submission = match kind {
        SubmissionKind::Task => Submission::Task(serde_json::from_slice(body).map_err(invalid)?),
        SubmissionKind::Competition => {
            Submission::Competition(serde_json::from_slice(body).map_err(invalid)?)
        }
    };
    Ok((TenantId::new(tenant), IdempotencyKey::new(key), submission))
}

/// `GET` competition view.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompetitionView {
    pub id: CompetitionId,
    pub status: &'static str,
    pub champion: Option<String>,
    /// Sum of variant costs so far, in USD.
    pub cost: f64,
    pub tags: crate::finops::FinOpsTags,
    pub win_rate_delta: Option<f64>,
    pub variants: Vec<VariantView>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VariantView {
    pub name: String,
    pub score: Option<f64>,
    pub cost: f64,
    pub degraded: bool,
    pub completed: bool,
}

impl From<&Competition> for CompetitionView {
    fn from(c: &Competition) -> Self {
        Self {
            id: c.id,
            status: c.status.as_str(),
            champion: c.champion_id.clone(),
            cost: c.total_cost().as_dollars(),
            tags: c.tags.clone(),
            win_rate_delta: c.win_rate_delta,
            variants: c
                .variants
                .iter()
                .map(|v| VariantView {
                    name: v.name.clone(),
                    score: v.score,
                    cost: v.cost.as_dollars(),
                    degraded: v.degraded,
                    completed: v.completed(),
                })
                .collect(),
            failure: c.failure.clone(),
        }
    }
}

/// `GET` task view.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskView {
    pub id: TaskId,
    pub status: &'static str,
    pub attempts: u32,
    pub cost_estimate: f64,
    pub cost_actual: Option<f64>,
    pub tags: crate::finops::FinOpsTags,
    pub output: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<&Task> for TaskView {
    fn from(t: &Task) -> Self {
        Self {
            id: t.id,
            status: t.status.as_str(),
            attempts: t.attempts,
            cost_estimate: t.cost_estimate.as_dollars(),
            cost_actual: t.cost_actual.map(|c| c.as_dollars()),
            tags: t.tags.clone(),
            output: t.output.clone(),
            error: t.last_error.clone(),
        }
    }
}

pub struct Api {
    core: Arc<LapVerseCore>,
}

impl Api {
    pub fn new(core: Arc<LapVerseCore>) -> Self {
        Self { core }
    }

    /// `202 {id, status: "accepted"}` or the mapped error.
    pub async fn submit(&self, kind: SubmissionKind, headers: &[(&str, &str)], body: &[u8]) -> ApiReply {
        let (tenant, key, submission) = match parse_submission(kind, headers, body) {
            Ok(parsed) => parsed,
            Err(e) => return ApiReply::error(&e),
        };
        match self.core.submit(&tenant, &key, submission).await {
            Ok(gate) => ApiReply {
                status: 202,
                body: gate.response,
                replayed: gate.replayed,
            },
            Err(e) => {
                debug!(%tenant, kind = e.kind().as_str(), "submission rejected");
                ApiReply::error(&e)
            }
        }
    }

    pub async fn competition(&self, id: &str) -> ApiReply {
        // a malformed id cannot name an existing competition
        let Ok(id) = id.parse::<CompetitionId>() else {
            return ApiReply::error(&CoreError::NotFound(format!("competition {id}")));
        };
        match self.core.competition_status(&id).await {
            Ok(c) => ApiReply::ok(CompetitionView::from(&c)),
            Err(e) => ApiReply::error(&e),
        }
    }

    pub async fn task(&self, id: &str) -> ApiReply {
        let Ok(id) = id.parse::<TaskId>() else {
            return ApiReply::error(&CoreError::NotFound(format!("task {id}")));
        };
        match self.core.task_status(&id).await {
            Ok(t) => ApiReply::ok(TaskView::from(&t)),
            Err(e) => ApiReply::error(&e),
        }
    }

    pub async fn budget(&self, headers: &[(&str, &str)]) -> ApiReply {
        let Some(tenant) = header(headers, TENANT_ID) else {
            return ApiReply::error(&CoreError::Validation(format!("missing header: {TENANT_ID}")));
        };
        match self.core.budget_state(&TenantId::new(tenant)).await {
            Ok(state) => ApiReply::ok(json!({
                "tenantId": state.tenant_id,
                "period": state.period,
                "periodSpendUsd": state.period_spend_usd(),
                "tenantMrrUsd": state.tenant_mrr_usd(),
                "marginThreshold": state.margin_threshold,
                "burnRate": state.burn_rate,
            })),
            Err(e) => ApiReply::error(&e),
        }
    }

    /// Counters, gauges and histograms plus breaker, queue and API-call state.
    pub async fn metrics(&self) -> ApiReply {
        let queues = match self.core.queue_counts().await {
            Ok(q) => q,
            Err(e) => return ApiReply::error(&e),
        };
        ApiReply::ok(json!({
            "metrics": self.core.metrics_snapshot(),
            "burnRate": self.core.slo().burn_rate(),
            "breakers": self.core.breaker_states(),
            "queues": queues,
            "apiCalls": self.core.api_call_totals(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use rstest::rstest;

    use super::*;
    use crate::app::CoreBuilder;
    use crate::config::CoreConfig;
    use crate::domain::{Usd, Variant};
    use crate::impls::StaticTenantDirectory;
    use crate::ports::{
        PromotionPipeline, PromotionRequest, TaskExecution, TaskExecutor, VariantExecution,
        VariantExecutor,
    };

    struct Noop;

    #[async_trait]
    impl TaskExecutor for Noop {
        async fn execute(&self, _task: &Task) -> Result<TaskExecution, CoreError> {
            Ok(TaskExecution {
                output: Value::Null,
                cost_actual: Usd::ZERO,
            })
        }
    }

    #[async_trait]
    impl VariantExecutor for Noop {
        async fn execute(&self, _c: &Competition, _v: &Variant) -> Result<VariantExecution, CoreError> {
            Ok(VariantExecution {
                output_artifact: json!({ "score": 1.0 }),
                cost: Usd::ZERO,
                degraded: false,
            })
        }
    }

    #[async_trait]
    impl PromotionPipeline for Noop {
        async fn promote(&self, _request: &PromotionRequest) -> Result<(), CoreError> {
            Ok(())
        }
    }

    fn api() -> Api {
        let core = CoreBuilder::new(CoreConfig::default())
            .tenants(Arc::new(
                StaticTenantDirectory::new().with_tenant("acme", Usd::from_dollars(1_000.0)),
            ))
            .task_executor(Arc::new(Noop))
            .variant_executor(Arc::new(Noop))
            .promotion_pipeline(Arc::new(Noop))
            .build()
            .unwrap();
        Api::new(Arc::new(core))
    }

    const HEADERS: &[(&str, &str)] = &[("idempotency-key", "k-1"), ("x-tenant-id", "acme")];

    #[rstest]
    #[case(ErrorKind::ValidationError, 400)]
    #[case(ErrorKind::BudgetExceeded, 402)]
    #[case(ErrorKind::FeatureDisabled, 404)]
    #[case(ErrorKind::NotFound, 404)]
    #[case(ErrorKind::BudgetExhausted, 503)]
    #[case(ErrorKind::Internal, 500)]
    fn error_kinds_map_to_statuses(#[case] kind: ErrorKind, #[case] status: u16) {
        assert_eq!(status_for(kind), status);
    }

    #[test]
    fn missing_headers_and_bad_bodies_are_400() {
        let err = parse_submission(SubmissionKind::Task, &[("X-Tenant-ID", "acme")], b"{}").unwrap_err();
        assert_eq!(err.to_string(), "validation failed: missing header: Idempotency-Key");

        let err = parse_submission(SubmissionKind::Competition, HEADERS, b"not json").unwrap_err();
        assert_eq!(ApiReply::error(&err).status, 400);
    }

    #[tokio::test]
    async fn accepted_then_replayed() {
        let api = api();
        let body = br#"{"type":"analysis","description":"summary","requirements":{"complexity":"expert"}}"#;

        let first = api.submit(SubmissionKind::Task, HEADERS, body).await;
        assert_eq!(first.status, 202);
        assert_eq!(first.body["status"], "accepted");
        assert!(!first.replayed);

        let second = api.submit(SubmissionKind::Task, HEADERS, body).await;
        assert_eq!(second.status, 202);
        assert_eq!(second.body, first.body);
        assert!(second.replayed);

        let id = first.body["id"].as_str().unwrap();
        let view = api.task(id).await;
        assert_eq!(view.status, 200);
        assert_eq!(view.body["status"], "queued");
        assert_eq!(view.body["costEstimate"], 2.0);
        assert_eq!(view.body["tags"]["costCenter"], "shared");
    }

    #[tokio::test]
    async fn margin_breach_is_402() {
        let api = api();
        // 0.25 × 8 per task; the 351st would take spend past $700
        let body = br#"{"type":"analysis","description":"x","requirements":{"complexity":"expert"}}"#;
        let mut last = None;
        for i in 0..351 {
            let key = format!("k-{i}");
            let headers = [("Idempotency-Key", key.as_str()), ("X-Tenant-ID", "acme")];
            last = Some(api.submit(SubmissionKind::Task, &headers, body).await);
        }
        let last = last.unwrap();
        assert_eq!(last.status, 402);
        assert_eq!(last.body["error"]["kind"], "budget_exceeded");
    }

    #[tokio::test]
    async fn competition_lookup() {
        let api = api();
        let body = br#"{"content":"launch","platforms":["x"],"competitors":["balanced","aggressive"]}"#;
        let reply = api.submit(SubmissionKind::Competition, HEADERS, body).await;
        assert_eq!(reply.status, 202);

        let view = api.competition(reply.body["id"].as_str().unwrap()).await;
        assert_eq!(view.status, 200);
        assert_eq!(view.body["status"], "running");
        assert_eq!(view.body["champion"], Value::Null);
        assert_eq!(view.body["tags"]["tenantId"], "acme");
        assert_eq!(view.body["variants"].as_array().unwrap().len(), 2);

        assert_eq!(api.competition("comp-01ARZ3NDEKTSV4RRFFQ69G5FAV").await.status, 404);
        assert_eq!(api.competition("nonsense").await.status, 404);
    }

    #[tokio::test]
    async fn exhausted_error_budget_is_503() {
        let api = api();
        api.core.slo().set_burn_rate(1.01);
        let reply = api
            .submit(
                SubmissionKind::Task,
                HEADERS,
                br#"{"type":"analysis","description":"x"}"#,
            )
            .await;
        assert_eq!(reply.status, 503);
        assert_eq!(reply.body["error"]["kind"], "budget_exhausted");
    }

    #[tokio::test]
    async fn metrics_exposition() {
        let api = api();
        let reply = api.metrics().await;
        assert_eq!(reply.status, 200);
        assert_eq!(reply.body["queues"]["self-compete"]["queued"], 0);
        assert_eq!(reply.body["metrics"]["gauges"]["budget_burn_rate"], 0.0);
    }
}
