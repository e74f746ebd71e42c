//! Error taxonomy shared by admission, execution and the API boundary.
//!
//! Every failure carries a stable [`ErrorKind`] and a human-readable message;
//! nothing else (no backtraces, no dependency payloads) reaches a response.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::{CompetitionId, TenantId, Usd};
use crate::ports::StoreError;
use crate::queue::JobKind;

/// Stable, wire-level error classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    ValidationError,
    BudgetExceeded,
    BudgetExhausted,
    FeatureDisabled,
    DependencyUnavailable,
    TransientExecutionError,
    InsufficientVariants,
    NotFound,
    Internal,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::ValidationError => "validation_error",
            ErrorKind::BudgetExceeded => "budget_exceeded",
            ErrorKind::BudgetExhausted => "budget_exhausted",
            ErrorKind::FeatureDisabled => "feature_disabled",
            ErrorKind::DependencyUnavailable => "dependency_unavailable",
            ErrorKind::TransientExecutionError => "transient_execution_error",
            ErrorKind::InsufficientVariants => "insufficient_variants",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Internal => "internal",
        }
    }

    /// `AdmissionRejected` family: fatal for this request, the client may resubmit later.
    pub fn is_admission_rejection(self) -> bool {
        matches!(
            self,
            ErrorKind::BudgetExceeded | ErrorKind::BudgetExhausted | ErrorKind::FeatureDisabled
        )
    }
}

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("budget exceeded for tenant {tenant}: projected spend {projected} exceeds margin limit {limit}")]
    BudgetExceeded {
        tenant: TenantId,
        projected: Usd,
        limit: Usd,
    },

    #[error("error budget exhausted (burn rate {burn_rate:.2})")]
    BudgetExhausted { burn_rate: f64 },

    #[error("feature {feature} is disabled for tenant {tenant}")]
    FeatureDisabled { feature: String, tenant: TenantId },

    #[error("dependency {dependency} unavailable: {message}")]
    DependencyUnavailable { dependency: String, message: String },

    #[error("transient execution error: {0}")]
    Transient(String),

    #[error("competition {competition} finished with {completed} completed variants, {required} required")]
    InsufficientVariants {
        competition: CompetitionId,
        completed: usize,
        required: usize,
    },

    #[error("{0} not found")]
    NotFound(String),

    #[error("invalid status transition {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    #[error("handler not found for job kind={0}")]
    HandlerNotFound(JobKind),

    #[error("duplicate handler for job kind={0}")]
    DuplicateHandler(JobKind),

    #[error("request with idempotency key {0} is still in flight")]
    InFlight(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("json codec: {0}")]
    Json(#[from] serde_json::Error),
}

impl CoreError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            CoreError::Validation(_) => ErrorKind::ValidationError,
            CoreError::BudgetExceeded { .. } => ErrorKind::BudgetExceeded,
            CoreError::BudgetExhausted { .. } => ErrorKind::BudgetExhausted,
            CoreError::FeatureDisabled { .. } => ErrorKind::FeatureDisabled,
            CoreError::DependencyUnavailable { .. } => ErrorKind::DependencyUnavailable,
            CoreError::Transient(_) | CoreError::InFlight(_) => ErrorKind::TransientExecutionError,
            CoreError::InsufficientVariants { .. } => ErrorKind::InsufficientVariants,
            CoreError::NotFound(_) => ErrorKind::NotFound,
            CoreError::InvalidTransition { .. }
            | CoreError::HandlerNotFound(_)
            | CoreError::DuplicateHandler(_)
            | CoreError::Store(_)
            | CoreError::Json(_) => ErrorKind::Internal,
        }
    }

    /// Whether the queue should schedule another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            CoreError::Transient(_)
                | CoreError::DependencyUnavailable { .. }
                | CoreError::InFlight(_)
                | CoreError::Store(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn admission_kinds_are_stable() {
        let err = CoreError::BudgetExhausted { burn_rate: 1.4 };
        assert_eq!(err.kind().as_str(), "budget_exhausted");
        assert!(err.kind().is_admission_rejection());
        assert!(!err.is_retryable());
    }

    #[test]
    fn transient_errors_are_retryable() {
        assert!(CoreError::Transient("socket reset".into()).is_retryable());
        assert!(!CoreError::Validation("missing type".into()).is_retryable());
    }

    #[test]
    fn kind_serializes_snake_case() {
        let v = serde_json::to_value(ErrorKind::InsufficientVariants).unwrap();
        assert_eq!(v, "insufficient_variants");
    }
}
