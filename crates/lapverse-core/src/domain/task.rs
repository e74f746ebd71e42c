use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::ids::TaskId;
use super::money::Usd;
use super::state::{Lifecycle, TaskStatus};
use super::tenant::{CostCenter, IdempotencyKey, Priority, TenantId};
use crate::error::CoreError;
use crate::finops::FinOpsTags;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskType(String);

impl TaskType {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// `requirements.complexity` of a task submission.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Complexity {
    #[default]
    Simple,
    Intermediate,
    Advanced,
    Expert,
}

impl Complexity {
    pub fn multiplier(self) -> u32 {
        match self {
            Complexity::Simple => 1,
            Complexity::Intermediate => 2,
            Complexity::Advanced => 4,
            Complexity::Expert => 8,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Requirements {
    #[serde(default)]
    pub complexity: Complexity,
}

/// What the task executor works on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskPayload {
    pub description: String,
    pub requirements: Requirements,
}

/// An admitted unit of work on the `tasks` queue.
///
/// Records are mutated only through the repository's CAS update, and status
/// changes only through [`Task::advance`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub task_type: TaskType,
    pub tenant_id: TenantId,
    pub priority: Priority,
    pub payload: TaskPayload,
    pub cost_center: CostCenter,
    pub idempotency_key: IdempotencyKey,
    pub status: TaskStatus,
    pub attempts: u32,
    pub cost_estimate: Usd,
    pub cost_actual: Option<Usd>,
    pub tags: FinOpsTags,
    pub output: Option<serde_json::Value>,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Task {
    pub fn advance(&mut self, next: TaskStatus, now: DateTime<Utc>) -> Result<(), CoreError> {
        self.status = self.status.advance_to(next)?;
        self.updated_at = now;
        Ok(())
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}
