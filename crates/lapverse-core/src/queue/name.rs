use serde::{Deserialize, Serialize};
use std::fmt;

/// The three logical queues of the core.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum QueueName {
    #[serde(rename = "tasks")]
    Tasks,
    #[serde(rename = "self-compete")]
    SelfCompete,
    #[serde(rename = "kaggle")]
    Kaggle,
}

impl QueueName {
    pub const ALL: [QueueName; 3] = [QueueName::Tasks, QueueName::SelfCompete, QueueName::Kaggle];

    pub fn as_str(self) -> &'static str {
        match self {
            QueueName::Tasks => "tasks",
            QueueName::SelfCompete => "self-compete",
            QueueName::Kaggle => "kaggle",
        }
    }
}

impl fmt::Display for QueueName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Selects the handler a job is dispatched to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobKind(String);

impl JobKind {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Job kinds dispatched by the core's workers.
pub mod kinds {
    /// `tasks` queue: run one admitted task.
    pub const TASK_EXECUTE: &str = "task.execute";
    /// `self-compete` queue: run one competition variant.
    pub const COMPETITION_VARIANT: &str = "competition.variant";
    /// `kaggle` queue: hand a champion to the promotion pipeline.
    pub const CHAMPION_PROMOTE: &str = "champion.promote";
}
