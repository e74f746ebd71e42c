//! State - Task / Competition の状態遷移
//!
//! どちらの状態機械も「後戻りしない」ことが不変条件です。
//! rank が同じか大きい遷移のみ許可し、終端状態からは動かしません
//! （同一状態への遷移は at-least-once 配送での再実行を吸収するため no-op として許可）。

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::CoreError;

/// A status enum whose transitions are monotonic.
pub trait Lifecycle: Copy + PartialEq + fmt::Debug {
    fn rank(self) -> u8;

    fn is_terminal(self) -> bool;

    fn can_advance_to(self, next: Self) -> bool {
        if self == next {
            return true;
        }
        !self.is_terminal() && next.rank() > self.rank()
    }

    /// Returns `next` if the transition is allowed.
    fn advance_to(self, next: Self) -> Result<Self, CoreError> {
        if self.can_advance_to(next) {
            Ok(next)
        } else {
            Err(CoreError::InvalidTransition {
                from: format!("{self:?}"),
                to: format!("{next:?}"),
            })
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Queued,
    /// Stays here across retries; a retry never moves a task back to Queued.
    Processing,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Queued => "queued",
            TaskStatus::Processing => "processing",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
        }
    }
}

impl Lifecycle for TaskStatus {
    fn rank(self) -> u8 {
        match self {
            TaskStatus::Queued => 0,
            TaskStatus::Processing => 1,
            TaskStatus::Completed | TaskStatus::Failed => 2,
        }
    }

    fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompetitionStatus {
    Pending,
    Running,
    Scoring,
    Promoted,
    CompletedNoEvolution,
    Failed,
}

impl CompetitionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            CompetitionStatus::Pending => "pending",
            CompetitionStatus::Running => "running",
            CompetitionStatus::Scoring => "scoring",
            CompetitionStatus::Promoted => "promoted",
            CompetitionStatus::CompletedNoEvolution => "completed_no_evolution",
            CompetitionStatus::Failed => "failed",
        }
    }
}

impl Lifecycle for CompetitionStatus {
    fn rank(self) -> u8 {
        match self {
            CompetitionStatus::Pending => 0,
            CompetitionStatus::Running => 1,
            CompetitionStatus::Scoring => 2,
            CompetitionStatus::Promoted
            | CompetitionStatus::CompletedNoEvolution
            | CompetitionStatus::Failed => 3,
        }
    }

    fn is_terminal(self) -> bool {
        self.rank() == 3
    }
}
