//! Executor ports - 実際の AI 処理は外部。ここではコントロールプレーンが
//! 呼び出すインターフェースだけを定義します。
//!
//! どちらの実行も再試行で再度呼ばれ得るので、実装は再実行安全であること。

use async_trait::async_trait;

use crate::domain::{Competition, Task, Usd, Variant};
use crate::error::CoreError;

#[derive(Debug, Clone, PartialEq)]
pub struct TaskExecution {
    pub output: serde_json::Value,
    pub cost_actual: Usd,
}

#[async_trait]
pub trait TaskExecutor: Send + Sync {
    async fn execute(&self, task: &Task) -> Result<TaskExecution, CoreError>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct VariantExecution {
    pub output_artifact: serde_json::Value,
    pub cost: Usd,
    pub degraded: bool,
}

#[async_trait]
pub trait VariantExecutor: Send + Sync {
    async fn execute(
        &self,
        competition: &Competition,
        variant: &Variant,
    ) -> Result<VariantExecution, CoreError>;
}
