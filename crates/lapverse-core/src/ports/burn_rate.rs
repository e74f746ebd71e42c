//! BurnRateLoader port - SLO burn rate の取得元
//!
//! 正はメトリクスバックエンド。SloTracker はこの値をキャッシュし、
//! ホットパスでは I/O しません。

use async_trait::async_trait;

use crate::error::CoreError;

#[async_trait]
pub trait BurnRateLoader: Send + Sync {
    /// consumed-budget / allotted-budget over the rolling window.
    async fn load_burn_rate(&self) -> Result<f64, CoreError>;
}
