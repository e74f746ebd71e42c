//! StaticTenantDirectory - 設定ファイルから読み込む固定の MRR テーブル

use std::collections::HashMap;

use async_trait::async_trait;

use crate::domain::{TenantId, Usd};
use crate::error::CoreError;
use crate::ports::TenantDirectory;

#[derive(Debug, Clone, Default)]
pub struct StaticTenantDirectory {
    mrr: HashMap<TenantId, Usd>,
}

impl StaticTenantDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tenant(mut self, tenant: impl Into<String>, mrr: Usd) -> Self {
        self.mrr.insert(TenantId::new(tenant), mrr);
        self
    }

    pub fn from_dollars<I, S>(entries: I) -> Self
    where
        I: IntoIterator<Item = (S, f64)>,
        S: Into<String>,
    {
        entries
            .into_iter()
            .fold(Self::new(), |dir, (tenant, mrr)| dir.with_tenant(tenant, Usd::from_dollars(mrr)))
    }
}

#[async_trait]
impl TenantDirectory for StaticTenantDirectory {
    async fn monthly_recurring_revenue(&self, tenant: &TenantId) -> Result<Usd, CoreError> {
        Ok(self.mrr.get(tenant).copied().unwrap_or(Usd::ZERO))
    }
}
