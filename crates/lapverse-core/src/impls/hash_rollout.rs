//! HashRollout - バケット分けによるフィーチャーフラグ実装
//!
//! テナントは `sha256("{flag}:{tenant}")` の先頭 8 バイトで 0..100 の
//! バケットに割り当てられ、バケット < ロールアウト率 なら有効です。
//! 同じテナントは常に同じバケットに入るので、ロールアウト率を上げても
//! 既に有効なテナントが無効に戻ることはありません。
//!
//! ロールアウト率とテナント単位の上書きは SharedStore に置きます。

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::domain::TenantId;
use crate::error::CoreError;
use crate::ports::{FeatureFlags, SharedStore};

pub struct HashRollout {
    store: Arc<dyn SharedStore>,
    defaults: HashMap<String, u8>,
}

impl HashRollout {
    pub fn new(store: Arc<dyn SharedStore>) -> Self {
        Self {
            store,
            defaults: HashMap::new(),
        }
    }

    /// Rollout used while the store holds no value for `flag`.
    pub fn with_default(mut self, flag: impl Into<String>, percentage: u8) -> Self {
        self.defaults.insert(flag.into(), percentage.min(100));
        self
    }

    /// Forces the flag on or off for one tenant regardless of its bucket.
    pub async fn set_override(
        &self,
        flag: &str,
        tenant: &TenantId,
        enabled: bool,
    ) -> Result<(), CoreError> {
        self.store
            .put(&override_key(flag, tenant), Value::Bool(enabled), None)
            .await?;
        Ok(())
    }

    pub fn bucket(flag: &str, tenant: &TenantId) -> u8 {
        let digest = Sha256::digest(format!("{flag}:{tenant}").as_bytes());
        let mut head = [0u8; 8];
        head.copy_from_slice(&digest[..8]);
        (u64::from_be_bytes(head) % 100) as u8
    }
}

fn rollout_key(flag: &str) -> String {
    format!("flag:{flag}:rollout")
}

fn override_key(flag: &str, tenant: &TenantId) -> String {
    format!("flag:{flag}:tenant:{tenant}")
}

#[async_trait]
impl FeatureFlags for HashRollout {
    async fn is_enabled(&self, flag: &str, tenant: &TenantId) -> Result<bool, CoreError> {
        if let Some(Value::Bool(forced)) = self.store.get(&override_key(flag, tenant)).await? {
            return Ok(forced);
        }
        let rollout = self.rollout_percentage(flag).await?;
        Ok(Self::bucket(flag, tenant) < rollout)
    }

    async fn rollout_percentage(&self, flag: &str) -> Result<u8, CoreError> {
        let stored = self
            .store
            .get(&rollout_key(flag))
            .await?
            .and_then(|v| v.as_u64());
        Ok(match stored {
            Some(p) => p.min(100) as u8,
            None => self.defaults.get(flag).copied().unwrap_or(0),
        })
    }

    async fn set_rollout_percentage(&self, flag: &str, percentage: u8) -> Result<(), CoreError> {
        self.store
            .put(&rollout_key(flag), Value::from(percentage.min(100)), None)
            .await?;
        Ok(())
    }
}
