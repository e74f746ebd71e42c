//! SharedStore port - 単一キー原子操作 + TTL を持つ共有ストア
//!
//! 冪等性レコード、予算台帳、フィーチャーフラグ、Task/Competition レコードは
//! すべてこのストアに置きます。ワーカープロセスを水平に増やしても
//! 正しさが保たれるよう、操作は「単一キーの原子操作」に限定しています
//! （マルチキー・トランザクションは使わない）。
//!
//! # 実装
//! - **InMemoryStore**: 単一プロセス用（impls::inmem_store）
//! - 分散キャッシュ実装は同じ trait を満たせばよい

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("value at key {key} is not an integer counter")]
    NotACounter { key: String },
}

#[async_trait]
pub trait SharedStore: Send + Sync {
    /// Returns the live (non-expired) value at `key`.
    async fn get(&self, key: &str) -> Result<Option<Value>, StoreError>;

    /// Unconditional write.
    async fn put(&self, key: &str, value: Value, ttl: Option<Duration>) -> Result<(), StoreError>;

    /// "Set if absent". Returns `true` when this caller created the key.
    /// An expired value counts as absent.
    async fn set_if_absent(
        &self,
        key: &str,
        value: Value,
        ttl: Option<Duration>,
    ) -> Result<bool, StoreError>;

    /// Replaces the value only if the current live value equals `expected`.
    async fn compare_and_swap(
        &self,
        key: &str,
        expected: &Value,
        new: Value,
        ttl: Option<Duration>,
    ) -> Result<bool, StoreError>;

    /// Deletes the key only if the current live value equals `expected`.
    async fn remove_if(&self, key: &str, expected: &Value) -> Result<bool, StoreError>;

    /// Atomic integer add; a missing key starts at 0. Returns the new value.
    async fn incr_by(&self, key: &str, delta: i64) -> Result<i64, StoreError>;
}
