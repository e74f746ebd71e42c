//! InMemoryStore - SharedStore の開発用実装
//!
//! 単一の Mutex でキー空間全体を保護するので、各操作は自明に原子的です。
//! TTL は Clock 基準で評価し、期限切れのエントリは読み取り時に捨てます。
//! 書き込み時にも一定間隔（デフォルト 60 秒）で期限切れキーを掃除するので、
//! 読まれないまま失効したキーでマップが膨らみ続けることはありません。

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::debug;

use crate::ports::{Clock, SharedStore, StoreError};

const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Debug, Clone)]
struct Entry {
    value: Value,
    expires_at: Option<DateTime<Utc>>,
}

impl Entry {
    fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_none_or(|at| now < at)
    }
}

#[derive(Debug)]
struct Entries {
    map: HashMap<String, Entry>,
    next_sweep: DateTime<Utc>,
}

impl Entries {
    fn live(&self, key: &str, now: DateTime<Utc>) -> Option<&Entry> {
        self.map.get(key).filter(|e| e.is_live(now))
    }

    fn purge(&mut self, now: DateTime<Utc>) -> usize {
        let before = self.map.len();
        self.map.retain(|_, e| e.is_live(now));
        before - self.map.len()
    }

    /// Write-path eviction, at most once per `every`.
    fn sweep(&mut self, now: DateTime<Utc>, every: chrono::Duration) {
        if now < self.next_sweep {
            return;
        }
        self.next_sweep = now + every;
        let evicted = self.purge(now);
        if evicted > 0 {
            debug!(evicted, remaining = self.map.len(), "expired keys evicted");
        }
    }
}

pub struct InMemoryStore {
    entries: Mutex<Entries>,
    sweep_every: chrono::Duration,
    clock: Arc<dyn Clock>,
}

impl InMemoryStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        let sweep_every = to_chrono(DEFAULT_SWEEP_INTERVAL);
        Self {
            entries: Mutex::new(Entries {
                map: HashMap::new(),
                next_sweep: clock.now() + sweep_every,
            }),
            sweep_every,
            clock,
        }
    }

    /// How often writes evict expired keys.
    pub fn with_sweep_interval(mut self, every: Duration) -> Self {
        self.sweep_every = to_chrono(every);
        self.entries.get_mut().next_sweep = self.clock.now() + self.sweep_every;
        self
    }

    fn expiry(&self, ttl: Option<Duration>) -> Option<DateTime<Utc>> {
        ttl.map(|ttl| {
            self.clock
                .now()
                .checked_add_signed(to_chrono(ttl))
                .unwrap_or(DateTime::<Utc>::MAX_UTC)
        })
    }

    /// Number of live keys (for tests and diagnostics).
    pub async fn len(&self) -> usize {
        let now = self.clock.now();
        let entries = self.entries.lock().await;
        entries.map.values().filter(|e| e.is_live(now)).count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Drops every expired entry now, regardless of the sweep interval.
    pub async fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        self.entries.lock().await.purge(now)
    }
}

fn to_chrono(d: Duration) -> chrono::Duration {
    chrono::Duration::from_std(d).unwrap_or(chrono::Duration::MAX)
}

#[async_trait]
impl SharedStore for InMemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Value>, StoreError> {
        let now = self.clock.now();
        let entries = self.entries.lock().await;
        Ok(entries.live(key, now).map(|e| e.value.clone()))
    }

    async fn put(&self, key: &str, value: Value, ttl: Option<Duration>) -> Result<(), StoreError> {
        let now = self.clock.now();
        let expires_at = self.expiry(ttl);
        let mut entries = self.entries.lock().await;
        entries.sweep(now, self.sweep_every);
        entries.map.insert(key.to_string(), Entry { value, expires_at });
        Ok(())
    }

    async fn set_if_absent(
        &self,
        key: &str,
        value: Value,
        ttl: Option<Duration>,
    ) -> Result<bool, StoreError> {
        let now = self.clock.now();
        let expires_at = self.expiry(ttl);
        let mut entries = self.entries.lock().await;
        entries.sweep(now, self.sweep_every);
        if entries.live(key, now).is_some() {
            return Ok(false);
        }
        entries.map.insert(key.to_string(), Entry { value, expires_at });
        Ok(true)
    }

    async fn compare_and_swap(
        &self,
        key: &str,
        expected: &Value,
        new: Value,
        ttl: Option<Duration>,
    ) -> Result<bool, StoreError> {
        let now = self.clock.now();
        let expires_at = self.expiry(ttl);
        let mut entries = self.entries.lock().await;
        entries.sweep(now, self.sweep_every);
        match entries.live(key, now) {
            Some(current) if &current.value == expected => {
                entries.map.insert(
                    key.to_string(),
                    Entry {
                        value: new,
                        expires_at,
                    },
                );
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn remove_if(&self, key: &str, expected: &Value) -> Result<bool, StoreError> {
        let now = self.clock.now();
        let mut entries = self.entries.lock().await;
        entries.sweep(now, self.sweep_every);
        match entries.live(key, now) {
            Some(current) if &current.value == expected => {
                entries.map.remove(key);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn incr_by(&self, key: &str, delta: i64) -> Result<i64, StoreError> {
        let now = self.clock.now();
        let mut entries = self.entries.lock().await;
        entries.sweep(now, self.sweep_every);
        let (current, expires_at) = match entries.live(key, now) {
            Some(entry) => {
                let n = entry.value.as_i64().ok_or_else(|| StoreError::NotACounter {
                    key: key.to_string(),
                })?;
                (n, entry.expires_at)
            }
            None => (0, None),
        };
        let next = current.saturating_add(delta);
        entries.map.insert(
            key.to_string(),
            Entry {
                value: Value::from(next),
                expires_at,
            },
        );
        Ok(next)
    }
}
