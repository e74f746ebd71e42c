//! Idempotency gate.
//!
//! One record per (tenant, key) at `idem:{tenant}:{key}`:
//! - absent            -> reserve with set-if-absent, then execute
//! - reserved, live    -> wait for the owner to finish and replay its response
//! - reserved, stale   -> take over with compare-and-swap and execute
//! - completed         -> replay the stored response, never re-execute
//!
//! Failed executions release the reservation so the client can resubmit.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};
use ulid::Ulid;

use crate::domain::{IdempotencyKey, TenantId};
use crate::error::CoreError;
use crate::ports::{Clock, SharedStore};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IdempotencyConfig {
    /// How long a completed response is replayed.
    pub ttl_secs: u64,
    /// A reservation older than this is considered abandoned.
    pub liveness_timeout_ms: u64,
    pub poll_interval_ms: u64,
    /// How long a duplicate waits for the in-flight original.
    pub wait_timeout_ms: u64,
}

impl Default for IdempotencyConfig {
    fn default() -> Self {
        Self {
            ttl_secs: 24 * 60 * 60,
            liveness_timeout_ms: 30_000,
            poll_interval_ms: 25,
            wait_timeout_ms: 10_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdempotencyRecord {
    pub key: IdempotencyKey,
    pub tenant_id: TenantId,
    /// Random token of the caller holding the reservation.
    pub owner: String,
    pub response_snapshot: Option<Value>,
    pub reserved_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// Result of passing through the gate.
#[derive(Debug, Clone, PartialEq)]
pub struct GateResponse {
    pub response: Value,
    /// The response came from an earlier execution.
    pub replayed: bool,
}

pub struct IdempotencyGate {
    store: Arc<dyn SharedStore>,
    clock: Arc<dyn Clock>,
    config: IdempotencyConfig,
}

enum Claim {
    Owned(Value),
    Replay(Value),
}

impl IdempotencyGate {
    pub fn new(store: Arc<dyn SharedStore>, clock: Arc<dyn Clock>, config: IdempotencyConfig) -> Self {
        Self {
            store,
            clock,
            config,
        }
    }

    fn store_key(tenant: &TenantId, key: &IdempotencyKey) -> String {
        format!("idem:{tenant}:{key}")
    }

    fn ttl(&self) -> Duration {
        Duration::from_secs(self.config.ttl_secs)
    }

    fn expires_from(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        chrono::Duration::from_std(self.ttl())
            .ok()
            .and_then(|ttl| now.checked_add_signed(ttl))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    fn reservation(&self, tenant: &TenantId, key: &IdempotencyKey) -> Result<Value, CoreError> {
        let now = self.clock.now();
        let record = IdempotencyRecord {
            key: key.clone(),
            tenant_id: tenant.clone(),
            owner: Ulid::new().to_string(),
            response_snapshot: None,
            reserved_at: now,
            expires_at: self.expires_from(now),
        };
        Ok(serde_json::to_value(record)?)
    }

    fn is_stale(&self, record: &IdempotencyRecord) -> bool {
        let liveness = chrono::Duration::milliseconds(
            i64::try_from(self.config.liveness_timeout_ms).unwrap_or(i64::MAX / 1_000),
        );
        self.clock.now() - record.reserved_at > liveness
    }

    pub async fn lookup(
        &self,
        tenant: &TenantId,
        key: &IdempotencyKey,
    ) -> Result<Option<IdempotencyRecord>, CoreError> {
        match self.store.get(&Self::store_key(tenant, key)).await? {
            Some(raw) => Ok(Some(serde_json::from_value(raw)?)),
            None => Ok(None),
        }
    }

    /// Runs `execute` at most once per (tenant, key) and returns its response
    /// to every caller presenting the same pair.
    pub async fn run<F, Fut>(
        &self,
        tenant: &TenantId,
        key: &IdempotencyKey,
        execute: F,
    ) -> Result<GateResponse, CoreError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Value, CoreError>>,
    {
        let reservation = match self.claim(tenant, key).await? {
            Claim::Replay(response) => {
                debug!(%tenant, %key, "idempotent replay");
                return Ok(GateResponse {
                    response,
                    replayed: true,
                });
            }
            Claim::Owned(reservation) => reservation,
        };

        let store_key = Self::store_key(tenant, key);
        match execute().await {
            Ok(response) => {
                let mut record: IdempotencyRecord = serde_json::from_value(reservation.clone())?;
                record.response_snapshot = Some(response.clone());
                record.expires_at = self.expires_from(self.clock.now());
                let completed = serde_json::to_value(record)?;
                let stored = self
                    .store
                    .compare_and_swap(&store_key, &reservation, completed, Some(self.ttl()))
                    .await?;
                if !stored {
                    warn!(%tenant, %key, "reservation was taken over before completion");
                }
                Ok(GateResponse {
                    response,
                    replayed: false,
                })
            }
            Err(err) => {
                self.store.remove_if(&store_key, &reservation).await?;
                debug!(%tenant, %key, error = %err, "execution failed; reservation released");
                Err(err)
            }
        }
    }

    async fn claim(&self, tenant: &TenantId, key: &IdempotencyKey) -> Result<Claim, CoreError> {
        let store_key = Self::store_key(tenant, key);
        let poll = Duration::from_millis(self.config.poll_interval_ms.max(1));
        let deadline = tokio::time::Instant::now() + Duration::from_millis(self.config.wait_timeout_ms);

        loop {
            match self.store.get(&store_key).await? {
                None => {
                    let reservation = self.reservation(tenant, key)?;
                    if self
                        .store
                        .set_if_absent(&store_key, reservation.clone(), Some(self.ttl()))
                        .await?
                    {
                        return Ok(Claim::Owned(reservation));
                    }
                    // Lost the race; re-read.
                    continue;
                }
                Some(raw) => {
                    let existing: IdempotencyRecord = serde_json::from_value(raw.clone())?;
                    if let Some(response) = existing.response_snapshot {
                        return Ok(Claim::Replay(response));
                    }
                    if self.is_stale(&existing) {
                        let reservation = self.reservation(tenant, key)?;
                        if self
                            .store
                            .compare_and_swap(&store_key, &raw, reservation.clone(), Some(self.ttl()))
                            .await?
                        {
                            warn!(%tenant, %key, "taking over stale reservation");
                            return Ok(Claim::Owned(reservation));
                        }
                        continue;
                    }
                }
            }

            if tokio::time::Instant::now() >= deadline {
                return Err(CoreError::InFlight(key.to_string()));
            }
            tokio::time::sleep(poll).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::impls::InMemoryStore;
    use crate::ports::FixedClock;
    use chrono::TimeZone;
    use serde_json::json;

    fn gate() -> (Arc<IdempotencyGate>, FixedClock) {
        let clock = FixedClock::new(Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap());
        let store = Arc::new(InMemoryStore::new(Arc::new(clock.clone())));
        let gate = IdempotencyGate::new(store, Arc::new(clock.clone()), IdempotencyConfig::default());
        (Arc::new(gate), clock)
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_duplicates_execute_once() {
        let (gate, _) = gate();
        let executions = Arc::new(AtomicUsize::new(0));

        let mut joins = Vec::new();
        for _ in 0..16 {
            let gate = Arc::clone(&gate);
            let executions = Arc::clone(&executions);
            joins.push(tokio::spawn(async move {
                gate.run(&TenantId::new("acme"), &IdempotencyKey::new("k-1"), || async move {
                    let n = executions.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    Ok(json!({ "id": format!("task-{n}") }))
                })
                .await
                .unwrap()
            }));
        }

        let mut responses = Vec::new();
        for j in joins {
            responses.push(j.await.unwrap());
        }
        assert_eq!(executions.load(Ordering::SeqCst), 1);
        assert!(responses.iter().all(|r| r.response == json!({ "id": "task-0" })));
        assert_eq!(responses.iter().filter(|r| !r.replayed).count(), 1);
    }

    #[tokio::test]
    async fn keys_are_scoped_per_tenant() {
        let (gate, _) = gate();
        let key = IdempotencyKey::new("same");
        let a = gate
            .run(&TenantId::new("a"), &key, || async { Ok(json!("a")) })
            .await
            .unwrap();
        let b = gate
            .run(&TenantId::new("b"), &key, || async { Ok(json!("b")) })
            .await
            .unwrap();
        assert_eq!((a.response, b.response), (json!("a"), json!("b")));
    }

    #[tokio::test]
    async fn failure_releases_the_key() {
        let (gate, _) = gate();
        let tenant = TenantId::new("acme");
        let key = IdempotencyKey::new("k");

        let err = gate
            .run(&tenant, &key, || async { Err(CoreError::Validation("nope".into())) })
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::Validation(_)));
        assert!(gate.lookup(&tenant, &key).await.unwrap().is_none());

        let ok = gate.run(&tenant, &key, || async { Ok(json!(1)) }).await.unwrap();
        assert!(!ok.replayed);
    }

    #[tokio::test]
    async fn completed_response_expires_after_ttl() {
        let (gate, clock) = gate();
        let tenant = TenantId::new("acme");
        let key = IdempotencyKey::new("k");
        gate.run(&tenant, &key, || async { Ok(json!(1)) }).await.unwrap();

        let replay = gate.run(&tenant, &key, || async { Ok(json!(2)) }).await.unwrap();
        assert_eq!((replay.response, replay.replayed), (json!(1), true));

        clock.advance(chrono::Duration::hours(25));
        let fresh = gate.run(&tenant, &key, || async { Ok(json!(3)) }).await.unwrap();
        assert_eq!((fresh.response, fresh.replayed), (json!(3), false));
    }

    #[tokio::test]
    async fn stale_reservation_is_taken_over() {
        let (gate, clock) = gate();
        let tenant = TenantId::new("acme");
        let key = IdempotencyKey::new("k");

        // A crashed owner left a reservation behind.
        let abandoned = gate.reservation(&tenant, &key).unwrap();
        gate.store
            .set_if_absent(&IdempotencyGate::store_key(&tenant, &key), abandoned, None)
            .await
            .unwrap();

        clock.advance(chrono::Duration::seconds(31));
        let res = gate.run(&tenant, &key, || async { Ok(json!("retried")) }).await.unwrap();
        assert_eq!(res.response, json!("retried"));
        assert!(!res.replayed);
    }

    #[tokio::test(start_paused = true)]
    async fn live_reservation_makes_duplicates_wait_then_give_up() {
        let (gate, _) = gate();
        let tenant = TenantId::new("acme");
        let key = IdempotencyKey::new("k");
        let held = gate.reservation(&tenant, &key).unwrap();
        gate.store
            .set_if_absent(&IdempotencyGate::store_key(&tenant, &key), held, None)
            .await
            .unwrap();

        let err = gate
            .run(&tenant, &key, || async { Ok(json!("dup")) })
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::InFlight(_)));
    }
}
