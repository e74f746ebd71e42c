//! Circuit breaker with a single half-open probe.
//!
//! State transitions:
//! - Closed -> Open: failures within the rolling window reach the threshold
//! - Open -> HalfOpen: `reset_timeout` elapsed; exactly one probe is let through
//! - HalfOpen -> Closed: probe succeeded (failure history cleared)
//! - HalfOpen -> Open: probe failed (cooldown restarts from now)
//!
//! A call never surfaces the dependency's error. Short-circuits, timeouts and
//! failures all answer with the caller-supplied fallback and are flagged
//! `degraded` so the caller can record it.
//!
//! The inner state sits behind a std Mutex that is never held across an await.

use std::collections::VecDeque;
use std::fmt::Display;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::ports::Clock;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BreakerConfig {
    pub failure_threshold: u32,
    pub call_timeout_ms: u64,
    pub failure_window_ms: u64,
    pub reset_timeout_ms: u64,
}

impl BreakerConfig {
    /// News-AI: 50 failures, 3s call timeout.
    pub fn news_ai() -> Self {
        Self {
            failure_threshold: 50,
            call_timeout_ms: 3_000,
            failure_window_ms: 60_000,
            reset_timeout_ms: 30_000,
        }
    }

    /// Share-API: 30 failures, 2s call timeout.
    pub fn share_api() -> Self {
        Self {
            failure_threshold: 30,
            call_timeout_ms: 2_000,
            failure_window_ms: 60_000,
            reset_timeout_ms: 30_000,
        }
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self::news_ai()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

/// Serializable snapshot of one breaker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CircuitBreakerState {
    pub dependency_id: String,
    pub state: BreakerState,
    pub failure_count: u32,
    pub opened_at: Option<DateTime<Utc>>,
    pub reset_timeout_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FallbackReason {
    CircuitOpen,
    Timeout,
    Failure,
}

/// A dependency answer, live or fallback.
#[derive(Debug, Clone, PartialEq)]
pub struct Guarded<T> {
    pub value: T,
    pub degraded: bool,
    pub fallback_reason: Option<FallbackReason>,
}

impl<T> Guarded<T> {
    fn live(value: T) -> Self {
        Self {
            value,
            degraded: false,
            fallback_reason: None,
        }
    }

    fn fallback(value: T, reason: FallbackReason) -> Self {
        Self {
            value,
            degraded: true,
            fallback_reason: Some(reason),
        }
    }
}

#[derive(Debug)]
struct Inner {
    state: BreakerState,
    failures: VecDeque<DateTime<Utc>>,
    opened_at: Option<DateTime<Utc>>,
    probe_in_flight: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Permit {
    Normal,
    Probe,
}

pub struct CircuitBreaker {
    dependency_id: String,
    cfg: BreakerConfig,
    clock: Arc<dyn Clock>,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    pub fn new(dependency_id: impl Into<String>, cfg: BreakerConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            dependency_id: dependency_id.into(),
            cfg,
            clock,
            inner: Mutex::new(Inner {
                state: BreakerState::Closed,
                failures: VecDeque::new(),
                opened_at: None,
                probe_in_flight: false,
            }),
        }
    }

    pub fn dependency_id(&self) -> &str {
        &self.dependency_id
    }

    pub fn config(&self) -> &BreakerConfig {
        &self.cfg
    }

    /// Runs `op` through the breaker, answering with `fallback()` when the
    /// circuit is open, the call times out, or the call fails.
    pub async fn call<T, E, F, Fut>(&self, op: F, fallback: impl FnOnce() -> T) -> Guarded<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display,
    {
        let Some(permit) = self.try_acquire() else {
            debug!(dependency = %self.dependency_id, "circuit open, short-circuiting");
            return Guarded::fallback(fallback(), FallbackReason::CircuitOpen);
        };

        let mut guard = ProbeGuard {
            breaker: self,
            armed: permit == Permit::Probe,
        };

        let result = tokio::time::timeout(self.cfg.call_timeout(), op()).await;
        guard.armed = false;

        match result {
            Ok(Ok(value)) => {
                self.on_success(permit);
                Guarded::live(value)
            }
            Ok(Err(e)) => {
                debug!(dependency = %self.dependency_id, error = %e, "dependency call failed");
                self.on_failure(permit);
                Guarded::fallback(fallback(), FallbackReason::Failure)
            }
            Err(_) => {
                debug!(
                    dependency = %self.dependency_id,
                    timeout_ms = self.cfg.call_timeout_ms,
                    "dependency call timed out"
                );
                self.on_failure(permit);
                Guarded::fallback(fallback(), FallbackReason::Timeout)
            }
        }
    }

    pub fn snapshot(&self) -> CircuitBreakerState {
        let now = self.clock.now();
        let mut inner = self.lock();
        self.prune(&mut inner, now);
        CircuitBreakerState {
            dependency_id: self.dependency_id.clone(),
            state: inner.state,
            failure_count: inner.failures.len() as u32,
            opened_at: inner.opened_at,
            reset_timeout_ms: self.cfg.reset_timeout_ms,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn prune(&self, inner: &mut Inner, now: DateTime<Utc>) {
        let window = chrono::Duration::milliseconds(self.cfg.failure_window_ms as i64);
        while inner.failures.front().is_some_and(|at| *at + window <= now) {
            inner.failures.pop_front();
        }
    }

    fn try_acquire(&self) -> Option<Permit> {
        let now = self.clock.now();
        let mut inner = self.lock();
        match inner.state {
            BreakerState::Closed => Some(Permit::Normal),
            BreakerState::Open => {
                let reset = chrono::Duration::milliseconds(self.cfg.reset_timeout_ms as i64);
                let cooled = inner.opened_at.is_none_or(|at| now >= at + reset);
                if cooled {
                    inner.state = BreakerState::HalfOpen;
                    inner.probe_in_flight = true;
                    debug!(dependency = %self.dependency_id, "circuit half-open, probing");
                    Some(Permit::Probe)
                } else {
                    None
                }
            }
            BreakerState::HalfOpen => {
                if inner.probe_in_flight {
                    None
                } else {
                    inner.probe_in_flight = true;
                    Some(Permit::Probe)
                }
            }
        }
    }

    fn on_success(&self, permit: Permit) {
        if permit != Permit::Probe {
            return;
        }
        let mut inner = self.lock();
        inner.state = BreakerState::Closed;
        inner.failures.clear();
        inner.opened_at = None;
        inner.probe_in_flight = false;
        info!(dependency = %self.dependency_id, "circuit closed after successful probe");
    }

    fn on_failure(&self, permit: Permit) {
        let now = self.clock.now();
        let mut inner = self.lock();
        match permit {
            Permit::Probe => {
                inner.state = BreakerState::Open;
                inner.opened_at = Some(now);
                inner.probe_in_flight = false;
                warn!(dependency = %self.dependency_id, "probe failed, circuit re-opened");
            }
            Permit::Normal => {
                inner.failures.push_back(now);
                self.prune(&mut inner, now);
                let count = inner.failures.len() as u32;
                if inner.state == BreakerState::Closed && count >= self.cfg.failure_threshold {
                    inner.state = BreakerState::Open;
                    inner.opened_at = Some(now);
                    warn!(
                        dependency = %self.dependency_id,
                        failures = count,
                        "circuit opened"
                    );
                }
            }
        }
    }
}

/// Re-opens the circuit if a probe is dropped before it resolves, so an
/// abandoned probe cannot wedge the breaker in HalfOpen.
struct ProbeGuard<'a> {
    breaker: &'a CircuitBreaker,
    armed: bool,
}

impl Drop for ProbeGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.breaker.on_failure(Permit::Probe);
        }
    }
}
