//! SLO error-budget tracker.
//!
//! Admission reads a cached burn rate; nothing on the hot path does I/O. The
//! cache is refreshed periodically from a [`BurnRateLoader`] (the metrics
//! backend in deployment, [`CallWindow`] in-process).

use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::CoreError;
use crate::ports::{BurnRateLoader, Clock};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SloConfig {
    /// Rolling window the error budget is measured over.
    pub window_secs: u64,
    /// Degraded dependency calls the error budget allows per window.
    pub allotted_calls_per_window: u64,
    pub refresh_interval_ms: u64,
}

impl Default for SloConfig {
    fn default() -> Self {
        Self {
            window_secs: 3_600,
            allotted_calls_per_window: 1_000,
            refresh_interval_ms: 15_000,
        }
    }
}

/// Per-source API call accounting in one-second buckets.
pub struct CallWindow {
    clock: Arc<dyn Clock>,
    window: chrono::Duration,
    allotted: u64,
    inner: Mutex<CallWindowInner>,
}

#[derive(Default)]
struct CallWindowInner {
    buckets: VecDeque<(i64, u64)>,
    totals: BTreeMap<String, u64>,
}

impl CallWindow {
    pub fn new(clock: Arc<dyn Clock>, config: &SloConfig) -> Self {
        let secs = i64::try_from(config.window_secs).unwrap_or(i64::MAX);
        Self {
            clock,
            window: chrono::Duration::try_seconds(secs).unwrap_or(chrono::Duration::MAX),
            allotted: config.allotted_calls_per_window.max(1),
            inner: Mutex::new(CallWindowInner::default()),
        }
    }

    pub fn record(&self, source: &str, count: u64) {
        let now = self.clock.now().timestamp();
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        *inner.totals.entry(source.to_string()).or_insert(0) += count;
        match inner.buckets.back_mut() {
            Some((second, n)) if *second == now => *n += count,
            _ => inner.buckets.push_back((now, count)),
        }
    }

    /// Calls recorded inside the window ending now.
    pub fn consumed(&self) -> u64 {
        let cutoff = self.cutoff(self.clock.now());
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        while inner.buckets.front().is_some_and(|(second, _)| *second <= cutoff) {
            inner.buckets.pop_front();
        }
        inner.buckets.iter().map(|(_, n)| n).sum()
    }

    fn cutoff(&self, now: DateTime<Utc>) -> i64 {
        now.checked_sub_signed(self.window)
            .map(|t| t.timestamp())
            .unwrap_or(i64::MIN)
    }

    /// Lifetime totals per source.
    pub fn totals(&self) -> BTreeMap<String, u64> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).totals.clone()
    }
}

#[async_trait]
impl BurnRateLoader for CallWindow {
    async fn load_burn_rate(&self) -> Result<f64, CoreError> {
        Ok(self.consumed() as f64 / self.allotted as f64)
    }
}

pub struct SloTracker {
    /// f64 bits.
    burn_rate: AtomicU64,
    loader: Arc<dyn BurnRateLoader>,
    calls: Arc<CallWindow>,
}

impl SloTracker {
    pub fn new(loader: Arc<dyn BurnRateLoader>, calls: Arc<CallWindow>) -> Self {
        Self {
            burn_rate: AtomicU64::new(0f64.to_bits()),
            loader,
            calls,
        }
    }

    /// Tracker whose burn rate is computed from its own call window.
    pub fn in_process(calls: Arc<CallWindow>) -> Self {
        let loader: Arc<dyn BurnRateLoader> = calls.clone();
        Self::new(loader, calls)
    }

    pub fn record_api_call(&self, source: &str, count: u64) {
        self.calls.record(source, count);
    }

    pub fn api_call_totals(&self) -> BTreeMap<String, u64> {
        self.calls.totals()
    }

    pub fn burn_rate(&self) -> f64 {
        f64::from_bits(self.burn_rate.load(Ordering::Acquire))
    }

    pub fn set_burn_rate(&self, burn_rate: f64) {
        self.burn_rate.store(burn_rate.to_bits(), Ordering::Release);
    }

    pub fn would_exceed_budget(&self) -> bool {
        self.burn_rate() > 1.0
    }

    /// Fails fast with `BudgetExhausted` once the error budget is spent.
    pub fn check(&self) -> Result<(), CoreError> {
        if self.would_exceed_budget() {
            let burn_rate = self.burn_rate();
            info!(burn_rate, "admission rejected: error budget exhausted");
            return Err(CoreError::BudgetExhausted { burn_rate });
        }
        Ok(())
    }

    /// Reloads the cached value. A failed load keeps the previous value.
    pub async fn refresh(&self) -> f64 {
        match self.loader.load_burn_rate().await {
            Ok(rate) if rate.is_finite() && rate >= 0.0 => {
                self.set_burn_rate(rate);
                debug!(burn_rate = rate, "burn rate refreshed");
                rate
            }
            Ok(rate) => {
                warn!(burn_rate = rate, "ignoring invalid burn rate");
                self.burn_rate()
            }
            Err(e) => {
                warn!(error = %e, "burn rate refresh failed; keeping cached value");
                self.burn_rate()
            }
        }
    }

    /// Refreshes every `interval` until `shutdown` flips to true.
    pub fn spawn_refresh(
        self: Arc<Self>,
        interval: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        self.refresh().await;
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
        })
    }
}
