//! In-process metrics registry.
//!
//! Counters, gauges and histogram summaries keyed by name plus sorted labels
//! (`tasks_total{status="completed",tenant="acme"}`). An external metrics
//! backend scrapes [`Metrics::snapshot`]; it is also the authoritative source
//! the SLO tracker's burn rate is refreshed from.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

use serde::{Deserialize, Serialize};

pub const TASKS_TOTAL: &str = "tasks_total";
pub const COMPETITIONS_TOTAL: &str = "competitions_total";
pub const TASK_DURATION_MS: &str = "task_duration_ms";
pub const COST_PER_COMPETITION: &str = "cost_per_competition";
pub const BUDGET_BURN_RATE: &str = "budget_burn_rate";
pub const WIN_RATE: &str = "win_rate";

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct HistogramSummary {
    pub count: u64,
    pub sum: f64,
    pub min: f64,
    pub max: f64,
}

impl HistogramSummary {
    fn observe(&mut self, value: f64) {
        if self.count == 0 {
            self.min = value;
            self.max = value;
        } else {
            self.min = self.min.min(value);
            self.max = self.max.max(value);
        }
        self.count += 1;
        self.sum += value;
    }

    pub fn mean(&self) -> Option<f64> {
        (self.count > 0).then(|| self.sum / self.count as f64)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub counters: BTreeMap<String, u64>,
    pub gauges: BTreeMap<String, f64>,
    pub histograms: BTreeMap<String, HistogramSummary>,
}

impl MetricsSnapshot {
    /// Sum of a counter across all label sets.
    pub fn counter_total(&self, name: &str) -> u64 {
        self.counters
            .iter()
            .filter(|(key, _)| metric_name(key) == name)
            .map(|(_, v)| *v)
            .sum()
    }
}

fn metric_name(key: &str) -> &str {
    key.split('{').next().unwrap_or(key)
}

#[derive(Debug, Default)]
pub struct Metrics {
    inner: Mutex<MetricsSnapshot>,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MetricsSnapshot> {
        // A panic while holding the lock cannot leave the maps half-written.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn incr(&self, name: &str, labels: &[(&str, &str)]) {
        *self.lock().counters.entry(key(name, labels)).or_insert(0) += 1;
    }

    pub fn set_gauge(&self, name: &str, labels: &[(&str, &str)], value: f64) {
        self.lock().gauges.insert(key(name, labels), value);
    }

    pub fn observe(&self, name: &str, labels: &[(&str, &str)], value: f64) {
        self.lock()
            .histograms
            .entry(key(name, labels))
            .or_default()
            .observe(value);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        self.lock().clone()
    }
}

fn key(name: &str, labels: &[(&str, &str)]) -> String {
    if labels.is_empty() {
        return name.to_string();
    }
    let mut sorted: Vec<_> = labels.to_vec();
    sorted.sort_unstable();
    let rendered: Vec<String> = sorted
        .iter()
        .map(|(k, v)| format!("{k}=\"{v}\""))
        .collect();
    format!("{name}{{{}}}", rendered.join(","))
}
