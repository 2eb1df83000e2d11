use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;

/// Cheap shared counters for hub traffic; cloned freely across tasks.
#[derive(Clone)]
pub struct HubObservability {
    started_at: Instant,
    op_ok_total: Arc<dashmap::DashMap<String, AtomicU64>>,
    op_err_total: Arc<dashmap::DashMap<String, AtomicU64>>,
}

impl HubObservability {
    pub fn new() -> Self {
        Self {
            started_at: Instant::now(),
            op_ok_total: Arc::new(dashmap::DashMap::new()),
            op_err_total: Arc::new(dashmap::DashMap::new()),
        }
    }

    pub fn record_ok(&self, op: &str) {
        let entry = self
            .op_ok_total
            .entry(op.to_string())
            .or_insert_with(|| AtomicU64::new(0));
        entry.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_err(&self, code: &str) {
        let entry = self
            .op_err_total
            .entry(code.to_string())
            .or_insert_with(|| AtomicU64::new(0));
        entry.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> ObservabilitySnapshot {
        let mut ops = BTreeMap::new();
        for item in self.op_ok_total.iter() {
            ops.insert(item.key().clone(), item.value().load(Ordering::Relaxed));
        }
        let mut errors = BTreeMap::new();
        for item in self.op_err_total.iter() {
            errors.insert(item.key().clone(), item.value().load(Ordering::Relaxed));
        }
        ObservabilitySnapshot {
            uptime: self.started_at.elapsed(),
            op_ok_total: ops,
            op_err_total: errors,
        }
    }
}

impl Default for HubObservability {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ObservabilitySnapshot {
    #[serde(with = "humantime_serde")]
    pub uptime: Duration,
    pub op_ok_total: BTreeMap<String, u64>,
    pub op_err_total: BTreeMap<String, u64>,
}
