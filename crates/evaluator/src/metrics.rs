use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Process-lifetime counters for the evaluation loop. The evaluator
/// swallows per-condition and per-fetch errors by design; these counters
/// are where those errors become observable.
#[derive(Debug, Default)]
pub struct EvaluatorMetrics {
    pub cycles: AtomicU64,
    pub fingerprints_evaluated: AtomicU64,
    pub triggers_emitted: AtomicU64,
    pub groups_fetched: AtomicU64,
    pub groups_skipped: AtomicU64,
    pub indeterminate: AtomicU64,
    pub eval_errors: AtomicU64,
}

/// A point-in-time copy of the counters, for the engine's status query.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct MetricsSnapshot {
    pub cycles: u64,
    pub fingerprints_evaluated: u64,
    pub triggers_emitted: u64,
    pub groups_fetched: u64,
    pub groups_skipped: u64,
    pub indeterminate: u64,
    pub eval_errors: u64,
}

impl EvaluatorMetrics {
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            cycles: self.cycles.load(Ordering::Relaxed),
            fingerprints_evaluated: self.fingerprints_evaluated.load(Ordering::Relaxed),
            triggers_emitted: self.triggers_emitted.load(Ordering::Relaxed),
            groups_fetched: self.groups_fetched.load(Ordering::Relaxed),
            groups_skipped: self.groups_skipped.load(Ordering::Relaxed),
            indeterminate: self.indeterminate.load(Ordering::Relaxed),
            eval_errors: self.eval_errors.load(Ordering::Relaxed),
        }
    }

    pub fn add(&self, counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }
}
