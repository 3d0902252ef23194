//! Metrics and reporting for evaluation runs.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Evaluation metrics (thread-safe counters).
#[derive(Debug, Clone)]
pub struct EvalMetrics {
    /// Root evaluations started
    pub evaluations_started: Arc<AtomicU64>,
    /// Root evaluations that completed
    pub evaluations_completed: Arc<AtomicU64>,
    /// Root evaluations that failed with a fatal error
    pub evaluations_failed: Arc<AtomicU64>,
    /// Runs resumed from a checkpoint
    pub cache_hits: Arc<AtomicU64>,
    /// Runs folded from the initial state
    pub cache_misses: Arc<AtomicU64>,
    /// Interactions folded into state
    pub interactions_replayed: Arc<AtomicU64>,
    /// Interactions that did not complete ok
    pub interactions_invalid: Arc<AtomicU64>,
    /// Nested foreign-state reads served
    pub foreign_reads: Arc<AtomicU64>,
    /// Checkpoints committed to the cache
    pub checkpoints_written: Arc<AtomicU64>,
    /// Total gas charged across all interactions
    pub gas_charged: Arc<AtomicU64>,
}

impl Default for EvalMetrics {
    fn default() -> Self {
        Self {
            evaluations_started: Arc::new(AtomicU64::new(0)),
            evaluations_completed: Arc::new(AtomicU64::new(0)),
            evaluations_failed: Arc::new(AtomicU64::new(0)),
            cache_hits: Arc::new(AtomicU64::new(0)),
            cache_misses: Arc::new(AtomicU64::new(0)),
            interactions_replayed: Arc::new(AtomicU64::new(0)),
            interactions_invalid: Arc::new(AtomicU64::new(0)),
            foreign_reads: Arc::new(AtomicU64::new(0)),
            checkpoints_written: Arc::new(AtomicU64::new(0)),
            gas_charged: Arc::new(AtomicU64::new(0)),
        }
    }
}

impl EvalMetrics {
    pub fn record_evaluation_started(&self) {
        self.evaluations_started.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_evaluation_completed(&self) {
        self.evaluations_completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_evaluation_failed(&self) {
        self.evaluations_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cache_hit(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cache_miss(&self) {
        self.cache_misses.fetch_add(1, Ordering::Relaxed);
    }

    /// Record one folded interaction and the gas it consumed.
    pub fn record_interaction(&self, valid: bool, gas_used: u64) {
        self.interactions_replayed.fetch_add(1, Ordering::Relaxed);
        if !valid {
            self.interactions_invalid.fetch_add(1, Ordering::Relaxed);
        }
        self.gas_charged.fetch_add(gas_used, Ordering::Relaxed);
    }

    pub fn record_foreign_read(&self) {
        self.foreign_reads.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_checkpoint(&self) {
        self.checkpoints_written.fetch_add(1, Ordering::Relaxed);
    }

    /// Get a snapshot of current metrics.
    pub fn snapshot(&self) -> EvalMetricsSnapshot {
        EvalMetricsSnapshot {
            evaluations_started: self.evaluations_started.load(Ordering::Relaxed),
            evaluations_completed: self.evaluations_completed.load(Ordering::Relaxed),
            evaluations_failed: self.evaluations_failed.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            cache_misses: self.cache_misses.load(Ordering::Relaxed),
            interactions_replayed: self.interactions_replayed.load(Ordering::Relaxed),
            interactions_invalid: self.interactions_invalid.load(Ordering::Relaxed),
            foreign_reads: self.foreign_reads.load(Ordering::Relaxed),
            checkpoints_written: self.checkpoints_written.load(Ordering::Relaxed),
            gas_charged: self.gas_charged.load(Ordering::Relaxed),
        }
    }

    /// Reset all counters.
    pub fn reset(&self) {
        self.evaluations_started.store(0, Ordering::Relaxed);
        self.evaluations_completed.store(0, Ordering::Relaxed);
        self.evaluations_failed.store(0, Ordering::Relaxed);
        self.cache_hits.store(0, Ordering::Relaxed);
        self.cache_misses.store(0, Ordering::Relaxed);
        self.interactions_replayed.store(0, Ordering::Relaxed);
        self.interactions_invalid.store(0, Ordering::Relaxed);
        self.foreign_reads.store(0, Ordering::Relaxed);
        self.checkpoints_written.store(0, Ordering::Relaxed);
        self.gas_charged.store(0, Ordering::Relaxed);
    }
}

/// Snapshot of metrics (for reporting).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvalMetricsSnapshot {
    pub evaluations_started: u64,
    pub evaluations_completed: u64,
    pub evaluations_failed: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub interactions_replayed: u64,
    pub interactions_invalid: u64,
    pub foreign_reads: u64,
    pub checkpoints_written: u64,
    pub gas_charged: u64,
}

impl EvalMetricsSnapshot {
    /// Share of runs that resumed from a checkpoint.
    pub fn cache_hit_rate(&self) -> f64 {
        let total = self.cache_hits + self.cache_misses;
        if total == 0 {
            return 0.0;
        }
        self.cache_hits as f64 / total as f64
    }

    /// Share of replayed interactions that completed ok.
    pub fn validity_rate(&self) -> f64 {
        if self.interactions_replayed == 0 {
            return 0.0;
        }
        (self.interactions_replayed - self.interactions_invalid) as f64
            / self.interactions_replayed as f64
    }

    /// Format a human-readable report.
    pub fn format_report(&self) -> String {
        let mut lines = Vec::new();
        lines.push("Evaluation Metrics Report".to_string());
        lines.push("=".repeat(50));
        lines.push("Runs:".to_string());
        lines.push(format!("  Started:         {}", self.evaluations_started));
        lines.push(format!("  Completed:       {}", self.evaluations_completed));
        lines.push(format!("  Failed:          {}", self.evaluations_failed));
        lines.push(String::new());
        lines.push("Checkpoint Cache:".to_string());
        lines.push(format!("  Hits:            {}", self.cache_hits));
        lines.push(format!("  Misses:          {}", self.cache_misses));
        lines.push(format!(
            "  Hit Rate:        {:.1}%",
            self.cache_hit_rate() * 100.0
        ));
        lines.push(format!("  Written:         {}", self.checkpoints_written));
        lines.push(String::new());
        lines.push("Interactions:".to_string());
        lines.push(format!("  Replayed:        {}", self.interactions_replayed));
        lines.push(format!("  Invalid:         {}", self.interactions_invalid));
        lines.push(format!(
            "  Validity Rate:   {:.1}%",
            self.validity_rate() * 100.0
        ));
        lines.push(format!("  Foreign Reads:   {}", self.foreign_reads));
        lines.push(format!("  Gas Charged:     {}", self.gas_charged));
        lines.join("\n")
    }
}
