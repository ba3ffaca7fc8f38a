use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::Serialize;

/// Structured telemetry for the decision pipeline.
///
/// Counters are atomics so concurrent symbol evaluations can update them
/// through a shared reference.
#[derive(Default)]
pub struct PipelineMetrics {
    cycles_run: AtomicU64,
    decisions: AtomicU64,
    executed: AtomicU64,
    execution_failures: AtomicU64,
    source_failures: AtomicU64,
    persistence_failures: AtomicU64,
    notification_failures: AtomicU64,
    last_cycle_ms: AtomicU64,
    blocked: Mutex<BTreeMap<&'static str, u64>>,
    log_interval_cycles: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MetricsSnapshot {
    pub cycles_run: u64,
    pub decisions: u64,
    pub executed: u64,
    pub execution_failures: u64,
    pub source_failures: u64,
    pub persistence_failures: u64,
    pub notification_failures: u64,
    pub last_cycle_ms: u64,
    pub blocked: BTreeMap<String, u64>,
}

impl PipelineMetrics {
    pub fn new(log_interval_cycles: u64) -> Self {
        Self {
            log_interval_cycles,
            ..Self::default()
        }
    }

    pub fn start_timer() -> Instant {
        Instant::now()
    }

    pub fn record_decision(&self) {
        self.decisions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_blocked(&self, gate: &'static str) {
        *self.blocked.lock().entry(gate).or_insert(0) += 1;
    }

    pub fn record_executed(&self) {
        self.executed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_execution_failure(&self) {
        self.execution_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_source_failure(&self) {
        self.source_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_persistence_failure(&self) {
        self.persistence_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_notification_failure(&self) {
        self.notification_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Close a scan cycle; logs a summary every `log_interval_cycles`.
    pub fn finish_cycle(&self, cycle_start: Instant) {
        self.last_cycle_ms
            .store(duration_ms(cycle_start.elapsed()), Ordering::Relaxed);
        let cycles = self.cycles_run.fetch_add(1, Ordering::Relaxed) + 1;

        if self.log_interval_cycles > 0 && cycles.is_multiple_of(self.log_interval_cycles) {
            self.log_metrics();
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            cycles_run: self.cycles_run.load(Ordering::Relaxed),
            decisions: self.decisions.load(Ordering::Relaxed),
            executed: self.executed.load(Ordering::Relaxed),
            execution_failures: self.execution_failures.load(Ordering::Relaxed),
            source_failures: self.source_failures.load(Ordering::Relaxed),
            persistence_failures: self.persistence_failures.load(Ordering::Relaxed),
            notification_failures: self.notification_failures.load(Ordering::Relaxed),
            last_cycle_ms: self.last_cycle_ms.load(Ordering::Relaxed),
            blocked: self
                .blocked
                .lock()
                .iter()
                .map(|(gate, count)| (gate.to_string(), *count))
                .collect(),
        }
    }

    /// Emit structured telemetry via tracing
    pub fn log_metrics(&self) {
        let snapshot = self.snapshot();
        let blocked_total: u64 = snapshot.blocked.values().sum();
        tracing::info!(
            cycles = snapshot.cycles_run,
            decisions = snapshot.decisions,
            executed = snapshot.executed,
            blocked = blocked_total,
            execution_failures = snapshot.execution_failures,
            source_failures = snapshot.source_failures,
            persistence_failures = snapshot.persistence_failures,
            notification_failures = snapshot.notification_failures,
            last_cycle_ms = snapshot.last_cycle_ms,
            blocked_by_gate = ?snapshot.blocked,
            "Pipeline metrics summary"
        );
    }
}

fn duration_ms(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}
