use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::info;

/// Workflow engine counters. Owned by one engine and shared with its clones.
#[derive(Debug, Default)]
pub struct EngineMetrics {
    pub work_orders_registered: AtomicU64,
    pub transitions_committed: AtomicU64,
    pub transitions_rejected: AtomicU64,
    /// Dry-run validations that reported a disallowed edge
    pub validations_denied: AtomicU64,
    pub conflicts: AtomicU64,
    pub store_failures: AtomicU64,
    pub reads: AtomicU64,
}

impl EngineMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_registration(&self) {
        self.work_orders_registered.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_commit(&self) {
        self.transitions_committed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rejection(&self) {
        self.transitions_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_validation_denied(&self) {
        self.validations_denied.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_conflict(&self) {
        self.conflicts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_store_failure(&self) {
        self.store_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_read(&self) {
        self.reads.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get_stats(&self) -> EngineStats {
        EngineStats {
            work_orders_registered: self.work_orders_registered.load(Ordering::Relaxed),
            transitions_committed: self.transitions_committed.load(Ordering::Relaxed),
            transitions_rejected: self.transitions_rejected.load(Ordering::Relaxed),
            validations_denied: self.validations_denied.load(Ordering::Relaxed),
            conflicts: self.conflicts.load(Ordering::Relaxed),
            store_failures: self.store_failures.load(Ordering::Relaxed),
            reads: self.reads.load(Ordering::Relaxed),
        }
    }

    pub fn log_stats(&self) {
        let stats = self.get_stats();
        info!(
            registered = stats.work_orders_registered,
            committed = stats.transitions_committed,
            rejected = stats.transitions_rejected,
            validations_denied = stats.validations_denied,
            conflicts = stats.conflicts,
            store_failures = stats.store_failures,
            reads = stats.reads,
            "Workflow engine metrics"
        );
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EngineStats {
    pub work_orders_registered: u64,
    pub transitions_committed: u64,
    pub transitions_rejected: u64,
    pub validations_denied: u64,
    pub conflicts: u64,
    pub store_failures: u64,
    pub reads: u64,
}

/// Time an operation and log its duration on finish
pub struct OperationTimer {
    operation: &'static str,
    start: Instant,
}

impl OperationTimer {
    pub fn new(operation: &'static str) -> Self {
        Self {
            operation,
            start: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    pub fn finish(self) -> Duration {
        let duration = self.start.elapsed();
        info!(
            operation = self.operation,
            duration_ms = duration.as_millis() as u64,
            "Operation completed"
        );
        duration
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate_independently() {
        let metrics = EngineMetrics::new();
        metrics.record_commit();
        metrics.record_commit();
        metrics.record_conflict();
        metrics.record_read();
        metrics.record_validation_denied();

        let stats = metrics.get_stats();
        assert_eq!(stats.transitions_committed, 2);
        assert_eq!(stats.conflicts, 1);
        assert_eq!(stats.reads, 1);
        assert_eq!(stats.validations_denied, 1);
        assert_eq!(stats.transitions_rejected, 0);
        assert_eq!(stats.store_failures, 0);
    }

    #[test]
    fn timer_reports_elapsed_time() {
        let timer = OperationTimer::new("test");
        std::thread::sleep(Duration::from_millis(2));
        assert!(timer.elapsed() >= Duration::from_millis(2));
        assert!(timer.finish() >= Duration::from_millis(2));
    }
}
