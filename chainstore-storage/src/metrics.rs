//! Durable write counters.

use std::sync::atomic::{AtomicU64, Ordering};

/// Counters for the durable write path, updated by the dispatcher and the
/// worker pool.
#[derive(Debug, Default)]
pub struct WriteMetrics {
    /// Jobs accepted onto the write queue
    pub submitted: AtomicU64,

    /// Jobs a backend acknowledged
    pub written: AtomicU64,

    /// Jobs a backend failed
    pub failed: AtomicU64,

    /// Jobs dropped because the queue was full or closed
    pub rejected: AtomicU64,

    /// Targets skipped without queueing
    pub skipped: AtomicU64,

    /// Relational writes that had to wait on the rate governor
    pub governor_waits: AtomicU64,
}

impl WriteMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Get current snapshot of all counters.
    pub fn snapshot(&self) -> WriteMetricsSnapshot {
        WriteMetricsSnapshot {
            submitted: self.submitted.load(Ordering::Relaxed),
            written: self.written.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
            governor_waits: self.governor_waits.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of write counters at a point in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WriteMetricsSnapshot {
    pub submitted: u64,
    pub written: u64,
    pub failed: u64,
    pub rejected: u64,
    pub skipped: u64,
    pub governor_waits: u64,
}

impl WriteMetricsSnapshot {
    /// Jobs accepted but not yet finished.
    pub fn in_flight(&self) -> u64 {
        self.submitted
            .saturating_sub(self.written)
            .saturating_sub(self.failed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_new() {
        let metrics = WriteMetrics::new();
        assert_eq!(metrics.snapshot(), WriteMetricsSnapshot::default());
    }

    #[test]
    fn test_metrics_snapshot() {
        let metrics = WriteMetrics::new();
        metrics.submitted.store(10, Ordering::Relaxed);
        metrics.written.store(6, Ordering::Relaxed);
        metrics.failed.store(1, Ordering::Relaxed);
        WriteMetrics::incr(&metrics.rejected);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.submitted, 10);
        assert_eq!(snapshot.rejected, 1);
        assert_eq!(snapshot.in_flight(), 3);
    }
}
