use std::sync::atomic::{AtomicU64, Ordering};

/// Scheduler counters scraped by the health endpoint and the external
/// observability stack.
#[derive(Default)]
pub struct SchedulerMetrics {
    queue_depth: AtomicU64,
    in_flight: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
}

impl SchedulerMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enqueued(&self) {
        self.queue_depth.fetch_add(1, Ordering::SeqCst);
    }

    pub fn started(&self) {
        self.queue_depth.fetch_sub(1, Ordering::SeqCst);
        self.in_flight.fetch_add(1, Ordering::SeqCst);
    }

    pub fn completed(&self) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.completed.fetch_add(1, Ordering::SeqCst);
    }

    pub fn failed(&self) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.failed.fetch_add(1, Ordering::SeqCst);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            queue_depth: self.queue_depth.load(Ordering::SeqCst),
            in_flight: self.in_flight.load(Ordering::SeqCst),
            completed: self.completed.load(Ordering::SeqCst),
            failed: self.failed.load(Ordering::SeqCst),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct MetricsSnapshot {
    pub queue_depth: u64,
    pub in_flight: u64,
    pub completed: u64,
    pub failed: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lifecycle_counters_balance() {
        let metrics = SchedulerMetrics::new();
        metrics.enqueued();
        metrics.enqueued();
        metrics.started();
        metrics.completed();
        metrics.started();
        metrics.failed();

        let snap = metrics.snapshot();
        assert_eq!(snap.queue_depth, 0);
        assert_eq!(snap.in_flight, 0);
        assert_eq!(snap.completed, 1);
        assert_eq!(snap.failed, 1);
    }
}
