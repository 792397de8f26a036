use std::sync::atomic::{AtomicU64, Ordering};

/// Controller-level counters. Depth-bounded cascade skips are expected
/// steady-state behavior and show up here rather than as errors.
#[derive(Debug, Default)]
pub struct ControllerMetrics {
    pub workloads_created: AtomicU64,
    pub scans_completed: AtomicU64,
    pub scans_errored: AtomicU64,
    pub scans_cancelled: AtomicU64,
    pub cascade_children_created: AtomicU64,
    pub cascade_rules_skipped_depth: AtomicU64,
}

/// Point-in-time copy of all counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub workloads_created: u64,
    pub scans_completed: u64,
    pub scans_errored: u64,
    pub scans_cancelled: u64,
    pub cascade_children_created: u64,
    pub cascade_rules_skipped_depth: u64,
}

impl ControllerMetrics {
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            workloads_created: self.workloads_created.load(Ordering::Relaxed),
            scans_completed: self.scans_completed.load(Ordering::Relaxed),
            scans_errored: self.scans_errored.load(Ordering::Relaxed),
            scans_cancelled: self.scans_cancelled.load(Ordering::Relaxed),
            cascade_children_created: self.cascade_children_created.load(Ordering::Relaxed),
            cascade_rules_skipped_depth: self.cascade_rules_skipped_depth.load(Ordering::Relaxed),
        }
    }
}
