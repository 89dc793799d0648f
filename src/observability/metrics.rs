//! Durability counters
//!
//! Counters only, monotonic, reset on process start. Relaxed ordering: the
//! values are reported, never used for coordination.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Operational counters shared by writers, checkpointer and pending
/// transaction finalization.
#[derive(Debug, Default)]
pub struct DurabilityMetrics {
    redo_bytes: AtomicU64,
    commits: AtomicU64,
    rejections: AtomicU64,
    promotions: AtomicU64,
    demotions: AtomicU64,
    checkpoints: AtomicU64,
    checkpoint_failures: AtomicU64,
    pending_commits: AtomicU64,
    pending_rollbacks: AtomicU64,
}

impl DurabilityMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_redo_bytes(&self, bytes: u64) {
        self.redo_bytes.fetch_add(bytes, Ordering::Relaxed);
    }

    /// Counts a store or transaction commit accepted by the writer.
    pub fn increment_commits(&self) {
        self.commits.fetch_add(1, Ordering::Relaxed);
    }

    /// Counts a write or commit refused because this node is not the leader.
    pub fn increment_rejections(&self) {
        self.rejections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_promotions(&self) {
        self.promotions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_demotions(&self) {
        self.demotions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_checkpoints(&self) {
        self.checkpoints.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_checkpoint_failures(&self) {
        self.checkpoint_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_pending_commits(&self) {
        self.pending_commits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_pending_rollbacks(&self) {
        self.pending_rollbacks.fetch_add(1, Ordering::Relaxed);
    }

    /// Point-in-time copy of every counter.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            redo_bytes: self.redo_bytes.load(Ordering::Relaxed),
            commits: self.commits.load(Ordering::Relaxed),
            rejections: self.rejections.load(Ordering::Relaxed),
            promotions: self.promotions.load(Ordering::Relaxed),
            demotions: self.demotions.load(Ordering::Relaxed),
            checkpoints: self.checkpoints.load(Ordering::Relaxed),
            checkpoint_failures: self.checkpoint_failures.load(Ordering::Relaxed),
            pending_commits: self.pending_commits.load(Ordering::Relaxed),
            pending_rollbacks: self.pending_rollbacks.load(Ordering::Relaxed),
        }
    }
}

/// A point-in-time snapshot of all counters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub redo_bytes: u64,
    pub commits: u64,
    pub rejections: u64,
    pub promotions: u64,
    pub demotions: u64,
    pub checkpoints: u64,
    pub checkpoint_failures: u64,
    pub pending_commits: u64,
    pub pending_rollbacks: u64,
}

impl MetricsSnapshot {
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }
}
