//! # Block Log Metrics
//!
//! Lock-free counters updated on the append, read and maintenance paths.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Counters shared by every part of a log set.
#[derive(Debug, Default)]
pub struct BlockLogMetrics {
    pub appends: AtomicU64,
    /// Bytes written to log files, frame overhead included
    pub bytes_appended: AtomicU64,
    /// Blocks whose stored form is compressed
    pub compressed_appends: AtomicU64,
    pub reads: AtomicU64,
    pub bytes_read: AtomicU64,
    pub rotations: AtomicU64,
    pub parts_pruned: AtomicU64,
    pub regenerations: AtomicU64,
    pub auto_fixes: AtomicU64,
}

/// Point-in-time copy of [`BlockLogMetrics`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub appends: u64,
    pub bytes_appended: u64,
    pub compressed_appends: u64,
    pub reads: u64,
    pub bytes_read: u64,
    pub rotations: u64,
    pub parts_pruned: u64,
    pub regenerations: u64,
    pub auto_fixes: u64,
}

impl BlockLogMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_append(&self, frame_bytes: u64, compressed: bool) {
        self.appends.fetch_add(1, Ordering::Relaxed);
        self.bytes_appended.fetch_add(frame_bytes, Ordering::Relaxed);
        if compressed {
            self.compressed_appends.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_read(&self, bytes: u64) {
        self.reads.fetch_add(1, Ordering::Relaxed);
        self.bytes_read.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn record_rotation(&self) {
        self.rotations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_prune(&self) {
        self.parts_pruned.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_regeneration(&self) {
        self.regenerations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_auto_fix(&self) {
        self.auto_fixes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            appends: self.appends.load(Ordering::Relaxed),
            bytes_appended: self.bytes_appended.load(Ordering::Relaxed),
            compressed_appends: self.compressed_appends.load(Ordering::Relaxed),
            reads: self.reads.load(Ordering::Relaxed),
            bytes_read: self.bytes_read.load(Ordering::Relaxed),
            rotations: self.rotations.load(Ordering::Relaxed),
            parts_pruned: self.parts_pruned.load(Ordering::Relaxed),
            regenerations: self.regenerations.load(Ordering::Relaxed),
            auto_fixes: self.auto_fixes.load(Ordering::Relaxed),
        }
    }

    /// Export as Prometheus-style metrics string
    pub fn export_prometheus(&self) -> String {
        let s = self.snapshot();
        format!(
            "# HELP qc02_block_log_appends Total blocks appended\n\
             # TYPE qc02_block_log_appends counter\n\
             qc02_block_log_appends {}\n\
             # HELP qc02_block_log_bytes_appended Bytes written to log files\n\
             # TYPE qc02_block_log_bytes_appended counter\n\
             qc02_block_log_bytes_appended {}\n\
             # HELP qc02_block_log_reads Total block reads\n\
             # TYPE qc02_block_log_reads counter\n\
             qc02_block_log_reads {}\n\
             # HELP qc02_block_log_rotations Part rotations\n\
             # TYPE qc02_block_log_rotations counter\n\
             qc02_block_log_rotations {}\n\
             # HELP qc02_block_log_parts_pruned Parts deleted by retention\n\
             # TYPE qc02_block_log_parts_pruned counter\n\
             qc02_block_log_parts_pruned {}\n\
             # HELP qc02_block_log_regenerations Artifacts files regenerated\n\
             # TYPE qc02_block_log_regenerations counter\n\
             qc02_block_log_regenerations {}\n",
            s.appends, s.bytes_appended, s.reads, s.rotations, s.parts_pruned, s.regenerations
        )
    }
}
