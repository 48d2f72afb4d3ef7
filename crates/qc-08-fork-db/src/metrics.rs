//! # Fork Database Lock Metrics
//!
//! Wait-time counters for the tree lock, kept outside the tree itself.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::Serialize;

#[derive(Debug, Default)]
pub struct LockMetrics {
    pub read_acquisitions: AtomicU64,
    pub write_acquisitions: AtomicU64,
    pub read_timeouts: AtomicU64,
    pub read_wait_micros: AtomicU64,
    pub write_wait_micros: AtomicU64,
    pub max_read_wait_micros: AtomicU64,
    pub max_write_wait_micros: AtomicU64,
}

/// Point-in-time copy of [`LockMetrics`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LockMetricsSnapshot {
    pub read_acquisitions: u64,
    pub write_acquisitions: u64,
    pub read_timeouts: u64,
    pub read_wait_micros: u64,
    pub write_wait_micros: u64,
    pub max_read_wait_micros: u64,
    pub max_write_wait_micros: u64,
}

impl LockMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_read(&self, waited: Duration) {
        let micros = as_micros(waited);
        self.read_acquisitions.fetch_add(1, Ordering::Relaxed);
        self.read_wait_micros.fetch_add(micros, Ordering::Relaxed);
        self.max_read_wait_micros.fetch_max(micros, Ordering::Relaxed);
    }

    pub fn record_write(&self, waited: Duration) {
        let micros = as_micros(waited);
        self.write_acquisitions.fetch_add(1, Ordering::Relaxed);
        self.write_wait_micros.fetch_add(micros, Ordering::Relaxed);
        self.max_write_wait_micros.fetch_max(micros, Ordering::Relaxed);
    }

    pub fn record_read_timeout(&self) {
        self.read_timeouts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> LockMetricsSnapshot {
        LockMetricsSnapshot {
            read_acquisitions: self.read_acquisitions.load(Ordering::Relaxed),
            write_acquisitions: self.write_acquisitions.load(Ordering::Relaxed),
            read_timeouts: self.read_timeouts.load(Ordering::Relaxed),
            read_wait_micros: self.read_wait_micros.load(Ordering::Relaxed),
            write_wait_micros: self.write_wait_micros.load(Ordering::Relaxed),
            max_read_wait_micros: self.max_read_wait_micros.load(Ordering::Relaxed),
            max_write_wait_micros: self.max_write_wait_micros.load(Ordering::Relaxed),
        }
    }
}

fn as_micros(waited: Duration) -> u64 {
    u64::try_from(waited.as_micros()).unwrap_or(u64::MAX)
}
