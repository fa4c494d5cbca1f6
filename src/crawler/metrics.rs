//! In-process crawl counters
//!
//! Cheap atomic counters shared by every fetch loop in the process, logged
//! periodically and at shutdown. Cross-worker aggregation is out of scope;
//! each process reports its own numbers.

use std::sync::atomic::{AtomicU64, Ordering};

/// Counters for one worker process
#[derive(Debug, Default)]
pub struct CrawlMetrics {
    pub fetched: AtomicU64,
    pub persisted: AtomicU64,
    pub failed: AtomicU64,
    pub dropped: AtomicU64,
    pub duplicate_content: AtomicU64,
    pub robots_denied: AtomicU64,
    pub stale_recovered: AtomicU64,
    pub bytes_stored: AtomicU64,
}

/// Point-in-time copy of the counters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub fetched: u64,
    pub persisted: u64,
    pub failed: u64,
    pub dropped: u64,
    pub duplicate_content: u64,
    pub robots_denied: u64,
    pub stale_recovered: u64,
    pub bytes_stored: u64,
}

impl CrawlMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }

    pub fn incr(&self, counter: &AtomicU64) {
        self.add(counter, 1);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            fetched: self.fetched.load(Ordering::Relaxed),
            persisted: self.persisted.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            duplicate_content: self.duplicate_content.load(Ordering::Relaxed),
            robots_denied: self.robots_denied.load(Ordering::Relaxed),
            stale_recovered: self.stale_recovered.load(Ordering::Relaxed),
            bytes_stored: self.bytes_stored.load(Ordering::Relaxed),
        }
    }

    pub fn log_summary(&self) {
        let s = self.snapshot();
        tracing::info!(
            fetched = s.fetched,
            persisted = s.persisted,
            failed = s.failed,
            dropped = s.dropped,
            duplicate_content = s.duplicate_content,
            robots_denied = s.robots_denied,
            stale_recovered = s.stale_recovered,
            bytes_stored = s.bytes_stored,
            "crawl summary"
        );
    }
}
