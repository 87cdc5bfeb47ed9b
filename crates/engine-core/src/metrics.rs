use serde::Serialize;
use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};

#[derive(Debug, Default)]
struct InnerMetrics {
    rows_processed: AtomicU64,
    rows_written: AtomicU64,
    rows_skipped: AtomicU64,
    chunks_received: AtomicU64,
    bytes_received: AtomicU64,
    bytes_served: AtomicU64,
    failure_count: AtomicU64,
    retry_count: AtomicU64,
}

/// Process-wide transfer and processing counters. Cloning shares the counters.
#[derive(Debug, Clone)]
pub struct Metrics {
    inner: Arc<InnerMetrics>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub rows_processed: u64,
    pub rows_written: u64,
    pub rows_skipped: u64,
    pub chunks_received: u64,
    pub bytes_received: u64,
    pub bytes_served: u64,
    pub failure_count: u64,
    pub retry_count: u64,
}

impl Metrics {
    pub fn new() -> Self {
        Metrics {
            inner: Arc::new(InnerMetrics::default()),
        }
    }

    pub fn increment_rows(&self, count: u64) {
        self.inner.rows_processed.fetch_add(count, Ordering::Relaxed);
    }

    pub fn increment_written(&self, count: u64) {
        self.inner.rows_written.fetch_add(count, Ordering::Relaxed);
    }

    pub fn increment_skipped(&self, count: u64) {
        self.inner.rows_skipped.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_chunk(&self, bytes: u64) {
        self.inner.chunks_received.fetch_add(1, Ordering::Relaxed);
        self.inner.bytes_received.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn increment_served(&self, bytes: u64) {
        self.inner.bytes_served.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn increment_failures(&self, count: u64) {
        self.inner.failure_count.fetch_add(count, Ordering::Relaxed);
    }

    pub fn increment_retries(&self, count: u64) {
        self.inner.retry_count.fetch_add(count, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            rows_processed: self.inner.rows_processed.load(Ordering::Relaxed),
            rows_written: self.inner.rows_written.load(Ordering::Relaxed),
            rows_skipped: self.inner.rows_skipped.load(Ordering::Relaxed),
            chunks_received: self.inner.chunks_received.load(Ordering::Relaxed),
            bytes_received: self.inner.bytes_received.load(Ordering::Relaxed),
            bytes_served: self.inner.bytes_served.load(Ordering::Relaxed),
            failure_count: self.inner.failure_count.load(Ordering::Relaxed),
            retry_count: self.inner.retry_count.load(Ordering::Relaxed),
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_share_counters() {
        let metrics = Metrics::new();
        let clone = metrics.clone();
        clone.record_chunk(1024);
        clone.record_chunk(512);
        metrics.increment_rows(3);

        let snap = metrics.snapshot();
        assert_eq!(snap.chunks_received, 2);
        assert_eq!(snap.bytes_received, 1536);
        assert_eq!(snap.rows_processed, 3);
    }
}
