use std::sync::atomic::{AtomicU64, Ordering};

/// Thread-safe counters describing ingestion activity.
#[derive(Debug, Default)]
pub struct IngestionMetrics {
    documents_ingested: AtomicU64,
    chunks_stored: AtomicU64,
    batches_failed: AtomicU64,
    oversized_batches: AtomicU64,
}

impl IngestionMetrics {
    /// Create an empty metrics accumulator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record documents handed to the segmenter.
    pub fn record_documents(&self, count: u64) {
        self.documents_ingested.fetch_add(count, Ordering::Relaxed);
    }

    /// Record chunks written to the index.
    pub fn record_chunks_stored(&self, count: u64) {
        self.chunks_stored.fetch_add(count, Ordering::Relaxed);
    }

    /// Record a batch that could not be embedded or stored.
    pub fn record_batch_failed(&self) {
        self.batches_failed.fetch_add(1, Ordering::Relaxed);
    }

    /// Record batches that exceeded the byte bound.
    pub fn record_oversized(&self, count: u64) {
        self.oversized_batches.fetch_add(count, Ordering::Relaxed);
    }

    /// Return a snapshot of the current counters.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            documents_ingested: self.documents_ingested.load(Ordering::Relaxed),
            chunks_stored: self.chunks_stored.load(Ordering::Relaxed),
            batches_failed: self.batches_failed.load(Ordering::Relaxed),
            oversized_batches: self.oversized_batches.load(Ordering::Relaxed),
        }
    }
}

/// Immutable view of ingestion counters used for reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSnapshot {
    /// Documents loaded and segmented since startup.
    pub documents_ingested: u64,
    /// Chunks stored in the index since startup.
    pub chunks_stored: u64,
    /// Batches dropped after embedding or storage failures.
    pub batches_failed: u64,
    /// Batches that carried a single item above the byte bound.
    pub oversized_batches: u64,
}
