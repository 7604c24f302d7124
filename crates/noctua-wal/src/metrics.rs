use parking_lot::Mutex;
use serde::Serialize;

/// Sink for per-batch consumer measurements. Called at most once per
/// consumer iteration, only when at least one byte was flushed in the
/// period. Single writer (the consumer thread); readers may snapshot
/// concurrently.
pub trait MetricsSink: Send + Sync {
    fn record_consumer_data(&self, write_us: u64, persist_us: u64, num_bytes: u64, num_buffers: u64);
}

#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct ConsumerMetricsSnapshot {
    /// Number of metric submissions (consumer iterations that flushed data).
    pub batches: u64,
    pub write_us: u64,
    pub persist_us: u64,
    pub bytes_flushed: u64,
    pub buffers_flushed: u64,
}

/// In-memory accumulating sink, handy for tests and for engines that scrape
/// metrics on their own cadence.
#[derive(Default)]
pub struct ConsumerMetrics {
    inner: Mutex<ConsumerMetricsSnapshot>,
}

impl ConsumerMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> ConsumerMetricsSnapshot {
        self.inner.lock().clone()
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(&self.snapshot())
    }
}

impl MetricsSink for ConsumerMetrics {
    fn record_consumer_data(
        &self,
        write_us: u64,
        persist_us: u64,
        num_bytes: u64,
        num_buffers: u64,
    ) {
        let mut inner = self.inner.lock();
        inner.batches += 1;
        inner.write_us += write_us;
        inner.persist_us += persist_us;
        inner.bytes_flushed += num_bytes;
        inner.buffers_flushed += num_buffers;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accumulates_submissions() {
        let metrics = ConsumerMetrics::new();
        metrics.record_consumer_data(10, 200, 4096, 2);
        metrics.record_consumer_data(5, 100, 1024, 1);
        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.batches, 2);
        assert_eq!(snapshot.write_us, 15);
        assert_eq!(snapshot.persist_us, 300);
        assert_eq!(snapshot.bytes_flushed, 5120);
        assert_eq!(snapshot.buffers_flushed, 3);
    }

    #[test]
    fn snapshot_serializes() {
        let metrics = ConsumerMetrics::new();
        metrics.record_consumer_data(1, 2, 3, 4);
        let json = metrics.to_json().unwrap();
        assert!(json.contains("\"bytes_flushed\": 3"));
    }
}
