use std::path::PathBuf;
use std::time::Duration;

use noctua_types::{NoctuaError, Result};

/// Immutable construction-time settings for a [`crate::LogManager`].
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Destination log file, opened append-only and created if absent.
    pub log_path: PathBuf,
    /// Total buffer population shared by producers and the consumer.
    pub num_buffers: usize,
    /// Capacity of each log buffer in bytes.
    pub buffer_capacity: usize,
    /// Maximum duration between fsyncs.
    pub persist_interval: Duration,
    /// Bytes written since the last fsync that force one regardless of the
    /// interval.
    pub persist_threshold: u64,
    /// Producer-side hint: how long a partially filled buffer may be held
    /// before being handed to the consumer.
    pub serialization_interval: Duration,
}

impl LogConfig {
    pub fn new(log_path: impl Into<PathBuf>) -> Self {
        Self {
            log_path: log_path.into(),
            num_buffers: 64,
            buffer_capacity: 1024 * 1024,
            persist_interval: Duration::from_millis(10),
            persist_threshold: 1024 * 1024,
            serialization_interval: Duration::from_millis(5),
        }
    }

    /// Commit-latency-first profile: short persist cadence, eager handoff.
    pub fn durable(log_path: impl Into<PathBuf>) -> Self {
        Self {
            persist_interval: Duration::from_millis(1),
            serialization_interval: Duration::from_millis(1),
            ..Self::new(log_path)
        }
    }

    /// Throughput-first profile: larger pool, longer cadence, bigger sync
    /// batches.
    pub fn throughput(log_path: impl Into<PathBuf>) -> Self {
        Self {
            num_buffers: 128,
            persist_interval: Duration::from_millis(20),
            persist_threshold: 8 * 1024 * 1024,
            ..Self::new(log_path)
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.num_buffers == 0 {
            return Err(NoctuaError::Invalid("num_buffers must be non-zero"));
        }
        if self.buffer_capacity == 0 {
            return Err(NoctuaError::Invalid("buffer_capacity must be non-zero"));
        }
        if self.persist_interval.is_zero() {
            return Err(NoctuaError::Invalid("persist_interval must be non-zero"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        assert!(LogConfig::new("wal.log").validate().is_ok());
        assert!(LogConfig::durable("wal.log").validate().is_ok());
        assert!(LogConfig::throughput("wal.log").validate().is_ok());
    }

    #[test]
    fn rejects_zero_sizes() {
        let mut config = LogConfig::new("wal.log");
        config.num_buffers = 0;
        assert!(config.validate().is_err());

        let mut config = LogConfig::new("wal.log");
        config.buffer_capacity = 0;
        assert!(config.validate().is_err());

        let mut config = LogConfig::new("wal.log");
        config.persist_interval = Duration::ZERO;
        assert!(config.validate().is_err());
    }
}
