#![forbid(unsafe_code)]

//! Durable write-ahead logging pipeline: producers serialize transaction
//! records into pooled buffers, a dedicated consumer thread appends them to
//! the log file and fsyncs on a bounded cadence, and commit callbacks fire
//! only after their bytes are durable.

pub mod buffer;
pub mod config;
mod consumer;
pub mod manager;
pub mod metrics;
mod pool;
pub mod record;
pub mod writer;

pub use buffer::{CommitCallback, LogBuffer};
pub use config::LogConfig;
pub use manager::{FatalErrorHook, LogManager, WalStats};
pub use metrics::{ConsumerMetrics, ConsumerMetricsSnapshot, MetricsSink};
pub use record::{LogRecord, LogRecordKind, LogRecordOwned, RECORD_HDR_LEN};
pub use writer::LogWriter;
