use std::sync::Arc;
use std::time::Instant;

use tracing::warn;

use noctua_types::{NoctuaError, Result, TxnId};

use crate::buffer::{CommitCallback, LogBuffer};
use crate::manager::LogManager;
use crate::record::LogRecord;

/// Per-producer serialization handle. Holds at most one in-progress buffer;
/// records are never split across buffers, and a commit callback always
/// rides on the buffer that contains its commit record. One writer per
/// producer thread.
pub struct LogWriter {
    manager: Arc<LogManager>,
    current: Option<LogBuffer>,
    last_handoff: Instant,
}

impl LogWriter {
    pub fn new(manager: Arc<LogManager>) -> Self {
        Self {
            manager,
            current: None,
            last_handoff: Instant::now(),
        }
    }

    pub fn log_begin(&mut self, txn: TxnId) -> Result<()> {
        self.append(LogRecord::begin(txn), None)
    }

    pub fn log_redo(&mut self, txn: TxnId, payload: &[u8]) -> Result<()> {
        self.append(LogRecord::redo(txn, payload), None)
    }

    pub fn log_abort(&mut self, txn: TxnId) -> Result<()> {
        self.append(LogRecord::abort(txn), None)
    }

    /// Appends the commit record for `txn`; `callback` fires once that
    /// record is durable.
    pub fn log_commit(&mut self, txn: TxnId, callback: CommitCallback) -> Result<()> {
        self.append(LogRecord::commit(txn), Some(callback))
    }

    /// Appends one encoded record, handing the current buffer to the
    /// consumer first if the record does not fit, and handing off a partial
    /// buffer once `serialization_interval` has elapsed since the last
    /// handoff.
    pub fn append(&mut self, record: LogRecord<'_>, callback: Option<CommitCallback>) -> Result<()> {
        let need = record.encoded_len();
        if need > self.manager.config().buffer_capacity {
            return Err(NoctuaError::Invalid("log record larger than a log buffer"));
        }
        if matches!(&self.current, Some(buffer) if buffer.remaining() < need) {
            self.hand_off()?;
        }
        if self.current.is_none() {
            self.current = Some(self.manager.acquire_buffer()?);
            self.last_handoff = Instant::now();
        }
        let buffer = self
            .current
            .as_mut()
            .ok_or(NoctuaError::Invalid("log writer lost its buffer"))?;
        buffer.append(&record.encode())?;
        if let Some(callback) = callback {
            buffer.attach_callback(callback);
        }
        if self.last_handoff.elapsed() >= self.manager.config().serialization_interval {
            self.hand_off()?;
        }
        Ok(())
    }

    /// Hands any in-progress buffer to the consumer. A producer that needs
    /// its commits durable within a bound calls this and then
    /// [`LogManager::force_flush`].
    pub fn flush(&mut self) -> Result<()> {
        self.hand_off()
    }

    fn hand_off(&mut self) -> Result<()> {
        if let Some(buffer) = self.current.take() {
            if buffer.is_empty() && buffer.callback_count() == 0 {
                self.manager.release_buffer(buffer);
            } else {
                self.manager.submit_buffer(buffer)?;
            }
        }
        self.last_handoff = Instant::now();
        Ok(())
    }
}

impl Drop for LogWriter {
    fn drop(&mut self) {
        if let Some(buffer) = self.current.take() {
            if buffer.is_empty() && buffer.callback_count() == 0 {
                self.manager.release_buffer(buffer);
            } else if let Err(err) = self.manager.submit_buffer(buffer) {
                warn!("log writer dropped an unsubmittable buffer: {err}");
            }
        }
    }
}
