use std::fmt;

use noctua_types::{NoctuaError, Result};

/// Invoked exactly once, after the fsync that made the corresponding commit
/// record durable. Callbacks run on the consumer thread while it holds the
/// persist lock: they must be cheap and must not call back into the
/// [`crate::LogManager`] that fired them.
pub type CommitCallback = Box<dyn FnOnce() + Send>;

/// Fixed-capacity byte region that carries a batch of serialized log
/// records from a producer to the disk consumer, along with the commit
/// callbacks for the commit records it contains.
pub struct LogBuffer {
    data: Vec<u8>,
    capacity: usize,
    callbacks: Vec<CommitCallback>,
}

impl LogBuffer {
    pub(crate) fn with_capacity(capacity: usize) -> Self {
        Self {
            data: Vec::with_capacity(capacity),
            capacity,
            callbacks: Vec::new(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Current write offset.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn remaining(&self) -> usize {
        self.capacity - self.data.len()
    }

    pub fn append(&mut self, bytes: &[u8]) -> Result<()> {
        if bytes.len() > self.remaining() {
            return Err(NoctuaError::Invalid("log buffer overflow"));
        }
        self.data.extend_from_slice(bytes);
        Ok(())
    }

    /// Registers a callback for a commit record wholly contained in this
    /// buffer.
    pub fn attach_callback(&mut self, callback: CommitCallback) {
        self.callbacks.push(callback);
    }

    pub fn callback_count(&self) -> usize {
        self.callbacks.len()
    }

    pub fn bytes(&self) -> &[u8] {
        &self.data
    }

    pub(crate) fn take_callbacks(&mut self) -> Vec<CommitCallback> {
        std::mem::take(&mut self.callbacks)
    }

    pub(crate) fn reset(&mut self) {
        self.data.clear();
        self.callbacks.clear();
    }
}

impl fmt::Debug for LogBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LogBuffer")
            .field("len", &self.data.len())
            .field("capacity", &self.capacity)
            .field("callbacks", &self.callbacks.len())
            .finish()
    }
}

/// Unit of enqueue on the filled queue: an immutable buffer plus the
/// callbacks that fire once its bytes are durable.
pub(crate) struct SerializedBatch {
    pub(crate) buffer: LogBuffer,
    pub(crate) callbacks: Vec<CommitCallback>,
}
