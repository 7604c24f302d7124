use std::collections::VecDeque;

use parking_lot::{Condvar, Mutex};

use noctua_types::{NoctuaError, Result};

use crate::buffer::LogBuffer;

/// FIFO pool of empty log buffers. The population is created once and
/// conserved: buffers leave through `acquire` and come back through
/// `release`.
pub(crate) struct BufferPool {
    state: Mutex<PoolState>,
    available: Condvar,
}

struct PoolState {
    empty: VecDeque<LogBuffer>,
    open: bool,
}

impl BufferPool {
    pub(crate) fn new(num_buffers: usize, buffer_capacity: usize) -> Self {
        let empty = (0..num_buffers)
            .map(|_| LogBuffer::with_capacity(buffer_capacity))
            .collect();
        Self {
            state: Mutex::new(PoolState { empty, open: true }),
            available: Condvar::new(),
        }
    }

    /// Blocks until an empty buffer is available. Fails only once the pool
    /// has been closed by shutdown.
    pub(crate) fn acquire(&self) -> Result<LogBuffer> {
        let mut state = self.state.lock();
        loop {
            if !state.open {
                return Err(NoctuaError::Shutdown);
            }
            if let Some(buffer) = state.empty.pop_front() {
                return Ok(buffer);
            }
            self.available.wait(&mut state);
        }
    }

    /// Resets the buffer and puts it back in rotation. Accepted even after
    /// `close` so in-flight buffers can still come home.
    pub(crate) fn release(&self, mut buffer: LogBuffer) {
        buffer.reset();
        self.state.lock().empty.push_back(buffer);
        self.available.notify_one();
    }

    pub(crate) fn close(&self) {
        self.state.lock().open = false;
        self.available.notify_all();
    }

    pub(crate) fn available_buffers(&self) -> usize {
        self.state.lock().empty.len()
    }
}
