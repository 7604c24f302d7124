use std::collections::VecDeque;
use std::io;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use parking_lot::{Condvar, Mutex};
use tracing::{info, warn};

use noctua_io::{LogFile, StdLogFile};
use noctua_types::{NoctuaError, Result};

use crate::buffer::{LogBuffer, SerializedBatch};
use crate::config::LogConfig;
use crate::consumer::DiskLogConsumer;
use crate::metrics::MetricsSink;
use crate::pool::BufferPool;

/// Cumulative counters for the life of the manager.
#[derive(Clone, Debug, Default)]
pub struct WalStats {
    pub buffers_flushed: u64,
    pub bytes_written: u64,
    pub syncs: u64,
}

/// Invoked on the consumer thread when it hits an unrecoverable I/O error,
/// before `stop()` has a chance to report it.
pub type FatalErrorHook = Box<dyn Fn(&NoctuaError) + Send + Sync>;

/// State shared between the public surface and the consumer thread.
pub(crate) struct Shared {
    pub(crate) config: LogConfig,
    pub(crate) pool: BufferPool,
    pub(crate) filled: Mutex<VecDeque<SerializedBatch>>,
    pub(crate) persist: Mutex<PersistState>,
    pub(crate) consumer_cv: Condvar,
    pub(crate) flush_done_cv: Condvar,
    pub(crate) metrics: Mutex<Option<Arc<dyn MetricsSink>>>,
    pub(crate) fatal_hook: Mutex<Option<FatalErrorHook>>,
    pub(crate) stats: Mutex<WalStats>,
}

pub(crate) struct PersistState {
    pub(crate) run: bool,
    pub(crate) stopped: bool,
    pub(crate) force_flush: bool,
    pub(crate) fatal: Option<NoctuaError>,
}

impl Shared {
    pub(crate) fn filled_is_empty(&self) -> bool {
        self.filled.lock().is_empty()
    }

    pub(crate) fn metrics_sink(&self) -> Option<Arc<dyn MetricsSink>> {
        self.metrics.lock().clone()
    }
}

/// Owner of the durable-logging pipeline: the buffer pool, the filled
/// queue, and the disk consumer thread. Producers acquire buffers, fill
/// them with serialized records, and submit them; the consumer makes them
/// durable and fires their commit callbacks.
pub struct LogManager {
    shared: Arc<Shared>,
    io: Mutex<Option<Arc<dyn LogFile>>>,
    worker: Mutex<Worker>,
}

struct Worker {
    handle: Option<JoinHandle<()>>,
    stopped: bool,
}

impl LogManager {
    /// Builds a manager that will open `config.log_path` on `start`.
    pub fn new(config: LogConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self::build(config, None))
    }

    /// Builds a manager over a caller-provided log file.
    pub fn with_io(config: LogConfig, io: Arc<dyn LogFile>) -> Result<Self> {
        config.validate()?;
        Ok(Self::build(config, Some(io)))
    }

    fn build(config: LogConfig, io: Option<Arc<dyn LogFile>>) -> Self {
        let pool = BufferPool::new(config.num_buffers, config.buffer_capacity);
        Self {
            shared: Arc::new(Shared {
                config,
                pool,
                filled: Mutex::new(VecDeque::new()),
                persist: Mutex::new(PersistState {
                    run: false,
                    stopped: false,
                    force_flush: false,
                    fatal: None,
                }),
                consumer_cv: Condvar::new(),
                flush_done_cv: Condvar::new(),
                metrics: Mutex::new(None),
                fatal_hook: Mutex::new(None),
                stats: Mutex::new(WalStats::default()),
            }),
            io: Mutex::new(io),
            worker: Mutex::new(Worker {
                handle: None,
                stopped: false,
            }),
        }
    }

    /// Opens the log file and spawns the consumer thread. A second call,
    /// or a call after `stop`, is a no-op.
    pub fn start(&self) -> Result<()> {
        let mut worker = self.worker.lock();
        if worker.handle.is_some() || worker.stopped {
            warn!("log manager start ignored; consumer already started or stopped");
            return Ok(());
        }
        let file = {
            let mut slot = self.io.lock();
            match slot.as_ref() {
                Some(file) => Arc::clone(file),
                None => {
                    let opened: Arc<dyn LogFile> =
                        Arc::new(StdLogFile::open(&self.shared.config.log_path)?);
                    *slot = Some(Arc::clone(&opened));
                    opened
                }
            }
        };
        self.shared.persist.lock().run = true;
        let consumer = DiskLogConsumer::new(Arc::clone(&self.shared), file);
        worker.handle = Some(thread::spawn(move || consumer.run()));
        info!(
            "log manager started, logging to {}",
            self.shared.config.log_path.display()
        );
        Ok(())
    }

    /// Signals shutdown, waits for the consumer to drain the filled queue
    /// and perform its final fsync, and joins the thread. Every submitted
    /// callback has fired (or, on a fatal I/O error, been refused) by the
    /// time this returns. Surfaces the consumer's fatal error, if any.
    pub fn stop(&self) -> Result<()> {
        let handle = {
            let mut worker = self.worker.lock();
            match worker.handle.take() {
                Some(handle) => {
                    worker.stopped = true;
                    handle
                }
                None => {
                    warn!("log manager stop ignored; consumer not running");
                    return Ok(());
                }
            }
        };
        let result = self.shutdown(handle);
        if result.is_ok() {
            info!("log manager stopped");
        }
        result
    }

    fn shutdown(&self, handle: JoinHandle<()>) -> Result<()> {
        {
            let mut persist = self.shared.persist.lock();
            persist.run = false;
            persist.stopped = true;
        }
        self.shared.consumer_cv.notify_one();
        self.shared.pool.close();
        if handle.join().is_err() {
            return Err(NoctuaError::Invalid("disk log consumer thread panicked"));
        }
        // Final fsync is done; drop our handle so the file closes.
        self.io.lock().take();
        let persist = self.shared.persist.lock();
        match &persist.fatal {
            Some(err) => Err(clone_error(err)),
            None => Ok(()),
        }
    }

    /// Blocks until an empty buffer is available for serialization. Fails
    /// only on shutdown.
    pub fn acquire_buffer(&self) -> Result<LogBuffer> {
        self.shared.pool.acquire()
    }

    /// Hands a filled buffer (and the commit callbacks attached to it) to
    /// the consumer. The buffer's bytes become durable at the next fsync,
    /// at which point its callbacks fire.
    pub fn submit_buffer(&self, mut buffer: LogBuffer) -> Result<()> {
        let callbacks = buffer.take_callbacks();
        let persist = self.shared.persist.lock();
        if let Some(err) = &persist.fatal {
            let err = clone_error(err);
            drop(persist);
            self.shared.pool.release(buffer);
            return Err(err);
        }
        if persist.stopped {
            drop(persist);
            self.shared.pool.release(buffer);
            return Err(NoctuaError::Shutdown);
        }
        self.shared
            .filled
            .lock()
            .push_back(SerializedBatch { buffer, callbacks });
        drop(persist);
        self.shared.consumer_cv.notify_one();
        Ok(())
    }

    /// Returns an unsubmitted buffer to the pool.
    pub fn release_buffer(&self, buffer: LogBuffer) {
        self.shared.pool.release(buffer);
    }

    /// Synchronous fsync barrier: returns once every buffer that was in
    /// the filled queue when this call signalled the consumer is durable
    /// and its callbacks have fired. Must not be called from a commit
    /// callback.
    pub fn force_flush(&self) -> Result<()> {
        let mut persist = self.shared.persist.lock();
        if let Some(err) = &persist.fatal {
            return Err(clone_error(err));
        }
        if persist.stopped {
            return Err(NoctuaError::Shutdown);
        }
        if !persist.run {
            return Err(NoctuaError::Invalid("log consumer not running"));
        }
        persist.force_flush = true;
        self.shared.consumer_cv.notify_one();
        while persist.force_flush {
            self.shared.flush_done_cv.wait(&mut persist);
            if let Some(err) = &persist.fatal {
                return Err(clone_error(err));
            }
        }
        Ok(())
    }

    pub fn install_metrics_sink(&self, sink: Arc<dyn MetricsSink>) {
        *self.shared.metrics.lock() = Some(sink);
    }

    pub fn install_fatal_hook(&self, hook: FatalErrorHook) {
        *self.shared.fatal_hook.lock() = Some(hook);
    }

    pub fn stats(&self) -> WalStats {
        self.shared.stats.lock().clone()
    }

    /// Empty buffers currently in the pool.
    pub fn available_buffers(&self) -> usize {
        self.shared.pool.available_buffers()
    }

    pub fn config(&self) -> &LogConfig {
        &self.shared.config
    }
}

impl Drop for LogManager {
    fn drop(&mut self) {
        let handle = {
            let worker = self.worker.get_mut();
            if worker.handle.is_some() {
                worker.stopped = true;
            }
            worker.handle.take()
        };
        if let Some(handle) = handle {
            if let Err(err) = self.shutdown(handle) {
                warn!("log manager dropped with unreported error: {err}");
            }
        }
    }
}

pub(crate) fn clone_error(err: &NoctuaError) -> NoctuaError {
    match err {
        NoctuaError::Io(io_err) => {
            NoctuaError::Io(io::Error::new(io_err.kind(), io_err.to_string()))
        }
        NoctuaError::Corruption(msg) => NoctuaError::Corruption(msg),
        NoctuaError::Invalid(msg) => NoctuaError::Invalid(msg),
        NoctuaError::Shutdown => NoctuaError::Shutdown,
    }
}
