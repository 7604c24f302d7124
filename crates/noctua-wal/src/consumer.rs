use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, error, warn};

use noctua_io::LogFile;
use noctua_types::{NoctuaError, Result};

use crate::buffer::{CommitCallback, SerializedBatch};
use crate::manager::Shared;

/// The dedicated thread that owns the log file. Drains the filled queue,
/// appends buffer bytes, fsyncs on a bounded cadence, and fires commit
/// callbacks only after their bytes are durable.
pub(crate) struct DiskLogConsumer {
    shared: Arc<Shared>,
    file: Arc<dyn LogFile>,
    /// Bytes appended since the last fsync.
    current_data_written: u64,
    /// Callbacks for buffers written but not yet fsynced.
    pending_callbacks: Vec<CommitCallback>,
    last_persist: Instant,
    counters: PeriodCounters,
}

#[derive(Default)]
struct PeriodCounters {
    write_us: u64,
    persist_us: u64,
    num_bytes: u64,
    num_buffers: u64,
}

impl DiskLogConsumer {
    pub(crate) fn new(shared: Arc<Shared>, file: Arc<dyn LogFile>) -> Self {
        Self {
            shared,
            file,
            current_data_written: 0,
            pending_callbacks: Vec::new(),
            last_persist: Instant::now(),
            counters: PeriodCounters::default(),
        }
    }

    pub(crate) fn run(mut self) {
        debug!("disk log consumer running");
        loop {
            self.wait_for_work();

            let write_started = Instant::now();
            if let Err(err) = self.write_filled_buffers() {
                self.fail(err);
                return;
            }
            self.counters.write_us += elapsed_us(write_started);

            let (force_flush, run) = {
                let persist = self.shared.persist.lock();
                (persist.force_flush, persist.run)
            };
            let timed_out = self.last_persist.elapsed() >= self.shared.config.persist_interval;
            let should_persist = timed_out
                || self.current_data_written > self.shared.config.persist_threshold
                || force_flush
                || !run;
            // An idle timeout on its own persists nothing: skip the fsync
            // unless there are unpersisted bytes, unfired callbacks, a
            // forced flush, or a shutdown in progress.
            let has_work = self.current_data_written > 0
                || !self.pending_callbacks.is_empty()
                || force_flush
                || !run;
            if should_persist && has_work {
                if let Err(err) = self.persist() {
                    self.fail(err);
                    return;
                }
                self.submit_metrics();
            }

            if !self.shared.persist.lock().run {
                break;
            }
        }
        // Shutdown observed: anything that raced in before the run flag
        // dropped must still reach the disk and fire its callbacks.
        if let Err(err) = self.write_filled_buffers() {
            self.fail(err);
            return;
        }
        if let Err(err) = self.persist() {
            self.fail(err);
            return;
        }
        self.submit_metrics();
        debug!("disk log consumer exited");
    }

    /// Bounded wait on the consumer condvar. Wakes on a forced flush, a
    /// filled buffer, shutdown, or the persist interval elapsing; spurious
    /// wakeups re-check the predicate.
    fn wait_for_work(&self) {
        let deadline = Instant::now() + self.shared.config.persist_interval;
        let mut persist = self.shared.persist.lock();
        loop {
            if persist.force_flush || !persist.run || !self.shared.filled_is_empty() {
                return;
            }
            let remaining = match deadline.checked_duration_since(Instant::now()) {
                Some(remaining) if !remaining.is_zero() => remaining,
                _ => return,
            };
            if self
                .shared
                .consumer_cv
                .wait_for(&mut persist, remaining)
                .timed_out()
            {
                return;
            }
        }
    }

    /// Drains the filled queue to exhaustion, appending each buffer to the
    /// log file and recycling it. Written bytes are not yet durable; their
    /// callbacks move to the pending list.
    fn write_filled_buffers(&mut self) -> Result<()> {
        let mut wrote_bytes = 0u64;
        let mut wrote_buffers = 0u64;
        loop {
            let batch = self.shared.filled.lock().pop_front();
            let Some(SerializedBatch { buffer, callbacks }) = batch else {
                break;
            };
            if let Err(err) = self.file.append(buffer.bytes()) {
                drop(callbacks);
                self.shared.pool.release(buffer);
                return Err(err);
            }
            let len = buffer.len() as u64;
            self.current_data_written += len;
            wrote_bytes += len;
            wrote_buffers += 1;
            self.pending_callbacks.extend(callbacks);
            self.shared.pool.release(buffer);
        }
        if wrote_buffers > 0 {
            self.counters.num_bytes += wrote_bytes;
            self.counters.num_buffers += wrote_buffers;
            let mut stats = self.shared.stats.lock();
            stats.bytes_written += wrote_bytes;
            stats.buffers_flushed += wrote_buffers;
        }
        Ok(())
    }

    /// Fsyncs the log file and fires every pending callback, in pending
    /// order, under the persist lock. The force-flush flag is acknowledged
    /// only if the filled queue is still empty after the fsync; otherwise a
    /// racing producer slipped a buffer in and the loop must run again
    /// before any forcer is released.
    fn persist(&mut self) -> Result<()> {
        let persist_started = Instant::now();
        let fired;
        {
            let mut persist = self.shared.persist.lock();
            self.file.sync()?;
            self.shared.stats.lock().syncs += 1;
            fired = self.pending_callbacks.len();
            for callback in self.pending_callbacks.drain(..) {
                if panic::catch_unwind(AssertUnwindSafe(callback)).is_err() {
                    warn!("commit callback panicked");
                }
            }
            if self.shared.filled_is_empty() {
                persist.force_flush = false;
            }
        }
        self.shared.flush_done_cv.notify_all();
        self.counters.persist_us += elapsed_us(persist_started);
        let persisted = std::mem::take(&mut self.current_data_written);
        self.last_persist = Instant::now();
        if persisted > 0 || fired > 0 {
            debug!("persisted {persisted} bytes, fired {fired} commit callbacks");
        }
        Ok(())
    }

    fn submit_metrics(&mut self) {
        if self.counters.num_bytes == 0 {
            return;
        }
        if let Some(sink) = self.shared.metrics_sink() {
            sink.record_consumer_data(
                self.counters.write_us,
                self.counters.persist_us,
                self.counters.num_bytes,
                self.counters.num_buffers,
            );
            self.counters = PeriodCounters::default();
        }
    }

    /// Unrecoverable I/O failure: refuse every unfired callback so the
    /// transactions above stay uncommitted, record the error for `stop()`,
    /// and wake anyone blocked on this manager.
    fn fail(&mut self, err: NoctuaError) {
        error!("disk log consumer fatal error: {err}");
        let mut refused = self.pending_callbacks.len();
        self.pending_callbacks.clear();
        loop {
            let batch = self.shared.filled.lock().pop_front();
            let Some(SerializedBatch { buffer, callbacks }) = batch else {
                break;
            };
            refused += callbacks.len();
            drop(callbacks);
            self.shared.pool.release(buffer);
        }
        if refused > 0 {
            warn!("refusing {refused} commit callbacks; their transactions are not durable");
        }
        if let Some(hook) = self.shared.fatal_hook.lock().as_ref() {
            hook(&err);
        }
        {
            let mut persist = self.shared.persist.lock();
            persist.run = false;
            persist.stopped = true;
            persist.force_flush = false;
            persist.fatal = Some(err);
        }
        self.shared.flush_done_cv.notify_all();
        self.shared.pool.close();
    }
}

fn elapsed_us(started: Instant) -> u64 {
    started.elapsed().as_micros() as u64
}
