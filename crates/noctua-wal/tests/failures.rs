use std::io::ErrorKind;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tempfile::tempdir;

use noctua_io::LogFile;
use noctua_types::{NoctuaError, Result, TxnId};
use noctua_wal::{LogConfig, LogManager, LogRecord};

/// In-memory log file with switchable fault injection.
#[derive(Default)]
struct FlakyLogFile {
    data: Mutex<Vec<u8>>,
    fail_appends: AtomicBool,
    fail_syncs: AtomicBool,
    syncs: AtomicU64,
}

impl FlakyLogFile {
    fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }
}

impl LogFile for FlakyLogFile {
    fn append(&self, buf: &[u8]) -> Result<()> {
        if self.fail_appends.load(Ordering::SeqCst) {
            return Err(std::io::Error::new(ErrorKind::Other, "injected append failure").into());
        }
        self.data.lock().extend_from_slice(buf);
        Ok(())
    }

    fn sync(&self) -> Result<()> {
        if self.fail_syncs.load(Ordering::SeqCst) {
            return Err(std::io::Error::new(ErrorKind::Other, "injected fsync failure").into());
        }
        self.syncs.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn len(&self) -> Result<u64> {
        Ok(self.data.lock().len() as u64)
    }
}

fn config_with_long_interval(dir: &tempfile::TempDir) -> LogConfig {
    let mut config = LogConfig::new(dir.path().join("injected.log"));
    config.persist_interval = Duration::from_secs(30);
    config
}

fn commit_buffer(manager: &LogManager, txn: u64, flag: &Arc<AtomicBool>) -> Result<()> {
    let mut buffer = manager.acquire_buffer()?;
    buffer.append(&LogRecord::commit(TxnId(txn)).encode())?;
    let flag = Arc::clone(flag);
    buffer.attach_callback(Box::new(move || {
        flag.store(true, Ordering::SeqCst);
    }));
    manager.submit_buffer(buffer)
}

#[test]
fn write_failure_is_fatal_and_refuses_callbacks() {
    let dir = tempdir().unwrap();
    let file = FlakyLogFile::new();
    file.fail_appends.store(true, Ordering::SeqCst);
    let manager = LogManager::with_io(config_with_long_interval(&dir), file.clone()).unwrap();
    let hook_saw_error = Arc::new(AtomicBool::new(false));
    {
        let hook_saw_error = Arc::clone(&hook_saw_error);
        manager.install_fatal_hook(Box::new(move |_err| {
            hook_saw_error.store(true, Ordering::SeqCst);
        }));
    }
    manager.start().unwrap();

    let fired = Arc::new(AtomicBool::new(false));
    // The submit itself may already observe the failure.
    let _ = commit_buffer(&manager, 1, &fired);

    assert!(manager.stop().is_err());
    assert!(!fired.load(Ordering::SeqCst));
    assert!(hook_saw_error.load(Ordering::SeqCst));
    assert_eq!(file.syncs.load(Ordering::SeqCst), 0);
}

#[test]
fn fsync_failure_fails_force_flush_and_stop() {
    let dir = tempdir().unwrap();
    let file = FlakyLogFile::new();
    file.fail_syncs.store(true, Ordering::SeqCst);
    let manager = LogManager::with_io(config_with_long_interval(&dir), file.clone()).unwrap();
    manager.start().unwrap();

    let fired = Arc::new(AtomicBool::new(false));
    commit_buffer(&manager, 1, &fired).unwrap();

    assert!(manager.force_flush().is_err());
    assert!(!fired.load(Ordering::SeqCst));
    assert!(matches!(manager.stop(), Err(NoctuaError::Io(_))));
}

#[test]
fn submission_is_rejected_after_stop() {
    let dir = tempdir().unwrap();
    let file = FlakyLogFile::new();
    let manager = LogManager::with_io(config_with_long_interval(&dir), file).unwrap();
    manager.start().unwrap();

    let buffer = manager.acquire_buffer().unwrap();
    manager.stop().unwrap();

    assert!(matches!(
        manager.submit_buffer(buffer),
        Err(NoctuaError::Shutdown)
    ));
    assert!(matches!(
        manager.acquire_buffer(),
        Err(NoctuaError::Shutdown)
    ));
    assert!(manager.force_flush().is_err());
}

#[test]
fn panicking_callback_does_not_poison_the_consumer() {
    let dir = tempdir().unwrap();
    let file = FlakyLogFile::new();
    let manager = LogManager::with_io(config_with_long_interval(&dir), file.clone()).unwrap();
    manager.start().unwrap();

    let survivor = Arc::new(AtomicBool::new(false));
    {
        let mut buffer = manager.acquire_buffer().unwrap();
        buffer.append(&LogRecord::commit(TxnId(1)).encode()).unwrap();
        buffer.attach_callback(Box::new(|| panic!("client hook blew up")));
        let survivor = Arc::clone(&survivor);
        buffer.attach_callback(Box::new(move || {
            survivor.store(true, Ordering::SeqCst);
        }));
        manager.submit_buffer(buffer).unwrap();
    }
    manager.force_flush().unwrap();
    assert!(survivor.load(Ordering::SeqCst));

    // The consumer survived the panic and keeps serving.
    let later = Arc::new(AtomicBool::new(false));
    commit_buffer(&manager, 2, &later).unwrap();
    manager.force_flush().unwrap();
    assert!(later.load(Ordering::SeqCst));
    assert!(file.syncs.load(Ordering::SeqCst) >= 2);
    manager.stop().unwrap();
}

#[test]
fn buffers_come_home_after_fatal_error() {
    let dir = tempdir().unwrap();
    let file = FlakyLogFile::new();
    file.fail_appends.store(true, Ordering::SeqCst);
    let mut config = config_with_long_interval(&dir);
    config.num_buffers = 4;
    let manager = LogManager::with_io(config, file).unwrap();
    manager.start().unwrap();

    let fired = Arc::new(AtomicBool::new(false));
    let _ = commit_buffer(&manager, 1, &fired);
    assert!(manager.stop().is_err());
    assert!(!fired.load(Ordering::SeqCst));
    assert_eq!(manager.available_buffers(), 4);
}
