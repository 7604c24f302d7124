#![forbid(unsafe_code)]

use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::Path;

use parking_lot::Mutex;

use noctua_types::Result;

/// Append-only handle to a single log file. The caller that performs
/// appends must be the only writer; `sync` and `len` may be called from
/// other threads.
pub trait LogFile: Send + Sync {
    /// Appends all of `buf` at the current end of the log. Short writes
    /// and interrupts are retried until every byte is accepted.
    fn append(&self, buf: &[u8]) -> Result<()>;

    /// Forces previously appended bytes to stable storage.
    fn sync(&self) -> Result<()>;

    fn len(&self) -> Result<u64>;

    fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }
}

pub struct StdLogFile {
    file: Mutex<File>,
}

impl StdLogFile {
    pub fn open(path: &Path) -> Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            file: Mutex::new(file),
        })
    }
}

impl LogFile for StdLogFile {
    fn append(&self, mut buf: &[u8]) -> Result<()> {
        let mut file = self.file.lock();
        while !buf.is_empty() {
            match file.write(buf) {
                Ok(0) => {
                    return Err(std::io::Error::new(
                        ErrorKind::WriteZero,
                        "log file accepted zero bytes",
                    )
                    .into())
                }
                Ok(written) => buf = &buf[written..],
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(err.into()),
            }
        }
        Ok(())
    }

    fn sync(&self) -> Result<()> {
        self.file.lock().sync_data()?;
        Ok(())
    }

    fn len(&self) -> Result<u64> {
        Ok(self.file.lock().metadata()?.len())
    }
}
