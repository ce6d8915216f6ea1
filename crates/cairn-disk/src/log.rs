//! Write-ahead log sink.
//!
//! The buffer pool manager holds a reference to the log manager for future
//! recovery integration; the storage core itself never appends on its hot
//! paths. Records are length-prefixed and identified by a monotonically
//! increasing LSN.

use bytes::Bytes;
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::PathBuf;
use cairn_common::Result;

/// Log Sequence Number - unique identifier for each log record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Lsn(pub u64);

impl Lsn {
    /// Invalid/uninitialized LSN.
    pub const INVALID: Lsn = Lsn(0);

    /// Returns true if this is a valid LSN.
    pub fn is_valid(&self) -> bool {
        self.0 > 0
    }
}

impl std::fmt::Display for Lsn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "lsn:{}", self.0)
    }
}

/// Append-only write-ahead log sink.
///
/// Appends buffer records in memory; `flush` persists them. The next LSN
/// and the last durable LSN are tracked for callers that order writes
/// against the log.
pub struct LogManager {
    fsync_enabled: bool,
    inner: Mutex<LogInner>,
}

struct LogInner {
    file: File,
    buffer: Vec<u8>,
    next_lsn: u64,
    flushed_lsn: u64,
}

impl LogManager {
    /// Creates a new log manager, opening or creating the log file.
    pub fn new(log_path: impl Into<PathBuf>, fsync_enabled: bool) -> Result<Self> {
        let log_path = log_path.into();
        if let Some(parent) = log_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new()
            .append(true)
            .create(true)
            .open(&log_path)?;

        Ok(Self {
            fsync_enabled,
            inner: Mutex::new(LogInner {
                file,
                buffer: Vec::new(),
                next_lsn: 1,
                flushed_lsn: 0,
            }),
        })
    }

    /// Appends a record to the in-memory log buffer and assigns its LSN.
    pub fn append(&self, payload: Bytes) -> Lsn {
        let mut inner = self.inner.lock();
        let lsn = Lsn(inner.next_lsn);
        inner.next_lsn += 1;

        inner
            .buffer
            .extend_from_slice(&(payload.len() as u32).to_le_bytes());
        inner.buffer.extend_from_slice(&lsn.0.to_le_bytes());
        inner.buffer.extend_from_slice(&payload);
        lsn
    }

    /// Writes the buffered records to the log file.
    pub fn flush(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        if inner.buffer.is_empty() {
            return Ok(());
        }

        let buffer = std::mem::take(&mut inner.buffer);
        inner.file.write_all(&buffer)?;
        if self.fsync_enabled {
            inner.file.sync_all()?;
        }
        inner.flushed_lsn = inner.next_lsn - 1;
        Ok(())
    }

    /// Returns the LSN of the last record made durable by `flush`.
    pub fn flushed_lsn(&self) -> Lsn {
        Lsn(self.inner.lock().flushed_lsn)
    }

    /// Returns the next LSN that will be assigned.
    pub fn next_lsn(&self) -> Lsn {
        Lsn(self.inner.lock().next_lsn)
    }
}
