//! Log storage that runs out of space.
//!
//! A [`QuotaOpener`] creates real files, but every file it hands out accepts
//! only a fixed number of writes. The next write puts half of its bytes on
//! disk and then fails the way a full disk does, so the cleanup after a failed
//! append can be checked against what actually reached the file.
//!
//! # Example
//!
//! ```rust,ignore
//! // Header plus two rows fit, the third append fails.
//! let opener = QuotaOpener::new(3);
//! let logger = IncrementalLogger::begin_with(&opener, &path, &columns)?;
//! ```

use crate::storage::logger::{LogOpener, LogStorage};
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Opens files that fail after a shared number of writes.
#[derive(Debug, Clone)]
pub struct QuotaOpener {
    remaining: Arc<AtomicUsize>,
}

impl QuotaOpener {
    /// Allow `writes` successful writes across every file this opener creates.
    pub fn new(writes: usize) -> Self {
        Self {
            remaining: Arc::new(AtomicUsize::new(writes)),
        }
    }

    /// Writes left before the next one fails.
    pub fn remaining(&self) -> usize {
        self.remaining.load(Ordering::SeqCst)
    }
}

impl LogOpener for QuotaOpener {
    fn create(&self, path: &Path) -> io::Result<Box<dyn LogStorage>> {
        let file = OpenOptions::new().write(true).create_new(true).open(path)?;
        Ok(Box::new(QuotaFile {
            file,
            remaining: Arc::clone(&self.remaining),
        }))
    }
}

struct QuotaFile {
    file: File,
    remaining: Arc<AtomicUsize>,
}

impl LogStorage for QuotaFile {
    fn append_bytes(&mut self, bytes: &[u8]) -> io::Result<()> {
        let granted = self
            .remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if granted {
            return self.file.write_all(bytes);
        }
        self.file.write_all(&bytes[..bytes.len() / 2])?;
        Err(io::Error::other("No space left on device"))
    }

    fn sync(&mut self) -> io::Result<()> {
        self.file.sync_data()
    }

    fn truncate(&mut self, len: u64) -> io::Result<()> {
        LogStorage::truncate(&mut self.file, len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn fails_after_quota_with_partial_write() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("quota.csv");
        let opener = QuotaOpener::new(1);
        let mut storage = opener.create(&path).unwrap();

        storage.append_bytes(b"abcd\n").unwrap();
        assert_eq!(opener.remaining(), 0);
        assert!(storage.append_bytes(b"efgh\n").is_err());
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "abcd\nef");

        storage.truncate(5).unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "abcd\n");
    }

    #[test]
    fn refuses_existing_files() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("taken.csv");
        std::fs::write(&path, "x").unwrap();
        assert!(QuotaOpener::new(5).create(&path).is_err());
    }
}
