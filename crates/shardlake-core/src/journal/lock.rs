use std::fs::{File, OpenOptions};
use std::path::Path;

use fs2::FileExt;

use crate::error::JournalError;

/// Advisory lock (`flock(2)` on Unix) guarding a journal against a second
/// writer process.
///
/// Released when dropped (the descriptor is closed).
#[derive(Debug)]
pub struct JournalLock {
    _file: File,
}

impl JournalLock {
    /// Take the exclusive lock on `path` without blocking.
    ///
    /// Creates the lock file if needed. Fails with `JournalError::Locked`
    /// when another descriptor holds it.
    pub fn try_exclusive(path: &Path) -> Result<Self, JournalError> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;

        file.try_lock_exclusive()
            .map_err(|_| JournalError::Locked)?;

        Ok(Self { _file: file })
    }
}
