//! Cross-process mutex backed by an advisory lock on a persistent file
//!
//! The lock belongs to the open file, so the operating system drops it when
//! the holder exits or crashes; no stale lock needs breaking.

use crate::error::{StoreError, StoreResult};
use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::time::Instant;

const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Held while the guard lives; dropping it unlocks the file
#[derive(Debug)]
pub(crate) struct MutexFile {
    file: File,
    path: PathBuf,
}

impl MutexFile {
    /// Take the mutex, waiting at most `wait`
    pub(crate) async fn acquire(path: PathBuf, wait: Duration) -> StoreResult<Self> {
        let file = open_lock_file(&path)?;
        let deadline = Instant::now() + wait;
        loop {
            match file.try_lock_exclusive() {
                Ok(()) => return Ok(Self { file, path }),
                Err(e) if e.kind() == fs2::lock_contended_error().kind() => {
                    if Instant::now() >= deadline {
                        return Err(StoreError::Busy(path.display().to_string()));
                    }
                    tokio::time::sleep(POLL_INTERVAL).await;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
}

impl Drop for MutexFile {
    fn drop(&mut self) {
        if let Err(err) = self.file.unlock() {
            tracing::warn!(path = %self.path.display(), error = %err, "Failed to unlock storage mutex");
        }
    }
}

/// The file is never removed, so every holder locks the same inode
fn open_lock_file(path: &Path) -> StoreResult<File> {
    Ok(OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(path)?)
}
