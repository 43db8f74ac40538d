//! Store directory management.
//!
//! ```text
//! <store_path>/
//! ├─ LOCK                  # Advisory lock, one process per store
//! ├─ records.log           # Append-only record log
//! └─ records.log.compact   # Present only while a compaction is running
//! ```

use crate::error::{StoreError, StoreResult};
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use tracing::warn;

const LOCK_FILE: &str = "LOCK";
const LOG_FILE: &str = "records.log";
const COMPACT_FILE: &str = "records.log.compact";

/// An open store directory holding the exclusive lock.
///
/// The lock is released when this value is dropped.
#[derive(Debug)]
pub struct StoreDir {
    path: PathBuf,
    _lock_file: File,
}

impl StoreDir {
    /// Opens or creates a store directory and takes its lock.
    ///
    /// # Errors
    ///
    /// - [`StoreError::InvalidFormat`] if the directory is missing and
    ///   `create_if_missing` is false, or the path is not a directory
    /// - [`StoreError::StoreLocked`] if another handle holds the lock
    pub fn open(path: &Path, create_if_missing: bool) -> StoreResult<Self> {
        if !path.exists() {
            if create_if_missing {
                fs::create_dir_all(path)?;
            } else {
                return Err(StoreError::InvalidFormat(format!(
                    "store directory does not exist: {}",
                    path.display()
                )));
            }
        }

        if !path.is_dir() {
            return Err(StoreError::InvalidFormat(format!(
                "path is not a directory: {}",
                path.display()
            )));
        }

        let lock_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path.join(LOCK_FILE))?;

        if lock_file.try_lock_exclusive().is_err() {
            return Err(StoreError::StoreLocked);
        }

        let dir = Self {
            path: path.to_path_buf(),
            _lock_file: lock_file,
        };
        dir.remove_stale_compaction()?;
        Ok(dir)
    }

    /// Returns the directory path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the path of the record log.
    #[must_use]
    pub fn log_path(&self) -> PathBuf {
        self.path.join(LOG_FILE)
    }

    /// Returns the path a compaction writes into before the rename.
    #[must_use]
    pub fn compact_path(&self) -> PathBuf {
        self.path.join(COMPACT_FILE)
    }

    /// Atomically replaces the record log with the compacted file.
    pub fn install_compacted(&self) -> StoreResult<()> {
        fs::rename(self.compact_path(), self.log_path())?;
        self.sync_directory()
    }

    // A compaction that crashed before its rename leaves a partial file.
    // The live log is still authoritative, so the leftover is discarded.
    fn remove_stale_compaction(&self) -> StoreResult<()> {
        let stale = self.compact_path();
        if stale.exists() {
            warn!(path = %stale.display(), "removing unfinished compaction file");
            fs::remove_file(&stale)?;
        }
        Ok(())
    }

    #[cfg(unix)]
    fn sync_directory(&self) -> StoreResult<()> {
        File::open(&self.path)?.sync_all()?;
        Ok(())
    }

    #[cfg(not(unix))]
    fn sync_directory(&self) -> StoreResult<()> {
        // NTFS journals metadata; directories cannot be fsynced there.
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn creates_directory_and_lock() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("store");

        let dir = StoreDir::open(&path, true).unwrap();
        assert!(path.is_dir());
        assert!(path.join("LOCK").exists());
        assert_eq!(dir.log_path(), path.join("records.log"));
    }

    #[test]
    fn missing_directory_without_create_fails() {
        let tmp = tempdir().unwrap();
        let result = StoreDir::open(&tmp.path().join("absent"), false);
        assert!(matches!(result, Err(StoreError::InvalidFormat(_))));
    }

    #[test]
    fn file_path_is_rejected() {
        let tmp = tempdir().unwrap();
        let file = tmp.path().join("plain");
        fs::write(&file, b"x").unwrap();
        assert!(matches!(
            StoreDir::open(&file, true),
            Err(StoreError::InvalidFormat(_))
        ));
    }

    #[test]
    fn second_open_is_locked_out() {
        let tmp = tempdir().unwrap();
        let _first = StoreDir::open(tmp.path(), true).unwrap();
        assert!(matches!(
            StoreDir::open(tmp.path(), true),
            Err(StoreError::StoreLocked)
        ));
    }

    #[test]
    fn lock_released_on_drop() {
        let tmp = tempdir().unwrap();
        drop(StoreDir::open(tmp.path(), true).unwrap());
        StoreDir::open(tmp.path(), true).unwrap();
    }

    #[test]
    fn stale_compaction_file_is_removed() {
        let tmp = tempdir().unwrap();
        fs::write(tmp.path().join("records.log.compact"), b"partial").unwrap();
        let dir = StoreDir::open(tmp.path(), true).unwrap();
        assert!(!dir.compact_path().exists());
    }

    #[test]
    fn install_compacted_replaces_log() {
        let tmp = tempdir().unwrap();
        let dir = StoreDir::open(tmp.path(), true).unwrap();
        fs::write(dir.log_path(), b"old").unwrap();
        fs::write(dir.compact_path(), b"new").unwrap();

        dir.install_compacted().unwrap();
        assert_eq!(fs::read(dir.log_path()).unwrap(), b"new");
        assert!(!dir.compact_path().exists());
    }
}
