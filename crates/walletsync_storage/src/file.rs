//! File-based storage backend for the on-device record log.

use crate::backend::StorageBackend;
use crate::error::{StorageError, StorageResult};
use parking_lot::{Mutex, RwLock};
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// A file-backed byte store.
///
/// - `flush()` calls `File::flush()` to push data to the OS
/// - `sync()` calls `File::sync_all()` so the data survives power loss
///
/// Reads and appends share one file handle guarded by a mutex; the cached
/// size is kept separately so `size()` never touches the file.
///
/// # Example
///
/// ```no_run
/// use walletsync_storage::{StorageBackend, FileBackend};
/// use std::path::Path;
///
/// let mut backend = FileBackend::open(Path::new("records.log")).unwrap();
/// backend.append(b"frame").unwrap();
/// backend.sync().unwrap();
/// ```
#[derive(Debug)]
pub struct FileBackend {
    path: PathBuf,
    file: Mutex<File>,
    size: RwLock<u64>,
}

impl FileBackend {
    /// Opens or creates the file at `path` for reading and appending.
    pub fn open(path: &Path) -> StorageResult<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;
        let size = file.metadata()?.len();

        Ok(Self {
            path: path.to_path_buf(),
            file: Mutex::new(file),
            size: RwLock::new(size),
        })
    }

    /// Opens or creates the file, creating missing parent directories.
    pub fn open_with_create_dirs(path: &Path) -> StorageResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Self::open(path)
    }

    /// Returns the path of the underlying file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl StorageBackend for FileBackend {
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
        let size = *self.size.read();
        let end = offset.saturating_add(len as u64);
        if offset > size || end > size {
            return Err(StorageError::ReadPastEnd { offset, len, size });
        }
        if len == 0 {
            return Ok(Vec::new());
        }

        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(offset))?;
        let mut buffer = vec![0u8; len];
        file.read_exact(&mut buffer)?;
        Ok(buffer)
    }

    fn append(&mut self, data: &[u8]) -> StorageResult<u64> {
        let mut size = self.size.write();
        if data.is_empty() {
            return Ok(*size);
        }

        let mut file = self.file.lock();
        let offset = *size;
        file.seek(SeekFrom::Start(offset))?;
        file.write_all(data)?;
        *size += data.len() as u64;
        Ok(offset)
    }

    fn flush(&mut self) -> StorageResult<()> {
        self.file.lock().flush()?;
        Ok(())
    }

    fn size(&self) -> StorageResult<u64> {
        Ok(*self.size.read())
    }

    fn sync(&mut self) -> StorageResult<()> {
        self.file.lock().sync_all()?;
        Ok(())
    }

    fn truncate(&mut self, new_size: u64) -> StorageResult<()> {
        let mut size = self.size.write();
        if new_size > *size {
            return Err(StorageError::TruncatePastEnd {
                requested: new_size,
                size: *size,
            });
        }

        let file = self.file.lock();
        file.set_len(new_size)?;
        file.sync_all()?;
        *size = new_size;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn creates_missing_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("records.log");

        let backend = FileBackend::open(&path).unwrap();
        assert_eq!(backend.size().unwrap(), 0);
        assert!(path.exists());
        assert_eq!(backend.path(), path);
    }

    #[test]
    fn append_then_read_back() {
        let dir = tempdir().unwrap();
        let mut backend = FileBackend::open(&dir.path().join("records.log")).unwrap();

        assert_eq!(backend.append(b"groceries").unwrap(), 0);
        assert_eq!(backend.append(b":42.50").unwrap(), 9);
        assert_eq!(backend.size().unwrap(), 15);
        assert_eq!(backend.read_at(0, 15).unwrap(), b"groceries:42.50");
        assert_eq!(backend.read_at(10, 5).unwrap(), b"42.50");
    }

    #[test]
    fn read_past_end_is_rejected() {
        let dir = tempdir().unwrap();
        let mut backend = FileBackend::open(&dir.path().join("records.log")).unwrap();
        backend.append(b"abc").unwrap();

        assert!(matches!(
            backend.read_at(2, 5),
            Err(StorageError::ReadPastEnd { .. })
        ));
    }

    #[test]
    fn contents_survive_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("records.log");
        {
            let mut backend = FileBackend::open(&path).unwrap();
            backend.append(b"durable").unwrap();
            backend.sync().unwrap();
        }

        let backend = FileBackend::open(&path).unwrap();
        assert_eq!(backend.read_all().unwrap(), b"durable");
    }

    #[test]
    fn truncate_cuts_torn_tail() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("records.log");
        let mut backend = FileBackend::open(&path).unwrap();
        backend.append(b"whole").unwrap();
        backend.append(b"tor").unwrap();

        backend.truncate(5).unwrap();
        assert_eq!(backend.size().unwrap(), 5);
        assert_eq!(std::fs::metadata(&path).unwrap().len(), 5);

        // Appends continue at the new end.
        assert_eq!(backend.append(b"!").unwrap(), 5);
        assert_eq!(backend.read_all().unwrap(), b"whole!");
    }

    #[test]
    fn truncate_beyond_size_fails() {
        let dir = tempdir().unwrap();
        let mut backend = FileBackend::open(&dir.path().join("records.log")).unwrap();
        backend.append(b"x").unwrap();
        assert!(matches!(
            backend.truncate(10),
            Err(StorageError::TruncatePastEnd { .. })
        ));
    }

    #[test]
    fn nested_directories_are_created() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("users").join("u1").join("records.log");
        let backend = FileBackend::open_with_create_dirs(&path).unwrap();
        assert_eq!(backend.size().unwrap(), 0);
        assert!(path.exists());
    }
}
