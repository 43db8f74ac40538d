//! In-memory storage backend.

use crate::backend::StorageBackend;
use crate::error::{StorageError, StorageResult};
use parking_lot::RwLock;

/// A byte store held entirely in memory.
///
/// Used by tests, by the in-memory record store, and by the compactor when
/// rebuilding a store that has no backing file.
#[derive(Debug, Default)]
pub struct InMemoryBackend {
    data: RwLock<Vec<u8>>,
}

impl InMemoryBackend {
    /// Creates an empty backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a backend preloaded with `data`.
    ///
    /// Handy for replaying a hand-crafted or damaged log.
    #[must_use]
    pub fn with_data(data: Vec<u8>) -> Self {
        Self {
            data: RwLock::new(data),
        }
    }

    /// Returns a copy of the stored bytes.
    #[must_use]
    pub fn data(&self) -> Vec<u8> {
        self.data.read().clone()
    }
}

impl StorageBackend for InMemoryBackend {
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
        let data = self.data.read();
        let size = data.len() as u64;
        let end = offset.saturating_add(len as u64);
        if offset > size || end > size {
            return Err(StorageError::ReadPastEnd { offset, len, size });
        }
        Ok(data[offset as usize..end as usize].to_vec())
    }

    fn append(&mut self, bytes: &[u8]) -> StorageResult<u64> {
        let mut data = self.data.write();
        let offset = data.len() as u64;
        data.extend_from_slice(bytes);
        Ok(offset)
    }

    fn flush(&mut self) -> StorageResult<()> {
        Ok(())
    }

    fn size(&self) -> StorageResult<u64> {
        Ok(self.data.read().len() as u64)
    }

    fn sync(&mut self) -> StorageResult<()> {
        Ok(())
    }

    fn truncate(&mut self, new_size: u64) -> StorageResult<()> {
        let mut data = self.data.write();
        let size = data.len() as u64;
        if new_size > size {
            return Err(StorageError::TruncatePastEnd {
                requested: new_size,
                size,
            });
        }
        data.truncate(new_size as usize);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn starts_empty() {
        let backend = InMemoryBackend::new();
        assert_eq!(backend.size().unwrap(), 0);
        assert!(backend.read_all().unwrap().is_empty());
    }

    #[test]
    fn offsets_follow_appends() {
        let mut backend = InMemoryBackend::new();
        assert_eq!(backend.append(b"rent").unwrap(), 0);
        assert_eq!(backend.append(b"fuel").unwrap(), 4);
        assert_eq!(backend.read_at(4, 4).unwrap(), b"fuel");
    }

    #[test]
    fn range_past_end_fails() {
        let mut backend = InMemoryBackend::new();
        backend.append(b"hello").unwrap();
        assert!(matches!(
            backend.read_at(3, 10),
            Err(StorageError::ReadPastEnd { .. })
        ));
        assert!(matches!(
            backend.read_at(10, 0),
            Err(StorageError::ReadPastEnd { .. })
        ));
    }

    #[test]
    fn preloaded_data_is_readable() {
        let backend = InMemoryBackend::with_data(b"seed".to_vec());
        assert_eq!(backend.size().unwrap(), 4);
        assert_eq!(backend.data(), b"seed");
    }

    #[test]
    fn truncate_rules() {
        let mut backend = InMemoryBackend::new();
        backend.append(b"hello world").unwrap();
        backend.truncate(5).unwrap();
        assert_eq!(backend.read_all().unwrap(), b"hello");
        assert!(backend.truncate(6).is_err());
        backend.truncate(0).unwrap();
        assert_eq!(backend.size().unwrap(), 0);
    }

    proptest! {
        #[test]
        fn read_all_is_concatenation(chunks in prop::collection::vec(prop::collection::vec(any::<u8>(), 0..32), 0..16)) {
            let mut backend = InMemoryBackend::new();
            let mut expected = Vec::new();
            for chunk in &chunks {
                let offset = backend.append(chunk).unwrap();
                prop_assert_eq!(offset, expected.len() as u64);
                expected.extend_from_slice(chunk);
            }
            prop_assert_eq!(backend.read_all().unwrap(), expected);
        }
    }
}
