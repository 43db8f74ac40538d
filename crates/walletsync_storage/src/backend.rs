//! Storage backend trait definition.

use crate::error::StorageResult;

/// A low-level append-only byte store.
///
/// The record store writes one frame per mutation through [`append`] and
/// replays the whole log through [`read_at`] when it opens.
///
/// # Invariants
///
/// - `append` returns the offset where data was written
/// - `read_at` returns exactly the bytes previously written at that offset
/// - `flush` pushes appended data to the OS, `sync` makes it durable
/// - Backends must be `Send + Sync`
///
/// [`append`]: StorageBackend::append
/// [`read_at`]: StorageBackend::read_at
pub trait StorageBackend: Send + Sync {
    /// Reads `len` bytes starting at `offset`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::StorageError::ReadPastEnd`] if the range is not fully
    /// inside the store, or an I/O error.
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>>;

    /// Appends data to the end of the store and returns its offset.
    fn append(&mut self, data: &[u8]) -> StorageResult<u64>;

    /// Flushes buffered writes to the OS.
    fn flush(&mut self) -> StorageResult<()>;

    /// Returns the current size in bytes (the offset of the next append).
    fn size(&self) -> StorageResult<u64>;

    /// Syncs data and metadata to durable storage.
    fn sync(&mut self) -> StorageResult<()>;

    /// Truncates the store to `new_size` bytes.
    ///
    /// Used to cut off a torn frame left by a crash mid-append.
    ///
    /// # Errors
    ///
    /// Returns [`crate::StorageError::TruncatePastEnd`] if `new_size` exceeds
    /// the current size.
    fn truncate(&mut self, new_size: u64) -> StorageResult<()>;

    /// Reads the entire contents of the store.
    fn read_all(&self) -> StorageResult<Vec<u8>> {
        let size = self.size()?;
        self.read_at(0, size as usize)
    }
}
