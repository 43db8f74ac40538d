//! Error types for the record store.

use crate::types::{LocalId, RecordKind};
use std::io;
use thiserror::Error;

/// Result type for record store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Local storage failures.
///
/// Any of these is fatal to the single operation that raised it and is
/// surfaced to the caller; other rows stay intact.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Storage backend error.
    #[error("storage error: {0}")]
    Storage(#[from] walletsync_storage::StorageError),

    /// I/O error outside the backend (directory, lock file, rename).
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A payload could not be encoded or decoded.
    #[error("codec error: {0}")]
    Codec(String),

    /// The record log is damaged before its final frame.
    #[error("record log corrupted at offset {offset}: {message}")]
    Corruption {
        /// Offset of the damaged frame.
        offset: u64,
        /// Description of the damage.
        message: String,
    },

    /// A frame failed its checksum.
    #[error("checksum mismatch at offset {offset}: expected {expected:08x}, got {actual:08x}")]
    ChecksumMismatch {
        /// Offset of the frame.
        offset: u64,
        /// Checksum stored in the frame.
        expected: u32,
        /// Checksum computed over the frame.
        actual: u32,
    },

    /// Another process holds the store directory lock.
    #[error("record store locked: another process has exclusive access")]
    StoreLocked,

    /// The store directory is missing or malformed.
    #[error("invalid store directory: {0}")]
    InvalidFormat(String),

    /// No record with this local id.
    #[error("{kind} {local_id} not found")]
    NotFound {
        /// Kind of record looked up.
        kind: RecordKind,
        /// Missing local id.
        local_id: LocalId,
    },

    /// A record failed validation before it was written.
    #[error("invalid record: {0}")]
    InvalidRecord(String),
}

impl StoreError {
    /// Creates a corruption error.
    pub fn corruption(offset: u64, message: impl Into<String>) -> Self {
        Self::Corruption {
            offset,
            message: message.into(),
        }
    }

    /// Creates an invalid-record error.
    pub fn invalid_record(message: impl Into<String>) -> Self {
        Self::InvalidRecord(message.into())
    }

    /// Creates a codec error.
    pub fn codec(message: impl ToString) -> Self {
        Self::Codec(message.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_messages() {
        let err = StoreError::NotFound {
            kind: RecordKind::Expense,
            local_id: LocalId::new(7),
        };
        assert_eq!(err.to_string(), "expense #7 not found");

        let err = StoreError::ChecksumMismatch {
            offset: 64,
            expected: 0xdead_beef,
            actual: 0x0000_0001,
        };
        assert!(err.to_string().contains("deadbeef"));
        assert!(err.to_string().contains("offset 64"));
    }
}
