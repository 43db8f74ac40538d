//! # WalletSync Storage
//!
//! Byte-store backends underneath the WalletSync record log.
//!
//! Backends are **opaque**: they append, read, flush and truncate bytes and
//! know nothing about expenses, categories or frame layouts. The record store
//! in `walletsync_core` owns the on-disk format.
//!
//! ## Available Backends
//!
//! - [`InMemoryBackend`] - For tests and throwaway stores
//! - [`FileBackend`] - For the on-device record log
//!
//! ## Example
//!
//! ```rust
//! use walletsync_storage::{StorageBackend, InMemoryBackend};
//!
//! let mut backend = InMemoryBackend::new();
//! let offset = backend.append(b"frame").unwrap();
//! assert_eq!(backend.read_at(offset, 5).unwrap(), b"frame");
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod error;
mod file;
mod memory;

pub use backend::StorageBackend;
pub use error::{StorageError, StorageResult};
pub use file::FileBackend;
pub use memory::InMemoryBackend;
