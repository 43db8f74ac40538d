//! # WalletSync Core
//!
//! Record model and durable local record store for WalletSync.
//!
//! This crate provides:
//! - Expense and category records with their sync metadata
//! - Natural keys used to recognise the same logical record across devices
//! - The [`RecordStore`]: an append-only, CRC-checked, CBOR-framed record log
//!   materialized into in-memory tables
//! - Store directory locking and log compaction
//!
//! ## Key Invariants
//!
//! - Every record belongs to exactly one user
//! - A `synced` record always carries a remote id
//! - Local ids are monotonic and never reused within a store
//! - Each write is atomic per record: it is either replayed in full or not at all
//! - A torn final frame is cut off on open; damage anywhere else is an error

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod compaction;
mod config;
mod dir;
mod error;
mod frame;
mod model;
mod store;
mod types;

pub use compaction::CompactionReport;
pub use config::StoreConfig;
pub use error::{StoreError, StoreResult};
pub use frame::{compute_crc32, Frame, FrameError, FrameFlags};
pub use model::{
    Category, CategoryKey, Expense, ExpenseKey, NewCategory, NewExpense, StoredRecord,
};
pub use rust_decimal::Decimal;
pub use store::{RecordStore, RecoveryReport, StoreStats};
pub use types::{LocalId, RecordKind, RemoteId, SyncState, Timestamp, UserId};
