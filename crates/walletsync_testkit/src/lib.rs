//! # WalletSync Testkit
//!
//! Test utilities for the WalletSync crates.
//!
//! This crate provides:
//! - Temporary record stores that clean up after themselves
//! - Sample users, expenses and categories with fixed timestamps
//! - Proptest strategies for record inputs
//! - A backend wrapper that fails writes on demand

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;

pub use fixtures::*;
pub use generators::*;

/// Re-exports for test modules.
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use proptest::prelude::*;
    pub use walletsync_core::{
        Category, Decimal, Expense, LocalId, NewCategory, NewExpense, RecordStore, RemoteId,
        StoreConfig, SyncState, Timestamp, UserId,
    };
}
