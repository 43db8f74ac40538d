//! # WalletSync Engine
//!
//! Offline-first synchronization between the local record store and the
//! WalletSync REST API.
//!
//! This crate provides:
//! - The [`RemoteGateway`] abstraction, its REST implementation over a
//!   pluggable [`HttpClient`], and an in-memory [`MockGateway`]
//! - Connectivity oracles
//! - The [`Reconciler`]: push pending records, pull authoritative listings,
//!   delete with category cascade
//! - The [`SyncScheduler`]: per-user single-flight runs, trigger coalescing,
//!   periodic ticks, sign-out cancellation
//! - The [`ReadFacade`] with local fallback
//! - [`WalletEngine`], the composition root
//!
//! ## Architecture
//!
//! Writes land in the local store first and are acknowledged at once. A
//! reconciliation run then does **push-then-pull**:
//! 1. Push pending records, categories before expenses
//! 2. Pull both listings and fold them into the store
//!
//! ## Key Invariants
//!
//! - Pending records are never dropped or overwritten by a pull
//! - A record is pushed at most once per run; a possibly committed push is
//!   matched by natural key before it is created again
//! - At most one run per user is in flight
//! - Gateway calls never retry; the next run is the retry

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod connectivity;
mod engine;
mod error;
mod facade;
mod gateway;
mod http;
mod mock;
mod reconciler;
mod scheduler;
pub mod wire;

pub use config::{CoalescePolicy, EngineConfig};
pub use connectivity::{
    reachability_address, check_reachable, ConnectivityOracle, ManualConnectivity, TcpConnectivity,
};
pub use engine::WalletEngine;
pub use error::{EngineError, EngineResult, GatewayError, GatewayResult};
pub use facade::{
    BudgetUsage, Notice, ReadFacade, Snapshot, SnapshotSource, ALL_CATEGORIES,
};
pub use gateway::{RemoteCategory, RemoteExpense, RemoteGateway};
#[cfg(feature = "reqwest")]
pub use http::ReqwestClient;
pub use http::{
    HttpClient, HttpGateway, HttpRequest, HttpResponse, LoopbackClient, LoopbackServer, Method,
};
pub use mock::{GatewayCalls, MockGateway};
pub use reconciler::{
    CancelToken, CascadeOutcome, DeleteReport, PullCounts, PullOutcome, PullReport, PushFailure,
    PushReport, Reconciler, ReconcilerStats, RemoteDelete, RunReport,
};
pub use scheduler::{SyncEvent, SyncScheduler, TriggerResult, TriggerSource, UserSyncState};
pub use url::Url;
