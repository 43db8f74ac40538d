//! CLI command implementations.

pub mod compact;
pub mod inspect;
pub mod pending;
pub mod records;
pub mod snapshot;
pub mod sync;
pub mod verify;

use crate::Format;
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use walletsync_core::{RecordStore, StoreConfig};
use walletsync_engine::{
    reachability_address, check_reachable, EngineConfig, HttpGateway, ManualConnectivity, ReqwestClient,
    WalletEngine,
};

/// Result type shared by the commands.
pub type CommandResult<T = ()> = Result<T, Box<dyn std::error::Error>>;

/// The engine the CLI drives.
pub type CliEngine = WalletEngine<HttpGateway<ReqwestClient>, ManualConnectivity>;

/// Where the remote API lives.
#[derive(Debug, Clone)]
pub struct RemoteArgs {
    /// Base URL of the API.
    pub base_url: String,
    /// Timeout for each call and for the reachability check.
    pub timeout: Duration,
}

/// Opens an existing store.
pub fn open_existing(path: &Path) -> CommandResult<RecordStore> {
    if !path.join("records.log").exists() {
        return Err(format!("No record store found at {}", path.display()).into());
    }
    Ok(RecordStore::open(path, StoreConfig::default().create_if_missing(false))?)
}

/// Opens the store at `path` and connects an engine to the remote.
///
/// Reachability is checked once; `offline` skips the check.
pub async fn connect(path: &Path, remote: &RemoteArgs, offline: bool) -> CommandResult<CliEngine> {
    let store = Arc::new(RecordStore::open(path, StoreConfig::default())?);
    let client = ReqwestClient::new(remote.timeout)?;
    let gateway = HttpGateway::new(&remote.base_url, client)?.with_timeout(remote.timeout);

    let reachable = match reachability_address(&remote.base_url) {
        Some(address) if !offline => check_reachable(&address, remote.timeout).await,
        Some(_) => false,
        None => return Err(format!("Unsupported base URL: {}", remote.base_url).into()),
    };
    if !reachable && !offline {
        eprintln!("Remote {} is unreachable, working offline", remote.base_url);
    }

    let config = EngineConfig::new(remote.base_url.clone()).with_request_timeout(remote.timeout);
    Ok(WalletEngine::new(
        store,
        Arc::new(gateway),
        Arc::new(ManualConnectivity::new(reachable)),
        config,
    ))
}

/// Runs an async command on a fresh runtime.
pub fn block_on<F: std::future::Future>(future: F) -> CommandResult<F::Output> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    Ok(runtime.block_on(future))
}

/// Prints `value` as pretty JSON.
pub fn print_json<T: Serialize>(value: &T) -> CommandResult {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Returns true for JSON output.
pub fn is_json(format: Format) -> bool {
    format == Format::Json
}

/// Formats a byte count for humans.
pub fn format_size(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    }
}
