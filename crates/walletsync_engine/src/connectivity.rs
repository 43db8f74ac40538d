//! Reachability of the remote API.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tracing::{debug, info};
use url::Url;

/// Answers whether the remote is believed reachable right now.
///
/// The answer is cached: it never blocks and never fails, and is `false`
/// while unknown.
pub trait ConnectivityOracle: Send + Sync {
    /// Returns true if the remote is believed reachable.
    fn is_reachable(&self) -> bool;
}

impl<O: ConnectivityOracle + ?Sized> ConnectivityOracle for Arc<O> {
    fn is_reachable(&self) -> bool {
        (**self).is_reachable()
    }
}

/// Reachability set by the host platform (or a test).
#[derive(Debug, Default)]
pub struct ManualConnectivity {
    reachable: AtomicBool,
}

impl ManualConnectivity {
    /// Creates an oracle with the given initial answer.
    pub fn new(reachable: bool) -> Self {
        Self {
            reachable: AtomicBool::new(reachable),
        }
    }

    /// Updates the answer.
    pub fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::SeqCst);
    }
}

impl ConnectivityOracle for ManualConnectivity {
    fn is_reachable(&self) -> bool {
        self.reachable.load(Ordering::SeqCst)
    }
}

/// Reachability learned by periodically opening a TCP connection to the API.
///
/// The polling task is aborted when the oracle is dropped.
#[derive(Debug)]
pub struct TcpConnectivity {
    reachable: Arc<AtomicBool>,
    address: String,
    task: JoinHandle<()>,
}

impl TcpConnectivity {
    /// Starts probing `address` (`host:port`) every `every`, giving each
    /// attempt `timeout`. Must be called within a tokio runtime.
    pub fn spawn(address: impl Into<String>, every: Duration, timeout: Duration) -> Self {
        let address = address.into();
        let reachable = Arc::new(AtomicBool::new(false));
        let task = {
            let reachable = Arc::clone(&reachable);
            let address = address.clone();
            tokio::spawn(async move {
                let mut interval = tokio::time::interval(every);
                interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
                loop {
                    interval.tick().await;
                    let now = check_reachable(&address, timeout).await;
                    let before = reachable.swap(now, Ordering::SeqCst);
                    if before != now {
                        info!(address = %address, reachable = now, "connectivity changed");
                    }
                }
            })
        };
        Self {
            reachable,
            address,
            task,
        }
    }

    /// Starts probing the host of an `http://` or `https://` base URL.
    ///
    /// Returns `None` if no host can be found in `base_url`.
    pub fn from_base_url(base_url: &str, every: Duration, timeout: Duration) -> Option<Self> {
        reachability_address(base_url).map(|address| Self::spawn(address, every, timeout))
    }

    /// Returns the polled address.
    pub fn address(&self) -> &str {
        &self.address
    }
}

impl ConnectivityOracle for TcpConnectivity {
    fn is_reachable(&self) -> bool {
        self.reachable.load(Ordering::SeqCst)
    }
}

impl Drop for TcpConnectivity {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Attempts one TCP connection to `address` within `timeout`.
pub async fn check_reachable(address: &str, timeout: Duration) -> bool {
    match tokio::time::timeout(timeout, TcpStream::connect(address)).await {
        Ok(Ok(_)) => true,
        Ok(Err(e)) => {
            debug!(address = %address, error = %e, "reachability check failed");
            false
        }
        Err(_) => {
            debug!(address = %address, "reachability check timed out");
            false
        }
    }
}

/// Extracts `host:port` from an http(s) base URL, defaulting the port by scheme.
pub fn reachability_address(base_url: &str) -> Option<String> {
    let url = Url::parse(base_url).ok()?;
    if !matches!(url.scheme(), "http" | "https") {
        return None;
    }
    let host = url.host_str()?;
    let port = url.port_or_known_default()?;
    Some(format!("{host}:{port}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[test]
    fn manual_oracle_toggles() {
        let oracle = ManualConnectivity::default();
        assert!(!oracle.is_reachable());
        oracle.set_reachable(true);
        assert!(oracle.is_reachable());
        let shared: Arc<dyn ConnectivityOracle> = Arc::new(ManualConnectivity::new(true));
        assert!(shared.is_reachable());
    }

    #[test]
    fn addresses_from_urls() {
        assert_eq!(
            reachability_address("http://localhost:5000/api").as_deref(),
            Some("localhost:5000")
        );
        assert_eq!(
            reachability_address("https://api.example.com/v1/").as_deref(),
            Some("api.example.com:443")
        );
        assert_eq!(
            reachability_address("http://[::1]/api").as_deref(),
            Some("[::1]:80")
        );
        assert_eq!(
            reachability_address("https://user:pw@wallet.example.com:8443/api?x=1").as_deref(),
            Some("wallet.example.com:8443")
        );
        assert_eq!(reachability_address("ftp://host"), None);
        assert_eq!(reachability_address("localhost:5000"), None);
    }

    #[tokio::test]
    async fn check_sees_a_listener() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();
        assert!(check_reachable(&address, Duration::from_secs(1)).await);

        drop(listener);
        assert!(!check_reachable(&address, Duration::from_millis(200)).await);
    }

    #[tokio::test]
    async fn polling_task_learns_reachability() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();
        let oracle = TcpConnectivity::spawn(
            address,
            Duration::from_millis(10),
            Duration::from_millis(200),
        );

        for _ in 0..100 {
            if oracle.is_reachable() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(oracle.is_reachable());
    }
}
