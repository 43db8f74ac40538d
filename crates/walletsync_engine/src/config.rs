//! Configuration for the sync engine.

use std::time::Duration;

/// What a trigger does while a run for the same user is in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CoalescePolicy {
    /// The trigger is dropped; the running pass will pick up the new work
    /// on the next trigger.
    #[default]
    KeepExisting,
    /// At most one follow-up run is queued behind the current one.
    RerunOnce,
}

/// Configuration for [`crate::WalletEngine`].
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Base URL of the remote REST API.
    pub base_url: String,
    /// Upper bound on every remote call.
    pub request_timeout: Duration,
    /// Interval for periodic reconciliation, if any.
    pub sync_interval: Option<Duration>,
    /// Remove synced local rows missing from a successful remote listing.
    pub prune_on_pull: bool,
    /// Behaviour of triggers while a run is in flight.
    pub coalesce: CoalescePolicy,
    /// Capacity of the sync event channel.
    pub event_capacity: usize,
}

impl EngineConfig {
    /// Creates a configuration for the API at `base_url`.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            request_timeout: Duration::from_secs(15),
            sync_interval: None,
            prune_on_pull: true,
            coalesce: CoalescePolicy::KeepExisting,
            event_capacity: 64,
        }
    }

    /// Sets the request timeout.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Enables periodic reconciliation.
    pub fn with_sync_interval(mut self, interval: Duration) -> Self {
        self.sync_interval = Some(interval);
        self
    }

    /// Sets whether pulls prune synced rows the remote no longer has.
    pub fn with_prune_on_pull(mut self, prune: bool) -> Self {
        self.prune_on_pull = prune;
        self
    }

    /// Sets the coalescing policy.
    pub fn with_coalesce(mut self, policy: CoalescePolicy) -> Self {
        self.coalesce = policy;
        self
    }

    /// Sets the event channel capacity (minimum 1).
    pub fn with_event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity.max(1);
        self
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::new("http://localhost:5000/api")
    }
}
