//! Decides when reconciliation runs happen.
//!
//! Per user the scheduler moves `idle → running → idle`, with at most one run
//! in flight. Triggers arriving while a run is in flight are coalesced
//! according to the [`CoalescePolicy`].

use crate::config::CoalescePolicy;
use crate::connectivity::ConnectivityOracle;
use crate::error::{EngineError, EngineResult};
use crate::gateway::RemoteGateway;
use crate::reconciler::{CancelToken, Reconciler, RunReport};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use walletsync_core::UserId;

/// What asked for a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TriggerSource {
    /// A local create, update or delete.
    LocalMutation,
    /// The periodic ticker.
    Periodic,
    /// The host application returned to the foreground.
    ForegroundResume,
}

impl fmt::Display for TriggerSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TriggerSource::LocalMutation => "local-mutation",
            TriggerSource::Periodic => "periodic",
            TriggerSource::ForegroundResume => "foreground-resume",
        })
    }
}

/// Result of [`SyncScheduler::trigger`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerResult {
    /// A run was started.
    Started,
    /// A run was already in flight; the trigger was folded into it.
    Coalesced,
    /// The user is signed out.
    Rejected,
}

/// Scheduling state of one user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserSyncState {
    /// No run in flight.
    Idle,
    /// A run is in flight.
    Running,
    /// Signed out; triggers are rejected.
    SignedOut,
}

/// Notifications for presentation collaborators.
#[derive(Debug, Clone)]
pub enum SyncEvent {
    /// A run began.
    RunStarted {
        /// User being reconciled.
        user: UserId,
        /// What triggered the run.
        source: TriggerSource,
    },
    /// A run completed.
    RunFinished {
        /// User that was reconciled.
        user: UserId,
        /// What the run did.
        report: RunReport,
    },
    /// A run stopped on an error or was cancelled.
    RunFailed {
        /// User being reconciled.
        user: UserId,
        /// Error message.
        error: String,
    },
}

struct UserSlot {
    signed_out: bool,
    running: bool,
    rerun: bool,
    cancel: CancelToken,
    idle: watch::Sender<bool>,
}

impl UserSlot {
    fn new() -> Self {
        let (idle, _) = watch::channel(true);
        Self {
            signed_out: false,
            running: false,
            rerun: false,
            cancel: CancelToken::new(),
            idle,
        }
    }
}

struct Inner<G, C> {
    reconciler: Arc<Reconciler<G, C>>,
    policy: CoalescePolicy,
    slots: Mutex<HashMap<UserId, UserSlot>>,
    events: broadcast::Sender<SyncEvent>,
}

impl<G, C> Inner<G, C>
where
    G: RemoteGateway + 'static,
    C: ConnectivityOracle + 'static,
{
    fn trigger(self: &Arc<Self>, user: &UserId, source: TriggerSource) -> TriggerResult {
        let cancel = {
            let mut slots = self.slots.lock();
            let slot = slots.entry(user.clone()).or_insert_with(UserSlot::new);
            if slot.signed_out {
                debug!(user = %user, source = %source, "trigger rejected, signed out");
                return TriggerResult::Rejected;
            }
            if slot.running {
                if self.policy == CoalescePolicy::RerunOnce {
                    slot.rerun = true;
                }
                debug!(user = %user, source = %source, "trigger coalesced");
                return TriggerResult::Coalesced;
            }
            slot.running = true;
            slot.idle.send_replace(false);
            slot.cancel.clone()
        };

        let inner = Arc::clone(self);
        let user = user.clone();
        tokio::spawn(async move { inner.drive(user, source, cancel).await });
        TriggerResult::Started
    }

    async fn drive(self: Arc<Self>, user: UserId, source: TriggerSource, cancel: CancelToken) {
        loop {
            if let Err(error) = self.reconcile(&user, source, &cancel).await {
                debug!(user = %user, source = %source, error = %error, "triggered run ended early");
            }

            if let Err(e) = self.reconciler.store().compact_if_needed() {
                warn!(error = %e, "compaction failed");
            }

            let mut slots = self.slots.lock();
            let Some(slot) = slots.get_mut(&user) else {
                return;
            };
            if slot.rerun && !slot.signed_out && !cancel.is_cancelled() {
                slot.rerun = false;
                debug!(user = %user, "running queued follow-up");
                continue;
            }
            slot.rerun = false;
            slot.running = false;
            slot.idle.send_replace(true);
            return;
        }
    }

    async fn reconcile(
        &self,
        user: &UserId,
        source: TriggerSource,
        cancel: &CancelToken,
    ) -> EngineResult<RunReport> {
        let _ = self.events.send(SyncEvent::RunStarted {
            user: user.clone(),
            source,
        });
        let result = self.reconciler.run(user, cancel).await;
        let event = match &result {
            Ok(report) => SyncEvent::RunFinished {
                user: user.clone(),
                report: report.clone(),
            },
            Err(error) => SyncEvent::RunFailed {
                user: user.clone(),
                error: error.to_string(),
            },
        };
        let _ = self.events.send(event);
        result
    }

    fn known_users(&self) -> Vec<UserId> {
        let mut users = self.reconciler.store().users();
        let slots = self.slots.lock();
        for user in slots.keys() {
            if !users.contains(user) {
                users.push(user.clone());
            }
        }
        users.retain(|u| slots.get(u).map_or(true, |s| !s.signed_out));
        users
    }
}

/// Serializes reconciliation runs per user and coalesces triggers.
pub struct SyncScheduler<G, C> {
    inner: Arc<Inner<G, C>>,
    ticker: Mutex<Option<JoinHandle<()>>>,
}

impl<G, C> SyncScheduler<G, C>
where
    G: RemoteGateway + 'static,
    C: ConnectivityOracle + 'static,
{
    /// Creates a scheduler over `reconciler`.
    pub fn new(
        reconciler: Arc<Reconciler<G, C>>,
        policy: CoalescePolicy,
        event_capacity: usize,
    ) -> Self {
        let (events, _) = broadcast::channel(event_capacity.max(1));
        Self {
            inner: Arc::new(Inner {
                reconciler,
                policy,
                slots: Mutex::new(HashMap::new()),
                events,
            }),
            ticker: Mutex::new(None),
        }
    }

    /// Returns the reconciler.
    pub fn reconciler(&self) -> &Arc<Reconciler<G, C>> {
        &self.inner.reconciler
    }

    /// Subscribes to run events.
    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.inner.events.subscribe()
    }

    /// Asks for a run for `user`. Must be called within a tokio runtime.
    pub fn trigger(&self, user: &UserId, source: TriggerSource) -> TriggerResult {
        self.inner.trigger(user, source)
    }

    /// Runs a reconciliation inline and returns its report.
    ///
    /// Runs for the same user still never overlap.
    pub async fn run_now(&self, user: &UserId) -> EngineResult<RunReport> {
        let cancel = {
            let mut slots = self.inner.slots.lock();
            let slot = slots.entry(user.clone()).or_insert_with(UserSlot::new);
            if slot.signed_out {
                return Err(EngineError::SignedOut(user.clone()));
            }
            slot.cancel.clone()
        };
        self.inner
            .reconcile(user, TriggerSource::ForegroundResume, &cancel)
            .await
    }

    /// Cancels any run for `user` and rejects further triggers.
    pub fn sign_out(&self, user: &UserId) {
        let mut slots = self.inner.slots.lock();
        let slot = slots.entry(user.clone()).or_insert_with(UserSlot::new);
        slot.signed_out = true;
        slot.rerun = false;
        slot.cancel.cancel();
        info!(user = %user, "signed out, sync stopped");
    }

    /// Accepts triggers for `user` again.
    pub fn sign_in(&self, user: &UserId) {
        let mut slots = self.inner.slots.lock();
        let slot = slots.entry(user.clone()).or_insert_with(UserSlot::new);
        slot.signed_out = false;
        if slot.cancel.is_cancelled() {
            // A run cancelled at sign-out may still be unwinding; it keeps
            // its own token.
            slot.cancel = CancelToken::new();
        }
        debug!(user = %user, "signed in");
    }

    /// Returns true if `user` is signed out.
    pub fn is_signed_out(&self, user: &UserId) -> bool {
        self.inner
            .slots
            .lock()
            .get(user)
            .is_some_and(|s| s.signed_out)
    }

    /// Scheduling state of `user`.
    pub fn state(&self, user: &UserId) -> UserSyncState {
        match self.inner.slots.lock().get(user) {
            Some(slot) if slot.running => UserSyncState::Running,
            Some(slot) if slot.signed_out => UserSyncState::SignedOut,
            _ => UserSyncState::Idle,
        }
    }

    /// Resolves once no triggered run is in flight for `user`.
    pub async fn wait_idle(&self, user: &UserId) {
        let rx = self
            .inner
            .slots
            .lock()
            .get(user)
            .map(|slot| slot.idle.subscribe());
        if let Some(mut rx) = rx {
            let _ = rx.wait_for(|idle| *idle).await;
        }
    }

    /// Triggers every known, signed-in user every `interval`.
    ///
    /// Replaces a ticker started earlier. Must be called within a tokio runtime.
    pub fn start_periodic(&self, interval: Duration) {
        let weak: Weak<Inner<G, C>> = Arc::downgrade(&self.inner);
        let handle = tokio::spawn(async move {
            let mut ticks = tokio::time::interval(interval);
            ticks.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick completes immediately.
            ticks.tick().await;
            loop {
                ticks.tick().await;
                let Some(inner) = weak.upgrade() else {
                    return;
                };
                for user in inner.known_users() {
                    inner.trigger(&user, TriggerSource::Periodic);
                }
            }
        });
        if let Some(previous) = self.ticker.lock().replace(handle) {
            previous.abort();
        }
        info!(interval = ?interval, "periodic sync started");
    }

    /// Stops the periodic ticker.
    pub fn stop(&self) {
        if let Some(handle) = self.ticker.lock().take() {
            handle.abort();
            info!("periodic sync stopped");
        }
    }
}

impl<G, C> Drop for SyncScheduler<G, C> {
    fn drop(&mut self) {
        if let Some(handle) = self.ticker.get_mut().take() {
            handle.abort();
        }
    }
}

impl<G, C> fmt::Debug for SyncScheduler<G, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncScheduler")
            .field("policy", &self.inner.policy)
            .field("users", &self.inner.slots.lock().len())
            .finish_non_exhaustive()
    }
}
