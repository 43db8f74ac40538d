//! Push and pull between the record store and the remote.
//!
//! A reconciliation run pushes pending records (categories first, then
//! expenses, each in creation order), then pulls the remote listings and folds
//! them into the store. Runs for one user are serialized; different users
//! reconcile concurrently.
//!
//! ## Key Invariants
//!
//! - A pending record is never overwritten or pruned by a pull
//! - A record becomes synced only after the remote confirmed exactly the
//!   content the store still holds
//! - A record whose earlier push may have committed is matched by natural key
//!   against the remote before it is created again
//! - A failed listing leaves the store untouched

use crate::connectivity::ConnectivityOracle;
use crate::error::{EngineError, EngineResult, GatewayError, GatewayResult};
use crate::gateway::{RemoteCategory, RemoteExpense, RemoteGateway};
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::OwnedMutexGuard;
use tracing::{debug, info, warn};
use walletsync_core::{
    Category, Expense, LocalId, RecordKind, RecordStore, RemoteId, StoreError, StoreResult,
    StoredRecord, SyncState, UserId,
};

/// Cooperative cancellation flag, checked between remote calls.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    /// Creates a token that is not cancelled.
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Returns true once cancellation was requested.
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Clears the flag.
    pub fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }

    fn check(&self) -> EngineResult<()> {
        if self.is_cancelled() {
            Err(EngineError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// A record that could not be pushed this run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushFailure {
    /// Record kind.
    pub kind: RecordKind,
    /// Local id of the record.
    pub local_id: LocalId,
    /// Why the push failed.
    pub error: GatewayError,
}

/// Outcome of the push path.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PushReport {
    /// Records created remotely and marked synced.
    pub created: usize,
    /// Records updated remotely and marked synced.
    pub updated: usize,
    /// Records matched by natural key instead of being created again.
    pub adopted: usize,
    /// Creates acknowledged without an id; the next pull adopts them.
    pub awaiting_id: usize,
    /// Records left pending after a failed call.
    pub failures: Vec<PushFailure>,
}

impl PushReport {
    /// Records confirmed by the remote this run.
    pub fn pushed(&self) -> usize {
        self.created + self.updated
    }

    /// Records left pending after a failed call.
    pub fn failed(&self) -> usize {
        self.failures.len()
    }
}

/// What a pull did to one record kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PullCounts {
    /// Distinct records in the listing.
    pub listed: usize,
    /// New local rows.
    pub inserted: usize,
    /// Local rows overwritten with remote content.
    pub updated: usize,
    /// Pending local rows that took the id of a matching remote record.
    pub adopted: usize,
    /// Listed records skipped because the local row is pending.
    pub skipped_pending: usize,
    /// Listed records that duplicate another listed record's natural key.
    pub duplicates: usize,
    /// Listed records the store would not accept, left out of the pull.
    pub rejected: usize,
    /// Synced local rows removed because the remote no longer lists them.
    pub pruned: usize,
}

/// Outcome of a pull that reached the store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PullReport {
    /// Category counts.
    pub categories: PullCounts,
    /// Expense counts.
    pub expenses: PullCounts,
}

impl PullReport {
    /// Local rows written from remote content.
    pub fn applied(&self) -> usize {
        let sum = |c: &PullCounts| c.inserted + c.updated + c.adopted;
        sum(&self.categories) + sum(&self.expenses)
    }

    /// Local rows pruned.
    pub fn pruned(&self) -> usize {
        self.categories.pruned + self.expenses.pruned
    }
}

/// Outcome of the pull path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PullOutcome {
    /// Both listings were fetched and folded into the store.
    Applied(PullReport),
    /// The remote was not reachable; nothing was attempted.
    Offline,
    /// A listing failed; the store was not touched.
    Failed(GatewayError),
}

impl PullOutcome {
    /// Returns true if the store now reflects the remote.
    pub fn is_applied(&self) -> bool {
        matches!(self, PullOutcome::Applied(_))
    }
}

/// Outcome of one reconciliation run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    /// Push path.
    pub push: PushReport,
    /// Pull path.
    pub pull: PullOutcome,
}

impl RunReport {
    fn offline() -> Self {
        Self {
            push: PushReport::default(),
            pull: PullOutcome::Offline,
        }
    }

    /// Returns true if the run was skipped because the remote was unreachable.
    pub fn skipped_offline(&self) -> bool {
        self.pull == PullOutcome::Offline && self.push == PushReport::default()
    }
}

/// What happened remotely when an expense was deleted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteDelete {
    /// The remote holds no copy of the expense.
    NotNeeded,
    /// The remote copy is gone.
    Deleted,
    /// The remote was unreachable; the next pull may bring the record back.
    Skipped,
    /// The remote delete failed; the next pull may bring the record back.
    Failed(GatewayError),
}

/// What the category cascade did after an expense was deleted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CascadeOutcome {
    /// Other expenses still use the category.
    CategoryInUse,
    /// No local category carries that name.
    NoCategory,
    /// The category was deleted remotely (if it had been pushed) and locally.
    Deleted,
    /// The remote was unreachable; the local category was kept.
    KeptOffline,
    /// The remote delete failed; the local category was kept.
    KeptRemoteFailed(GatewayError),
}

/// Outcome of deleting an expense.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeleteReport {
    /// The removed row.
    pub expense: Expense,
    /// Remote side of the delete.
    pub remote: RemoteDelete,
    /// Category cascade.
    pub cascade: CascadeOutcome,
}

/// Running totals across reconciliation runs.
#[derive(Debug, Clone, Default)]
pub struct ReconcilerStats {
    /// Runs that reached the remote and completed.
    pub runs_completed: u64,
    /// Runs skipped because the remote was unreachable.
    pub runs_skipped_offline: u64,
    /// Records confirmed by the remote.
    pub records_pushed: u64,
    /// Records adopted by natural key.
    pub records_adopted: u64,
    /// Failed push calls.
    pub push_failures: u64,
    /// Local rows written from pulls.
    pub records_pulled: u64,
    /// Local rows pruned by pulls.
    pub records_pruned: u64,
    /// Last error message.
    pub last_error: Option<String>,
    /// When the last completed run finished.
    pub last_run_at: Option<DateTime<Utc>>,
}

/// Reconciles the record store with the remote.
pub struct Reconciler<G, C> {
    store: Arc<RecordStore>,
    gateway: Arc<G>,
    oracle: Arc<C>,
    prune_on_pull: bool,
    stats: RwLock<ReconcilerStats>,
    user_locks: Mutex<HashMap<UserId, Arc<tokio::sync::Mutex<()>>>>,
}

impl<G: RemoteGateway, C: ConnectivityOracle> Reconciler<G, C> {
    /// Creates a reconciler. Pulls prune by default.
    pub fn new(store: Arc<RecordStore>, gateway: Arc<G>, oracle: Arc<C>) -> Self {
        Self {
            store,
            gateway,
            oracle,
            prune_on_pull: true,
            stats: RwLock::new(ReconcilerStats::default()),
            user_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Sets whether pulls prune synced rows the remote no longer lists.
    pub fn with_prune_on_pull(mut self, prune: bool) -> Self {
        self.prune_on_pull = prune;
        self
    }

    /// Returns the record store.
    pub fn store(&self) -> &Arc<RecordStore> {
        &self.store
    }

    /// Returns the gateway.
    pub fn gateway(&self) -> &Arc<G> {
        &self.gateway
    }

    /// Returns the connectivity oracle.
    pub fn oracle(&self) -> &Arc<C> {
        &self.oracle
    }

    /// Returns a snapshot of the running totals.
    pub fn stats(&self) -> ReconcilerStats {
        self.stats.read().clone()
    }

    async fn lock_user(&self, user: &UserId) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.user_locks.lock();
            Arc::clone(locks.entry(user.clone()).or_default())
        };
        lock.lock_owned().await
    }

    // === Run ===

    /// One reconciliation run: push, then pull. Skipped when offline.
    ///
    /// # Errors
    ///
    /// Store failures, and [`EngineError::Cancelled`] once `cancel` fires.
    /// Writes made before cancellation stay.
    pub async fn run(&self, user: &UserId, cancel: &CancelToken) -> EngineResult<RunReport> {
        let _guard = self.lock_user(user).await;
        if !self.oracle.is_reachable() {
            debug!(user = %user, "remote unreachable, run skipped");
            self.stats.write().runs_skipped_offline += 1;
            return Ok(RunReport::offline());
        }

        let result = async {
            let push = self.push_locked(user, cancel).await?;
            cancel.check()?;
            let pull = self.pull_locked(user, cancel).await?;
            Ok::<_, EngineError>(RunReport { push, pull })
        }
        .await;

        match &result {
            Ok(report) => self.record_run(user, report),
            Err(e) => {
                warn!(user = %user, error = %e, "reconciliation run aborted");
                self.stats.write().last_error = Some(e.to_string());
            }
        }
        result
    }

    fn record_run(&self, user: &UserId, report: &RunReport) {
        let mut stats = self.stats.write();
        stats.runs_completed += 1;
        stats.records_pushed += report.push.pushed() as u64;
        stats.records_adopted += report.push.adopted as u64;
        stats.push_failures += report.push.failed() as u64;
        stats.last_run_at = Some(Utc::now());
        if let PullOutcome::Applied(pull) = &report.pull {
            stats.records_pulled += pull.applied() as u64;
            stats.records_pruned += pull.pruned() as u64;
        }

        let error = report
            .push
            .failures
            .last()
            .map(|f| f.error.to_string())
            .or_else(|| match &report.pull {
                PullOutcome::Failed(e) => Some(e.to_string()),
                _ => None,
            });
        if error.is_some() {
            stats.last_error = error;
        }

        info!(
            user = %user,
            created = report.push.created,
            updated = report.push.updated,
            adopted = report.push.adopted,
            failed = report.push.failed(),
            pulled = report.pull.is_applied(),
            "reconciliation run finished"
        );
    }

    // === Push ===

    /// Pushes the pending records of `user`.
    pub async fn push(&self, user: &UserId, cancel: &CancelToken) -> EngineResult<PushReport> {
        let _guard = self.lock_user(user).await;
        self.push_locked(user, cancel).await
    }

    async fn push_locked(&self, user: &UserId, cancel: &CancelToken) -> EngineResult<PushReport> {
        let mut report = PushReport::default();
        self.push_kind::<Category>(user, cancel, &mut report).await?;
        self.push_kind::<Expense>(user, cancel, &mut report).await?;
        Ok(report)
    }

    async fn push_kind<T: SyncRecord>(
        &self,
        user: &UserId,
        cancel: &CancelToken,
        report: &mut PushReport,
    ) -> EngineResult<()> {
        let gateway = self.gateway.as_ref();
        let mut listing = Listing::<T::Remote>::NotFetched;

        for record in T::pending(&self.store, user) {
            cancel.check()?;
            let local_id = record.local_id();

            if record.remote_id().is_assigned() {
                let remote_id = record.remote_id().clone();
                match T::update(gateway, &remote_id, &record).await {
                    Ok(()) => {
                        debug!(kind = %T::KIND, local_id = %local_id, remote_id = %remote_id, "updated remotely");
                        self.settle(&record, remote_id).await?;
                        report.updated += 1;
                    }
                    Err(error @ GatewayError::ServerRejected { status: 404, .. }) => {
                        // Gone remotely: forget the id so the next run creates it again.
                        warn!(kind = %T::KIND, local_id = %local_id, remote_id = %remote_id, "remote copy missing, will recreate");
                        self.note_failure(&record, Some(RemoteId::unassigned()))?;
                        report.failures.push(failure::<T>(local_id, error));
                    }
                    Err(error) => {
                        warn!(kind = %T::KIND, local_id = %local_id, error = %error, "update failed");
                        self.note_failure(&record, None)?;
                        report.failures.push(failure::<T>(local_id, error));
                    }
                }
                continue;
            }

            if record.push_attempts() > 0 {
                match listing.find::<T, G>(gateway, user, &record.key()).await {
                    Ok(Some(remote_id)) => {
                        debug!(kind = %T::KIND, local_id = %local_id, remote_id = %remote_id, "adopted earlier push");
                        self.settle(&record, remote_id).await?;
                        report.adopted += 1;
                        continue;
                    }
                    Ok(None) => {}
                    Err(error) => {
                        warn!(kind = %T::KIND, local_id = %local_id, error = %error, "cannot check for an earlier push");
                        self.note_failure(&record, None)?;
                        report.failures.push(failure::<T>(local_id, error));
                        continue;
                    }
                }
            }

            match T::create(gateway, &record).await {
                Ok(Some(remote_id)) => {
                    debug!(kind = %T::KIND, local_id = %local_id, remote_id = %remote_id, "created remotely");
                    self.settle(&record, remote_id).await?;
                    report.created += 1;
                }
                Ok(None) => {
                    debug!(kind = %T::KIND, local_id = %local_id, "create acknowledged without id");
                    self.note_failure(&record, None)?;
                    report.awaiting_id += 1;
                }
                Err(error) => {
                    warn!(
                        kind = %T::KIND,
                        local_id = %local_id,
                        error = %error,
                        outcome_unknown = error.outcome_unknown(),
                        "create failed"
                    );
                    self.note_failure(&record, None)?;
                    report.failures.push(failure::<T>(local_id, error));
                }
            }
        }
        Ok(())
    }

    /// Records a confirmed push of `sent` under `remote_id`.
    ///
    /// The row becomes synced only if it still holds what was sent. An edited
    /// row keeps the id and stays pending; a deleted row leaves an orphan that
    /// is removed remotely.
    async fn settle<T: SyncRecord>(&self, sent: &T, remote_id: RemoteId) -> EngineResult<()> {
        match T::get(&self.store, sent.local_id()) {
            Some(current) if current == *sent => {
                T::replace(&self.store, current.settled(remote_id))?;
            }
            Some(current) => {
                debug!(kind = %T::KIND, local_id = %current.local_id(), "edited during push, stays pending");
                T::replace(&self.store, current.with_remote_id(remote_id))?;
            }
            None => {
                debug!(kind = %T::KIND, remote_id = %remote_id, "deleted during push, removing remote copy");
                if let Err(error) =
                    T::delete_remote(self.gateway.as_ref(), &remote_id, sent.user_id()).await
                {
                    warn!(kind = %T::KIND, remote_id = %remote_id, error = %error, "orphan left remotely");
                }
            }
        }
        Ok(())
    }

    /// Counts a failed push attempt against the row, if it is still pending.
    fn note_failure<T: SyncRecord>(&self, sent: &T, remote_id: Option<RemoteId>) -> StoreResult<()> {
        if let Some(current) = T::get(&self.store, sent.local_id()) {
            if current.sync_state() == SyncState::Pending {
                let mut next = current.with_failed_attempt();
                if let Some(remote_id) = remote_id {
                    next = next.with_remote_id(remote_id);
                }
                T::replace(&self.store, next)?;
            }
        }
        Ok(())
    }

    // === Pull ===

    /// Pulls the remote listings of `user` into the store.
    ///
    /// Returns [`PullOutcome::Offline`] at once when unreachable, without
    /// waiting for a run in flight.
    pub async fn pull(&self, user: &UserId) -> EngineResult<PullOutcome> {
        if !self.oracle.is_reachable() {
            return Ok(PullOutcome::Offline);
        }
        let _guard = self.lock_user(user).await;
        self.pull_locked(user, &CancelToken::new()).await
    }

    async fn pull_locked(&self, user: &UserId, cancel: &CancelToken) -> EngineResult<PullOutcome> {
        if !self.oracle.is_reachable() {
            return Ok(PullOutcome::Offline);
        }

        let gateway = self.gateway.as_ref();
        let categories = match gateway.list_categories(user).await {
            Ok(rows) => rows,
            Err(error) => {
                warn!(user = %user, error = %error, "category listing failed, pull abandoned");
                return Ok(PullOutcome::Failed(error));
            }
        };
        cancel.check()?;
        let expenses = match gateway.list_expenses(user).await {
            Ok(rows) => rows,
            Err(error) => {
                warn!(user = %user, error = %error, "expense listing failed, pull abandoned");
                return Ok(PullOutcome::Failed(error));
            }
        };
        cancel.check()?;

        let categories = screen_listing::<Category>(user, categories);
        let expenses = screen_listing::<Expense>(user, expenses);
        let report = PullReport {
            categories: self.apply_listing::<Category>(user, categories)?,
            expenses: self.apply_listing::<Expense>(user, expenses)?,
        };
        debug!(user = %user, applied = report.applied(), pruned = report.pruned(), "pull applied");
        Ok(PullOutcome::Applied(report))
    }

    fn apply_listing<T: SyncRecord>(
        &self,
        user: &UserId,
        listing: Screened<T::Remote>,
    ) -> StoreResult<PullCounts> {
        let store = self.store.as_ref();
        let mut counts = PullCounts {
            rejected: listing.rejected.len(),
            ..PullCounts::default()
        };
        let mut listed: HashSet<RemoteId> = HashSet::new();
        let mut claimed: HashSet<RemoteId> = HashSet::new();

        for remote in listing.rows {
            if remote.user_id() != user {
                warn!(kind = %T::KIND, remote_id = %remote.remote_id(), "listed record of another user ignored");
                continue;
            }
            if !listed.insert(remote.remote_id().clone()) {
                continue;
            }
            counts.listed += 1;
            let remote_id = remote.remote_id().clone();
            let key = T::remote_key(&remote);

            if let Some(local) = T::find_by_remote_id(store, user, &remote_id) {
                claimed.insert(remote_id);
                if local.sync_state() == SyncState::Pending {
                    counts.skipped_pending += 1;
                    continue;
                }
                let incoming = T::from_remote(&remote, local.local_id());
                if incoming == local {
                    continue;
                }
                match T::find_by_key(store, &key) {
                    Some(other) if other.local_id() != local.local_id() => {
                        counts.duplicates += 1;
                    }
                    _ => {
                        T::replace(store, incoming)?;
                        counts.updated += 1;
                    }
                }
                continue;
            }

            match T::find_by_key(store, &key) {
                Some(local) if local.sync_state() == SyncState::Pending => {
                    if local.remote_id().is_assigned() {
                        counts.skipped_pending += 1;
                        continue;
                    }
                    // An earlier push committed but its id never came back.
                    let adopted = local.settled(remote_id.clone());
                    let next = if T::from_remote(&remote, local.local_id()) == adopted {
                        adopted
                    } else {
                        local.with_remote_id(remote_id.clone())
                    };
                    debug!(kind = %T::KIND, local_id = %local.local_id(), remote_id = %remote_id, "adopted remote id");
                    T::replace(store, next)?;
                    claimed.insert(remote_id);
                    counts.adopted += 1;
                }
                Some(local) => {
                    if claimed.contains(local.remote_id()) {
                        counts.duplicates += 1;
                        continue;
                    }
                    T::replace(store, T::from_remote(&remote, local.local_id()))?;
                    claimed.insert(remote_id);
                    counts.updated += 1;
                }
                None => {
                    T::upsert(store, T::from_remote(&remote, LocalId::new(0)))?;
                    claimed.insert(remote_id);
                    counts.inserted += 1;
                }
            }
        }

        if self.prune_on_pull {
            for local in T::all(store, user) {
                let remote_id = local.remote_id();
                if local.sync_state() == SyncState::Synced
                    && !listed.contains(remote_id)
                    && !listing.rejected.contains(remote_id)
                {
                    debug!(kind = %T::KIND, local_id = %local.local_id(), remote_id = %local.remote_id(), "pruned");
                    T::delete(store, local.local_id())?;
                    counts.pruned += 1;
                }
            }
        }
        Ok(counts)
    }

    // === Deletes ===

    /// Deletes an expense of `user`: locally at once, then remotely when it
    /// was pushed or a push of it may have committed, then the category
    /// cascade.
    ///
    /// # Errors
    ///
    /// [`StoreError::NotFound`] if `user` has no expense `local_id`.
    pub async fn delete_expense(
        &self,
        user: &UserId,
        local_id: LocalId,
    ) -> EngineResult<DeleteReport> {
        let expense = self
            .store
            .get_expense(local_id)
            .filter(|e| &e.user_id == user)
            .ok_or(StoreError::NotFound {
                kind: RecordKind::Expense,
                local_id,
            })?;

        if expense.remote_id.is_assigned() {
            self.store.delete_expense(local_id)?;
        } else {
            // Never pushed: remove whatever row now carries the same content.
            self.store.delete_expense_by_natural_key(&expense.natural_key())?;
        }
        debug!(user = %user, local_id = %local_id, "expense deleted locally");

        let remote = if expense.remote_id.is_assigned() {
            self.delete_remote_expense(user, &expense.remote_id).await
        } else if expense.push_attempts == 0 {
            RemoteDelete::NotNeeded
        } else if !self.oracle.is_reachable() {
            RemoteDelete::Skipped
        } else {
            // An earlier create may have committed with its acknowledgment lost.
            match self.gateway.list_expenses(user).await {
                Ok(listing) => {
                    let key = expense.natural_key();
                    match listing.iter().find(|remote| remote.natural_key() == key) {
                        Some(remote) => self.delete_remote_expense(user, &remote.remote_id).await,
                        None => RemoteDelete::NotNeeded,
                    }
                }
                Err(error) => {
                    warn!(user = %user, local_id = %local_id, error = %error, "cannot check for an earlier push of deleted expense");
                    RemoteDelete::Failed(error)
                }
            }
        };

        let cascade = self.cascade_category(user, &expense.category).await?;
        Ok(DeleteReport {
            expense,
            remote,
            cascade,
        })
    }

    async fn delete_remote_expense(&self, user: &UserId, remote_id: &RemoteId) -> RemoteDelete {
        if !self.oracle.is_reachable() {
            return RemoteDelete::Skipped;
        }
        match self.gateway.delete_expense(remote_id, user).await {
            Ok(()) | Err(GatewayError::ServerRejected { status: 404, .. }) => RemoteDelete::Deleted,
            Err(error) => {
                warn!(user = %user, remote_id = %remote_id, error = %error, "remote expense delete failed");
                RemoteDelete::Failed(error)
            }
        }
    }

    /// Deletes the category `name` of `user` once no expense uses it.
    ///
    /// Remote and local deletion form one step: if the remote delete cannot
    /// be done, the local category is kept.
    pub async fn cascade_category(&self, user: &UserId, name: &str) -> EngineResult<CascadeOutcome> {
        if self.store.count_expenses_in_category(user, name) > 0 {
            return Ok(CascadeOutcome::CategoryInUse);
        }
        let Some(category) = self.store.find_category_by_name(user, name) else {
            return Ok(CascadeOutcome::NoCategory);
        };

        if category.remote_id.is_assigned() {
            if !self.oracle.is_reachable() {
                debug!(user = %user, category = %category.name, "offline, empty category kept");
                return Ok(CascadeOutcome::KeptOffline);
            }
            match self
                .gateway
                .delete_category(&category.remote_id, user)
                .await
            {
                Ok(()) | Err(GatewayError::ServerRejected { status: 404, .. }) => {}
                Err(error) => {
                    warn!(user = %user, category = %category.name, error = %error, "remote category delete failed, kept locally");
                    return Ok(CascadeOutcome::KeptRemoteFailed(error));
                }
            }
        }

        self.store.delete_category(category.local_id)?;
        info!(user = %user, category = %category.name, "empty category deleted");
        Ok(CascadeOutcome::Deleted)
    }
}

impl<G, C> std::fmt::Debug for Reconciler<G, C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reconciler")
            .field("prune_on_pull", &self.prune_on_pull)
            .field("stats", &*self.stats.read())
            .finish_non_exhaustive()
    }
}

fn failure<T: SyncRecord>(local_id: LocalId, error: GatewayError) -> PushFailure {
    PushFailure {
        kind: T::KIND,
        local_id,
        error,
    }
}

/// A remote listing fetched at most once per run.
enum Listing<R> {
    NotFetched,
    Fetched(Vec<R>),
    Unavailable(GatewayError),
}

impl<R: RemoteRecord> Listing<R> {
    /// Finds the id of a listed record with `key`, fetching on first use.
    async fn find<T, G>(
        &mut self,
        gateway: &G,
        user: &UserId,
        key: &T::Key,
    ) -> GatewayResult<Option<RemoteId>>
    where
        T: SyncRecord<Remote = R>,
        G: RemoteGateway,
    {
        if let Listing::NotFetched = self {
            *self = match T::list(gateway, user).await {
                Ok(rows) => Listing::Fetched(rows),
                Err(error) => Listing::Unavailable(error),
            };
        }
        match self {
            Listing::Fetched(rows) => Ok(rows
                .iter()
                .find(|r| r.user_id() == user && &T::remote_key(r) == key)
                .map(|r| r.remote_id().clone())),
            Listing::Unavailable(error) => Err(error.clone()),
            Listing::NotFetched => Ok(None),
        }
    }
}

/// Remote-side view of a record kind.
/// A listing split into rows the store accepts and the ids of those it refuses.
struct Screened<R> {
    rows: Vec<R>,
    rejected: HashSet<RemoteId>,
}

/// Checks every listed row of `user` against the record rules before any of
/// them is written. Refused rows are logged and left out; local copies of
/// them are kept as they are.
fn screen_listing<T: SyncRecord>(user: &UserId, listing: Vec<T::Remote>) -> Screened<T::Remote> {
    let mut rows = Vec::with_capacity(listing.len());
    let mut rejected = HashSet::new();
    for remote in listing {
        if remote.user_id() == user {
            if let Err(error) = T::from_remote(&remote, LocalId::new(0)).check() {
                warn!(kind = %T::KIND, remote_id = %remote.remote_id(), error = %error, "listed record refused");
                rejected.insert(remote.remote_id().clone());
                continue;
            }
        }
        rows.push(remote);
    }
    Screened { rows, rejected }
}

trait RemoteRecord: Send + Sync + Sized {
    fn remote_id(&self) -> &RemoteId;
    fn user_id(&self) -> &UserId;
}

impl RemoteRecord for RemoteExpense {
    fn remote_id(&self) -> &RemoteId {
        &self.remote_id
    }
    fn user_id(&self) -> &UserId {
        &self.user_id
    }
}

impl RemoteRecord for RemoteCategory {
    fn remote_id(&self) -> &RemoteId {
        &self.remote_id
    }
    fn user_id(&self) -> &UserId {
        &self.user_id
    }
}

/// A record kind the reconciler can move between store and remote.
trait SyncRecord: StoredRecord + PartialEq {
    type Remote: RemoteRecord;

    fn push_attempts(&self) -> u32;
    fn settled(&self, remote_id: RemoteId) -> Self;
    fn with_remote_id(&self, remote_id: RemoteId) -> Self;
    fn with_failed_attempt(&self) -> Self;
    fn remote_key(remote: &Self::Remote) -> Self::Key;
    fn from_remote(remote: &Self::Remote, local_id: LocalId) -> Self;

    fn pending(store: &RecordStore, user: &UserId) -> Vec<Self>;
    fn all(store: &RecordStore, user: &UserId) -> Vec<Self>;
    fn get(store: &RecordStore, id: LocalId) -> Option<Self>;
    fn find_by_remote_id(store: &RecordStore, user: &UserId, id: &RemoteId) -> Option<Self>;
    fn find_by_key(store: &RecordStore, key: &Self::Key) -> Option<Self>;
    fn replace(store: &RecordStore, record: Self) -> StoreResult<Self>;
    fn upsert(store: &RecordStore, record: Self) -> StoreResult<Self>;
    fn delete(store: &RecordStore, id: LocalId) -> StoreResult<Option<Self>>;

    fn create<G: RemoteGateway>(
        gateway: &G,
        record: &Self,
    ) -> impl Future<Output = GatewayResult<Option<RemoteId>>> + Send;
    fn update<G: RemoteGateway>(
        gateway: &G,
        remote_id: &RemoteId,
        record: &Self,
    ) -> impl Future<Output = GatewayResult<()>> + Send;
    fn list<G: RemoteGateway>(
        gateway: &G,
        user: &UserId,
    ) -> impl Future<Output = GatewayResult<Vec<Self::Remote>>> + Send;
    fn delete_remote<G: RemoteGateway>(
        gateway: &G,
        remote_id: &RemoteId,
        user: &UserId,
    ) -> impl Future<Output = GatewayResult<()>> + Send;
}

impl SyncRecord for Expense {
    type Remote = RemoteExpense;

    fn push_attempts(&self) -> u32 {
        self.push_attempts
    }
    fn settled(&self, remote_id: RemoteId) -> Self {
        Expense {
            sync_state: SyncState::Synced,
            remote_id,
            push_attempts: 0,
            ..self.clone()
        }
    }
    fn with_remote_id(&self, remote_id: RemoteId) -> Self {
        Expense {
            remote_id,
            ..self.clone()
        }
    }
    fn with_failed_attempt(&self) -> Self {
        Expense {
            push_attempts: self.push_attempts.saturating_add(1),
            ..self.clone()
        }
    }
    fn remote_key(remote: &RemoteExpense) -> Self::Key {
        remote.natural_key()
    }
    fn from_remote(remote: &RemoteExpense, local_id: LocalId) -> Self {
        remote.to_synced(local_id)
    }

    fn pending(store: &RecordStore, user: &UserId) -> Vec<Self> {
        store.pending_expenses(user)
    }
    fn all(store: &RecordStore, user: &UserId) -> Vec<Self> {
        store.expenses_for_user(user)
    }
    fn get(store: &RecordStore, id: LocalId) -> Option<Self> {
        store.get_expense(id)
    }
    fn find_by_remote_id(store: &RecordStore, user: &UserId, id: &RemoteId) -> Option<Self> {
        store.find_expense_by_remote_id(user, id)
    }
    fn find_by_key(store: &RecordStore, key: &Self::Key) -> Option<Self> {
        store.find_expense_by_natural_key(key)
    }
    fn replace(store: &RecordStore, record: Self) -> StoreResult<Self> {
        store.replace_expense(record)
    }
    fn upsert(store: &RecordStore, record: Self) -> StoreResult<Self> {
        store.upsert_expense(record)
    }
    fn delete(store: &RecordStore, id: LocalId) -> StoreResult<Option<Self>> {
        store.delete_expense(id)
    }

    fn create<G: RemoteGateway>(
        gateway: &G,
        record: &Self,
    ) -> impl Future<Output = GatewayResult<Option<RemoteId>>> + Send {
        gateway.create_expense(record)
    }
    fn update<G: RemoteGateway>(
        gateway: &G,
        remote_id: &RemoteId,
        record: &Self,
    ) -> impl Future<Output = GatewayResult<()>> + Send {
        gateway.update_expense(remote_id, record)
    }
    fn list<G: RemoteGateway>(
        gateway: &G,
        user: &UserId,
    ) -> impl Future<Output = GatewayResult<Vec<RemoteExpense>>> + Send {
        gateway.list_expenses(user)
    }
    fn delete_remote<G: RemoteGateway>(
        gateway: &G,
        remote_id: &RemoteId,
        user: &UserId,
    ) -> impl Future<Output = GatewayResult<()>> + Send {
        gateway.delete_expense(remote_id, user)
    }
}

impl SyncRecord for Category {
    type Remote = RemoteCategory;

    fn push_attempts(&self) -> u32 {
        self.push_attempts
    }
    fn settled(&self, remote_id: RemoteId) -> Self {
        Category {
            sync_state: SyncState::Synced,
            remote_id,
            push_attempts: 0,
            ..self.clone()
        }
    }
    fn with_remote_id(&self, remote_id: RemoteId) -> Self {
        Category {
            remote_id,
            ..self.clone()
        }
    }
    fn with_failed_attempt(&self) -> Self {
        Category {
            push_attempts: self.push_attempts.saturating_add(1),
            ..self.clone()
        }
    }
    fn remote_key(remote: &RemoteCategory) -> Self::Key {
        remote.natural_key()
    }
    fn from_remote(remote: &RemoteCategory, local_id: LocalId) -> Self {
        remote.to_synced(local_id)
    }

    fn pending(store: &RecordStore, user: &UserId) -> Vec<Self> {
        store.pending_categories(user)
    }
    fn all(store: &RecordStore, user: &UserId) -> Vec<Self> {
        store.categories_for_user(user)
    }
    fn get(store: &RecordStore, id: LocalId) -> Option<Self> {
        store.get_category(id)
    }
    fn find_by_remote_id(store: &RecordStore, user: &UserId, id: &RemoteId) -> Option<Self> {
        store.find_category_by_remote_id(user, id)
    }
    fn find_by_key(store: &RecordStore, key: &Self::Key) -> Option<Self> {
        store.find_category_by_natural_key(key)
    }
    fn replace(store: &RecordStore, record: Self) -> StoreResult<Self> {
        store.replace_category(record)
    }
    fn upsert(store: &RecordStore, record: Self) -> StoreResult<Self> {
        store.upsert_category(record)
    }
    fn delete(store: &RecordStore, id: LocalId) -> StoreResult<Option<Self>> {
        store.delete_category(id)
    }

    fn create<G: RemoteGateway>(
        gateway: &G,
        record: &Self,
    ) -> impl Future<Output = GatewayResult<Option<RemoteId>>> + Send {
        gateway.create_category(record)
    }
    fn update<G: RemoteGateway>(
        gateway: &G,
        remote_id: &RemoteId,
        record: &Self,
    ) -> impl Future<Output = GatewayResult<()>> + Send {
        gateway.update_category(remote_id, record)
    }
    fn list<G: RemoteGateway>(
        gateway: &G,
        user: &UserId,
    ) -> impl Future<Output = GatewayResult<Vec<RemoteCategory>>> + Send {
        gateway.list_categories(user)
    }
    fn delete_remote<G: RemoteGateway>(
        gateway: &G,
        remote_id: &RemoteId,
        user: &UserId,
    ) -> impl Future<Output = GatewayResult<()>> + Send {
        gateway.delete_category(remote_id, user)
    }
}
