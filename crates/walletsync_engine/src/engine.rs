//! The composition root handed to presentation.

use crate::config::EngineConfig;
use crate::connectivity::ConnectivityOracle;
use crate::error::{EngineError, EngineResult};
use crate::facade::{ReadFacade, Snapshot};
use crate::gateway::RemoteGateway;
use crate::reconciler::{DeleteReport, Reconciler, ReconcilerStats, RunReport};
use crate::scheduler::{SyncEvent, SyncScheduler, TriggerResult, TriggerSource, UserSyncState};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info};
use walletsync_core::{
    Category, Expense, LocalId, NewCategory, NewExpense, RecordKind, RecordStore, StoreError,
    SyncState, UserId,
};

/// Offline-first wallet engine.
///
/// Mutations are written to the local store first and then trigger a
/// reconciliation run; they succeed whether or not the remote is reachable.
/// All async entry points must run within a tokio runtime.
pub struct WalletEngine<G, C> {
    config: EngineConfig,
    store: Arc<RecordStore>,
    reconciler: Arc<Reconciler<G, C>>,
    scheduler: SyncScheduler<G, C>,
    facade: ReadFacade<G, C>,
}

impl<G, C> WalletEngine<G, C>
where
    G: RemoteGateway + 'static,
    C: ConnectivityOracle + 'static,
{
    /// Assembles an engine. Starts the periodic ticker when
    /// `config.sync_interval` is set, which requires a tokio runtime.
    pub fn new(
        store: Arc<RecordStore>,
        gateway: Arc<G>,
        oracle: Arc<C>,
        config: EngineConfig,
    ) -> Self {
        let reconciler = Arc::new(
            Reconciler::new(Arc::clone(&store), gateway, oracle)
                .with_prune_on_pull(config.prune_on_pull),
        );
        let scheduler =
            SyncScheduler::new(Arc::clone(&reconciler), config.coalesce, config.event_capacity);
        if let Some(interval) = config.sync_interval {
            scheduler.start_periodic(interval);
        }
        let facade = ReadFacade::new(Arc::clone(&reconciler));
        info!(base_url = %config.base_url, "wallet engine ready");
        Self {
            config,
            store,
            reconciler,
            scheduler,
            facade,
        }
    }

    /// Returns the configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Returns the record store.
    pub fn store(&self) -> &Arc<RecordStore> {
        &self.store
    }

    /// Returns the scheduler.
    pub fn scheduler(&self) -> &SyncScheduler<G, C> {
        &self.scheduler
    }

    /// Returns reconciliation totals.
    pub fn stats(&self) -> ReconcilerStats {
        self.reconciler.stats()
    }

    fn ensure_signed_in(&self, user: &UserId) -> EngineResult<()> {
        if self.scheduler.is_signed_out(user) {
            return Err(EngineError::SignedOut(user.clone()));
        }
        Ok(())
    }

    fn after_mutation(&self, user: &UserId) -> TriggerResult {
        let result = self.scheduler.trigger(user, TriggerSource::LocalMutation);
        debug!(user = %user, result = ?result, "sync triggered by local mutation");
        result
    }

    // === Mutations ===

    /// Records a new expense as pending and triggers a sync.
    pub async fn create_expense(&self, new: NewExpense) -> EngineResult<Expense> {
        self.ensure_signed_in(&new.user_id)?;
        let expense = local_write(self.store.insert_expense(new))?;
        info!(user = %expense.user_id, local_id = %expense.local_id, "expense recorded");
        self.after_mutation(&expense.user_id);
        Ok(expense)
    }

    /// Records a new category as pending and triggers a sync.
    ///
    /// # Errors
    ///
    /// [`EngineError::DuplicateCategory`] if the user already has a category
    /// with that name, ignoring case; nothing is written.
    pub async fn create_category(&self, new: NewCategory) -> EngineResult<Category> {
        self.ensure_signed_in(&new.user_id)?;
        if let Some(existing) = self.store.find_category_by_name(&new.user_id, &new.name) {
            return Err(EngineError::DuplicateCategory {
                name: existing.name,
            });
        }
        let category = local_write(self.store.insert_category(new))?;
        info!(user = %category.user_id, local_id = %category.local_id, "category recorded");
        self.after_mutation(&category.user_id);
        Ok(category)
    }

    /// Overwrites the content of an existing expense and marks it pending.
    ///
    /// Sync metadata comes from the stored row, not from `expense`.
    pub async fn update_expense(&self, expense: Expense) -> EngineResult<Expense> {
        self.ensure_signed_in(&expense.user_id)?;
        let current = self.owned_expense(&expense.user_id, expense.local_id)?;
        let updated = local_write(self.store.replace_expense(Expense {
            sync_state: SyncState::Pending,
            remote_id: current.remote_id,
            push_attempts: current.push_attempts,
            ..expense
        }))?;
        debug!(user = %updated.user_id, local_id = %updated.local_id, "expense updated");
        self.after_mutation(&updated.user_id);
        Ok(updated)
    }

    /// Overwrites the content of an existing category and marks it pending.
    pub async fn update_category(&self, category: Category) -> EngineResult<Category> {
        self.ensure_signed_in(&category.user_id)?;
        let current = self
            .store
            .get_category(category.local_id)
            .filter(|c| c.user_id == category.user_id)
            .ok_or(StoreError::NotFound {
                kind: RecordKind::Category,
                local_id: category.local_id,
            })?;
        if let Some(other) = self
            .store
            .find_category_by_name(&category.user_id, &category.name)
            .filter(|c| c.local_id != current.local_id)
        {
            return Err(EngineError::DuplicateCategory { name: other.name });
        }
        let updated = local_write(self.store.replace_category(Category {
            sync_state: SyncState::Pending,
            remote_id: current.remote_id,
            push_attempts: current.push_attempts,
            ..category
        }))?;
        self.after_mutation(&updated.user_id);
        Ok(updated)
    }

    /// Deletes an expense locally, then remotely when reachable, then removes
    /// its category if nothing else uses it.
    pub async fn delete_expense(&self, user: &UserId, local_id: LocalId) -> EngineResult<DeleteReport> {
        self.ensure_signed_in(user)?;
        let report = self.reconciler.delete_expense(user, local_id).await?;
        info!(
            user = %user,
            local_id = %local_id,
            remote = ?report.remote,
            cascade = ?report.cascade,
            "expense deleted"
        );
        self.after_mutation(user);
        Ok(report)
    }

    fn owned_expense(&self, user: &UserId, local_id: LocalId) -> EngineResult<Expense> {
        self.store
            .get_expense(local_id)
            .filter(|e| &e.user_id == user)
            .ok_or_else(|| {
                StoreError::NotFound {
                    kind: RecordKind::Expense,
                    local_id,
                }
                .into()
            })
    }

    // === Reads and sync control ===

    /// Refreshes from the remote when possible and returns the user's records.
    pub async fn snapshot(&self, user: &UserId) -> EngineResult<Snapshot> {
        self.facade.snapshot(user).await
    }

    /// Runs a reconciliation now and waits for it.
    pub async fn sync_now(&self, user: &UserId) -> EngineResult<RunReport> {
        self.scheduler.run_now(user).await
    }

    /// Triggers a run because the host application came to the foreground.
    pub fn resume(&self, user: &UserId) -> TriggerResult {
        self.scheduler.trigger(user, TriggerSource::ForegroundResume)
    }

    /// Resolves once no triggered run is in flight for `user`.
    pub async fn wait_idle(&self, user: &UserId) {
        self.scheduler.wait_idle(user).await
    }

    /// Scheduling state of `user`.
    pub fn sync_state(&self, user: &UserId) -> UserSyncState {
        self.scheduler.state(user)
    }

    /// Accepts work for `user` again.
    pub fn sign_in(&self, user: &UserId) {
        self.scheduler.sign_in(user);
    }

    /// Cancels `user`'s in-flight run and rejects further work for them.
    /// Local data stays.
    pub fn sign_out(&self, user: &UserId) {
        self.scheduler.sign_out(user);
    }

    /// Subscribes to run events.
    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.scheduler.subscribe()
    }
}

/// Surfaces rejected input as [`EngineError::InvalidRecord`].
fn local_write<T>(result: Result<T, StoreError>) -> EngineResult<T> {
    result.map_err(|error| match error {
        StoreError::InvalidRecord(message) => EngineError::invalid_record(message),
        other => other.into(),
    })
}

impl<G, C> std::fmt::Debug for WalletEngine<G, C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WalletEngine")
            .field("config", &self.config)
            .field("store", &self.store)
            .finish_non_exhaustive()
    }
}
