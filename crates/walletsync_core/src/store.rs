//! The durable record store.
//!
//! Every record lives in memory, materialized from an append-only log of
//! [`Frame`]s. A write appends one frame, flushes it and only then updates the
//! in-memory tables, so a write either lands completely or not at all.

use crate::compaction::{self, CompactionReport};
use crate::config::StoreConfig;
use crate::dir::StoreDir;
use crate::error::{StoreError, StoreResult};
use crate::frame::{Frame, FrameError};
use crate::model::{
    Category, CategoryKey, Expense, ExpenseKey, NewCategory, NewExpense, StoredRecord,
};
use crate::types::{LocalId, RecordKind, RemoteId, UserId};
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::Path;
use tracing::{debug, info, warn};
use walletsync_storage::{FileBackend, InMemoryBackend, StorageBackend};

/// What happened while replaying the log on open.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    /// Frames applied.
    pub frames_replayed: u64,
    /// Bytes of a torn final frame that were cut off.
    pub truncated_bytes: u64,
}

/// Point-in-time counters for a store.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoreStats {
    /// Live expenses.
    pub expenses: usize,
    /// Live categories.
    pub categories: usize,
    /// Expenses awaiting push.
    pub pending_expenses: usize,
    /// Categories awaiting push.
    pub pending_categories: usize,
    /// Distinct users with at least one record.
    pub users: usize,
    /// Frames in the log.
    pub frames: u64,
    /// Log size in bytes.
    pub log_bytes: u64,
    /// Bytes held by the latest frame of each live record.
    pub live_bytes: u64,
}

impl StoreStats {
    /// Bytes compaction would reclaim.
    #[must_use]
    pub fn dead_bytes(&self) -> u64 {
        self.log_bytes.saturating_sub(self.live_bytes)
    }

    /// Dead bytes as a fraction of the log.
    #[must_use]
    pub fn dead_ratio(&self) -> f64 {
        if self.log_bytes == 0 {
            0.0
        } else {
            self.dead_bytes() as f64 / self.log_bytes as f64
        }
    }
}

struct Table<T: StoredRecord> {
    rows: BTreeMap<LocalId, T>,
    by_key: HashMap<T::Key, LocalId>,
}

impl<T: StoredRecord> Default for Table<T> {
    fn default() -> Self {
        Self {
            rows: BTreeMap::new(),
            by_key: HashMap::new(),
        }
    }
}

impl<T: StoredRecord> Table<T> {
    fn get(&self, id: LocalId) -> Option<&T> {
        self.rows.get(&id)
    }

    fn by_key(&self, key: &T::Key) -> Option<&T> {
        self.by_key.get(key).and_then(|id| self.rows.get(id))
    }

    fn by_remote_id(&self, user: &UserId, remote_id: &RemoteId) -> Option<&T> {
        if !remote_id.is_assigned() {
            return None;
        }
        self.rows
            .values()
            .find(|row| row.user_id() == user && row.remote_id() == remote_id)
    }

    fn for_user<'a>(&'a self, user: &'a UserId) -> impl Iterator<Item = &'a T> + 'a {
        self.rows.values().filter(move |row| row.user_id() == user)
    }

    fn insert(&mut self, record: T) {
        let id = record.local_id();
        self.remove(id);
        self.by_key.insert(record.key(), id);
        self.rows.insert(id, record);
    }

    fn remove(&mut self, id: LocalId) -> Option<T> {
        let old = self.rows.remove(&id)?;
        let key = old.key();
        if self.by_key.get(&key) == Some(&id) {
            self.by_key.remove(&key);
        }
        Some(old)
    }

    fn pending_count(&self) -> usize {
        self.rows
            .values()
            .filter(|row| row.sync_state().is_pending())
            .count()
    }
}

#[derive(Default)]
struct StoreState {
    expenses: Table<Expense>,
    categories: Table<Category>,
    next_id: u64,
    frame_sizes: HashMap<LocalId, u64>,
    live_bytes: u64,
    log_bytes: u64,
    frames: u64,
}

impl StoreState {
    fn users(&self) -> BTreeSet<&UserId> {
        self.expenses
            .rows
            .values()
            .map(|e| &e.user_id)
            .chain(self.categories.rows.values().map(|c| &c.user_id))
            .collect()
    }

    fn peek_next_id(&self) -> LocalId {
        LocalId::new(self.next_id.max(1))
    }

    fn note_frame(&mut self, id: LocalId, size: u64) {
        self.log_bytes += size;
        self.frames += 1;
        self.next_id = self.next_id.max(id.as_u64() + 1);
    }

    fn apply_put<T: Tabled>(&mut self, record: T, size: u64) {
        let id = record.local_id();
        self.note_frame(id, size);
        if let Some(old) = self.frame_sizes.insert(id, size) {
            self.live_bytes = self.live_bytes.saturating_sub(old);
        }
        self.live_bytes += size;
        T::table_mut(self).insert(record);
    }

    fn apply_delete<T: Tabled>(&mut self, id: LocalId, size: u64) -> Option<T> {
        self.note_frame(id, size);
        if let Some(old) = self.frame_sizes.remove(&id) {
            self.live_bytes = self.live_bytes.saturating_sub(old);
        }
        T::table_mut(self).remove(id)
    }
}

/// Binds each record kind to its table.
trait Tabled: StoredRecord {
    fn table(state: &StoreState) -> &Table<Self>;
    fn table_mut(state: &mut StoreState) -> &mut Table<Self>;
}

impl Tabled for Expense {
    fn table(state: &StoreState) -> &Table<Self> {
        &state.expenses
    }
    fn table_mut(state: &mut StoreState) -> &mut Table<Self> {
        &mut state.expenses
    }
}

impl Tabled for Category {
    fn table(state: &StoreState) -> &Table<Self> {
        &state.categories
    }
    fn table_mut(state: &mut StoreState) -> &mut Table<Self> {
        &mut state.categories
    }
}

/// Durable local storage for expenses and categories.
///
/// Readers run concurrently against the in-memory tables. Writers serialize
/// on an internal mutex and on the backend append.
///
/// # Example
///
/// ```rust
/// use walletsync_core::{Decimal, NewExpense, RecordStore, UserId};
///
/// let store = RecordStore::open_in_memory().unwrap();
/// let user = UserId::new("uid-1");
/// let expense = store
///     .insert_expense(NewExpense::new(user.clone(), "Corner Shop", Decimal::new(450, 2), "Food"))
///     .unwrap();
///
/// assert!(expense.is_pending());
/// assert_eq!(store.pending_expenses(&user).len(), 1);
/// ```
pub struct RecordStore {
    config: StoreConfig,
    dir: Option<StoreDir>,
    backend: RwLock<Box<dyn StorageBackend>>,
    state: RwLock<StoreState>,
    write_lock: Mutex<()>,
    recovery: RecoveryReport,
}

impl RecordStore {
    /// Opens the store in directory `path`, replaying its log.
    ///
    /// # Errors
    ///
    /// - [`StoreError::StoreLocked`] if another handle has the directory open
    /// - [`StoreError::Corruption`] / [`StoreError::ChecksumMismatch`] if a
    ///   frame before the end of the log is damaged
    pub fn open(path: &Path, config: StoreConfig) -> StoreResult<Self> {
        let dir = StoreDir::open(path, config.create_if_missing)?;
        let backend = FileBackend::open(&dir.log_path())?;
        Self::build(Some(dir), Box::new(backend), config)
    }

    /// Opens a store that lives only in memory.
    pub fn open_in_memory() -> StoreResult<Self> {
        Self::with_backend(
            Box::new(InMemoryBackend::new()),
            StoreConfig::default().sync_on_write(false),
        )
    }

    /// Opens a store over an arbitrary backend, replaying whatever it holds.
    pub fn with_backend(backend: Box<dyn StorageBackend>, config: StoreConfig) -> StoreResult<Self> {
        Self::build(None, backend, config)
    }

    fn build(
        dir: Option<StoreDir>,
        mut backend: Box<dyn StorageBackend>,
        config: StoreConfig,
    ) -> StoreResult<Self> {
        let (state, recovery) = replay(&mut *backend)?;
        debug!(
            frames = recovery.frames_replayed,
            expenses = state.expenses.rows.len(),
            categories = state.categories.rows.len(),
            "record store opened"
        );
        Ok(Self {
            config,
            dir,
            backend: RwLock::new(backend),
            state: RwLock::new(state),
            write_lock: Mutex::new(()),
            recovery,
        })
    }

    /// Returns the store directory, if file-backed.
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.dir.as_ref().map(StoreDir::path)
    }

    /// Returns the configuration the store was opened with.
    #[must_use]
    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Returns what replay found when the store was opened.
    #[must_use]
    pub fn recovery(&self) -> &RecoveryReport {
        &self.recovery
    }

    // === Expenses ===

    /// Records a locally created expense as pending.
    ///
    /// If an expense with the same natural key exists, it is replaced and
    /// keeps its local id, remote id and push attempt count.
    pub fn insert_expense(&self, new: NewExpense) -> StoreResult<Expense> {
        self.upsert_by_key(
            |id| new.into_expense(id),
            |existing: &Expense, candidate| Expense {
                local_id: existing.local_id,
                remote_id: existing.remote_id.clone(),
                push_attempts: existing.push_attempts,
                ..candidate
            },
        )
    }

    /// Writes `expense` by natural key, as given.
    ///
    /// An existing row with the same natural key keeps its local id;
    /// otherwise a fresh id is assigned. `expense.local_id` is ignored.
    pub fn upsert_expense(&self, expense: Expense) -> StoreResult<Expense> {
        self.upsert_by_key(
            |id| Expense {
                local_id: id,
                ..expense
            },
            |existing: &Expense, candidate| Expense {
                local_id: existing.local_id,
                ..candidate
            },
        )
    }

    /// Overwrites the expense with `expense.local_id`.
    ///
    /// # Errors
    ///
    /// [`StoreError::NotFound`] if there is no such expense, or
    /// [`StoreError::InvalidRecord`] if another expense has the same natural key.
    pub fn replace_expense(&self, expense: Expense) -> StoreResult<Expense> {
        self.replace(expense)
    }

    /// Looks up an expense by local id.
    #[must_use]
    pub fn get_expense(&self, id: LocalId) -> Option<Expense> {
        self.state.read().expenses.get(id).cloned()
    }

    /// All expenses of `user`, in creation order.
    #[must_use]
    pub fn expenses_for_user(&self, user: &UserId) -> Vec<Expense> {
        self.state.read().expenses.for_user(user).cloned().collect()
    }

    /// Pending expenses of `user`, in creation order.
    #[must_use]
    pub fn pending_expenses(&self, user: &UserId) -> Vec<Expense> {
        self.state
            .read()
            .expenses
            .for_user(user)
            .filter(|e| e.is_pending())
            .cloned()
            .collect()
    }

    /// Finds the expense with natural key `key`.
    #[must_use]
    pub fn find_expense_by_natural_key(&self, key: &ExpenseKey) -> Option<Expense> {
        self.state.read().expenses.by_key(key).cloned()
    }

    /// Finds the expense of `user` carrying `remote_id`.
    ///
    /// The unassigned sentinel never matches.
    #[must_use]
    pub fn find_expense_by_remote_id(&self, user: &UserId, remote_id: &RemoteId) -> Option<Expense> {
        self.state
            .read()
            .expenses
            .by_remote_id(user, remote_id)
            .cloned()
    }

    /// Deletes an expense by local id. Returns the removed row, if any.
    pub fn delete_expense(&self, id: LocalId) -> StoreResult<Option<Expense>> {
        let _guard = self.write_lock.lock();
        self.remove::<Expense>(id)
    }

    /// Deletes the expense of `user` carrying `remote_id`.
    pub fn delete_expense_by_remote_id(
        &self,
        user: &UserId,
        remote_id: &RemoteId,
    ) -> StoreResult<Option<Expense>> {
        let _guard = self.write_lock.lock();
        let id = self
            .state
            .read()
            .expenses
            .by_remote_id(user, remote_id)
            .map(|e| e.local_id);
        match id {
            Some(id) => self.remove::<Expense>(id),
            None => Ok(None),
        }
    }

    /// Deletes the expense with natural key `key`.
    pub fn delete_expense_by_natural_key(&self, key: &ExpenseKey) -> StoreResult<Option<Expense>> {
        let _guard = self.write_lock.lock();
        let id = self.state.read().expenses.by_key(key).map(|e| e.local_id);
        match id {
            Some(id) => self.remove::<Expense>(id),
            None => Ok(None),
        }
    }

    /// Counts expenses of `user` labelled `category`, ignoring case.
    #[must_use]
    pub fn count_expenses_in_category(&self, user: &UserId, category: &str) -> usize {
        self.state
            .read()
            .expenses
            .for_user(user)
            .filter(|e| e.in_category(category))
            .count()
    }

    // === Categories ===

    /// Records a locally created category as pending.
    ///
    /// A category whose name matches an existing one (ignoring case) replaces
    /// it and keeps its local id, remote id and push attempt count. Callers
    /// that must reject duplicates check
    /// [`find_category_by_name`](Self::find_category_by_name) first.
    pub fn insert_category(&self, new: NewCategory) -> StoreResult<Category> {
        self.upsert_by_key(
            |id| new.into_category(id),
            |existing: &Category, candidate| Category {
                local_id: existing.local_id,
                remote_id: existing.remote_id.clone(),
                push_attempts: existing.push_attempts,
                ..candidate
            },
        )
    }

    /// Writes `category` by natural key, as given.
    pub fn upsert_category(&self, category: Category) -> StoreResult<Category> {
        self.upsert_by_key(
            |id| Category {
                local_id: id,
                ..category
            },
            |existing: &Category, candidate| Category {
                local_id: existing.local_id,
                ..candidate
            },
        )
    }

    /// Overwrites the category with `category.local_id`.
    pub fn replace_category(&self, category: Category) -> StoreResult<Category> {
        self.replace(category)
    }

    /// Looks up a category by local id.
    #[must_use]
    pub fn get_category(&self, id: LocalId) -> Option<Category> {
        self.state.read().categories.get(id).cloned()
    }

    /// All categories of `user`, in creation order.
    #[must_use]
    pub fn categories_for_user(&self, user: &UserId) -> Vec<Category> {
        self.state
            .read()
            .categories
            .for_user(user)
            .cloned()
            .collect()
    }

    /// Pending categories of `user`, in creation order.
    #[must_use]
    pub fn pending_categories(&self, user: &UserId) -> Vec<Category> {
        self.state
            .read()
            .categories
            .for_user(user)
            .filter(|c| c.is_pending())
            .cloned()
            .collect()
    }

    /// Finds the category with natural key `key`.
    #[must_use]
    pub fn find_category_by_natural_key(&self, key: &CategoryKey) -> Option<Category> {
        self.state.read().categories.by_key(key).cloned()
    }

    /// Finds the category of `user` named `name`, ignoring case.
    #[must_use]
    pub fn find_category_by_name(&self, user: &UserId, name: &str) -> Option<Category> {
        self.find_category_by_natural_key(&CategoryKey::new(user, name))
    }

    /// Finds the category of `user` carrying `remote_id`.
    #[must_use]
    pub fn find_category_by_remote_id(
        &self,
        user: &UserId,
        remote_id: &RemoteId,
    ) -> Option<Category> {
        self.state
            .read()
            .categories
            .by_remote_id(user, remote_id)
            .cloned()
    }

    /// Deletes a category by local id.
    pub fn delete_category(&self, id: LocalId) -> StoreResult<Option<Category>> {
        let _guard = self.write_lock.lock();
        self.remove::<Category>(id)
    }

    /// Deletes the category of `user` named `name`, ignoring case.
    pub fn delete_category_by_name(
        &self,
        user: &UserId,
        name: &str,
    ) -> StoreResult<Option<Category>> {
        let _guard = self.write_lock.lock();
        let key = CategoryKey::new(user, name);
        let id = self.state.read().categories.by_key(&key).map(|c| c.local_id);
        match id {
            Some(id) => self.remove::<Category>(id),
            None => Ok(None),
        }
    }

    // === Store-wide ===

    /// Users that own at least one record, sorted.
    #[must_use]
    pub fn users(&self) -> Vec<UserId> {
        let state = self.state.read();
        state.users().into_iter().cloned().collect()
    }

    /// Returns current counters.
    #[must_use]
    pub fn stats(&self) -> StoreStats {
        let state = self.state.read();
        StoreStats {
            expenses: state.expenses.rows.len(),
            categories: state.categories.rows.len(),
            pending_expenses: state.expenses.pending_count(),
            pending_categories: state.categories.pending_count(),
            users: state.users().len(),
            frames: state.frames,
            log_bytes: state.log_bytes,
            live_bytes: state.live_bytes,
        }
    }

    /// Returns true once dead bytes pass the configured threshold.
    #[must_use]
    pub fn needs_compaction(&self) -> bool {
        let stats = self.stats();
        stats.log_bytes >= self.config.compact_min_bytes
            && stats.dead_bytes() > 0
            && stats.dead_ratio() >= self.config.compact_threshold
    }

    /// Compacts when [`needs_compaction`](Self::needs_compaction) says so.
    pub fn compact_if_needed(&self) -> StoreResult<Option<CompactionReport>> {
        if self.needs_compaction() {
            self.compact().map(Some)
        } else {
            Ok(None)
        }
    }

    /// Rewrites the log with only live records. Logical state is unchanged.
    pub fn compact(&self) -> StoreResult<CompactionReport> {
        let _guard = self.write_lock.lock();

        let (log, frames_before, bytes_before) = {
            let state = self.state.read();
            let mut live = state
                .expenses
                .rows
                .values()
                .map(|e| Frame::put(RecordKind::Expense, e.local_id, e))
                .chain(
                    state
                        .categories
                        .rows
                        .values()
                        .map(|c| Frame::put(RecordKind::Category, c.local_id, c)),
                )
                .collect::<StoreResult<Vec<_>>>()?;
            live.sort_by_key(|frame| frame.local_id);

            // Kind is irrelevant for an id with no live record.
            let high_water = state
                .next_id
                .checked_sub(1)
                .filter(|&last| last > 0)
                .map(LocalId::new)
                .filter(|last| !state.frame_sizes.contains_key(last))
                .map(|last| Frame::tombstone(RecordKind::Expense, last));

            (
                compaction::rewrite(live, high_water),
                state.frames,
                state.log_bytes,
            )
        };

        self.install(&log.bytes)?;

        let mut state = self.state.write();
        state.live_bytes = log.frame_sizes.values().sum();
        state.frame_sizes = log.frame_sizes;
        state.log_bytes = log.bytes.len() as u64;
        state.frames = log.frames;

        let report = CompactionReport {
            frames_before,
            frames_after: state.frames,
            bytes_before,
            bytes_after: state.log_bytes,
        };
        info!(
            bytes_before = report.bytes_before,
            bytes_after = report.bytes_after,
            "record log compacted"
        );
        Ok(report)
    }

    /// Flushes and syncs the log.
    pub fn flush(&self) -> StoreResult<()> {
        let mut backend = self.backend.write();
        backend.flush()?;
        backend.sync()?;
        Ok(())
    }

    // === Internals ===

    fn install(&self, bytes: &[u8]) -> StoreResult<()> {
        let Some(dir) = &self.dir else {
            let mut backend = self.backend.write();
            backend.truncate(0)?;
            backend.append(bytes)?;
            backend.flush()?;
            backend.sync()?;
            return Ok(());
        };

        let mut fresh = FileBackend::open(&dir.compact_path())?;
        fresh.truncate(0)?;
        fresh.append(bytes)?;
        fresh.sync()?;

        // The old handle must be closed before the rename on some platforms.
        let mut backend = self.backend.write();
        *backend = Box::new(fresh);
        if let Err(err) = dir.install_compacted() {
            warn!(error = %err, "compaction rename failed, keeping original log");
            *backend = Box::new(FileBackend::open(&dir.log_path())?);
            return Err(err);
        }
        Ok(())
    }

    fn upsert_by_key<T: Tabled>(
        &self,
        build: impl FnOnce(LocalId) -> T,
        merge: impl FnOnce(&T, T) -> T,
    ) -> StoreResult<T> {
        let _guard = self.write_lock.lock();
        let record = {
            let state = self.state.read();
            let candidate = build(state.peek_next_id());
            match T::table(&state).by_key(&candidate.key()) {
                Some(existing) => merge(existing, candidate),
                None => candidate,
            }
        };
        self.put(record)
    }

    fn replace<T: Tabled>(&self, record: T) -> StoreResult<T> {
        let _guard = self.write_lock.lock();
        {
            let state = self.state.read();
            let table = T::table(&state);
            let id = record.local_id();
            if table.get(id).is_none() {
                return Err(StoreError::NotFound {
                    kind: T::KIND,
                    local_id: id,
                });
            }
            if let Some(&other) = table.by_key.get(&record.key()) {
                if other != id {
                    return Err(StoreError::invalid_record(format!(
                        "{} {other} already has this natural key",
                        T::KIND
                    )));
                }
            }
        }
        self.put(record)
    }

    // Callers hold `write_lock`.
    fn put<T: Tabled>(&self, record: T) -> StoreResult<T> {
        record.check()?;
        let frame = Frame::put(T::KIND, record.local_id(), &record)?;
        let size = self.append(&frame)?;
        debug!(kind = %T::KIND, local_id = %record.local_id(), state = %record.sync_state(), "record written");
        self.state.write().apply_put(record.clone(), size);
        Ok(record)
    }

    // Callers hold `write_lock`.
    fn remove<T: Tabled>(&self, id: LocalId) -> StoreResult<Option<T>> {
        if T::table(&self.state.read()).get(id).is_none() {
            return Ok(None);
        }
        let size = self.append(&Frame::tombstone(T::KIND, id))?;
        debug!(kind = %T::KIND, local_id = %id, "record deleted");
        Ok(self.state.write().apply_delete::<T>(id, size))
    }

    fn append(&self, frame: &Frame) -> StoreResult<u64> {
        let bytes = frame.encode();
        let mut backend = self.backend.write();
        let rollback_to = backend.size()?;
        if let Err(err) = self.write_through(&mut **backend, &bytes) {
            if let Err(undo) = backend.truncate(rollback_to) {
                warn!(error = %undo, "failed to roll back partial frame");
            }
            return Err(err);
        }
        Ok(bytes.len() as u64)
    }

    fn write_through(&self, backend: &mut dyn StorageBackend, bytes: &[u8]) -> StoreResult<()> {
        backend.append(bytes)?;
        backend.flush()?;
        if self.config.sync_on_write {
            backend.sync()?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for RecordStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.read();
        f.debug_struct("RecordStore")
            .field("path", &self.path())
            .field("expenses", &state.expenses.rows.len())
            .field("categories", &state.categories.rows.len())
            .field("log_bytes", &state.log_bytes)
            .finish()
    }
}

fn replay(backend: &mut dyn StorageBackend) -> StoreResult<(StoreState, RecoveryReport)> {
    let data = backend.read_all()?;
    let mut state = StoreState::default();
    let mut report = RecoveryReport::default();
    let mut offset = 0usize;

    while offset < data.len() {
        let at = offset as u64;
        match Frame::decode(&data[offset..]) {
            Ok((frame, used)) => {
                let size = used as u64;
                match (frame.kind, frame.is_tombstone()) {
                    (RecordKind::Expense, true) => {
                        state.apply_delete::<Expense>(frame.local_id, size);
                    }
                    (RecordKind::Category, true) => {
                        state.apply_delete::<Category>(frame.local_id, size);
                    }
                    (RecordKind::Expense, false) => {
                        let record = decode_record::<Expense>(&frame, at)?;
                        state.apply_put(record, size);
                    }
                    (RecordKind::Category, false) => {
                        let record = decode_record::<Category>(&frame, at)?;
                        state.apply_put(record, size);
                    }
                }
                report.frames_replayed += 1;
                offset += used;
            }
            Err(FrameError::Incomplete) => break,
            Err(FrameError::Checksum { expected, actual }) => {
                let declared =
                    u32::from_le_bytes([data[offset], data[offset + 1], data[offset + 2], data[offset + 3]])
                        as usize;
                if offset + declared == data.len() {
                    break;
                }
                return Err(StoreError::ChecksumMismatch {
                    offset: at,
                    expected,
                    actual,
                });
            }
            Err(FrameError::BadLength(len)) => {
                return Err(StoreError::corruption(at, format!("impossible frame length {len}")));
            }
            Err(FrameError::UnknownKind(tag)) => {
                return Err(StoreError::corruption(at, format!("unknown record kind {tag}")));
            }
        }
    }

    if offset < data.len() {
        let torn = (data.len() - offset) as u64;
        warn!(offset, bytes = torn, "truncating torn frame at end of record log");
        backend.truncate(offset as u64)?;
        report.truncated_bytes = torn;
    }

    Ok((state, report))
}

fn decode_record<T: Tabled>(frame: &Frame, offset: u64) -> StoreResult<T> {
    let record: T = frame.record().map_err(|err| {
        StoreError::corruption(offset, format!("undecodable {} payload: {err}", T::KIND))
    })?;
    if record.local_id() != frame.local_id {
        return Err(StoreError::corruption(
            offset,
            format!(
                "payload id {} does not match frame id {}",
                record.local_id(),
                frame.local_id
            ),
        ));
    }
    Ok(record)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{SyncState, Timestamp};
    use rust_decimal::Decimal;

    fn user() -> UserId {
        UserId::new("uid-1")
    }

    fn at(text: &str) -> Timestamp {
        Timestamp::parse(text).unwrap()
    }

    fn lunch() -> NewExpense {
        NewExpense::new(user(), "Cafe", Decimal::new(1250, 2), "Food")
            .at(at("2024-03-01T12:00:00.000Z"))
    }

    fn synced(mut expense: Expense, remote: &str) -> Expense {
        expense.sync_state = SyncState::Synced;
        expense.remote_id = RemoteId::new(remote);
        expense
    }

    #[test]
    fn insert_assigns_increasing_ids() {
        let store = RecordStore::open_in_memory().unwrap();
        let a = store.insert_expense(lunch()).unwrap();
        let b = store
            .insert_category(NewCategory::new(user(), "Food", Decimal::new(300, 0)))
            .unwrap();
        assert!(b.local_id > a.local_id);
        assert_eq!(a.local_id, LocalId::new(1));
    }

    #[test]
    fn reinsert_same_natural_key_keeps_identity() {
        let store = RecordStore::open_in_memory().unwrap();
        let first = store.insert_expense(lunch()).unwrap();
        store
            .replace_expense(synced(first.clone(), "r-1"))
            .unwrap();

        let again = store
            .insert_expense(lunch().with_image("file://receipt.png"))
            .unwrap();
        assert_eq!(again.local_id, first.local_id);
        assert_eq!(again.remote_id, RemoteId::new("r-1"));
        assert!(again.is_pending());
        assert_eq!(store.expenses_for_user(&user()).len(), 1);
    }

    #[test]
    fn upsert_matches_on_normalized_amount() {
        let store = RecordStore::open_in_memory().unwrap();
        let local = store.insert_expense(lunch()).unwrap();

        let mut remote = local.clone();
        remote.amount = Decimal::new(125, 1);
        let merged = store.upsert_expense(synced(remote, "r-9")).unwrap();

        assert_eq!(merged.local_id, local.local_id);
        assert_eq!(merged.sync_state, SyncState::Synced);
        assert_eq!(store.expenses_for_user(&user()).len(), 1);
    }

    #[test]
    fn upsert_without_match_assigns_new_id() {
        let store = RecordStore::open_in_memory().unwrap();
        let local = store.insert_expense(lunch()).unwrap();

        let mut other = synced(local.clone(), "r-2");
        other.store_name = "Bakery".into();
        other.local_id = LocalId::new(999);
        let written = store.upsert_expense(other).unwrap();
        assert_ne!(written.local_id, local.local_id);
        assert_ne!(written.local_id, LocalId::new(999));
    }

    #[test]
    fn replace_rules() {
        let store = RecordStore::open_in_memory().unwrap();
        let a = store.insert_expense(lunch()).unwrap();
        let b = store
            .insert_expense(lunch().at(at("2024-03-02T12:00:00.000Z")))
            .unwrap();

        let mut missing = a.clone();
        missing.local_id = LocalId::new(77);
        assert!(matches!(
            store.replace_expense(missing),
            Err(StoreError::NotFound { .. })
        ));

        let mut clash = b.clone();
        clash.date = a.date;
        assert!(matches!(
            store.replace_expense(clash),
            Err(StoreError::InvalidRecord(_))
        ));
        assert_eq!(store.get_expense(b.local_id).unwrap(), b);
    }

    #[test]
    fn invalid_record_is_not_written() {
        let store = RecordStore::open_in_memory().unwrap();
        let result = store.insert_expense(NewExpense::new(user(), " ", Decimal::ONE, "Food"));
        assert!(matches!(result, Err(StoreError::InvalidRecord(_))));
        assert_eq!(store.stats().frames, 0);
    }

    #[test]
    fn pending_lists_are_per_user_and_ordered() {
        let store = RecordStore::open_in_memory().unwrap();
        let other = UserId::new("uid-2");
        let first = store.insert_expense(lunch()).unwrap();
        store
            .insert_expense(NewExpense::new(other.clone(), "Cafe", Decimal::ONE, "Food"))
            .unwrap();
        let second = store
            .insert_expense(lunch().at(at("2024-03-05T08:00:00.000Z")))
            .unwrap();
        store.replace_expense(synced(second.clone(), "r-5")).unwrap();
        let third = store
            .insert_expense(lunch().at(at("2024-03-06T08:00:00.000Z")))
            .unwrap();

        let pending: Vec<_> = store
            .pending_expenses(&user())
            .into_iter()
            .map(|e| e.local_id)
            .collect();
        assert_eq!(pending, vec![first.local_id, third.local_id]);
        assert_eq!(store.pending_expenses(&other).len(), 1);
    }

    #[test]
    fn remote_id_lookups_ignore_sentinel() {
        let store = RecordStore::open_in_memory().unwrap();
        let expense = store.insert_expense(lunch()).unwrap();
        assert!(store
            .find_expense_by_remote_id(&user(), &RemoteId::unassigned())
            .is_none());

        store.replace_expense(synced(expense, "r-1")).unwrap();
        assert!(store
            .find_expense_by_remote_id(&user(), &RemoteId::new("r-1"))
            .is_some());
        assert!(store
            .find_expense_by_remote_id(&UserId::new("uid-2"), &RemoteId::new("r-1"))
            .is_none());
    }

    #[test]
    fn deletes_by_each_handle() {
        let store = RecordStore::open_in_memory().unwrap();
        let a = store.insert_expense(lunch()).unwrap();
        let b = store
            .insert_expense(lunch().at(at("2024-03-02T12:00:00.000Z")))
            .unwrap();
        let c = store
            .insert_expense(lunch().at(at("2024-03-03T12:00:00.000Z")))
            .unwrap();
        store.replace_expense(synced(b.clone(), "r-b")).unwrap();

        assert_eq!(store.delete_expense(a.local_id).unwrap().unwrap().local_id, a.local_id);
        assert!(store.delete_expense(a.local_id).unwrap().is_none());
        assert!(store
            .delete_expense_by_remote_id(&user(), &RemoteId::new("r-b"))
            .unwrap()
            .is_some());
        assert!(store
            .delete_expense_by_natural_key(&c.natural_key())
            .unwrap()
            .is_some());
        assert!(store.expenses_for_user(&user()).is_empty());
    }

    #[test]
    fn categories_match_names_ignoring_case() {
        let store = RecordStore::open_in_memory().unwrap();
        store
            .insert_category(NewCategory::new(user(), "Groceries", Decimal::new(200, 0)))
            .unwrap();
        assert!(store.find_category_by_name(&user(), "GROCERIES").is_some());

        store.insert_expense(NewExpense::new(user(), "Mart", Decimal::ONE, "groceries")).unwrap();
        assert_eq!(store.count_expenses_in_category(&user(), "Groceries"), 1);

        let removed = store.delete_category_by_name(&user(), "groceries").unwrap();
        assert_eq!(removed.unwrap().name, "Groceries");
        assert!(store.categories_for_user(&user()).is_empty());
    }

    #[test]
    fn stats_track_dead_bytes() {
        let store = RecordStore::open_in_memory().unwrap();
        let expense = store.insert_expense(lunch()).unwrap();
        let stats = store.stats();
        assert_eq!(stats.dead_bytes(), 0);
        assert_eq!(stats.pending_expenses, 1);
        assert_eq!(stats.users, 1);

        store.replace_expense(synced(expense, "r-1")).unwrap();
        let stats = store.stats();
        assert_eq!(stats.frames, 2);
        assert_eq!(stats.pending_expenses, 0);
        assert!(stats.dead_bytes() > 0);
    }

    #[test]
    fn compaction_preserves_logical_state_and_ids() {
        let store = RecordStore::with_backend(
            Box::new(InMemoryBackend::new()),
            StoreConfig::default()
                .sync_on_write(false)
                .compact_min_bytes(0)
                .compact_threshold(0.3),
        )
        .unwrap();
        let keep = store.insert_expense(lunch()).unwrap();
        let gone = store
            .insert_expense(lunch().at(at("2024-03-09T12:00:00.000Z")))
            .unwrap();
        store.delete_expense(gone.local_id).unwrap();
        assert!(store.needs_compaction());

        let before = store.expenses_for_user(&user());
        let report = store.compact().unwrap();
        assert!(report.bytes_saved() > 0);
        assert_eq!(store.expenses_for_user(&user()), before);
        assert!(!store.needs_compaction());

        let next = store
            .insert_expense(lunch().at(at("2024-03-10T12:00:00.000Z")))
            .unwrap();
        assert!(next.local_id > gone.local_id);
        assert!(keep.local_id < gone.local_id);
    }

    #[test]
    fn compact_if_needed_respects_minimum_size() {
        let store = RecordStore::open_in_memory().unwrap();
        let expense = store.insert_expense(lunch()).unwrap();
        store.delete_expense(expense.local_id).unwrap();
        assert!(!store.needs_compaction());
        assert!(store.compact_if_needed().unwrap().is_none());
    }

    #[test]
    fn users_are_distinct_and_sorted() {
        let store = RecordStore::open_in_memory().unwrap();
        store.insert_expense(NewExpense::new(UserId::new("b"), "S", Decimal::ONE, "C")).unwrap();
        store.insert_category(NewCategory::new(UserId::new("a"), "C", Decimal::ONE)).unwrap();
        store.insert_expense(NewExpense::new(UserId::new("b"), "T", Decimal::ONE, "C")).unwrap();
        assert_eq!(store.users(), vec![UserId::new("a"), UserId::new("b")]);
    }
}
