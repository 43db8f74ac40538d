//! Test fixtures and store helpers.
//!
//! Provides temporary stores, sample records with fixed timestamps, and a
//! storage backend whose writes can be made to fail.

use chrono::Duration;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tempfile::TempDir;
use walletsync_core::{
    Category, Decimal, Expense, NewCategory, NewExpense, RecordStore, StoreConfig, Timestamp,
    UserId,
};
use walletsync_storage::{InMemoryBackend, StorageBackend, StorageError, StorageResult};

/// A file-backed record store in a temporary directory.
///
/// The directory is removed when the value is dropped.
pub struct TestStore {
    /// The store, shareable with engines under test.
    pub store: Arc<RecordStore>,
    dir: TempDir,
}

impl TestStore {
    /// Opens a fresh store in a new temporary directory.
    pub fn new() -> Self {
        let dir = TempDir::new().expect("Failed to create temp directory");
        let store = open_store(dir.path());
        Self {
            store: Arc::new(store),
            dir,
        }
    }

    /// Directory holding the store.
    pub fn path(&self) -> PathBuf {
        self.dir.path().join("store")
    }

    /// Closes the store and opens it again from disk, as after a restart.
    ///
    /// Panics if another handle to the store is still alive.
    pub fn reopen(self) -> Self {
        let Self { store, dir } = self;
        drop(
            Arc::try_unwrap(store)
                .unwrap_or_else(|_| panic!("store still shared, cannot reopen")),
        );
        let store = open_store(dir.path());
        Self {
            store: Arc::new(store),
            dir,
        }
    }
}

impl Default for TestStore {
    fn default() -> Self {
        Self::new()
    }
}

impl std::ops::Deref for TestStore {
    type Target = RecordStore;

    fn deref(&self) -> &Self::Target {
        &self.store
    }
}

fn open_store(root: &Path) -> RecordStore {
    RecordStore::open(&root.join("store"), StoreConfig::default().sync_on_write(false))
        .expect("Failed to open record store")
}

/// Runs `f` against a fresh in-memory store.
///
/// # Example
///
/// ```rust
/// use walletsync_testkit::{sample_expense, sample_user, with_memory_store};
///
/// with_memory_store(|store| {
///     let expense = store.insert_expense(sample_expense(&sample_user(), 1)).unwrap();
///     assert!(expense.is_pending());
/// });
/// ```
pub fn with_memory_store<F, R>(f: F) -> R
where
    F: FnOnce(&RecordStore) -> R,
{
    let store = RecordStore::open_in_memory().expect("Failed to open in-memory store");
    f(&store)
}

/// Runs `f` against a fresh file-backed store.
pub fn with_temp_store<F, R>(f: F) -> R
where
    F: FnOnce(&RecordStore) -> R,
{
    let test_store = TestStore::new();
    f(&test_store)
}

// === Sample data ===

/// The default test user.
pub fn sample_user() -> UserId {
    UserId::new("user-1")
}

/// A second user, for isolation tests.
pub fn other_user() -> UserId {
    UserId::new("user-2")
}

/// A fixed timestamp `n` minutes after 2024-05-01T08:00:00Z.
pub fn sample_time(n: u32) -> Timestamp {
    let base = Timestamp::parse("2024-05-01T08:00:00.000Z").expect("valid timestamp");
    Timestamp::from_datetime(base.as_datetime() + Duration::minutes(i64::from(n)))
}

const SHOPS: [&str; 5] = ["Corner Mart", "Fuel Stop", "Book Nook", "Deli", "Pharmacy"];
const LABELS: [&str; 5] = ["Groceries", "Transport", "Books", "Groceries", "Health"];

/// The `n`th sample expense for `user`. Distinct `n` give distinct natural keys.
pub fn sample_expense(user: &UserId, n: u32) -> NewExpense {
    let slot = n as usize % SHOPS.len();
    NewExpense::new(
        user.clone(),
        SHOPS[slot],
        Decimal::new(i64::from(n) * 125 + 99, 2),
        LABELS[slot],
    )
    .at(sample_time(n))
}

/// `count` sample expenses for `user`.
pub fn sample_expenses(user: &UserId, count: u32) -> Vec<NewExpense> {
    (0..count).map(|n| sample_expense(user, n)).collect()
}

/// A category named `name` with a budget of 100.
pub fn sample_category(user: &UserId, name: &str) -> NewCategory {
    NewCategory::new(user.clone(), name, Decimal::new(100, 0))
}

/// A user's worth of local data.
#[derive(Debug, Clone)]
pub struct Scenario {
    /// Owning user.
    pub user: UserId,
    /// Stored expenses.
    pub expenses: Vec<Expense>,
    /// Stored categories.
    pub categories: Vec<Category>,
}

/// Writes the categories used by the sample expenses plus `expenses` sample
/// expenses for `user`, all pending.
pub fn populate(store: &RecordStore, user: &UserId, expenses: u32) -> Scenario {
    let categories = ["Groceries", "Transport", "Books", "Health"]
        .into_iter()
        .map(|name| {
            store
                .insert_category(sample_category(user, name))
                .expect("Failed to insert category")
        })
        .collect();
    let expenses = sample_expenses(user, expenses)
        .into_iter()
        .map(|new| store.insert_expense(new).expect("Failed to insert expense"))
        .collect();
    Scenario {
        user: user.clone(),
        expenses,
        categories,
    }
}

// === Failure injection ===

/// Switch shared between a test and a [`FailingBackend`].
#[derive(Debug, Clone, Default)]
pub struct FailSwitch(Arc<AtomicBool>);

impl FailSwitch {
    /// Creates a switch in the passing position.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes writes fail (`true`) or pass (`false`).
    pub fn set(&self, failing: bool) {
        self.0.store(failing, Ordering::SeqCst);
    }

    /// Returns true if writes currently fail.
    pub fn is_failing(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// An in-memory backend whose appends and syncs fail while its switch is on.
#[derive(Debug)]
pub struct FailingBackend {
    inner: InMemoryBackend,
    switch: FailSwitch,
}

impl FailingBackend {
    /// Creates an empty backend controlled by `switch`.
    pub fn new(switch: FailSwitch) -> Self {
        Self {
            inner: InMemoryBackend::new(),
            switch,
        }
    }

    fn check(&self) -> StorageResult<()> {
        if self.switch.is_failing() {
            return Err(StorageError::Io(io::Error::new(
                io::ErrorKind::Other,
                "injected write failure",
            )));
        }
        Ok(())
    }
}

impl StorageBackend for FailingBackend {
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
        self.inner.read_at(offset, len)
    }

    fn append(&mut self, data: &[u8]) -> StorageResult<u64> {
        self.check()?;
        self.inner.append(data)
    }

    fn flush(&mut self) -> StorageResult<()> {
        self.inner.flush()
    }

    fn size(&self) -> StorageResult<u64> {
        self.inner.size()
    }

    fn sync(&mut self) -> StorageResult<()> {
        self.check()?;
        self.inner.sync()
    }

    fn truncate(&mut self, new_size: u64) -> StorageResult<()> {
        self.inner.truncate(new_size)
    }
}

/// An in-memory store whose writes fail while the returned switch is on.
pub fn failing_store() -> (RecordStore, FailSwitch) {
    let switch = FailSwitch::new();
    let store = RecordStore::with_backend(
        Box::new(FailingBackend::new(switch.clone())),
        StoreConfig::default(),
    )
    .expect("Failed to open failing store");
    (store, switch)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sample_expenses_have_distinct_keys() {
        let user = sample_user();
        let keys: std::collections::HashSet<_> = sample_expenses(&user, 20)
            .into_iter()
            .map(|new| (new.store_name, new.amount, new.date))
            .collect();
        assert_eq!(keys.len(), 20);
    }

    #[test]
    fn populate_writes_pending_rows() {
        with_memory_store(|store| {
            let scenario = populate(store, &sample_user(), 6);
            assert_eq!(scenario.categories.len(), 4);
            assert_eq!(store.pending_expenses(&scenario.user).len(), 6);
            assert!(store.expenses_for_user(&other_user()).is_empty());
        });
    }

    #[test]
    fn reopen_keeps_records() {
        let test_store = TestStore::new();
        test_store
            .insert_expense(sample_expense(&sample_user(), 3))
            .unwrap();
        let test_store = test_store.reopen();
        assert_eq!(test_store.expenses_for_user(&sample_user()).len(), 1);
    }

    #[test]
    fn failing_backend_rejects_writes() {
        let (store, switch) = failing_store();
        store.insert_expense(sample_expense(&sample_user(), 0)).unwrap();
        switch.set(true);
        assert!(store.insert_expense(sample_expense(&sample_user(), 1)).is_err());
        switch.set(false);
        assert_eq!(store.expenses_for_user(&sample_user()).len(), 1);
    }
}
