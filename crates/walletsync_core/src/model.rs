//! Expense and category records.
//!
//! Both kinds carry the same sync metadata: a store-assigned [`LocalId`], a
//! [`SyncState`], a [`RemoteId`] (`"0"` until the remote assigns one) and a
//! count of unconfirmed push attempts.

use crate::error::{StoreError, StoreResult};
use crate::types::{LocalId, RecordKind, RemoteId, SyncState, Timestamp, UserId};
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// A single spending entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Expense {
    /// Store-assigned identifier.
    pub local_id: LocalId,
    /// Merchant or shop name.
    pub store_name: String,
    /// Amount spent, never negative.
    pub amount: Decimal,
    /// Category label. Matched against category names case-insensitively.
    pub category: String,
    /// Creation time.
    pub date: Timestamp,
    /// Owning user.
    pub user_id: UserId,
    /// Optional receipt image reference.
    pub image_url: Option<String>,
    /// Pending or synced.
    pub sync_state: SyncState,
    /// Remote document id, `"0"` until assigned.
    pub remote_id: RemoteId,
    /// Push attempts whose outcome was not a confirmed success.
    pub push_attempts: u32,
}

/// A spending category with its budget.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Category {
    /// Store-assigned identifier.
    pub local_id: LocalId,
    /// Category name, unique per user ignoring case.
    pub name: String,
    /// Budget limit, never negative.
    pub budget_limit: Decimal,
    /// Owning user.
    pub user_id: UserId,
    /// Pending or synced.
    pub sync_state: SyncState,
    /// Remote document id, `"0"` until assigned.
    pub remote_id: RemoteId,
    /// Push attempts whose outcome was not a confirmed success.
    pub push_attempts: u32,
}

/// Natural key of an expense: equal keys mean the same logical expense.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ExpenseKey {
    /// Owning user.
    pub user_id: UserId,
    /// Merchant name.
    pub store_name: String,
    /// Category label.
    pub category: String,
    /// Amount with trailing zeros removed, so `12.5` and `12.50` match.
    pub amount: Decimal,
    /// Creation time.
    pub date: Timestamp,
}

/// Natural key of a category: the lower-cased name within a user.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CategoryKey {
    /// Owning user.
    pub user_id: UserId,
    /// Lower-cased, trimmed name.
    pub name: String,
}

impl CategoryKey {
    /// Builds the key for `name` under `user_id`.
    pub fn new(user_id: &UserId, name: &str) -> Self {
        Self {
            user_id: user_id.clone(),
            name: name.trim().to_lowercase(),
        }
    }
}

/// Input for a locally created expense.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewExpense {
    /// Owning user.
    pub user_id: UserId,
    /// Merchant name.
    pub store_name: String,
    /// Amount spent.
    pub amount: Decimal,
    /// Category label.
    pub category: String,
    /// Creation time; defaults to now.
    pub date: Timestamp,
    /// Optional receipt image reference.
    pub image_url: Option<String>,
}

impl NewExpense {
    /// Creates an expense input stamped with the current time.
    pub fn new(
        user_id: UserId,
        store_name: impl Into<String>,
        amount: Decimal,
        category: impl Into<String>,
    ) -> Self {
        Self {
            user_id,
            store_name: store_name.into(),
            amount,
            category: category.into(),
            date: Timestamp::now(),
            image_url: None,
        }
    }

    /// Sets the creation time.
    #[must_use]
    pub fn at(mut self, date: Timestamp) -> Self {
        self.date = date;
        self
    }

    /// Attaches an image reference.
    #[must_use]
    pub fn with_image(mut self, url: impl Into<String>) -> Self {
        self.image_url = Some(url.into());
        self
    }

    pub(crate) fn into_expense(self, local_id: LocalId) -> Expense {
        Expense {
            local_id,
            store_name: self.store_name.trim().to_string(),
            amount: self.amount,
            category: self.category.trim().to_string(),
            date: self.date,
            user_id: self.user_id,
            image_url: self.image_url.filter(|url| !url.trim().is_empty()),
            sync_state: SyncState::Pending,
            remote_id: RemoteId::unassigned(),
            push_attempts: 0,
        }
    }
}

/// Input for a locally created category.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewCategory {
    /// Owning user.
    pub user_id: UserId,
    /// Category name.
    pub name: String,
    /// Budget limit.
    pub budget_limit: Decimal,
}

impl NewCategory {
    /// Creates a category input.
    pub fn new(user_id: UserId, name: impl Into<String>, budget_limit: Decimal) -> Self {
        Self {
            user_id,
            name: name.into(),
            budget_limit,
        }
    }

    pub(crate) fn into_category(self, local_id: LocalId) -> Category {
        Category {
            local_id,
            name: self.name.trim().to_string(),
            budget_limit: self.budget_limit,
            user_id: self.user_id,
            sync_state: SyncState::Pending,
            remote_id: RemoteId::unassigned(),
            push_attempts: 0,
        }
    }
}

impl Expense {
    /// Returns the natural key.
    #[must_use]
    pub fn natural_key(&self) -> ExpenseKey {
        ExpenseKey {
            user_id: self.user_id.clone(),
            store_name: self.store_name.clone(),
            category: self.category.clone(),
            amount: self.amount.normalize(),
            date: self.date,
        }
    }

    /// Returns true while the record awaits a confirmed push.
    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.sync_state.is_pending()
    }

    /// Returns true if this expense is labelled with `category`, ignoring case.
    #[must_use]
    pub fn in_category(&self, category: &str) -> bool {
        self.category.trim().to_lowercase() == category.trim().to_lowercase()
    }

    /// Checks the record-level rules before it is written.
    pub fn validate(&self) -> StoreResult<()> {
        require_user(&self.user_id)?;
        require_text("store name", &self.store_name)?;
        require_text("category", &self.category)?;
        require_non_negative("amount", self.amount)?;
        require_synced_has_id(self.sync_state, &self.remote_id)
    }
}

impl Category {
    /// Returns the natural key.
    #[must_use]
    pub fn natural_key(&self) -> CategoryKey {
        CategoryKey::new(&self.user_id, &self.name)
    }

    /// Returns true while the record awaits a confirmed push.
    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.sync_state.is_pending()
    }

    /// Checks the record-level rules before it is written.
    pub fn validate(&self) -> StoreResult<()> {
        require_user(&self.user_id)?;
        require_text("category name", &self.name)?;
        require_non_negative("budget limit", self.budget_limit)?;
        require_synced_has_id(self.sync_state, &self.remote_id)
    }
}

fn require_user(user_id: &UserId) -> StoreResult<()> {
    if user_id.is_empty() {
        return Err(StoreError::invalid_record("user id must not be empty"));
    }
    Ok(())
}

fn require_text(field: &str, value: &str) -> StoreResult<()> {
    if value.trim().is_empty() {
        return Err(StoreError::invalid_record(format!(
            "{field} must not be blank"
        )));
    }
    Ok(())
}

fn require_non_negative(field: &str, value: Decimal) -> StoreResult<()> {
    if value.is_sign_negative() && !value.is_zero() {
        return Err(StoreError::invalid_record(format!(
            "{field} must not be negative, got {value}"
        )));
    }
    Ok(())
}

fn require_synced_has_id(state: SyncState, remote_id: &RemoteId) -> StoreResult<()> {
    if state == SyncState::Synced && !remote_id.is_assigned() {
        return Err(StoreError::invalid_record(
            "a synced record must carry a remote id",
        ));
    }
    Ok(())
}

/// A record kind the store can persist.
///
/// Sealed to [`Expense`] and [`Category`].
pub trait StoredRecord:
    Clone + Serialize + DeserializeOwned + Send + Sync + private::Sealed + 'static
{
    /// Natural key type.
    type Key: Eq + std::hash::Hash + Clone + std::fmt::Debug + Send + Sync;

    /// Frame kind tag.
    const KIND: RecordKind;

    /// Store-assigned id.
    fn local_id(&self) -> LocalId;
    /// Overwrites the store-assigned id.
    fn set_local_id(&mut self, id: LocalId);
    /// Owning user.
    fn user_id(&self) -> &UserId;
    /// Remote document id.
    fn remote_id(&self) -> &RemoteId;
    /// Sync state.
    fn sync_state(&self) -> SyncState;
    /// Natural key.
    fn key(&self) -> Self::Key;
    /// Record-level validation.
    fn check(&self) -> StoreResult<()>;
}

impl StoredRecord for Expense {
    type Key = ExpenseKey;
    const KIND: RecordKind = RecordKind::Expense;

    fn local_id(&self) -> LocalId {
        self.local_id
    }
    fn set_local_id(&mut self, id: LocalId) {
        self.local_id = id;
    }
    fn user_id(&self) -> &UserId {
        &self.user_id
    }
    fn remote_id(&self) -> &RemoteId {
        &self.remote_id
    }
    fn sync_state(&self) -> SyncState {
        self.sync_state
    }
    fn key(&self) -> ExpenseKey {
        self.natural_key()
    }
    fn check(&self) -> StoreResult<()> {
        self.validate()
    }
}

impl StoredRecord for Category {
    type Key = CategoryKey;
    const KIND: RecordKind = RecordKind::Category;

    fn local_id(&self) -> LocalId {
        self.local_id
    }
    fn set_local_id(&mut self, id: LocalId) {
        self.local_id = id;
    }
    fn user_id(&self) -> &UserId {
        &self.user_id
    }
    fn remote_id(&self) -> &RemoteId {
        &self.remote_id
    }
    fn sync_state(&self) -> SyncState {
        self.sync_state
    }
    fn key(&self) -> CategoryKey {
        self.natural_key()
    }
    fn check(&self) -> StoreResult<()> {
        self.validate()
    }
}

mod private {
    pub trait Sealed {}
    impl Sealed for super::Expense {}
    impl Sealed for super::Category {}
}
