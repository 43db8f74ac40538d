//! Remote gateway abstraction.

use crate::error::GatewayResult;
use std::future::Future;
use std::sync::Arc;
use walletsync_core::{
    Category, CategoryKey, Decimal, Expense, ExpenseKey, LocalId, RemoteId, SyncState, Timestamp,
    UserId,
};

/// An expense as the remote stores it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteExpense {
    /// Remote document id.
    pub remote_id: RemoteId,
    /// Merchant name.
    pub store_name: String,
    /// Amount spent.
    pub amount: Decimal,
    /// Category label.
    pub category: String,
    /// Creation time.
    pub date: Timestamp,
    /// Owning user.
    pub user_id: UserId,
    /// Optional image reference.
    pub image_url: Option<String>,
}

impl RemoteExpense {
    /// The remote view of a local expense under `remote_id`.
    pub fn from_expense(expense: &Expense, remote_id: RemoteId) -> Self {
        Self {
            remote_id,
            store_name: expense.store_name.clone(),
            amount: expense.amount,
            category: expense.category.clone(),
            date: expense.date,
            user_id: expense.user_id.clone(),
            image_url: expense.image_url.clone(),
        }
    }

    /// Natural key, comparable with [`Expense::natural_key`].
    pub fn natural_key(&self) -> ExpenseKey {
        ExpenseKey {
            user_id: self.user_id.clone(),
            store_name: self.store_name.clone(),
            category: self.category.clone(),
            amount: self.amount.normalize(),
            date: self.date,
        }
    }

    /// A synced local row carrying this content under `local_id`.
    pub fn to_synced(&self, local_id: LocalId) -> Expense {
        Expense {
            local_id,
            store_name: self.store_name.clone(),
            amount: self.amount,
            category: self.category.clone(),
            date: self.date,
            user_id: self.user_id.clone(),
            image_url: self.image_url.clone(),
            sync_state: SyncState::Synced,
            remote_id: self.remote_id.clone(),
            push_attempts: 0,
        }
    }
}

/// A category as the remote stores it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteCategory {
    /// Remote document id.
    pub remote_id: RemoteId,
    /// Category name.
    pub name: String,
    /// Budget limit.
    pub budget_limit: Decimal,
    /// Owning user.
    pub user_id: UserId,
}

impl RemoteCategory {
    /// The remote view of a local category under `remote_id`.
    pub fn from_category(category: &Category, remote_id: RemoteId) -> Self {
        Self {
            remote_id,
            name: category.name.clone(),
            budget_limit: category.budget_limit,
            user_id: category.user_id.clone(),
        }
    }

    /// Natural key, comparable with [`Category::natural_key`].
    pub fn natural_key(&self) -> CategoryKey {
        CategoryKey::new(&self.user_id, &self.name)
    }

    /// A synced local row carrying this content under `local_id`.
    pub fn to_synced(&self, local_id: LocalId) -> Category {
        Category {
            local_id,
            name: self.name.clone(),
            budget_limit: self.budget_limit,
            user_id: self.user_id.clone(),
            sync_state: SyncState::Synced,
            remote_id: self.remote_id.clone(),
            push_attempts: 0,
        }
    }
}

/// The remote authoritative store.
///
/// Every operation is one remote call: no retries, no caching. A create
/// resolves to the id the remote assigned, or `None` when the remote
/// acknowledged without returning one. Listings are sets keyed by remote id.
pub trait RemoteGateway: Send + Sync {
    /// Creates an expense remotely.
    fn create_expense(
        &self,
        expense: &Expense,
    ) -> impl Future<Output = GatewayResult<Option<RemoteId>>> + Send;

    /// Lists every expense of `user`.
    fn list_expenses(
        &self,
        user: &UserId,
    ) -> impl Future<Output = GatewayResult<Vec<RemoteExpense>>> + Send;

    /// Overwrites the expense at `remote_id`.
    fn update_expense(
        &self,
        remote_id: &RemoteId,
        expense: &Expense,
    ) -> impl Future<Output = GatewayResult<()>> + Send;

    /// Deletes the expense at `remote_id`.
    fn delete_expense(
        &self,
        remote_id: &RemoteId,
        user: &UserId,
    ) -> impl Future<Output = GatewayResult<()>> + Send;

    /// Creates a category remotely.
    fn create_category(
        &self,
        category: &Category,
    ) -> impl Future<Output = GatewayResult<Option<RemoteId>>> + Send;

    /// Lists every category of `user`.
    fn list_categories(
        &self,
        user: &UserId,
    ) -> impl Future<Output = GatewayResult<Vec<RemoteCategory>>> + Send;

    /// Overwrites the category at `remote_id`.
    fn update_category(
        &self,
        remote_id: &RemoteId,
        category: &Category,
    ) -> impl Future<Output = GatewayResult<()>> + Send;

    /// Deletes the category at `remote_id`.
    fn delete_category(
        &self,
        remote_id: &RemoteId,
        user: &UserId,
    ) -> impl Future<Output = GatewayResult<()>> + Send;
}

impl<G: RemoteGateway> RemoteGateway for Arc<G> {
    fn create_expense(
        &self,
        expense: &Expense,
    ) -> impl Future<Output = GatewayResult<Option<RemoteId>>> + Send {
        (**self).create_expense(expense)
    }

    fn list_expenses(
        &self,
        user: &UserId,
    ) -> impl Future<Output = GatewayResult<Vec<RemoteExpense>>> + Send {
        (**self).list_expenses(user)
    }

    fn update_expense(
        &self,
        remote_id: &RemoteId,
        expense: &Expense,
    ) -> impl Future<Output = GatewayResult<()>> + Send {
        (**self).update_expense(remote_id, expense)
    }

    fn delete_expense(
        &self,
        remote_id: &RemoteId,
        user: &UserId,
    ) -> impl Future<Output = GatewayResult<()>> + Send {
        (**self).delete_expense(remote_id, user)
    }

    fn create_category(
        &self,
        category: &Category,
    ) -> impl Future<Output = GatewayResult<Option<RemoteId>>> + Send {
        (**self).create_category(category)
    }

    fn list_categories(
        &self,
        user: &UserId,
    ) -> impl Future<Output = GatewayResult<Vec<RemoteCategory>>> + Send {
        (**self).list_categories(user)
    }

    fn update_category(
        &self,
        remote_id: &RemoteId,
        category: &Category,
    ) -> impl Future<Output = GatewayResult<()>> + Send {
        (**self).update_category(remote_id, category)
    }

    fn delete_category(
        &self,
        remote_id: &RemoteId,
        user: &UserId,
    ) -> impl Future<Output = GatewayResult<()>> + Send {
        (**self).delete_category(remote_id, user)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use walletsync_core::NewExpense;

    #[test]
    fn remote_and_local_keys_agree() {
        let store = walletsync_core::RecordStore::open_in_memory().unwrap();
        let local = store
            .insert_expense(NewExpense::new(
                UserId::new("u1"),
                "Mart",
                Decimal::new(1000, 2),
                "Food",
            ))
            .unwrap();

        let mut remote = RemoteExpense::from_expense(&local, RemoteId::new("r-1"));
        remote.amount = Decimal::new(10, 0);
        assert_eq!(remote.natural_key(), local.natural_key());

        let synced = remote.to_synced(local.local_id);
        assert_eq!(synced.sync_state, SyncState::Synced);
        assert_eq!(synced.remote_id, RemoteId::new("r-1"));
        assert_eq!(synced.natural_key(), local.natural_key());
    }

    #[test]
    fn category_key_ignores_case() {
        let remote = RemoteCategory {
            remote_id: RemoteId::new("c-1"),
            name: "FOOD".into(),
            budget_limit: Decimal::new(100, 0),
            user_id: UserId::new("u1"),
        };
        assert_eq!(
            remote.natural_key(),
            CategoryKey::new(&UserId::new("u1"), "food")
        );
    }
}
