//! Read access for presentation: refresh when possible, fall back to local.

use crate::connectivity::ConnectivityOracle;
use crate::error::EngineResult;
use crate::gateway::RemoteGateway;
use crate::reconciler::{PullOutcome, Reconciler};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::debug;
use walletsync_core::{Category, Decimal, Expense, UserId};

/// Category filter that matches every expense.
pub const ALL_CATEGORIES: &str = "All";

/// Where the snapshot's freshness comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotSource {
    /// The remote listing was just folded into the store.
    Remote,
    /// The remote could not be read; the store is shown as it was.
    LocalFallback,
}

/// Conditions the presentation should surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Notice {
    /// The remote could not be read and nothing is stored locally.
    NoOfflineData,
}

/// Spending against one category's budget.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BudgetUsage {
    /// Category name.
    pub category: String,
    /// Budget limit.
    pub limit: Decimal,
    /// Sum of expenses labelled with the category.
    pub used: Decimal,
    /// `limit - used`; negative when over budget.
    pub remaining: Decimal,
}

impl BudgetUsage {
    /// Returns true if spending exceeds the limit.
    pub fn is_over_budget(&self) -> bool {
        self.remaining.is_sign_negative() && !self.remaining.is_zero()
    }
}

/// A user's records as presentation sees them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    /// Owning user.
    pub user: UserId,
    /// Expenses, in creation order.
    pub expenses: Vec<Expense>,
    /// Categories, in creation order.
    pub categories: Vec<Category>,
    /// Whether the remote was read.
    pub source: SnapshotSource,
    /// Set when there is nothing to show because the remote was unreadable.
    pub notice: Option<Notice>,
    /// The refresh attempt behind `source`.
    pub pull: PullOutcome,
}

impl Snapshot {
    /// Returns true if the snapshot holds no records.
    pub fn is_empty(&self) -> bool {
        self.expenses.is_empty() && self.categories.is_empty()
    }

    /// Expenses labelled `category`, ignoring case. An empty name or
    /// [`ALL_CATEGORIES`] selects every expense.
    pub fn expenses_in_category(&self, category: &str) -> Vec<&Expense> {
        let category = category.trim();
        if category.is_empty() || category.eq_ignore_ascii_case(ALL_CATEGORIES) {
            return self.expenses.iter().collect();
        }
        self.expenses
            .iter()
            .filter(|e| e.in_category(category))
            .collect()
    }

    /// Category labels used by expenses, first-seen spelling and order.
    pub fn distinct_categories(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        self.expenses
            .iter()
            .map(|e| e.category.trim())
            .filter(|label| !label.is_empty())
            .filter(|label| seen.insert(label.to_lowercase()))
            .map(str::to_string)
            .collect()
    }

    /// Spending per category, in category order.
    pub fn budget_usage(&self) -> Vec<BudgetUsage> {
        self.categories
            .iter()
            .map(|category| {
                let used: Decimal = self
                    .expenses
                    .iter()
                    .filter(|e| e.in_category(&category.name))
                    .map(|e| e.amount)
                    .sum();
                BudgetUsage {
                    category: category.name.clone(),
                    limit: category.budget_limit,
                    used,
                    remaining: category.budget_limit - used,
                }
            })
            .collect()
    }

    /// Sum of all expenses.
    pub fn total_spent(&self) -> Decimal {
        self.expenses.iter().map(|e| e.amount).sum()
    }
}

/// Serves [`Snapshot`]s.
pub struct ReadFacade<G, C> {
    reconciler: Arc<Reconciler<G, C>>,
}

impl<G: RemoteGateway, C: ConnectivityOracle> ReadFacade<G, C> {
    /// Creates a façade over `reconciler`.
    pub fn new(reconciler: Arc<Reconciler<G, C>>) -> Self {
        Self { reconciler }
    }

    /// Pulls when reachable, then returns what the store holds for `user`.
    ///
    /// # Errors
    ///
    /// Only store failures; gateway failures turn into a local fallback.
    pub async fn snapshot(&self, user: &UserId) -> EngineResult<Snapshot> {
        let pull = self.reconciler.pull(user).await?;
        let store = self.reconciler.store();
        let expenses = store.expenses_for_user(user);
        let categories = store.categories_for_user(user);

        let source = if pull.is_applied() {
            SnapshotSource::Remote
        } else {
            SnapshotSource::LocalFallback
        };
        let notice = (source == SnapshotSource::LocalFallback
            && expenses.is_empty()
            && categories.is_empty())
        .then_some(Notice::NoOfflineData);
        debug!(user = %user, source = ?source, expenses = expenses.len(), categories = categories.len(), "snapshot");

        Ok(Snapshot {
            user: user.clone(),
            expenses,
            categories,
            source,
            notice,
            pull,
        })
    }
}

impl<G, C> std::fmt::Debug for ReadFacade<G, C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReadFacade").finish_non_exhaustive()
    }
}
