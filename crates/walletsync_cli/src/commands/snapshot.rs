//! Snapshot command implementation.

use super::{block_on, connect, is_json, print_json, CommandResult, RemoteArgs};
use crate::Format;
use serde::Serialize;
use std::path::Path;
use walletsync_core::{Category, Decimal, Expense, UserId};
use walletsync_engine::{Notice, Snapshot, SnapshotSource};

/// Serializable view of a snapshot.
#[derive(Debug, Serialize)]
pub struct SnapshotView {
    /// User id.
    pub user: UserId,
    /// `remote` or `local`.
    pub source: &'static str,
    /// Set when nothing is stored and the remote could not be read.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notice: Option<&'static str>,
    /// Expenses shown.
    pub expenses: Vec<Expense>,
    /// Categories.
    pub categories: Vec<Category>,
    /// Sum of the expenses shown.
    pub total: Decimal,
    /// Spending per category.
    pub budgets: Vec<BudgetView>,
}

/// Spending against one category's budget.
#[derive(Debug, Serialize)]
pub struct BudgetView {
    /// Category name.
    pub category: String,
    /// Budget limit.
    pub limit: Decimal,
    /// Amount spent.
    pub used: Decimal,
    /// Whether spending exceeds the limit.
    pub over_budget: bool,
}

impl SnapshotView {
    fn new(snapshot: &Snapshot, category: Option<&str>) -> Self {
        let expenses: Vec<Expense> = snapshot
            .expenses_in_category(category.unwrap_or_default())
            .into_iter()
            .cloned()
            .collect();
        Self {
            user: snapshot.user.clone(),
            source: match snapshot.source {
                SnapshotSource::Remote => "remote",
                SnapshotSource::LocalFallback => "local",
            },
            notice: snapshot.notice.map(|Notice::NoOfflineData| "no offline data"),
            total: expenses.iter().map(|e| e.amount).sum(),
            expenses,
            categories: snapshot.categories.clone(),
            budgets: snapshot
                .budget_usage()
                .into_iter()
                .map(|usage| BudgetView {
                    over_budget: usage.is_over_budget(),
                    category: usage.category,
                    limit: usage.limit,
                    used: usage.used,
                })
                .collect(),
        }
    }
}

/// Runs the snapshot command.
pub fn run(
    path: &Path,
    remote: &RemoteArgs,
    user: &str,
    category: Option<&str>,
    offline: bool,
    format: Format,
) -> CommandResult {
    let user = UserId::new(user);
    let snapshot = block_on(async {
        let engine = connect(path, remote, offline).await?;
        Ok::<_, Box<dyn std::error::Error>>(engine.snapshot(&user).await?)
    })??;
    let view = SnapshotView::new(&snapshot, category);

    if is_json(format) {
        return print_json(&view);
    }

    println!("{} ({} data)", view.user, view.source);
    if view.notice.is_some() {
        println!("No offline data available. Connect to the internet to load your records.");
        return Ok(());
    }
    println!();
    println!("Expenses:");
    for expense in &view.expenses {
        let marker = if expense.is_pending() { "*" } else { " " };
        println!(
            " {}#{:<5} {}  {:<20} {:<14} {:>10}",
            marker,
            expense.local_id.as_u64(),
            expense.date,
            expense.store_name,
            expense.category,
            expense.amount
        );
    }
    println!("  Total: {}", view.total);
    if !view.budgets.is_empty() {
        println!();
        println!("Budgets:");
        for budget in &view.budgets {
            println!(
                "  {:<14} {:>10} / {:<10}{}",
                budget.category,
                budget.used,
                budget.limit,
                if budget.over_budget { "  OVER" } else { "" }
            );
        }
    }
    Ok(())
}
