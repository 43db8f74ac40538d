//! Pending command implementation.

use super::{is_json, open_existing, print_json, CommandResult};
use crate::Format;
use serde::Serialize;
use std::path::Path;
use walletsync_core::{Category, Expense, UserId};

/// Records of one user awaiting push.
#[derive(Debug, Serialize)]
pub struct PendingRecords {
    /// User id.
    pub user: UserId,
    /// Pending expenses.
    pub expenses: Vec<Expense>,
    /// Pending categories.
    pub categories: Vec<Category>,
}

/// Runs the pending command.
pub fn run(path: &Path, user: Option<&str>, format: Format) -> CommandResult {
    let store = open_existing(path)?;
    let users = match user {
        Some(user) => vec![UserId::new(user)],
        None => store.users(),
    };

    let pending: Vec<PendingRecords> = users
        .into_iter()
        .map(|user| PendingRecords {
            expenses: store.pending_expenses(&user),
            categories: store.pending_categories(&user),
            user,
        })
        .filter(|p| !p.expenses.is_empty() || !p.categories.is_empty())
        .collect();

    if is_json(format) {
        return print_json(&pending);
    }

    if pending.is_empty() {
        println!("Nothing pending");
        return Ok(());
    }
    for records in &pending {
        println!("{}:", records.user);
        for category in &records.categories {
            println!(
                "  category #{} {} (budget {}, remote {}, {} attempts)",
                category.local_id,
                category.name,
                category.budget_limit,
                category.remote_id,
                category.push_attempts
            );
        }
        for expense in &records.expenses {
            println!(
                "  expense  #{} {} {} [{}] {} (remote {}, {} attempts)",
                expense.local_id,
                expense.date,
                expense.store_name,
                expense.category,
                expense.amount,
                expense.remote_id,
                expense.push_attempts
            );
        }
    }
    Ok(())
}
