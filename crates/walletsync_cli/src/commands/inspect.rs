//! Inspect command implementation.

use super::{format_size, is_json, open_existing, print_json, CommandResult};
use crate::Format;
use serde::Serialize;
use std::path::Path;

/// Store inspection result.
#[derive(Debug, Serialize)]
pub struct InspectResult {
    /// Store path.
    pub path: String,
    /// Live expenses.
    pub expenses: usize,
    /// Live categories.
    pub categories: usize,
    /// Expenses awaiting push.
    pub pending_expenses: usize,
    /// Categories awaiting push.
    pub pending_categories: usize,
    /// Frames in the log.
    pub frames: u64,
    /// Log size in bytes.
    pub log_bytes: u64,
    /// Bytes compaction would reclaim.
    pub dead_bytes: u64,
    /// Torn bytes cut off while opening.
    pub truncated_bytes: u64,
    /// Per-user counts (if requested).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub users: Option<Vec<UserStats>>,
}

/// Counts for one user.
#[derive(Debug, Serialize)]
pub struct UserStats {
    /// User id.
    pub user: String,
    /// Expenses.
    pub expenses: usize,
    /// Categories.
    pub categories: usize,
    /// Records awaiting push.
    pub pending: usize,
}

/// Runs the inspect command.
pub fn run(path: &Path, show_users: bool, format: Format) -> CommandResult {
    let store = open_existing(path)?;
    let stats = store.stats();

    let users = show_users.then(|| {
        store
            .users()
            .into_iter()
            .map(|user| UserStats {
                expenses: store.expenses_for_user(&user).len(),
                categories: store.categories_for_user(&user).len(),
                pending: store.pending_expenses(&user).len()
                    + store.pending_categories(&user).len(),
                user: user.to_string(),
            })
            .collect()
    });

    let result = InspectResult {
        path: path.display().to_string(),
        expenses: stats.expenses,
        categories: stats.categories,
        pending_expenses: stats.pending_expenses,
        pending_categories: stats.pending_categories,
        frames: stats.frames,
        log_bytes: stats.log_bytes,
        dead_bytes: stats.dead_bytes(),
        truncated_bytes: store.recovery().truncated_bytes,
        users,
    };

    if is_json(format) {
        print_json(&result)
    } else {
        print_text_output(&result);
        Ok(())
    }
}

fn print_text_output(result: &InspectResult) {
    println!("WalletSync Store Inspection");
    println!("===========================");
    println!();
    println!("Path: {}", result.path);
    println!();
    println!("Records:");
    println!(
        "  Expenses:   {} ({} pending)",
        result.expenses, result.pending_expenses
    );
    println!(
        "  Categories: {} ({} pending)",
        result.categories, result.pending_categories
    );
    println!();
    println!("Log:");
    println!("  Frames:     {}", result.frames);
    println!("  Size:       {}", format_size(result.log_bytes));
    println!("  Reclaimable: {}", format_size(result.dead_bytes));
    if result.truncated_bytes > 0 {
        println!("  Torn tail cut off on open: {} bytes", result.truncated_bytes);
    }

    if let Some(users) = &result.users {
        println!();
        println!("Users:");
        for user in users {
            println!(
                "  {}: {} expenses, {} categories, {} pending",
                user.user, user.expenses, user.categories, user.pending
            );
        }
    }
}
