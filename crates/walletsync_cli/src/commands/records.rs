//! Record editing commands.
//!
//! Each command writes locally first; the sync it triggers is awaited before
//! the process exits.

use super::{block_on, connect, is_json, print_json, CommandResult, RemoteArgs};
use crate::Format;
use std::path::Path;
use std::str::FromStr;
use walletsync_core::{Decimal, LocalId, NewCategory, NewExpense, UserId};

/// Arguments of `add-expense`.
#[derive(Debug, Clone)]
pub struct ExpenseInput {
    /// Owning user.
    pub user: String,
    /// Merchant name.
    pub store: String,
    /// Amount as typed.
    pub amount: String,
    /// Category label.
    pub category: String,
    /// Receipt image URL.
    pub image_url: Option<String>,
}

fn parse_amount(field: &str, text: &str) -> CommandResult<Decimal> {
    Decimal::from_str(text.trim()).map_err(|e| format!("Invalid {}: {} ({})", field, text, e).into())
}

/// Runs `add-expense`.
pub fn add_expense(
    path: &Path,
    remote: &RemoteArgs,
    input: ExpenseInput,
    format: Format,
) -> CommandResult {
    let amount = parse_amount("amount", &input.amount)?;
    let user = UserId::new(input.user);
    let mut new = NewExpense::new(user.clone(), input.store, amount, input.category);
    if let Some(url) = input.image_url {
        new = new.with_image(url);
    }

    block_on(async {
        let engine = connect(path, remote, false).await?;
        let expense = engine.create_expense(new).await?;
        engine.wait_idle(&user).await;
        let stored = engine.store().get_expense(expense.local_id).unwrap_or(expense);
        if is_json(format) {
            print_json(&stored)
        } else {
            println!(
                "Expense #{} recorded ({})",
                stored.local_id, stored.sync_state
            );
            Ok(())
        }
    })?
}

/// Runs `add-category`.
pub fn add_category(
    path: &Path,
    remote: &RemoteArgs,
    user: &str,
    name: &str,
    budget: &str,
    format: Format,
) -> CommandResult {
    let budget = parse_amount("budget", budget)?;
    let user = UserId::new(user);
    let new = NewCategory::new(user.clone(), name, budget);

    block_on(async {
        let engine = connect(path, remote, false).await?;
        let category = engine.create_category(new).await?;
        engine.wait_idle(&user).await;
        let stored = engine
            .store()
            .get_category(category.local_id)
            .unwrap_or(category);
        if is_json(format) {
            print_json(&stored)
        } else {
            println!(
                "Category #{} '{}' recorded ({})",
                stored.local_id, stored.name, stored.sync_state
            );
            Ok(())
        }
    })?
}

/// Runs `delete-expense`.
pub fn delete_expense(
    path: &Path,
    remote: &RemoteArgs,
    user: &str,
    id: u64,
    format: Format,
) -> CommandResult {
    let user = UserId::new(user);
    block_on(async {
        let engine = connect(path, remote, false).await?;
        let report = engine.delete_expense(&user, LocalId::new(id)).await?;
        engine.wait_idle(&user).await;
        if is_json(format) {
            print_json(&serde_json::json!({
                "deleted": report.expense,
                "remote": format!("{:?}", report.remote),
                "cascade": format!("{:?}", report.cascade),
            }))
        } else {
            println!("Expense #{} deleted", report.expense.local_id);
            println!("  Remote:   {:?}", report.remote);
            println!("  Category: {:?}", report.cascade);
            Ok(())
        }
    })?
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn amounts_parse_exactly() {
        assert_eq!(parse_amount("amount", "12.50").unwrap(), Decimal::new(1250, 2));
        assert_eq!(parse_amount("amount", " 3 ").unwrap(), Decimal::new(3, 0));
        assert!(parse_amount("amount", "twelve").is_err());
    }
}
