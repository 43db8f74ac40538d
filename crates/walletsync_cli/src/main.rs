//! WalletSync CLI
//!
//! Command-line tools for WalletSync record stores.
//!
//! # Commands
//!
//! - `inspect` - Display store statistics
//! - `verify` - Check every frame of the record log
//! - `compact` - Rewrite the log with only live records
//! - `pending` - List records awaiting push
//! - `add-expense`, `add-category`, `delete-expense` - Edit records offline-first
//! - `snapshot` - Show a user's records, refreshed from the remote when reachable
//! - `sync` - Run a reconciliation against the remote API

mod commands;

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// WalletSync command-line tools.
#[derive(Parser)]
#[command(name = "walletsync")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the store directory
    #[arg(global = true, short, long)]
    path: Option<PathBuf>,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    /// Output format
    #[arg(global = true, short, long, value_enum, default_value_t = Format::Text)]
    format: Format,

    /// Base URL of the remote API
    #[arg(global = true, long, default_value = "http://localhost:5000/api")]
    base_url: String,

    /// Request timeout in seconds
    #[arg(global = true, long, default_value_t = 15)]
    timeout_secs: u64,

    #[command(subcommand)]
    command: Commands,
}

/// How results are printed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Format {
    /// Human-readable text
    Text,
    /// Pretty-printed JSON
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Display store statistics
    Inspect {
        /// Show per-user counts
        #[arg(short, long)]
        users: bool,
    },

    /// Check every frame of the record log without modifying it
    Verify,

    /// Rewrite the record log with only live records
    Compact {
        /// Show what would be reclaimed without rewriting
        #[arg(short, long)]
        dry_run: bool,
    },

    /// List records awaiting push
    Pending {
        /// Only this user
        #[arg(short, long)]
        user: Option<String>,
    },

    /// Record an expense locally, then sync
    AddExpense {
        /// Owning user
        #[arg(short, long)]
        user: String,
        /// Merchant name
        #[arg(long)]
        store: String,
        /// Amount, e.g. 12.50
        #[arg(long)]
        amount: String,
        /// Category label
        #[arg(long)]
        category: String,
        /// Receipt image URL
        #[arg(long)]
        image_url: Option<String>,
    },

    /// Record a category locally, then sync
    AddCategory {
        /// Owning user
        #[arg(short, long)]
        user: String,
        /// Category name
        #[arg(long)]
        name: String,
        /// Budget limit, e.g. 300
        #[arg(long)]
        budget: String,
    },

    /// Delete an expense and, when it was the last one, its category
    DeleteExpense {
        /// Owning user
        #[arg(short, long)]
        user: String,
        /// Local id of the expense
        #[arg(long)]
        id: u64,
    },

    /// Show a user's records
    Snapshot {
        /// Owning user
        #[arg(short, long)]
        user: String,
        /// Only expenses in this category
        #[arg(short, long)]
        category: Option<String>,
        /// Skip the remote and show local data only
        #[arg(long)]
        offline: bool,
    },

    /// Run a reconciliation against the remote API
    Sync {
        /// Only this user; every user in the store otherwise
        #[arg(short, long)]
        user: Option<String>,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let remote = commands::RemoteArgs {
        base_url: cli.base_url,
        timeout: std::time::Duration::from_secs(cli.timeout_secs.max(1)),
    };
    let format = cli.format;

    match cli.command {
        Commands::Inspect { users } => {
            let path = cli.path.ok_or("Store path required for inspect")?;
            commands::inspect::run(&path, users, format)?;
        }
        Commands::Verify => {
            let path = cli.path.ok_or("Store path required for verify")?;
            commands::verify::run(&path, format)?;
        }
        Commands::Compact { dry_run } => {
            let path = cli.path.ok_or("Store path required for compact")?;
            commands::compact::run(&path, dry_run, format)?;
        }
        Commands::Pending { user } => {
            let path = cli.path.ok_or("Store path required for pending")?;
            commands::pending::run(&path, user.as_deref(), format)?;
        }
        Commands::AddExpense {
            user,
            store,
            amount,
            category,
            image_url,
        } => {
            let path = cli.path.ok_or("Store path required for add-expense")?;
            let input = commands::records::ExpenseInput {
                user,
                store,
                amount,
                category,
                image_url,
            };
            commands::records::add_expense(&path, &remote, input, format)?;
        }
        Commands::AddCategory { user, name, budget } => {
            let path = cli.path.ok_or("Store path required for add-category")?;
            commands::records::add_category(&path, &remote, &user, &name, &budget, format)?;
        }
        Commands::DeleteExpense { user, id } => {
            let path = cli.path.ok_or("Store path required for delete-expense")?;
            commands::records::delete_expense(&path, &remote, &user, id, format)?;
        }
        Commands::Snapshot {
            user,
            category,
            offline,
        } => {
            let path = cli.path.ok_or("Store path required for snapshot")?;
            commands::snapshot::run(&path, &remote, &user, category.as_deref(), offline, format)?;
        }
        Commands::Sync { user } => {
            let path = cli.path.ok_or("Store path required for sync")?;
            commands::sync::run(&path, &remote, user.as_deref(), format)?;
        }
    }

    Ok(())
}
