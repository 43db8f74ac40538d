//! Sync command implementation.

use super::{block_on, connect, is_json, print_json, CommandResult, RemoteArgs};
use crate::Format;
use serde::Serialize;
use std::path::Path;
use tracing::info;
use walletsync_core::UserId;
use walletsync_engine::{PullOutcome, RunReport};

/// Serializable summary of one run.
#[derive(Debug, Serialize)]
pub struct RunSummary {
    /// User id.
    pub user: UserId,
    /// Records created remotely.
    pub created: usize,
    /// Records updated remotely.
    pub updated: usize,
    /// Records matched to an earlier push.
    pub adopted: usize,
    /// Records left pending.
    pub failed: usize,
    /// `applied`, `offline` or `failed`.
    pub pull: &'static str,
    /// Local rows written by the pull.
    pub pulled: usize,
    /// Errors met during the run.
    pub errors: Vec<String>,
}

impl RunSummary {
    fn new(user: UserId, report: &RunReport) -> Self {
        let mut errors: Vec<String> = report
            .push
            .failures
            .iter()
            .map(|f| format!("{} {}: {}", f.kind, f.local_id, f.error))
            .collect();
        let (pull, pulled) = match &report.pull {
            PullOutcome::Applied(pull) => ("applied", pull.applied()),
            PullOutcome::Offline => ("offline", 0),
            PullOutcome::Failed(error) => {
                errors.push(format!("pull: {}", error));
                ("failed", 0)
            }
        };
        Self {
            user,
            created: report.push.created,
            updated: report.push.updated,
            adopted: report.push.adopted,
            failed: report.push.failed(),
            pull,
            pulled,
            errors,
        }
    }
}

/// Runs the sync command.
pub fn run(path: &Path, remote: &RemoteArgs, user: Option<&str>, format: Format) -> CommandResult {
    let summaries = block_on(async {
        let engine = connect(path, remote, false).await?;
        let users = match user {
            Some(user) => vec![UserId::new(user)],
            None => engine.store().users(),
        };
        let mut summaries = Vec::with_capacity(users.len());
        for user in users {
            info!(user = %user, "reconciling");
            let report = engine.sync_now(&user).await?;
            summaries.push(RunSummary::new(user, &report));
        }
        Ok::<_, Box<dyn std::error::Error>>(summaries)
    })??;

    if is_json(format) {
        return print_json(&summaries);
    }

    if summaries.is_empty() {
        println!("No users in store");
    }
    for summary in &summaries {
        println!(
            "{}: {} created, {} updated, {} adopted, {} failed; pull {} ({} rows)",
            summary.user,
            summary.created,
            summary.updated,
            summary.adopted,
            summary.failed,
            summary.pull,
            summary.pulled
        );
        for error in &summary.errors {
            println!("  ERROR: {}", error);
        }
    }
    Ok(())
}
