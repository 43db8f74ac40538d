//! Compact command implementation.

use super::{format_size, is_json, open_existing, print_json, CommandResult};
use crate::Format;
use serde::Serialize;
use std::path::Path;
use tracing::info;

/// Compaction summary.
#[derive(Debug, Serialize)]
pub struct CompactResult {
    /// Whether the log was rewritten.
    pub compacted: bool,
    /// Frames before.
    pub frames_before: u64,
    /// Frames after, or expected after for a dry run.
    pub frames_after: u64,
    /// Bytes before.
    pub bytes_before: u64,
    /// Bytes after, or expected after for a dry run.
    pub bytes_after: u64,
}

/// Runs the compact command.
pub fn run(path: &Path, dry_run: bool, format: Format) -> CommandResult {
    let store = open_existing(path)?;
    let stats = store.stats();

    let result = if dry_run {
        CompactResult {
            compacted: false,
            frames_before: stats.frames,
            frames_after: (stats.expenses + stats.categories) as u64,
            bytes_before: stats.log_bytes,
            bytes_after: stats.live_bytes,
        }
    } else {
        info!(path = %path.display(), "compacting record log");
        let report = store.compact()?;
        info!(frames = report.frames_after, bytes = report.bytes_after, "compaction complete");
        CompactResult {
            compacted: true,
            frames_before: report.frames_before,
            frames_after: report.frames_after,
            bytes_before: report.bytes_before,
            bytes_after: report.bytes_after,
        }
    };

    if is_json(format) {
        return print_json(&result);
    }

    println!("Compacting record log at {}", path.display());
    if dry_run {
        println!("(dry run - no changes will be made)");
    }
    println!();
    println!("  Frames:      {} -> {}", result.frames_before, result.frames_after);
    println!(
        "  Size:        {} -> {}",
        format_size(result.bytes_before),
        format_size(result.bytes_after)
    );
    let saved = result.bytes_before.saturating_sub(result.bytes_after);
    println!(
        "  Space saved: {} ({:.1}%)",
        format_size(saved),
        if result.bytes_before > 0 {
            saved as f64 / result.bytes_before as f64 * 100.0
        } else {
            0.0
        }
    );
    if result.compacted {
        println!();
        println!("✓ Compaction complete");
    }
    Ok(())
}
