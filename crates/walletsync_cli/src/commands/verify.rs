//! Verify command implementation.
//!
//! Walks the record log frame by frame without opening the store, so a
//! damaged log is reported rather than repaired.

use super::{is_json, print_json, CommandResult};
use crate::Format;
use serde::Serialize;
use std::path::Path;
use walletsync_core::{Category, Expense, Frame, FrameError, RecordKind};
use walletsync_storage::{FileBackend, StorageBackend};

/// Verification result.
#[derive(Debug, Default, Serialize)]
pub struct VerifyResult {
    /// Frames that decoded cleanly.
    pub frames: usize,
    /// Expense puts.
    pub expense_frames: usize,
    /// Category puts.
    pub category_frames: usize,
    /// Tombstones.
    pub tombstones: usize,
    /// Bytes of an incomplete final frame; the store cuts these off on open.
    pub torn_tail_bytes: usize,
    /// Problems found.
    pub errors: Vec<String>,
}

impl VerifyResult {
    fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Runs the verify command.
pub fn run(path: &Path, format: Format) -> CommandResult {
    let log_path = path.join("records.log");
    if !log_path.exists() {
        return Err(format!("No record log found at {}", log_path.display()).into());
    }
    let backend = FileBackend::open(&log_path)?;
    let result = verify_log(&backend.read_all()?);

    if is_json(format) {
        print_json(&result)?;
    } else {
        println!("Verifying record log at {}", log_path.display());
        println!();
        println!("  Frames:     {}", result.frames);
        println!("  Expenses:   {}", result.expense_frames);
        println!("  Categories: {}", result.category_frames);
        println!("  Tombstones: {}", result.tombstones);
        if result.torn_tail_bytes > 0 {
            println!("  Torn tail:  {} bytes (cut off on next open)", result.torn_tail_bytes);
        }
        for error in &result.errors {
            println!("  ERROR: {}", error);
        }
        println!();
    }

    if result.is_ok() {
        if !is_json(format) {
            println!("✓ Record log verification passed");
        }
        Ok(())
    } else {
        if !is_json(format) {
            println!("✗ Record log verification failed");
        }
        Err("Verification failed".into())
    }
}

/// Checks every frame in `data`.
pub fn verify_log(data: &[u8]) -> VerifyResult {
    let mut result = VerifyResult::default();
    let mut offset = 0usize;

    while offset < data.len() {
        match Frame::decode(&data[offset..]) {
            Ok((frame, used)) => {
                check_frame(&frame, offset, &mut result);
                result.frames += 1;
                offset += used;
            }
            Err(FrameError::Incomplete) => {
                result.torn_tail_bytes = data.len() - offset;
                break;
            }
            // A final frame with a bad checksum is a torn write, not damage.
            Err(FrameError::Checksum { .. }) if declared_end(data, offset) == Some(data.len()) => {
                result.torn_tail_bytes = data.len() - offset;
                break;
            }
            Err(err) => {
                result
                    .errors
                    .push(format!("offset {}: undecodable frame ({:?})", offset, err));
                break;
            }
        }
    }
    result
}

fn declared_end(data: &[u8], offset: usize) -> Option<usize> {
    let len = data.get(offset..offset + 4)?;
    let len = u32::from_le_bytes([len[0], len[1], len[2], len[3]]) as usize;
    Some(offset + len)
}

fn check_frame(frame: &Frame, offset: usize, result: &mut VerifyResult) {
    if frame.is_tombstone() {
        result.tombstones += 1;
        return;
    }
    let checked = match frame.kind {
        RecordKind::Expense => {
            result.expense_frames += 1;
            frame.record::<Expense>().and_then(|e| e.validate())
        }
        RecordKind::Category => {
            result.category_frames += 1;
            frame.record::<Category>().and_then(|c| c.validate())
        }
    };
    if let Err(err) = checked {
        result.errors.push(format!(
            "offset {}: {} {}: {}",
            offset, frame.kind, frame.local_id, err
        ));
    }
}
