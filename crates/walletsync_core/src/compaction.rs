//! Record log compaction.
//!
//! The log grows by one frame per write, so replaced versions and deleted
//! records accumulate as dead bytes. Compaction rewrites the log with one put
//! frame per live record, in local-id order.
//!
//! ## Invariants
//!
//! - Compaction **MUST NOT** change logical state
//! - Local ids are never reused afterwards: if the highest id ever assigned
//!   belongs to a deleted record, its tombstone is kept as a high-water mark

use crate::frame::Frame;
use crate::types::LocalId;
use std::collections::HashMap;

/// Outcome of a compaction.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompactionReport {
    /// Frames in the log before compaction.
    pub frames_before: u64,
    /// Frames written by compaction.
    pub frames_after: u64,
    /// Log size before compaction.
    pub bytes_before: u64,
    /// Log size after compaction.
    pub bytes_after: u64,
}

impl CompactionReport {
    /// Bytes reclaimed.
    #[must_use]
    pub fn bytes_saved(&self) -> u64 {
        self.bytes_before.saturating_sub(self.bytes_after)
    }
}

/// A rewritten log ready to be installed.
#[derive(Debug, Default)]
pub(crate) struct CompactedLog {
    pub bytes: Vec<u8>,
    pub frames: u64,
    pub frame_sizes: HashMap<LocalId, u64>,
}

/// Encodes `live` frames followed by an optional high-water tombstone.
pub(crate) fn rewrite(live: impl IntoIterator<Item = Frame>, high_water: Option<Frame>) -> CompactedLog {
    let mut log = CompactedLog::default();
    for frame in live {
        let encoded = frame.encode();
        log.frame_sizes.insert(frame.local_id, encoded.len() as u64);
        log.bytes.extend_from_slice(&encoded);
        log.frames += 1;
    }
    if let Some(tombstone) = high_water {
        log.bytes.extend_from_slice(&tombstone.encode());
        log.frames += 1;
    }
    log
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::RecordKind;

    #[test]
    fn rewrite_tracks_live_sizes() {
        let a = Frame::put(RecordKind::Category, LocalId::new(1), &"Food").unwrap();
        let b = Frame::put(RecordKind::Expense, LocalId::new(4), &"Mart").unwrap();
        let expected = (a.encoded_size() + b.encoded_size()) as u64;

        let log = rewrite(vec![a, b], None);
        assert_eq!(log.frames, 2);
        assert_eq!(log.bytes.len() as u64, expected);
        assert_eq!(log.frame_sizes.values().sum::<u64>(), expected);
    }

    #[test]
    fn high_water_tombstone_is_appended_but_not_live() {
        let live = Frame::put(RecordKind::Category, LocalId::new(1), &"Food").unwrap();
        let tombstone = Frame::tombstone(RecordKind::Expense, LocalId::new(9));

        let log = rewrite(vec![live], Some(tombstone));
        assert_eq!(log.frames, 2);
        assert_eq!(log.frame_sizes.len(), 1);

        let (first, used) = Frame::decode(&log.bytes).unwrap();
        assert!(!first.is_tombstone());
        let (last, _) = Frame::decode(&log.bytes[used..]).unwrap();
        assert!(last.is_tombstone());
        assert_eq!(last.local_id, LocalId::new(9));
    }

    #[test]
    fn report_bytes_saved() {
        let report = CompactionReport {
            frames_before: 10,
            frames_after: 2,
            bytes_before: 1000,
            bytes_after: 200,
        };
        assert_eq!(report.bytes_saved(), 800);
    }
}
