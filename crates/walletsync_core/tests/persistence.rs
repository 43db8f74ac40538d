//! On-disk behaviour of the record store: replay, torn tails, locking.

use proptest::prelude::*;
use std::fs::{self, OpenOptions};
use std::io::Write;
use tempfile::tempdir;
use walletsync_core::{
    Decimal, Frame, NewCategory, NewExpense, RecordKind, RecordStore, RemoteId, StoreConfig,
    StoreError, SyncState, Timestamp, UserId,
};

fn user() -> UserId {
    UserId::new("uid-disk")
}

fn expense(store_name: &str, cents: i64) -> NewExpense {
    NewExpense::new(user(), store_name, Decimal::new(cents, 2), "Food")
        .at(Timestamp::parse("2024-07-04T10:00:00.000Z").unwrap())
}

#[test]
fn records_survive_reopen() {
    let dir = tempdir().unwrap();
    let (kept, synced_id) = {
        let store = RecordStore::open(dir.path(), StoreConfig::default()).unwrap();
        let kept = store.insert_expense(expense("Bakery", 350)).unwrap();
        let mut other = store.insert_expense(expense("Butcher", 1999)).unwrap();
        other.sync_state = SyncState::Synced;
        other.remote_id = RemoteId::new("doc-42");
        store.replace_expense(other.clone()).unwrap();
        store
            .insert_category(NewCategory::new(user(), "Food", Decimal::new(250, 0)))
            .unwrap();
        (kept, other.local_id)
    };

    let store = RecordStore::open(dir.path(), StoreConfig::default()).unwrap();
    assert_eq!(store.recovery().truncated_bytes, 0);
    assert_eq!(store.get_expense(kept.local_id).unwrap(), kept);
    let synced = store.get_expense(synced_id).unwrap();
    assert_eq!(synced.remote_id, RemoteId::new("doc-42"));
    assert_eq!(synced.sync_state, SyncState::Synced);
    assert_eq!(store.pending_expenses(&user()).len(), 1);
    assert_eq!(store.categories_for_user(&user()).len(), 1);
}

#[test]
fn deleted_ids_are_not_reused_after_reopen() {
    let dir = tempdir().unwrap();
    let deleted = {
        let store = RecordStore::open(dir.path(), StoreConfig::default()).unwrap();
        store.insert_expense(expense("A", 100)).unwrap();
        let last = store.insert_expense(expense("B", 200)).unwrap();
        store.delete_expense(last.local_id).unwrap();
        store.compact().unwrap();
        last.local_id
    };

    let store = RecordStore::open(dir.path(), StoreConfig::default()).unwrap();
    assert!(store.get_expense(deleted).is_none());
    let fresh = store.insert_expense(expense("C", 300)).unwrap();
    assert!(fresh.local_id > deleted);
}

#[test]
fn torn_tail_is_truncated() {
    let dir = tempdir().unwrap();
    let log = dir.path().join("records.log");
    let good_len = {
        let store = RecordStore::open(dir.path(), StoreConfig::default()).unwrap();
        store.insert_expense(expense("Kiosk", 120)).unwrap();
        fs::metadata(&log).unwrap().len()
    };

    // Half of a frame, as left by a crash mid-append.
    let torn = Frame::put(RecordKind::Expense, walletsync_core::LocalId::new(2), &"partial")
        .unwrap()
        .encode();
    let mut file = OpenOptions::new().append(true).open(&log).unwrap();
    file.write_all(&torn[..torn.len() / 2]).unwrap();
    drop(file);

    let store = RecordStore::open(dir.path(), StoreConfig::default()).unwrap();
    assert_eq!(store.recovery().truncated_bytes, (torn.len() / 2) as u64);
    assert_eq!(store.expenses_for_user(&user()).len(), 1);
    assert_eq!(fs::metadata(&log).unwrap().len(), good_len);

    // New writes land after the last good frame.
    store.insert_expense(expense("Kiosk", 130)).unwrap();
    drop(store);
    let store = RecordStore::open(dir.path(), StoreConfig::default()).unwrap();
    assert_eq!(store.expenses_for_user(&user()).len(), 2);
}

#[test]
fn checksum_failure_on_final_frame_is_treated_as_torn() {
    let dir = tempdir().unwrap();
    let log = dir.path().join("records.log");
    {
        let store = RecordStore::open(dir.path(), StoreConfig::default()).unwrap();
        store.insert_expense(expense("First", 100)).unwrap();
        store.insert_expense(expense("Second", 200)).unwrap();
    }
    let mut bytes = fs::read(&log).unwrap();
    let last = bytes.len() - 6;
    bytes[last] ^= 0xFF;
    fs::write(&log, &bytes).unwrap();

    let store = RecordStore::open(dir.path(), StoreConfig::default()).unwrap();
    let names: Vec<_> = store
        .expenses_for_user(&user())
        .into_iter()
        .map(|e| e.store_name)
        .collect();
    assert_eq!(names, vec!["First".to_string()]);
}

#[test]
fn mid_log_damage_is_an_error() {
    let dir = tempdir().unwrap();
    let log = dir.path().join("records.log");
    {
        let store = RecordStore::open(dir.path(), StoreConfig::default()).unwrap();
        store.insert_expense(expense("First", 100)).unwrap();
        store.insert_expense(expense("Second", 200)).unwrap();
    }
    let mut bytes = fs::read(&log).unwrap();
    bytes[Frame::HEADER_SIZE + 2] ^= 0xFF;
    fs::write(&log, &bytes).unwrap();

    let result = RecordStore::open(dir.path(), StoreConfig::default());
    assert!(matches!(
        result,
        Err(StoreError::ChecksumMismatch { offset: 0, .. })
    ));
}

#[test]
fn second_handle_is_locked_out() {
    let dir = tempdir().unwrap();
    let _store = RecordStore::open(dir.path(), StoreConfig::default()).unwrap();
    assert!(matches!(
        RecordStore::open(dir.path(), StoreConfig::default()),
        Err(StoreError::StoreLocked)
    ));
}

#[test]
fn missing_store_without_create_fails() {
    let dir = tempdir().unwrap();
    let result = RecordStore::open(
        &dir.path().join("nope"),
        StoreConfig::default().create_if_missing(false),
    );
    assert!(matches!(result, Err(StoreError::InvalidFormat(_))));
}

#[test]
fn compaction_on_disk_keeps_state_and_shrinks_log() {
    let dir = tempdir().unwrap();
    let log = dir.path().join("records.log");
    let store = RecordStore::open(dir.path(), StoreConfig::default()).unwrap();
    let mut row = store.insert_expense(expense("Cafe", 400)).unwrap();
    for attempt in 1..20 {
        row.push_attempts = attempt;
        row = store.replace_expense(row).unwrap();
    }
    let before = fs::metadata(&log).unwrap().len();

    let report = store.compact().unwrap();
    assert_eq!(report.bytes_before, before);
    assert_eq!(fs::metadata(&log).unwrap().len(), report.bytes_after);
    assert!(report.bytes_after < before);
    assert!(!dir.path().join("records.log.compact").exists());

    // Writes after compaction go to the installed log.
    store.insert_expense(expense("Cafe", 500)).unwrap();
    drop(store);

    let store = RecordStore::open(dir.path(), StoreConfig::default()).unwrap();
    let rows = store.expenses_for_user(&user());
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].push_attempts, 19);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn replay_reproduces_live_state(ops in prop::collection::vec((0u8..3, 0i64..6), 1..40)) {
        let dir = tempdir().unwrap();
        let expected = {
            let store = RecordStore::open(dir.path(), StoreConfig::default().sync_on_write(false)).unwrap();
            for (op, n) in &ops {
                let candidate = expense(&format!("shop-{n}"), 100 + n);
                match op {
                    0 => { store.insert_expense(candidate).unwrap(); }
                    1 => {
                        let key = store.find_expense_by_natural_key(
                            &store.insert_expense(candidate).unwrap().natural_key(),
                        );
                        prop_assert!(key.is_some());
                    }
                    _ => {
                        let rows = store.expenses_for_user(&user());
                        if let Some(row) = rows.get(*n as usize % rows.len().max(1)) {
                            store.delete_expense(row.local_id).unwrap();
                        }
                    }
                }
            }
            store.expenses_for_user(&user())
        };

        let store = RecordStore::open(dir.path(), StoreConfig::default()).unwrap();
        prop_assert_eq!(store.expenses_for_user(&user()), expected);
    }

    #[test]
    fn inserting_the_same_natural_key_is_idempotent(repeats in 1usize..8, cents in 0i64..100_000) {
        let store = RecordStore::open_in_memory().unwrap();
        let mut ids = Vec::new();
        for _ in 0..repeats {
            ids.push(store.insert_expense(expense("Repeat", cents)).unwrap().local_id);
        }
        ids.dedup();
        prop_assert_eq!(ids.len(), 1);
        prop_assert_eq!(store.expenses_for_user(&user()).len(), 1);
    }
}
