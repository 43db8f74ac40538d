//! Record store benchmarks.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use tempfile::TempDir;
use walletsync_core::{Expense, RecordStore, RemoteId, StoreConfig, SyncState};
use walletsync_testkit::{populate, sample_expense, sample_user};

/// Benchmark single expense inserts.
fn bench_insert(c: &mut Criterion) {
    let mut group = c.benchmark_group("insert_expense");
    group.throughput(Throughput::Elements(1));

    group.bench_function("memory", |b| {
        let store = RecordStore::open_in_memory().unwrap();
        let user = sample_user();
        let mut n = 0u32;
        b.iter(|| {
            n = n.wrapping_add(1);
            black_box(store.insert_expense(sample_expense(&user, n)).unwrap());
        });
    });

    group.bench_function("file_no_sync", |b| {
        let dir = TempDir::new().unwrap();
        let store =
            RecordStore::open(dir.path(), StoreConfig::default().sync_on_write(false)).unwrap();
        let user = sample_user();
        let mut n = 0u32;
        b.iter(|| {
            n = n.wrapping_add(1);
            black_box(store.insert_expense(sample_expense(&user, n)).unwrap());
        });
    });

    group.finish();
}

/// Benchmark marking a record synced, the store write every push makes.
fn bench_settle(c: &mut Criterion) {
    c.bench_function("replace_expense", |b| {
        let store = RecordStore::open_in_memory().unwrap();
        let expense = store.insert_expense(sample_expense(&sample_user(), 0)).unwrap();
        let mut synced = false;
        b.iter(|| {
            synced = !synced;
            let next = Expense {
                sync_state: if synced { SyncState::Synced } else { SyncState::Pending },
                remote_id: RemoteId::new("r-1"),
                ..expense.clone()
            };
            black_box(store.replace_expense(next).unwrap());
        });
    });
}

/// Benchmark opening a store, which replays the whole log.
fn bench_replay(c: &mut Criterion) {
    let mut group = c.benchmark_group("replay");

    for count in [100u32, 1_000, 10_000] {
        let dir = TempDir::new().unwrap();
        {
            let store =
                RecordStore::open(dir.path(), StoreConfig::default().sync_on_write(false)).unwrap();
            populate(&store, &sample_user(), count);
            store.flush().unwrap();
        }

        group.throughput(Throughput::Elements(u64::from(count)));
        group.bench_with_input(BenchmarkId::from_parameter(count), &count, |b, _| {
            b.iter(|| {
                let store = RecordStore::open(dir.path(), StoreConfig::default()).unwrap();
                black_box(store.stats());
            });
        });
    }
    group.finish();
}

/// Benchmark compaction of a log where every record was rewritten once.
fn bench_compact(c: &mut Criterion) {
    c.bench_function("compact_1000", |b| {
        b.iter_with_setup(
            || {
                let store = RecordStore::open_in_memory().unwrap();
                let scenario = populate(&store, &sample_user(), 1_000);
                for expense in scenario.expenses {
                    store
                        .replace_expense(Expense {
                            push_attempts: 1,
                            ..expense
                        })
                        .unwrap();
                }
                store
            },
            |store| black_box(store.compact().unwrap()),
        );
    });
}

criterion_group!(benches, bench_insert, bench_settle, bench_replay, bench_compact);
criterion_main!(benches);
