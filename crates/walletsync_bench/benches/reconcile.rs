//! Reconciliation benchmarks against the in-memory remote.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::sync::Arc;
use walletsync_core::RecordStore;
use walletsync_engine::{CancelToken, ManualConnectivity, MockGateway, Reconciler};
use walletsync_testkit::{populate, sample_user};

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
}

/// Benchmark a first run that pushes every record.
fn bench_initial_push(c: &mut Criterion) {
    let mut group = c.benchmark_group("initial_push");
    let rt = runtime();

    for count in [10u32, 100, 1_000] {
        group.throughput(Throughput::Elements(u64::from(count)));
        group.bench_with_input(BenchmarkId::from_parameter(count), &count, |b, &count| {
            b.iter_with_setup(
                || {
                    let store = Arc::new(RecordStore::open_in_memory().unwrap());
                    populate(&store, &sample_user(), count);
                    Reconciler::new(
                        store,
                        Arc::new(MockGateway::new()),
                        Arc::new(ManualConnectivity::new(true)),
                    )
                },
                |reconciler| {
                    let report = rt
                        .block_on(reconciler.run(&sample_user(), &CancelToken::new()))
                        .unwrap();
                    black_box(report);
                },
            );
        });
    }
    group.finish();
}

/// Benchmark a steady-state run: nothing pending, full listing compared.
fn bench_steady_pull(c: &mut Criterion) {
    let mut group = c.benchmark_group("steady_run");
    let rt = runtime();

    for count in [100u32, 1_000] {
        let store = Arc::new(RecordStore::open_in_memory().unwrap());
        populate(&store, &sample_user(), count);
        let reconciler = Reconciler::new(
            store,
            Arc::new(MockGateway::new()),
            Arc::new(ManualConnectivity::new(true)),
        );
        rt.block_on(reconciler.run(&sample_user(), &CancelToken::new()))
            .unwrap();

        group.throughput(Throughput::Elements(u64::from(count)));
        group.bench_with_input(BenchmarkId::from_parameter(count), &count, |b, _| {
            b.iter(|| {
                let report = rt
                    .block_on(reconciler.run(&sample_user(), &CancelToken::new()))
                    .unwrap();
                black_box(report);
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_initial_push, bench_steady_pull);
criterion_main!(benches);
