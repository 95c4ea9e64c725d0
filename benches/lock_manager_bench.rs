// Lock manager performance benchmarks: transaction begin/commit overhead,
// per-mode table lock acquisition cost, and throughput under concurrent
// uncontended access from multiple threads.

use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

use rusty_db_lock_manager::common::Rid;
use rusty_db_lock_manager::transaction::{LockDataId, LockManagement, LockMode, TransactionManager};

fn bench_transaction_lifecycle(c: &mut Criterion) {
    let manager = TransactionManager::new();

    c.bench_function("begin_commit", |b| {
        b.iter(|| {
            let txn = manager.begin();
            manager.commit(txn.id()).ok();
            black_box(txn.id());
        });
    });
}

fn bench_table_lock_acquisition(c: &mut Criterion) {
    let mut group = c.benchmark_group("table_lock_acquisition");

    let modes = [
        ("IS", LockMode::IntentionShared),
        ("IX", LockMode::IntentionExclusive),
        ("S", LockMode::Shared),
        ("X", LockMode::Exclusive),
    ];

    for (name, mode) in modes {
        group.bench_with_input(BenchmarkId::from_parameter(name), &mode, |b, &mode| {
            let manager = Arc::new(TransactionManager::new());
            let lock_manager = manager.lock_manager();
            let resource = LockDataId::table(1);

            b.iter(|| {
                let txn = manager.begin();
                match mode {
                    LockMode::IntentionShared => lock_manager.lock_is_table(&txn, resource).ok(),
                    LockMode::IntentionExclusive => lock_manager.lock_ix_table(&txn, resource).ok(),
                    LockMode::Shared => lock_manager.lock_shared_table(&txn, resource).ok(),
                    LockMode::Exclusive => lock_manager.lock_exclusive_table(&txn, resource).ok(),
                    LockMode::SharedIntentionExclusive | LockMode::Gap => unreachable!(),
                };
                manager.commit(txn.id()).ok();
                black_box(txn.id());
            });
        });
    }

    group.finish();
}

fn bench_concurrent_uncontended_record_locks(c: &mut Criterion) {
    let mut group = c.benchmark_group("concurrent_uncontended_record_locks");

    for num_threads in [1usize, 2, 4, 8] {
        group.bench_with_input(BenchmarkId::from_parameter(num_threads), &num_threads, |b, &num_threads| {
            let manager = Arc::new(TransactionManager::new());

            b.iter(|| {
                let handles: Vec<_> = (0..num_threads)
                    .map(|i| {
                        let mgr = Arc::clone(&manager);
                        std::thread::spawn(move || {
                            for slot in 0..10 {
                                let txn = mgr.begin();
                                let resource = LockDataId::record(1, Rid::new(i as i32, slot));
                                mgr.lock_manager().lock_exclusive_record(&txn, resource).ok();
                                mgr.commit(txn.id()).ok();
                            }
                        })
                    })
                    .collect();
                for handle in handles {
                    handle.join().unwrap();
                }
            });
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_transaction_lifecycle,
    bench_table_lock_acquisition,
    bench_concurrent_uncontended_record_locks
);
criterion_main!(benches);
