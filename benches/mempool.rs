// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Allocator hot path: Mempool::allocate/release round trip, and
// MempoolSet's size-class dispatch, under single- and multi-threaded
// contention.

use std::thread;

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use ipc_core::mempool::Mempool;
use ipc_core::registry::RelativePointerRegistry;

fn single_thread_roundtrip(c: &mut Criterion) {
    let registry = RelativePointerRegistry::new();
    let pool = Mempool::new_in_memory(&registry, 256, 1024);

    c.bench_function("mempool_allocate_release_roundtrip", |b| {
        b.iter(|| {
            let rp = pool.allocate(64, 0, 8).expect("pool not exhausted");
            pool.release(rp).unwrap();
        });
    });
}

fn contended_roundtrip(c: &mut Criterion) {
    let mut group = c.benchmark_group("mempool_contended_roundtrip");
    for threads in [1usize, 2, 4, 8] {
        group.bench_with_input(BenchmarkId::from_parameter(threads), &threads, |b, &threads| {
            // Leaked deliberately: benchmark closures run on scoped threads
            // and need a `'static` borrow of the registry/pool.
            let registry: &'static RelativePointerRegistry =
                Box::leak(Box::new(RelativePointerRegistry::new()));
            let pool: &'static Mempool<'static> =
                Box::leak(Box::new(Mempool::new_in_memory(registry, 256, 4096)));

            b.iter(|| {
                let handles: Vec<_> = (0..threads)
                    .map(|_| {
                        thread::spawn(move || {
                            for _ in 0..256 {
                                if let Some(rp) = pool.allocate(64, 0, 8) {
                                    pool.release(rp).unwrap();
                                }
                            }
                        })
                    })
                    .collect();
                for h in handles {
                    h.join().unwrap();
                }
            });
        });
    }
    group.finish();
}

criterion_group!(benches, single_thread_roundtrip, contended_roundtrip);
criterion_main!(benches);
