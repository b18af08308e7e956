//! # Allocator Benchmark
//!
//! Pooled allocate/free against the system allocator, per size class and
//! for the raw fallback path.
//!
//! Run with: `cargo bench --package kiln_core --bench allocator_benchmark`

#![allow(missing_docs)]

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use kiln_core::{AllocatorConfig, ObjectAllocator};

/// Live blocks held per iteration.
const BATCH: usize = 1_000;

fn allocator() -> ObjectAllocator {
    ObjectAllocator::new(AllocatorConfig {
        fail_on_leak: false,
        ..AllocatorConfig::default()
    })
    .unwrap()
}

/// Benchmark: allocate then immediately free one block (free-list hot path).
fn bench_round_trip(c: &mut Criterion) {
    let mut group = c.benchmark_group("round_trip");

    for size in [16usize, 128, 1024, 8192] {
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &size| {
            let mut a = allocator();
            b.iter(|| {
                let ptr = a.allocate(black_box(size));
                a.free(ptr).unwrap();
            });
        });
    }

    group.finish();
}

/// Benchmark: fill a batch, then release it in allocation order.
fn bench_batch(c: &mut Criterion) {
    let mut group = c.benchmark_group("batch");

    for size in [24usize, 200, 3000] {
        group.bench_with_input(BenchmarkId::new("pooled", size), &size, |b, &size| {
            let mut a = allocator();
            let mut live = Vec::with_capacity(BATCH);
            b.iter(|| {
                for _ in 0..BATCH {
                    live.push(a.allocate(size));
                }
                for ptr in live.drain(..) {
                    a.free(ptr).unwrap();
                }
            });
        });

        group.bench_with_input(BenchmarkId::new("system", size), &size, |b, &size| {
            let mut live = Vec::with_capacity(BATCH);
            b.iter(|| {
                for _ in 0..BATCH {
                    live.push(vec![0u8; size]);
                }
                live.clear();
            });
        });
    }

    group.finish();
}

/// Benchmark: requests above every size class.
fn bench_raw_fallback(c: &mut Criterion) {
    c.bench_function("raw_fallback_64k", |b| {
        let mut a = allocator();
        b.iter(|| {
            let ptr = a.allocate(black_box(64 * 1024));
            a.free(ptr).unwrap();
        });
    });
}

criterion_group!(benches, bench_round_trip, bench_batch, bench_raw_fallback);
criterion_main!(benches);
