//! # List Benchmark
//!
//! Push/pop churn, front inserts and copy-on-write detach for both element
//! disciplines.
//!
//! Run with: `cargo bench --package kiln_core --bench list_benchmark`

#![allow(missing_docs)]

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use kiln_core::{Direct, List};

fn bench_push_pop(c: &mut Criterion) {
    let mut group = c.benchmark_group("push_pop");

    for count in [100usize, 10_000] {
        group.bench_with_input(BenchmarkId::new("direct", count), &count, |b, &count| {
            b.iter(|| {
                let mut list: List<u64, Direct> = List::new();
                for i in 0..count as u64 {
                    list.push_back(i);
                }
                while list.pop_back().is_some() {}
                black_box(list.capacity())
            });
        });

        group.bench_with_input(BenchmarkId::new("managed", count), &count, |b, &count| {
            b.iter(|| {
                let mut list: List<String> = List::new();
                for i in 0..count {
                    list.push_back(i.to_string());
                }
                while list.pop_back().is_some() {}
                black_box(list.capacity())
            });
        });
    }

    group.finish();
}

fn bench_front_insert(c: &mut Criterion) {
    c.bench_function("front_insert_1000", |b| {
        b.iter(|| {
            let mut list: List<u32, Direct> = List::new();
            for i in 0..1_000 {
                list.insert(0, i).unwrap();
            }
            black_box(list.count())
        });
    });
}

fn bench_copy_on_write(c: &mut Criterion) {
    let source: List<u32, Direct> = (0..10_000).collect();

    c.bench_function("clone_and_detach_10k", |b| {
        b.iter(|| {
            let mut copy = source.clone();
            copy.push_back(black_box(1));
            black_box(copy.count())
        });
    });
}

criterion_group!(benches, bench_push_pop, bench_front_insert, bench_copy_on_write);
criterion_main!(benches);
