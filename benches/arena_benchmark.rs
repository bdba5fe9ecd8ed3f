//! Arena benchmarks.
//!
//! Measures arena performance for:
//! - Acquire/release of recycled buffers
//! - Contended acquire/release across threads
//! - Selection vector growth

use std::sync::Arc;
use std::thread;

use colexec::executor::vectorized::SelectionBuilder;
use colexec::Arena;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

/// Benchmark single-threaded acquire/release
fn bench_acquire_release(c: &mut Criterion) {
    let mut group = c.benchmark_group("arena_acquire_release");
    let arena = Arena::new();

    for size in &[64usize, 4096, 65536] {
        group.throughput(Throughput::Elements(1));
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, &size| {
            b.iter(|| {
                let buf = arena.acquire(size).expect("acquire");
                black_box(buf.len());
                arena.release(buf);
            });
        });
    }

    group.finish();
}

/// Benchmark contended acquire/release
fn bench_contended(c: &mut Criterion) {
    let mut group = c.benchmark_group("arena_contended");
    let arena = Arc::new(Arena::new());

    for threads in &[2usize, 4, 8] {
        group.throughput(Throughput::Elements((*threads * 1000) as u64));
        group.bench_with_input(BenchmarkId::from_parameter(threads), threads, |b, &threads| {
            b.iter(|| {
                let handles: Vec<_> = (0..threads)
                    .map(|t| {
                        let arena = Arc::clone(&arena);
                        thread::spawn(move || {
                            for i in 0..1000usize {
                                let buf = arena.acquire(64 << ((i + t) % 6)).expect("acquire");
                                arena.release(buf);
                            }
                        })
                    })
                    .collect();
                for h in handles {
                    h.join().expect("join");
                }
            });
        });
    }

    group.finish();
}

/// Benchmark growing a selection vector
fn bench_selection_growth(c: &mut Criterion) {
    let mut group = c.benchmark_group("selection_growth");
    let arena = Arena::new();

    for rows in &[100i64, 2048, 100_000] {
        group.throughput(Throughput::Elements(*rows as u64));
        group.bench_with_input(BenchmarkId::from_parameter(rows), rows, |b, &rows| {
            b.iter(|| {
                let mut builder = SelectionBuilder::new();
                for i in 0..rows {
                    builder.push(&arena, i).expect("push");
                }
                builder.release(&arena);
            });
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_acquire_release,
    bench_contended,
    bench_selection_growth
);
criterion_main!(benches);
