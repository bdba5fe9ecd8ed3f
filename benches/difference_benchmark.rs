//! Set difference benchmarks.
//!
//! Measures `R - S` throughput for:
//! - Different unit sizes
//! - Low and high key cardinality
//! - A probe side that matches every build key (short-circuit)

use std::sync::Arc;

use colexec::{
    channel, Arena, Batch, BatchOperator, Difference, ExecutionContext, ExecutorConfig, Vector,
};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

const ROWS: usize = 100_000;
const BATCH_ROWS: usize = 2048;

fn make_batch(arena: &Arena, ids: &[i64]) -> Batch {
    let vec = Vector::from_i64s(arena, ids).expect("vector");
    Batch::try_new(arena, vec!["id".into()], vec![vec]).expect("batch")
}

fn random_keys(rows: usize, cardinality: i64, seed: u64) -> Vec<i64> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..rows).map(|_| rng.gen_range(0..cardinality)).collect()
}

/// Runs one difference to completion and returns the number of output rows.
fn run(ctx: &ExecutionContext, r: &[i64], s: &[i64]) -> usize {
    let arena = Arc::clone(ctx.arena());
    let (r_tx, r_rx) = channel("R", r.len() / BATCH_ROWS + 2);
    let (s_tx, s_rx) = channel("S", s.len() / BATCH_ROWS + 2);
    for chunk in r.chunks(BATCH_ROWS) {
        r_tx.batch(make_batch(&arena, chunk)).expect("send R");
    }
    r_tx.finish().expect("end R");
    for chunk in s.chunks(BATCH_ROWS) {
        s_tx.batch(make_batch(&arena, chunk)).expect("send S");
    }
    s_tx.finish().expect("end S");

    let mut op = Difference::new(ctx, r_rx, s_rx);
    let mut rows = 0;
    while let Some(batch) = op.next().expect("difference") {
        rows += batch.num_rows();
        batch.release(&arena);
    }
    rows
}

/// Benchmark unit size impact
fn bench_unit_size(c: &mut Criterion) {
    let mut group = c.benchmark_group("difference_unit_size");
    let r = random_keys(ROWS, 10_000, 1);
    let s = random_keys(ROWS / 2, 20_000, 2);

    group.throughput(Throughput::Elements((r.len() + s.len()) as u64));
    for unit_size in &[64, 256, 1024] {
        let ctx = ExecutionContext::new(ExecutorConfig::new().with_unit_size(*unit_size))
            .expect("config");
        group.bench_with_input(BenchmarkId::from_parameter(unit_size), unit_size, |b, _| {
            b.iter(|| black_box(run(&ctx, &r, &s)));
        });
    }

    group.finish();
}

/// Benchmark key cardinality
fn bench_cardinality(c: &mut Criterion) {
    let mut group = c.benchmark_group("difference_cardinality");
    let ctx = ExecutionContext::default();

    for cardinality in &[100i64, 10_000, 1_000_000] {
        let r = random_keys(ROWS, *cardinality, 3);
        let s = random_keys(ROWS / 4, *cardinality, 4);
        group.throughput(Throughput::Elements((r.len() + s.len()) as u64));
        group.bench_with_input(
            BenchmarkId::from_parameter(cardinality),
            cardinality,
            |b, _| {
                b.iter(|| black_box(run(&ctx, &r, &s)));
            },
        );
    }

    group.finish();
}

/// Benchmark a probe side that empties the tracker early
fn bench_short_circuit(c: &mut Criterion) {
    let mut group = c.benchmark_group("difference_short_circuit");
    let ctx = ExecutionContext::default();
    let r: Vec<i64> = (0..1000).collect();
    let mut s: Vec<i64> = (0..1000).collect();
    s.extend(random_keys(ROWS, 1_000_000, 5));

    group.throughput(Throughput::Elements((r.len() + s.len()) as u64));
    group.bench_function("all_matched_then_skip", |b| {
        b.iter(|| black_box(run(&ctx, &r, &s)));
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_unit_size,
    bench_cardinality,
    bench_short_circuit
);
criterion_main!(benches);
