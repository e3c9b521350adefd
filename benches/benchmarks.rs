//! Benchmarks for shardstats
//!
//! Run with: cargo bench

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use shardstats::aggregate::{GlobalAggregate, PartialAggregate};
use shardstats::mask::StatisticMask;
use shardstats::moments::{finalize, merge_blocks, DegenerateMode};

/// Deterministic pseudo-random blocks, `features` wide.
fn make_blocks(features: usize, count: usize) -> Vec<PartialAggregate<f64>> {
    let mut state = 0x2545f4914f6cdd1du64;
    let mut next = move || {
        state ^= state << 13;
        state ^= state >> 7;
        state ^= state << 17;
        (state >> 11) as f64 / (1u64 << 53) as f64
    };
    (0..count)
        .map(|i| {
            let observations = 1_000 + i as u64 * 37;
            let n = observations as f64;
            let mut min = Vec::with_capacity(features);
            let mut max = Vec::with_capacity(features);
            let mut sum = Vec::with_capacity(features);
            let mut sum2 = Vec::with_capacity(features);
            let mut sum2_cent = Vec::with_capacity(features);
            for _ in 0..features {
                let mean = next() * 100.0;
                let spread = next() * 10.0 + 0.1;
                min.push(mean - spread);
                max.push(mean + spread);
                sum.push(mean * n);
                sum2.push((mean * mean + spread * spread) * n);
                sum2_cent.push(spread * spread * n);
            }
            PartialAggregate::new(features, observations)
                .with_min(min)
                .with_max(max)
                .with_sum(sum)
                .with_sum2(sum2)
                .with_sum2_cent(sum2_cent)
        })
        .collect()
}

fn bench_merge(c: &mut Criterion) {
    let mut group = c.benchmark_group("merge");
    let features = 256;

    for blocks in [2usize, 8, 32, 128] {
        let partials = make_blocks(features, blocks);
        group.throughput(Throughput::Elements((blocks * features) as u64));
        group.bench_with_input(
            BenchmarkId::new("all_statistics", blocks),
            &partials,
            |b, partials| {
                b.iter(|| {
                    let mut global = GlobalAggregate::new(features, StatisticMask::ALL);
                    merge_blocks(&mut global, partials, StatisticMask::ALL).unwrap();
                    black_box(global)
                });
            },
        );
    }

    // The cheap path: no re-centering, just comparisons and additions.
    let partials = make_blocks(features, 32);
    let minmax = StatisticMask::MIN | StatisticMask::MAX;
    group.bench_function("min_max_only", |b| {
        b.iter(|| {
            let mut global = GlobalAggregate::new(features, minmax);
            merge_blocks(&mut global, &partials, minmax).unwrap();
            black_box(global)
        });
    });

    group.finish();
}

fn bench_finalize(c: &mut Criterion) {
    let mut group = c.benchmark_group("finalize");
    let features = 256;
    let partials = make_blocks(features, 16);
    let mut global = GlobalAggregate::new(features, StatisticMask::ALL);
    merge_blocks(&mut global, &partials, StatisticMask::ALL).unwrap();
    let total = global.merged_count();

    group.throughput(Throughput::Elements(features as u64));
    group.bench_function("all_statistics", |b| {
        b.iter(|| {
            black_box(
                finalize(&global, total, StatisticMask::ALL, DegenerateMode::Error).unwrap(),
            )
        });
    });

    group.finish();
}

fn bench_codec(c: &mut Criterion) {
    let mut group = c.benchmark_group("codec");
    let features = 256;
    let mask = StatisticMask::ALL;
    let block = make_blocks(features, 1).pop().unwrap();
    let wire = block.pack(mask).unwrap();

    group.throughput(Throughput::Elements(wire.len() as u64));
    group.bench_function("pack", |b| {
        b.iter(|| black_box(block.pack(mask).unwrap()));
    });
    group.bench_function("unpack", |b| {
        b.iter(|| black_box(PartialAggregate::<f64>::unpack(&wire, features, mask).unwrap()));
    });

    group.finish();
}

criterion_group!(benches, bench_merge, bench_finalize, bench_codec);
criterion_main!(benches);
