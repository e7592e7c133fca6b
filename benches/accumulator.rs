//! Benchmarks for the rectifier's ordered buffer.
//!
//! Run with:
//!   cargo bench -- accumulator

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use std::sync::Arc;
use std::time::Duration;
use timefront::clock::ManualClock;
use timefront::config::RectifierConfig;
use timefront::rectifier::{Accumulator, EventRecord, MemorySink, Rectifier};
use timefront::temporal::Timestamp;

const SIZES: &[usize] = &[1_000, 10_000, 100_000];

/// Keys that arrive mostly in order with bounded jitter.
fn jittered_keys(n: usize, jitter: i64) -> Vec<i64> {
    (0..n as i64)
        .map(|i| i * 10 + (i * 7_919) % (jitter + 1) - jitter / 2)
        .collect()
}

fn bench_insert(c: &mut Criterion) {
    let mut group = c.benchmark_group("accumulator_insert");

    for &n in SIZES {
        group.throughput(Throughput::Elements(n as u64));

        for (name, jitter) in [("in_order", 0), ("jitter_50", 50), ("jitter_5000", 5_000)] {
            let keys = jittered_keys(n, jitter);
            group.bench_with_input(BenchmarkId::new(name, n), &keys, |b, keys| {
                b.iter(|| {
                    let mut acc = Accumulator::new();
                    for &k in keys {
                        let ts = Timestamp::from_millis(k);
                        acc.insert(ts, EventRecord::at("ts", ts));
                    }
                    std::hint::black_box(acc.len());
                });
            });
        }
    }

    group.finish();
}

fn bench_take_eligible(c: &mut Criterion) {
    let mut group = c.benchmark_group("accumulator_take_eligible");

    for &n in SIZES {
        group.throughput(Throughput::Elements(n as u64));
        let keys = jittered_keys(n, 50);

        group.bench_with_input(BenchmarkId::new("half", n), &keys, |b, keys| {
            b.iter_batched(
                || {
                    let mut acc = Accumulator::new();
                    for &k in keys {
                        let ts = Timestamp::from_millis(k);
                        acc.insert(ts, EventRecord::at("ts", ts));
                    }
                    acc
                },
                |mut acc| {
                    let cutoff = Timestamp::from_millis(n as i64 * 5);
                    std::hint::black_box(acc.take_eligible(cutoff).len());
                },
                criterion::BatchSize::LargeInput,
            );
        });
    }

    group.finish();
}

fn bench_flush(c: &mut Criterion) {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap();
    let mut group = c.benchmark_group("rectifier_flush");

    for &n in &SIZES[..2] {
        group.throughput(Throughput::Elements(n as u64));
        let keys = jittered_keys(n, 50);

        group.bench_with_input(BenchmarkId::new("add_then_flush", n), &keys, |b, keys| {
            b.to_async(&runtime).iter(|| async {
                let time = Arc::new(ManualClock::new(Timestamp::from_millis(n as i64 * 20)));
                let rectifier = Rectifier::new(
                    RectifierConfig::default().with_accumulation_time(Duration::from_millis(1)),
                    time,
                    Arc::new(MemorySink::new()),
                )
                .unwrap();
                for &k in keys {
                    rectifier
                        .add(EventRecord::at("ts", Timestamp::from_millis(k)))
                        .unwrap();
                }
                std::hint::black_box(rectifier.flush().await.unwrap());
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_insert, bench_take_eligible, bench_flush);
criterion_main!(benches);
