//! Ring buffer benchmarks.

#![allow(missing_docs, clippy::unwrap_used)]

use std::hint::black_box;

use criterion::{Criterion, criterion_group, criterion_main};
use wirepool_stats::{LatencySummary, RingBuffer};

fn bench_push(c: &mut Criterion) {
    let mut buffer = RingBuffer::new(1000).unwrap();
    let mut value = 0.0f64;

    c.bench_function("ring_buffer_push_wrapped", |b| {
        b.iter(|| {
            value += 1.0;
            buffer.push(black_box(value));
        });
    });
}

fn bench_percentile(c: &mut Criterion) {
    let mut buffer = RingBuffer::new(1000).unwrap();
    for i in 0..1000 {
        buffer.push(f64::from((i * 7919) % 1000));
    }

    c.bench_function("ring_buffer_p99_1000", |b| {
        b.iter(|| black_box(buffer.percentile(black_box(0.99))));
    });

    c.bench_function("latency_summary_1000", |b| {
        b.iter(|| black_box(LatencySummary::from_buffer(&buffer)));
    });
}

criterion_group!(benches, bench_push, bench_percentile);
criterion_main!(benches);
