//! Benchmarks for the read pipeline
//!
//! Run with: cargo bench

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use readpipe::config::PipelineConfig;
use readpipe::modbase::encoder::{moves_to_map, sequence_to_ints, ContextEncoder};
use readpipe::pipeline::nodes::NullNode;
use readpipe::pipeline::{BoundedQueue, PipelineBuilder};
use readpipe::Read;
use std::sync::Arc;
use std::thread;

const BLOCK_STRIDE: usize = 5;

fn synthetic_read(id: usize, len: usize) -> Read {
    let seq: String = (0..len)
        .map(|i| b"ACGTTCGA"[(i * 7 + id) % 8] as char)
        .collect();
    let signal = (0..len * BLOCK_STRIDE)
        .map(|i| ((i * 31 + id) % 97) as f32 / 10.0)
        .collect();
    Read::new(format!("read{id}"), seq).with_signal(signal, vec![1; len])
}

fn bench_queue_handoff(c: &mut Criterion) {
    let mut group = c.benchmark_group("bounded_queue");

    for capacity in [16usize, 1000].iter() {
        let items = 10_000u64;
        group.throughput(Throughput::Elements(items));
        group.bench_with_input(
            BenchmarkId::new("spsc_handoff", capacity),
            capacity,
            |b, &capacity| {
                b.iter(|| {
                    let queue = Arc::new(BoundedQueue::new(capacity));
                    let consumer = {
                        let queue = queue.clone();
                        thread::spawn(move || {
                            let mut sum = 0u64;
                            while let Some(v) = queue.pop() {
                                sum += v;
                            }
                            sum
                        })
                    };
                    for i in 0..items {
                        let _ = queue.push(i);
                    }
                    queue.terminate();
                    black_box(consumer.join().unwrap_or_default())
                });
            },
        );
    }

    group.finish();
}

fn bench_context_encoding(c: &mut Criterion) {
    let mut group = c.benchmark_group("context_encoding");

    for len in [1_000usize, 10_000].iter() {
        let read = synthetic_read(0, *len);
        let seq_ints = sequence_to_ints(&read.seq).unwrap_or_default();
        let map = moves_to_map(&read.moves, BLOCK_STRIDE, read.raw_data.len(), *len + 1);

        group.throughput(Throughput::Elements(*len as u64));
        group.bench_with_input(BenchmarkId::new("all_positions", len), len, |b, &len| {
            b.iter(|| {
                let mut encoder = ContextEncoder::new(50, 50, 2, 2);
                encoder.init(&seq_ints, &map);
                for pos in (0..len).step_by(4) {
                    black_box(encoder.get_context(pos));
                }
            });
        });
    }

    group.finish();
}

fn bench_pipeline(c: &mut Criterion) {
    let mut group = c.benchmark_group("pipeline");
    group.sample_size(10);

    let reads = 200usize;
    group.throughput(Throughput::Elements(reads as u64));
    group.bench_function("tagging_and_modbase_prior_runner", |b| {
        b.iter(|| {
            let mut config = PipelineConfig::default();
            config.pipeline.force_timeout_ms = 10;
            let sink = Arc::new(NullNode::new().unwrap());
            let (pipeline, _ids) = PipelineBuilder::new(config)
                .build_with_prior_runners(sink)
                .unwrap();
            for id in 0..reads {
                pipeline
                    .push_message(synthetic_read(id, 2_000).into())
                    .unwrap();
            }
            pipeline.terminate().unwrap();
            black_box(pipeline.sample_stats())
        });
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_queue_handoff,
    bench_context_encoding,
    bench_pipeline
);

criterion_main!(benches);
