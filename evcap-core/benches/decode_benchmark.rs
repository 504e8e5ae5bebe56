//! Benchmarks for decoder and queue throughput.
//!
//! Run with: cargo bench

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use evcap_core::{Event, EventQueue, Evt3Decoder, OverflowPolicy, Polarity, RawChunk};
use std::path::Path;
use std::sync::Arc;
use std::thread;

const TEST_FILE: &str = "test_data/laser.raw";

fn decode_file_benchmark(c: &mut Criterion) {
    let test_path = Path::new(TEST_FILE);
    let Ok(file_meta) = std::fs::metadata(test_path) else {
        eprintln!("Benchmark skipped: test file not found at {}", TEST_FILE);
        return;
    };

    let mut group = c.benchmark_group("decode_file");
    group.throughput(Throughput::Bytes(file_meta.len()));

    group.bench_function("full_file", |b| {
        b.iter(|| {
            let mut decoder = Evt3Decoder::new();
            let result = decoder.decode_file(black_box(test_path)).unwrap();
            black_box(result.events.len())
        })
    });

    group.finish();
}

fn synthetic_stream(events: u32) -> Vec<u8> {
    let mut data = Vec::new();
    data.extend_from_slice(&0x8000u16.to_le_bytes());
    for i in 0..events {
        // TIME_HIGH every 4096 ticks keeps time non-decreasing
        if i > 0 && i & 0xFFF == 0 {
            data.extend_from_slice(&(0x8000 | ((i >> 12) & 0xFFF) as u16).to_le_bytes());
        }
        // TIME_LOW
        data.extend_from_slice(&((0x6000 | (i & 0xFFF)) as u16).to_le_bytes());
        // ADDR_Y
        data.extend_from_slice(&((i % 720) as u16).to_le_bytes());
        // ADDR_X with polarity
        data.extend_from_slice(&(0x2800u16 | ((i * 3) % 1280) as u16).to_le_bytes());
    }
    data
}

fn decode_buffer_benchmark(c: &mut Criterion) {
    let data = synthetic_stream(100_000);

    let mut group = c.benchmark_group("decode_buffer");
    group.throughput(Throughput::Elements(100_000));

    group.bench_function("synthetic_100k_events", |b| {
        b.iter(|| {
            let mut decoder = Evt3Decoder::new();
            let events = decoder.decode(black_box(RawChunk::from(data.as_slice()))).unwrap();
            black_box(events.len())
        })
    });

    group.bench_function("synthetic_100k_events_4k_chunks", |b| {
        b.iter(|| {
            let mut decoder = Evt3Decoder::new();
            let mut events = Vec::new();
            for chunk in data.chunks(4096) {
                decoder.decode_into(black_box(chunk), &mut events).unwrap();
            }
            black_box(events.len())
        })
    });

    group.finish();
}

fn queue_benchmark(c: &mut Criterion) {
    const EVENTS: u64 = 100_000;
    let batch: Vec<Event> = (0..1000)
        .map(|i| Event::cd((i % 1280) as u16, 0, Polarity::On, i))
        .collect();

    let mut group = c.benchmark_group("queue");
    group.throughput(Throughput::Elements(EVENTS));

    for policy in [OverflowPolicy::Block, OverflowPolicy::DropOldest] {
        group.bench_function(format!("{:?}_spsc", policy), |b| {
            b.iter(|| {
                let queue = Arc::new(EventQueue::new(4096, policy));
                let consumer = {
                    let queue = Arc::clone(&queue);
                    thread::spawn(move || {
                        let mut n = 0u64;
                        while queue.pop().is_some() {
                            n += 1;
                        }
                        n
                    })
                };
                for _ in 0..EVENTS / batch.len() as u64 {
                    queue.push_batch(batch.iter().copied()).unwrap();
                }
                queue.close();
                black_box(consumer.join().unwrap())
            })
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    decode_file_benchmark,
    decode_buffer_benchmark,
    queue_benchmark
);
criterion_main!(benches);
