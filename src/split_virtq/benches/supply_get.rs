use std::hint::black_box;
use std::sync::Arc;

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use split_virtq::{BufferType, DeviceQueue, HeapMem, QueueConfig, ScatterList, SplitQueue};

type Mem = Arc<HeapMem>;

// Helper to create a driver/device pair for benchmarking
fn make_pair(size: u16) -> (SplitQueue<Mem, u64>, DeviceQueue<Mem>) {
    let mem = Arc::new(HeapMem::new(0x10000, 4 * 1024 * 1024).unwrap());
    let queue = SplitQueue::new(QueueConfig::new(size), &*mem, mem.clone()).unwrap();
    let device = DeviceQueue::new(queue.layout(), mem).unwrap();
    (queue, device)
}

fn chain(segments: usize) -> ScatterList {
    (0..segments as u64)
        .map(|i| (0x20_0000 + i * 0x1000, 0x1000u32))
        .collect()
}

// Full supply -> device -> retrieve cycle
fn bench_round_trip(c: &mut Criterion) {
    let mut group = c.benchmark_group("round_trip");

    for segments in [1usize, 2, 4, 8, 16].iter() {
        group.throughput(Throughput::Elements(1));
        group.bench_with_input(
            BenchmarkId::from_parameter(segments),
            segments,
            |b, &segments| {
                let (mut queue, mut device) = make_pair(256);
                let list = chain(segments);
                b.iter(|| {
                    queue
                        .supply_buffer(black_box(&list), BufferType::DeviceWritable, 1)
                        .unwrap();
                    let avail = device.poll_available().unwrap().unwrap();
                    device.submit_used(avail.head, 64).unwrap();
                    black_box(queue.get_buffer().unwrap());
                });
            },
        );
    }
    group.finish();
}

// Fill the whole ring, then drain it
fn bench_fill_drain(c: &mut Criterion) {
    let mut group = c.benchmark_group("fill_drain");

    for size in [64u16, 256, 1024].iter() {
        group.throughput(Throughput::Elements(*size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, &size| {
            let (mut queue, mut device) = make_pair(size);
            let list = chain(1);
            b.iter(|| {
                for token in 0..size as u64 {
                    queue
                        .supply_buffer(&list, BufferType::DeviceReadable, token)
                        .unwrap();
                }
                while let Some(avail) = device.poll_available().unwrap() {
                    device.submit_used(avail.head, 0).unwrap();
                }
                let n = queue.discard_used_buffers().unwrap();
                assert_eq!(n, size as usize);
            });
        });
    }
    group.finish();
}

// Scatter list construction from a physical range
fn bench_from_range(c: &mut Criterion) {
    let mut group = c.benchmark_group("from_range");

    for len in [4096u64, 65536, 1 << 20].iter() {
        group.bench_with_input(BenchmarkId::from_parameter(len), len, |b, &len| {
            b.iter(|| ScatterList::from_range(black_box(0x1234), len, 4096));
        });
    }
    group.finish();
}

criterion_group!(benches, bench_round_trip, bench_fill_drain, bench_from_range);

criterion_main!(benches);
