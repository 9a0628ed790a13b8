use core::hint::black_box;
use criterion::{Criterion, Throughput, criterion_group, criterion_main};
use leaseflake::{Pattern, TimeSource, WaitMethod};
use std::{
    sync::{Arc, Barrier},
    thread::scope,
    time::{Duration, Instant, SystemTime, UNIX_EPOCH},
};

struct FixedMockTime {
    millis: u64,
}

impl TimeSource for FixedMockTime {
    fn now(&self) -> SystemTime {
        UNIX_EPOCH + Duration::from_millis(self.millis)
    }
}

// Number of IDs generated per benchmark iteration (per-thread for
// multi-threaded). Matches a 12-bit sequence so the fixed clock never
// overflows it.
const TOTAL_IDS: usize = 4095;

/// Hot path: a fixed clock, so every call stays within one tick.
fn bench_fixed_clock(c: &mut Criterion) {
    let pattern = Arc::new(Pattern::default());
    let millis = u64::try_from(
        (pattern.epoch() + Duration::from_secs(60))
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_millis(),
    )
    .unwrap();

    let mut group = c.benchmark_group("node/fixed_clock");
    group.throughput(Throughput::Elements(TOTAL_IDS as u64));
    group.bench_function(format!("elems/{TOTAL_IDS}"), |b| {
        b.iter_custom(|iters| {
            let start = Instant::now();
            for _ in 0..iters {
                let node = pattern
                    .node_builder()
                    .clock(FixedMockTime { millis })
                    .build()
                    .unwrap();
                for _ in 0..TOTAL_IDS {
                    black_box(node.generate().unwrap());
                }
            }
            start.elapsed()
        });
    });
    group.finish();
}

/// Wall clock with both wait strategies, including sequence rollover.
fn bench_wall_clock(c: &mut Criterion) {
    let pattern = Arc::new(Pattern::default());
    for (name, wait) in [("sleep", WaitMethod::Sleep), ("spin", WaitMethod::Spin)] {
        let mut group = c.benchmark_group(format!("node/wall_clock/{name}"));
        group.throughput(Throughput::Elements(TOTAL_IDS as u64));
        group.bench_function(format!("elems/{TOTAL_IDS}"), |b| {
            let node = pattern.node_builder().wait_method(wait).build().unwrap();
            b.iter(|| {
                for _ in 0..TOTAL_IDS {
                    black_box(node.generate().unwrap());
                }
            });
        });
        group.finish();
    }
}

/// Contended: several threads sharing one node.
fn bench_contended(c: &mut Criterion) {
    const THREADS: usize = 4;
    let pattern = Arc::new(Pattern::default());

    let mut group = c.benchmark_group("node/contended");
    group.throughput(Throughput::Elements((TOTAL_IDS * THREADS) as u64));
    group.bench_function(format!("threads/{THREADS}"), |b| {
        let node = pattern
            .node_builder()
            .wait_method(WaitMethod::Spin)
            .build()
            .unwrap();
        b.iter_custom(|iters| {
            let start = Instant::now();
            for _ in 0..iters {
                let barrier = Barrier::new(THREADS);
                scope(|s| {
                    for _ in 0..THREADS {
                        s.spawn(|| {
                            barrier.wait();
                            for _ in 0..TOTAL_IDS {
                                black_box(node.generate().unwrap());
                            }
                        });
                    }
                });
            }
            start.elapsed()
        });
    });
    group.finish();
}

criterion_group!(benches, bench_fixed_clock, bench_wall_clock, bench_contended);
criterion_main!(benches);
