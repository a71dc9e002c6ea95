//! Basic benchmarks for the `fixed_block_pool` crate.
#![allow(
    missing_docs,
    reason = "No need for API documentation in benchmark code"
)]

use std::hint::black_box;
use std::iter;
use std::time::Instant;

use alloc_tracker::Allocator;
use criterion::{Criterion, criterion_group, criterion_main};
use fixed_block_pool::{BlockAllocator, FixedBlockPool};
use new_zealand::nz;

criterion_group!(benches, entrypoint);
criterion_main!(benches);

#[global_allocator]
static ALLOCATOR: Allocator<std::alloc::System> = Allocator::system();

type TestItem = [u64; 4];
const TEST_VALUE: TestItem = [1, 2, 3, 4];

fn test_pool() -> FixedBlockPool {
    FixedBlockPool::builder()
        .block_size_of::<TestItem>()
        .blocks_per_page(nz!(1024))
        .build()
}

fn entrypoint(c: &mut Criterion) {
    let allocs = alloc_tracker::Session::new();

    let mut group = c.benchmark_group("fbp_basic");

    let allocs_op = allocs.operation("build_empty");
    group.bench_function("build_empty", |b| {
        b.iter_custom(|iters| {
            let _span = allocs_op.measure_thread().iterations(iters);

            let start = Instant::now();

            for _ in 0..iters {
                drop(black_box(test_pool()));
            }

            start.elapsed()
        });
    });

    // The first allocation in a pool also obtains the first page.
    let allocs_op = allocs.operation("allocate_first");
    group.bench_function("allocate_first", |b| {
        b.iter_custom(|iters| {
            let mut pools = iter::repeat_with(test_pool)
                .take(usize::try_from(iters).unwrap())
                .collect::<Vec<_>>();

            let _span = allocs_op.measure_thread().iterations(iters);

            let start = Instant::now();

            for pool in &mut pools {
                _ = black_box(pool.allocate().unwrap());
            }

            start.elapsed()
        });
    });

    let allocs_op = allocs.operation("allocate_deallocate_warm");
    group.bench_function("allocate_deallocate_warm", |b| {
        b.iter_custom(|iters| {
            let mut pool = test_pool();
            pool.reserve(1).unwrap();

            let _span = allocs_op.measure_thread().iterations(iters);

            let start = Instant::now();

            for _ in 0..iters {
                let block = black_box(pool.allocate().unwrap());

                // SAFETY: The block came from this pool and has not been deallocated yet.
                unsafe { pool.deallocate(block) };
            }

            start.elapsed()
        });
    });

    let allocs_op = allocs.operation("create_release_warm");
    group.bench_function("create_release_warm", |b| {
        b.iter_custom(|iters| {
            let mut pool = test_pool();
            pool.reserve(1).unwrap();

            let _span = allocs_op.measure_thread().iterations(iters);

            let start = Instant::now();

            for _ in 0..iters {
                let value = black_box(pool.create(black_box(TEST_VALUE)).unwrap());

                // SAFETY: The value was created by this pool and is released exactly once.
                unsafe { pool.release(value) };
            }

            start.elapsed()
        });
    });

    // Baseline for comparison with the pool: the same value boxed via the global allocator.
    let allocs_op = allocs.operation("box_new_drop");
    group.bench_function("box_new_drop", |b| {
        b.iter_custom(|iters| {
            let _span = allocs_op.measure_thread().iterations(iters);

            let start = Instant::now();

            for _ in 0..iters {
                drop(black_box(Box::new(black_box(TEST_VALUE))));
            }

            start.elapsed()
        });
    });

    let allocs_op = allocs.operation("fill_1000");
    group.bench_function("fill_1000", |b| {
        b.iter_custom(|iters| {
            let mut pools = iter::repeat_with(test_pool)
                .take(usize::try_from(iters).unwrap())
                .collect::<Vec<_>>();

            let _span = allocs_op.measure_thread().iterations(iters);

            let start = Instant::now();

            for pool in &mut pools {
                for _ in 0..1000 {
                    _ = black_box(pool.allocate().unwrap());
                }
            }

            start.elapsed()
        });
    });

    group.finish();

    allocs.print_to_stdout();
}
