//! Integration tests for the `fixed_block_pool` package.
//!
//! These exercise the public API the way an application would: many blocks of one size, pages
//! filled and reused, values placed into blocks through the `BlockAllocator` trait.

use std::cell::Cell;
use std::collections::HashSet;
use std::num::NonZero;
use std::ptr::NonNull;
use std::rc::Rc;

use fixed_block_pool::{
    BLOCK_ALIGN, BlockAllocator, DEFAULT_BLOCKS_PER_PAGE, FixedBlockPool, adjust_block_size,
};
use new_zealand::nz;

#[derive(Clone, Copy, Debug, PartialEq)]
#[allow(dead_code, reason = "fields are only compared as a whole")]
struct Particle {
    x: f32,
    y: f32,
    z: f32,
    life: i32,
}

impl Particle {
    #[expect(
        clippy::cast_precision_loss,
        clippy::cast_possible_truncation,
        clippy::cast_possible_wrap,
        reason = "test values are small"
    )]
    fn at(index: usize) -> Self {
        Self {
            x: index as f32,
            y: index as f32 * 2.0,
            z: index as f32 * 3.0,
            life: index as i32,
        }
    }
}

// Miri test runtime scales with memory usage, so we scale the workload down.
#[cfg(not(miri))]
const PARTICLE_COUNT: usize = 10_000;
#[cfg(miri)]
const PARTICLE_COUNT: usize = 600;

#[cfg(not(miri))]
const PARTICLES_PER_PAGE: NonZero<usize> = nz!(1024);
#[cfg(miri)]
const PARTICLES_PER_PAGE: NonZero<usize> = nz!(64);

fn particle_pool(blocks_per_page: NonZero<usize>) -> FixedBlockPool {
    FixedBlockPool::builder()
        .block_size_of::<Particle>()
        .blocks_per_page(blocks_per_page)
        .build()
}

fn assert_allocate_all_then_reuse(blocks_per_page: NonZero<usize>) {
    let mut pool = particle_pool(blocks_per_page);

    let blocks: Vec<NonNull<u8>> = (0..PARTICLE_COUNT)
        .map(|_| pool.allocate().unwrap())
        .collect();

    let expected_pages = PARTICLE_COUNT.div_ceil(blocks_per_page.get());

    assert_eq!(pool.len(), PARTICLE_COUNT);
    assert_eq!(pool.page_count(), expected_pages);

    let addresses: HashSet<usize> = blocks.iter().map(|block| block.addr().get()).collect();
    assert_eq!(addresses.len(), PARTICLE_COUNT, "every block must be distinct");

    for block in &blocks {
        assert_eq!(block.as_ptr().align_offset(BLOCK_ALIGN), 0);
    }

    for block in blocks.iter().rev() {
        // SAFETY: Every block came from this pool and is deallocated exactly once.
        unsafe { pool.deallocate(*block) };
    }

    assert!(pool.is_empty());
    assert_eq!(pool.page_count(), expected_pages);

    let reallocated: HashSet<usize> = (0..PARTICLE_COUNT)
        .map(|_| pool.allocate().unwrap().addr().get())
        .collect();

    assert_eq!(reallocated, addresses);
    assert_eq!(pool.page_count(), expected_pages);
}

#[test]
fn many_blocks_with_small_pages_are_reused() {
    assert_allocate_all_then_reuse(PARTICLES_PER_PAGE);
}

#[test]
fn many_blocks_with_default_pages_are_reused() {
    assert_allocate_all_then_reuse(DEFAULT_BLOCKS_PER_PAGE);
}

#[test]
#[cfg(not(miri))] // Miri is too slow when running tests with large data sets
fn ten_thousand_particles_fill_ten_pages() {
    let mut pool = particle_pool(nz!(1024));

    for _ in 0..10_000 {
        _ = pool.allocate().unwrap();
    }

    assert_eq!(pool.page_count(), 10);
    assert_eq!(pool.capacity(), 10_240);
}

#[test]
fn particle_block_size_matches_adjustment() {
    let pool = particle_pool(PARTICLES_PER_PAGE);

    assert_eq!(
        pool.block_size(),
        adjust_block_size(size_of::<Particle>()).unwrap()
    );
    assert!(pool.block_size() >= 16);
}

#[test]
fn values_survive_neighbour_churn() {
    let mut pool = particle_pool(nz!(8));

    let particles: Vec<NonNull<Particle>> = (0..20)
        .map(|index| pool.create(Particle::at(index)).unwrap())
        .collect();

    // Release every other particle and allocate over the holes.
    for particle in particles.iter().step_by(2) {
        // SAFETY: Each particle was created by this pool and is released exactly once.
        unsafe { pool.release(*particle) };
    }

    let fillers: Vec<NonNull<u8>> = (0..10).map(|_| pool.allocate().unwrap()).collect();

    for filler in &fillers {
        // SAFETY: The block is lent to us and at least as large as a Particle.
        unsafe { filler.write_bytes(0xFF, size_of::<Particle>()) };
    }

    for (index, particle) in particles.iter().enumerate().skip(1).step_by(2) {
        // SAFETY: Odd-indexed particles are still alive.
        assert_eq!(unsafe { particle.read() }, Particle::at(index));
    }

    assert_eq!(pool.page_count(), 3);
}

struct Tracked {
    live: Rc<Cell<usize>>,
}

impl Tracked {
    fn new(live: &Rc<Cell<usize>>) -> Self {
        live.set(live.get().wrapping_add(1));

        Self {
            live: Rc::clone(live),
        }
    }
}

impl Drop for Tracked {
    fn drop(&mut self) {
        self.live.set(self.live.get().wrapping_sub(1));
    }
}

#[test]
fn create_and_release_balance_drops() {
    let live = Rc::new(Cell::new(0));

    let mut pool = FixedBlockPool::builder()
        .block_size_of::<Tracked>()
        .blocks_per_page(nz!(16))
        .build();

    let values: Vec<NonNull<Tracked>> = (0..40)
        .map(|_| pool.create(Tracked::new(&live)).unwrap())
        .collect();

    assert_eq!(live.get(), 40);
    assert_eq!(pool.len(), 40);

    for value in values {
        // SAFETY: Each value was created by this pool and is released exactly once.
        unsafe { pool.release(value) };
    }

    assert_eq!(live.get(), 0);
    assert!(pool.is_empty());
}

/// Works against any allocator, not just the pool.
fn spawn<A: BlockAllocator>(allocator: &mut A, count: usize) -> Vec<NonNull<Particle>> {
    (0..count)
        .map(|index| allocator.create(Particle::at(index)).unwrap())
        .collect()
}

fn despawn<A: BlockAllocator>(allocator: &mut A, particles: Vec<NonNull<Particle>>) {
    for particle in particles {
        // SAFETY: The caller passes particles created by this allocator, each exactly once.
        unsafe { allocator.release(particle) };
    }
}

#[test]
fn generic_code_drives_pool_through_trait() {
    let mut pool = particle_pool(nz!(32));

    let particles = spawn(&mut pool, 100);

    assert_eq!(pool.len(), 100);
    assert_eq!(pool.page_count(), 4);

    for (index, particle) in particles.iter().enumerate() {
        // SAFETY: All particles are alive until despawned below.
        assert_eq!(unsafe { particle.read() }, Particle::at(index));
    }

    despawn(&mut pool, particles);

    assert!(pool.is_empty());
}

#[test]
fn dropping_pool_with_outstanding_blocks_is_fine() {
    let mut pool = particle_pool(nz!(4));

    for index in 0..10 {
        _ = pool.create(Particle::at(index)).unwrap();
    }

    assert_eq!(pool.len(), 10);

    drop(pool);
}

#[test]
fn pool_can_be_built_on_one_thread_and_used_on_another() {
    let pool = particle_pool(nz!(16));

    let pool = std::thread::spawn(move || {
        let mut pool = pool;
        let particles = spawn(&mut pool, 50);
        despawn(&mut pool, particles);
        pool
    })
    .join()
    .unwrap();

    assert!(pool.is_empty());
    assert_eq!(pool.page_count(), 4);
}
