//! Particle system example for `FixedBlockPool`.
//!
//! A particle system spawns many short-lived objects of one type every frame. This example keeps
//! all particles in a pool owned by `main` and hands the pool to the particle system through the
//! `BlockAllocator` trait, so the system itself does not care where its memory comes from.
//!
//! Page growth is logged at the `DEBUG` level, so each new page shows up in the output.

use std::ptr::NonNull;

use fixed_block_pool::{BlockAllocator, FixedBlockPool, Result};
use new_zealand::nz;
use tracing::Level;

#[derive(Clone, Copy, Debug)]
struct Particle {
    x: f32,
    y: f32,
    z: f32,
    life: i32,
}

/// Owns the particles but not their memory.
struct ParticleSystem<'a, A: BlockAllocator> {
    allocator: &'a mut A,
    particles: Vec<NonNull<Particle>>,
}

impl<'a, A: BlockAllocator> ParticleSystem<'a, A> {
    fn new(allocator: &'a mut A) -> Self {
        Self {
            allocator,
            particles: Vec::new(),
        }
    }

    #[expect(
        clippy::cast_precision_loss,
        reason = "particle positions do not need to be exact"
    )]
    fn emit(&mut self, count: usize) -> Result<()> {
        self.particles.reserve(count);

        for index in 0..count {
            let particle = self.allocator.create(Particle {
                x: index as f32,
                y: 0.0,
                z: 0.0,
                life: 100,
            })?;

            self.particles.push(particle);
        }

        Ok(())
    }

    fn update(&mut self) {
        for particle in &mut self.particles {
            // SAFETY: Every particle in the list is alive and only reachable through it.
            let particle = unsafe { particle.as_mut() };

            particle.x += 0.1;
            particle.y += 0.5;
            particle.z -= 0.25;
            particle.life = particle.life.saturating_sub(1);
        }
    }

    fn len(&self) -> usize {
        self.particles.len()
    }

    fn oldest(&self) -> Option<Particle> {
        self.particles.first().map(|particle| {
            // SAFETY: Every particle in the list is alive.
            unsafe { particle.read() }
        })
    }

    fn clear(&mut self) {
        for particle in self.particles.drain(..) {
            // SAFETY: The particle was created by our allocator and is removed from the list as
            // it is released, so it cannot be released twice.
            unsafe { self.allocator.release(particle) };
        }
    }
}

impl<A: BlockAllocator> Drop for ParticleSystem<'_, A> {
    fn drop(&mut self) {
        self.clear();
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(Level::DEBUG)
        .init();

    let mut pool = FixedBlockPool::builder()
        .block_size_of::<Particle>()
        .blocks_per_page(nz!(1024))
        .build();

    println!(
        "Particle pool: block size {} bytes, {} blocks per page",
        pool.block_size(),
        pool.blocks_per_page()
    );

    {
        let mut system = ParticleSystem::new(&mut pool);

        system.emit(10_000)?;

        for _ in 0..10 {
            system.update();
        }

        println!("Simulated {} particles", system.len());

        if let Some(oldest) = system.oldest() {
            println!("Oldest particle after 10 updates: {oldest:?}");
        }

        system.clear();
    }

    println!(
        "Pool now lends out {} blocks and holds {} pages ({} blocks of capacity)",
        pool.len(),
        pool.page_count(),
        pool.capacity()
    );

    // A second burst reuses the blocks freed by the first one.
    {
        let mut system = ParticleSystem::new(&mut pool);
        system.emit(5_000)?;

        println!("Second burst of {} particles", system.len());
    }

    println!("Pool still holds {} pages", pool.page_count());

    Ok(())
}
