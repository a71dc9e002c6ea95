#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

//! A memory pool that hands out equal-sized raw memory blocks.
//!
//! This crate provides [`FixedBlockPool`], a pool that obtains memory from a backing allocator in
//! large pages and slices each page into many blocks of one fixed size. Allocating and
//! deallocating a block are O(1) operations that do not touch the backing allocator, except when
//! the pool has run out of free blocks and needs one more page.
//!
//! This suits programs that create and destroy large numbers of same-sized objects at high
//! frequency, such as particles in a simulation or nodes in a graph, where per-object calls into
//! the global allocator would dominate.
//!
//! # Key Features
//!
//! - **Fixed-size blocks**: Every block has the same size and alignment, fixed at construction
//! - **Page-based growth**: Memory is requested one page of many blocks at a time, lazily
//! - **Intrusive free list**: Free blocks store the free list in their own memory, so there is no
//!   per-block bookkeeping overhead
//! - **LIFO reuse**: The most recently deallocated block is the next one handed out
//! - **Pluggable backing allocator**: Pages come from any [`std::alloc::GlobalAlloc`]
//! - **Typed convenience layer**: [`BlockAllocator::create()`] and [`BlockAllocator::release()`]
//!   place and drop values in blocks
//! - **Thread mobility**: A pool can be moved between threads but not shared without
//!   synchronization
//!
//! # Block size
//!
//! The block size a pool actually uses may be larger than requested. It is raised to at least
//! [`MIN_BLOCK_SIZE`] so that a free block can hold the free list link, then rounded up to a
//! multiple of [`BLOCK_ALIGN`] so that consecutive blocks in a page stay aligned. See
//! [`adjust_block_size()`].
//!
//! # Memory lifetime
//!
//! Pages are never returned to the backing allocator while the pool is alive, even when every
//! block in them is free. Dropping the pool releases all pages at once; any blocks still lent out
//! at that point become dangling.
//!
//! # Examples
//!
//! ## Raw blocks
//!
//! ```rust
//! use fixed_block_pool::FixedBlockPool;
//! use new_zealand::nz;
//!
//! let mut pool = FixedBlockPool::new(32, nz!(128));
//!
//! let block = pool.allocate().unwrap();
//!
//! // SAFETY: The block is at least 32 bytes and not used by anyone else.
//! unsafe { block.write_bytes(0xAA, 32) };
//!
//! // SAFETY: The block came from this pool and has not been deallocated yet.
//! unsafe { pool.deallocate(block) };
//!
//! assert!(pool.is_empty());
//! assert_eq!(pool.page_count(), 1);
//! ```
//!
//! ## Typed values
//!
//! ```rust
//! use fixed_block_pool::{BlockAllocator, FixedBlockPool};
//! use new_zealand::nz;
//!
//! struct Particle {
//!     x: f32,
//!     y: f32,
//!     z: f32,
//!     life: i32,
//! }
//!
//! let mut pool = FixedBlockPool::builder()
//!     .block_size_of::<Particle>()
//!     .blocks_per_page(nz!(1024))
//!     .build();
//!
//! let mut particle = pool
//!     .create(Particle {
//!         x: 0.0,
//!         y: 1.0,
//!         z: 2.0,
//!         life: 100,
//!     })
//!     .unwrap();
//!
//! // SAFETY: The particle is alive and we hold the only pointer to it.
//! unsafe { particle.as_mut().life -= 1 };
//!
//! // SAFETY: The particle was created by this pool and is released exactly once.
//! unsafe { pool.release(particle) };
//! ```
//!
//! ## Handling allocation failure
//!
//! ```rust
//! use fixed_block_pool::{Error, FixedBlockPool};
//! use new_zealand::nz;
//!
//! let mut pool = FixedBlockPool::new(64, nz!(16));
//!
//! match pool.allocate() {
//!     Ok(block) => {
//!         // SAFETY: The block came from this pool and has not been deallocated yet.
//!         unsafe { pool.deallocate(block) };
//!     }
//!     Err(Error::OutOfMemory { page_bytes }) => {
//!         eprintln!("could not obtain a {page_bytes} byte page");
//!     }
//!     Err(error) => panic!("unexpected error: {error}"),
//! }
//! ```
//!
//! # Logging
//!
//! The pool emits [`tracing`](https://docs.rs/tracing) events when it obtains a new page
//! (`DEBUG`), when the backing allocator refuses a page (`WARN`) and when it releases its pages
//! on drop (`TRACE`). Allocating and deallocating blocks from existing pages is not logged.

mod block_allocator;
mod builder;
mod error;
mod free_list;
mod page;
mod pool;
mod sizing;

pub use block_allocator::*;
pub use builder::*;
pub use error::*;
pub(crate) use free_list::*;
pub(crate) use page::*;
pub use pool::{DEFAULT_BLOCKS_PER_PAGE, FixedBlockPool};
pub use sizing::*;
