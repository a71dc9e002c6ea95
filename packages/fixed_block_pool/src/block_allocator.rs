use std::alloc::Layout;
use std::any::type_name;
use std::ptr::NonNull;

use crate::Result;

/// An allocator of fixed-layout memory blocks.
///
/// Types that want their storage to come from a specific pool take a `BlockAllocator` as a
/// parameter instead of relying on the global allocator. [`FixedBlockPool`][crate::FixedBlockPool]
/// is the implementation provided by this crate.
///
/// Besides the raw block interface, the trait provides [`create()`][Self::create] and
/// [`release()`][Self::release] for placing typed values into blocks.
///
/// # Examples
///
/// ```
/// use fixed_block_pool::{BlockAllocator, FixedBlockPool};
/// use new_zealand::nz;
///
/// struct Point {
///     x: f32,
///     y: f32,
/// }
///
/// fn spawn_points(allocator: &mut impl BlockAllocator, count: usize) -> Vec<std::ptr::NonNull<Point>> {
///     (0..count)
///         .map(|_| allocator.create(Point { x: 0.0, y: 0.0 }).unwrap())
///         .collect()
/// }
///
/// let mut pool = FixedBlockPool::builder()
///     .block_size_of::<Point>()
///     .blocks_per_page(nz!(64))
///     .build();
///
/// let points = spawn_points(&mut pool, 100);
/// assert_eq!(pool.len(), 100);
///
/// for point in points {
///     // SAFETY: Each point was created by this pool and is released exactly once.
///     unsafe { pool.release(point) };
/// }
///
/// assert!(pool.is_empty());
/// ```
pub trait BlockAllocator {
    /// The layout of every block this allocator hands out.
    #[must_use]
    fn block_layout(&self) -> Layout;

    /// Lends out one block of [`block_layout()`][Self::block_layout].
    ///
    /// # Errors
    ///
    /// Returns an error if the allocator needed more memory and could not obtain it.
    fn allocate(&mut self) -> Result<NonNull<u8>>;

    /// Returns a block to the allocator.
    ///
    /// # Safety
    ///
    /// The caller must ensure that the block was returned by [`allocate()`][Self::allocate] on
    /// this same allocator, that it has not been deallocated since and that nothing accesses it
    /// after this call.
    unsafe fn deallocate(&mut self, block: NonNull<u8>);

    /// Moves `value` into a freshly allocated block and returns a pointer to it.
    ///
    /// The value stays alive until it is passed to [`release()`][Self::release]. If the
    /// allocator is dropped first, the value is leaked without being dropped.
    ///
    /// # Errors
    ///
    /// Returns an error if no block could be allocated. The value is dropped in that case.
    ///
    /// # Panics
    ///
    /// Panics if `T` is larger or more strictly aligned than a block.
    fn create<T>(&mut self, value: T) -> Result<NonNull<T>>
    where
        Self: Sized,
    {
        let block_layout = self.block_layout();

        assert!(
            size_of::<T>() <= block_layout.size() && align_of::<T>() <= block_layout.align(),
            "{} (size {}, align {}) does not fit in a block of size {}, align {}",
            type_name::<T>(),
            size_of::<T>(),
            align_of::<T>(),
            block_layout.size(),
            block_layout.align()
        );

        let ptr = self.allocate()?.cast::<T>();

        // SAFETY: The block is freshly lent to us, and we asserted above that it is large enough
        // and sufficiently aligned for a T.
        unsafe {
            ptr.write(value);
        }

        Ok(ptr)
    }

    /// Drops the value in place and returns its block to the allocator.
    ///
    /// # Safety
    ///
    /// The caller must ensure that `ptr` was returned by [`create()`][Self::create] on this same
    /// allocator, that it has not been released since and that nothing accesses the value after
    /// this call.
    unsafe fn release<T>(&mut self, ptr: NonNull<T>)
    where
        Self: Sized,
    {
        // SAFETY: The caller guarantees ptr points to a live T created by this allocator that
        // nobody else will access again.
        unsafe {
            ptr.drop_in_place();
        }

        // SAFETY: The caller guarantees the block came from create() on this allocator, which
        // obtained it from allocate(), and that it has not been released yet.
        unsafe {
            self.deallocate(ptr.cast::<u8>());
        }
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
#[allow(
    clippy::undocumented_unsafe_blocks,
    clippy::multiple_unsafe_ops_per_block,
    reason = "test code doesn't need the same safety rigor as production code"
)]
mod tests {
    use std::cell::Cell;
    use std::rc::Rc;

    use new_zealand::nz;
    use static_assertions::assert_obj_safe;

    use super::*;
    use crate::{BLOCK_ALIGN, FixedBlockPool};

    assert_obj_safe!(BlockAllocator);

    struct DropCounter {
        drops: Rc<Cell<usize>>,
        payload: u32,
    }

    impl Drop for DropCounter {
        fn drop(&mut self) {
            self.drops.set(self.drops.get().wrapping_add(1));
        }
    }

    #[test]
    fn create_places_value_in_pool_block() {
        let mut pool = FixedBlockPool::builder()
            .block_size_of::<(u32, u64)>()
            .blocks_per_page(nz!(8))
            .build();

        let value = pool.create((7_u32, 11_u64)).unwrap();

        assert_eq!(pool.len(), 1);
        assert_eq!(pool.page_count(), 1);
        assert_eq!(unsafe { value.read() }, (7, 11));

        unsafe { pool.release(value) };

        assert!(pool.is_empty());
    }

    #[test]
    fn release_drops_value_once() {
        let drops = Rc::new(Cell::new(0));

        let mut pool = FixedBlockPool::builder()
            .block_size_of::<DropCounter>()
            .blocks_per_page(nz!(4))
            .build();

        let first = pool
            .create(DropCounter {
                drops: Rc::clone(&drops),
                payload: 1,
            })
            .unwrap();
        let second = pool
            .create(DropCounter {
                drops: Rc::clone(&drops),
                payload: 2,
            })
            .unwrap();

        unsafe {
            assert_eq!(first.as_ref().payload, 1);
            assert_eq!(second.as_ref().payload, 2);
        }

        unsafe { pool.release(first) };
        assert_eq!(drops.get(), 1);

        unsafe { pool.release(second) };
        assert_eq!(drops.get(), 2);
    }

    #[test]
    fn released_block_is_reused_for_next_value() {
        let mut pool = FixedBlockPool::new(size_of::<u64>(), nz!(4));

        let first = pool.create(1_u64).unwrap();
        unsafe { pool.release(first) };

        let second = pool.create(2_u64).unwrap();

        assert_eq!(first, second);
        assert_eq!(unsafe { second.read() }, 2);
    }

    #[test]
    fn smaller_types_fit_in_larger_blocks() {
        let mut pool = FixedBlockPool::new(64, nz!(4));

        let byte = pool.create(0xAB_u8).unwrap();
        let word = pool.create(0xABCD_u16).unwrap();

        unsafe {
            assert_eq!(byte.read(), 0xAB);
            assert_eq!(word.read(), 0xABCD);

            pool.release(byte);
            pool.release(word);
        }
    }

    #[test]
    fn zero_sized_values_still_take_a_block() {
        let mut pool = FixedBlockPool::new(8, nz!(4));

        let unit = pool.create(()).unwrap();
        assert_eq!(pool.len(), 1);

        unsafe { pool.release(unit) };
        assert!(pool.is_empty());
    }

    #[test]
    #[should_panic]
    fn create_too_large_value_panics() {
        let mut pool = FixedBlockPool::new(8, nz!(4));

        _ = pool.create([0_u64; 4]);
    }

    #[test]
    #[should_panic]
    fn create_over_aligned_value_panics() {
        #[repr(align(64))]
        struct CacheLine;

        let mut pool = FixedBlockPool::new(128, nz!(4));

        _ = pool.create(CacheLine);
    }

    #[test]
    fn works_through_trait_object() {
        let mut pool = FixedBlockPool::new(32, nz!(2));
        let allocator: &mut dyn BlockAllocator = &mut pool;

        assert_eq!(allocator.block_layout().size(), 32);
        assert_eq!(allocator.block_layout().align(), BLOCK_ALIGN);

        let a = allocator.allocate().unwrap();
        let b = allocator.allocate().unwrap();
        let c = allocator.allocate().unwrap();

        unsafe {
            allocator.deallocate(b);
        }

        assert_eq!(allocator.allocate().unwrap(), b);

        unsafe {
            allocator.deallocate(a);
            allocator.deallocate(b);
            allocator.deallocate(c);
        }

        assert!(pool.is_empty());
        assert_eq!(pool.page_count(), 2);
    }
}
