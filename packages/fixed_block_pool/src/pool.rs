use std::alloc::{GlobalAlloc, Layout, System};
use std::any::type_name;
use std::fmt;
use std::num::NonZero;
use std::ptr::NonNull;

#[cfg(debug_assertions)]
use foldhash::{HashSet, HashSetExt};
use new_zealand::nz;
use tracing::{debug, trace, warn};

use crate::{
    BlockAllocator, Error, FixedBlockPoolBuilder, FreeList, PageLayout, Result, adjust_block_size,
};

/// Number of blocks carved out of each page when the caller does not say otherwise.
pub const DEFAULT_BLOCKS_PER_PAGE: NonZero<usize> = nz!(4096);

/// A pool of equal-sized raw memory blocks.
///
/// The pool requests memory from a backing allocator one large page at a time and slices each
/// page into `blocks_per_page` blocks of [`block_size()`][Self::block_size] bytes. Free blocks
/// from all pages form a single intrusive free list, threaded through the blocks' own memory,
/// so both [`allocate()`][Self::allocate] and [`deallocate()`][Self::deallocate] are O(1)
/// outside of the occasional page growth.
///
/// The pool hands out raw, uninitialized memory. It never constructs or drops values in its
/// blocks - what lives in a block is entirely up to the caller. See [`BlockAllocator::create()`]
/// for a typed convenience layer.
///
/// Pages are only released when the pool itself is dropped. Blocks still lent out at that point
/// become dangling; the pool does not track or report them.
///
/// # Reuse order
///
/// A deallocated block is the first to be handed out again by the next allocation (LIFO), which
/// keeps recently touched memory hot for bursty allocate/deallocate patterns.
///
/// # Examples
///
/// ```
/// use fixed_block_pool::FixedBlockPool;
/// use new_zealand::nz;
///
/// let mut pool = FixedBlockPool::new(24, nz!(1024));
///
/// let block = pool.allocate().unwrap();
/// assert_eq!(pool.len(), 1);
///
/// // SAFETY: The block came from this pool and has not been deallocated yet.
/// unsafe { pool.deallocate(block) };
///
/// // The most recently freed block is reused first.
/// assert_eq!(pool.allocate().unwrap(), block);
/// ```
///
/// # Thread safety
///
/// The pool is thread-mobile ([`Send`], if the backing allocator is) but not thread-safe
/// ([`Sync`]). Sharing a pool between threads requires external synchronization.
pub struct FixedBlockPool<A: GlobalAlloc = System> {
    /// Where pages come from and where they go back to when the pool is dropped.
    allocator: A,

    layout: PageLayout,

    /// Every free block of every page, most recently freed first.
    free_list: FreeList,

    /// Base addresses of all pages, in the order they were allocated. Only grows.
    pages: Vec<NonNull<u8>>,

    /// Number of blocks currently lent out to callers.
    lent: usize,

    /// Addresses of the blocks currently lent out, so that debug builds can catch foreign
    /// pointers and double frees passed to `deallocate()`.
    #[cfg(debug_assertions)]
    lent_blocks: HashSet<usize>,
}

impl FixedBlockPool {
    /// Creates a builder for configuring and constructing a [`FixedBlockPool`].
    ///
    /// # Examples
    ///
    /// ```
    /// use fixed_block_pool::FixedBlockPool;
    /// use new_zealand::nz;
    ///
    /// let pool = FixedBlockPool::builder()
    ///     .block_size_of::<[u64; 3]>()
    ///     .blocks_per_page(nz!(256))
    ///     .build();
    ///
    /// assert_eq!(pool.block_size(), 24);
    /// assert_eq!(pool.blocks_per_page(), 256);
    /// ```
    #[inline]
    pub fn builder() -> FixedBlockPoolBuilder {
        FixedBlockPoolBuilder::new()
    }

    /// Creates a pool of blocks of at least `block_size` bytes, backed by the system allocator.
    ///
    /// No memory is requested until the first allocation.
    ///
    /// # Panics
    ///
    /// Panics if `block_size` is zero or if a page of `blocks_per_page` blocks is too large to
    /// be allocated.
    #[must_use]
    pub fn new(block_size: usize, blocks_per_page: NonZero<usize>) -> Self {
        Self::new_inner(block_size, blocks_per_page, System)
    }
}

impl<A: GlobalAlloc> FixedBlockPool<A> {
    /// Creates a pool of blocks of at least `block_size` bytes whose pages are obtained from
    /// `allocator`.
    ///
    /// # Panics
    ///
    /// Panics if `block_size` is zero or if a page of `blocks_per_page` blocks is too large to
    /// be allocated.
    #[must_use]
    pub fn with_allocator(block_size: usize, blocks_per_page: NonZero<usize>, allocator: A) -> Self {
        Self::new_inner(block_size, blocks_per_page, allocator)
    }

    #[must_use]
    pub(crate) fn new_inner(
        requested_block_size: usize,
        blocks_per_page: NonZero<usize>,
        allocator: A,
    ) -> Self {
        assert!(
            requested_block_size > 0,
            "FixedBlockPool must have non-zero block size"
        );

        let block_size = adjust_block_size(requested_block_size).unwrap_or_else(|| {
            panic!("block size {requested_block_size} cannot be rounded up to block alignment")
        });

        Self {
            allocator,
            layout: PageLayout::calculate(block_size, blocks_per_page),
            free_list: FreeList::new(),
            pages: Vec::new(),
            lent: 0,
            #[cfg(debug_assertions)]
            lent_blocks: HashSet::new(),
        }
    }

    /// The size in bytes of every block handed out by the pool.
    ///
    /// This is the requested block size adjusted up to hold at least one pointer and to be a
    /// multiple of [`BLOCK_ALIGN`][crate::BLOCK_ALIGN], so it may exceed what was requested.
    #[must_use]
    #[inline]
    pub fn block_size(&self) -> usize {
        self.layout.block_layout().size()
    }

    /// The number of blocks carved out of each page.
    #[must_use]
    #[inline]
    pub fn blocks_per_page(&self) -> usize {
        self.layout.blocks_per_page().get()
    }

    /// The memory layout of a single block.
    #[must_use]
    #[inline]
    pub fn block_layout(&self) -> Layout {
        self.layout.block_layout()
    }

    /// The number of blocks currently lent out, i.e. allocated and not yet deallocated.
    #[must_use]
    #[inline]
    pub fn len(&self) -> usize {
        self.lent
    }

    /// Whether no blocks are currently lent out.
    ///
    /// An empty pool may still be holding pages.
    #[must_use]
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.lent == 0
    }

    /// The total number of blocks carved out of the pages obtained so far, lent out or not.
    #[must_use]
    #[inline]
    pub fn capacity(&self) -> usize {
        // Overflow here would imply capacity is greater than virtual memory - impossible.
        self.pages.len().wrapping_mul(self.blocks_per_page())
    }

    /// The number of pages obtained from the backing allocator so far.
    #[must_use]
    #[inline]
    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    /// Lends out a block of [`block_size()`][Self::block_size] bytes, aligned to
    /// [`BLOCK_ALIGN`][crate::BLOCK_ALIGN].
    ///
    /// The block is either fresh or the most recently deallocated one. Its contents are
    /// unspecified. If no block is free, the pool first obtains one more page from the backing
    /// allocator.
    ///
    /// # Errors
    ///
    /// Returns [`Error::OutOfMemory`] if a new page was needed and the backing allocator could
    /// not provide it. The pool is unchanged in that case.
    ///
    /// # Examples
    ///
    /// ```
    /// use fixed_block_pool::{BLOCK_ALIGN, FixedBlockPool};
    /// use new_zealand::nz;
    ///
    /// let mut pool = FixedBlockPool::new(3, nz!(16));
    ///
    /// let block = pool.allocate().unwrap();
    /// assert_eq!(block.as_ptr().align_offset(BLOCK_ALIGN), 0);
    /// assert_eq!(pool.page_count(), 1);
    /// ```
    pub fn allocate(&mut self) -> Result<NonNull<u8>> {
        if self.free_list.is_empty() {
            self.grow()?;
        }

        let block = self
            .free_list
            .pop()
            .expect("the free list cannot be empty after a successful grow()");

        // Cannot overflow because every lent block occupies distinct memory.
        self.lent = self.lent.wrapping_add(1);

        #[cfg(debug_assertions)]
        {
            let newly_lent = self.lent_blocks.insert(block.addr().get());
            assert!(
                newly_lent,
                "block {block:p} was handed out while already lent out - the free list is corrupted"
            );

            self.integrity_check();
        }

        Ok(block)
    }

    /// Returns a block to the pool, making it the first candidate for the next allocation.
    ///
    /// Accepts either a block or `None`; `None` (a null block) is ignored.
    ///
    /// # Panics
    ///
    /// In debug builds, panics if the block is not currently lent out by this pool.
    ///
    /// # Safety
    ///
    /// The caller must ensure that:
    /// - The block was returned by [`allocate()`][Self::allocate] on this same pool.
    /// - The block has not already been deallocated since it was allocated.
    /// - Nothing accesses the block after this call.
    ///
    /// The pool does not validate ownership in release builds; violating these requirements is
    /// undefined behavior.
    ///
    /// # Examples
    ///
    /// ```
    /// use std::ptr::NonNull;
    ///
    /// use fixed_block_pool::FixedBlockPool;
    /// use new_zealand::nz;
    ///
    /// let mut pool = FixedBlockPool::new(16, nz!(64));
    /// let block = pool.allocate().unwrap();
    ///
    /// // A null block is a no-op.
    /// // SAFETY: Passing no block is always sound.
    /// unsafe { pool.deallocate(NonNull::new(std::ptr::null_mut::<u8>())) };
    /// assert_eq!(pool.len(), 1);
    ///
    /// // SAFETY: The block came from this pool and has not been deallocated yet.
    /// unsafe { pool.deallocate(block) };
    /// assert!(pool.is_empty());
    /// ```
    pub unsafe fn deallocate(&mut self, block: impl Into<Option<NonNull<u8>>>) {
        let Some(block) = block.into() else {
            return;
        };

        #[cfg(debug_assertions)]
        {
            let was_lent = self.lent_blocks.remove(&block.addr().get());
            assert!(
                was_lent,
                "deallocate({block:p}) was given a block that this pool has not lent out - it is either foreign or already deallocated"
            );
        }

        // SAFETY: The caller guarantees the block was lent out by this pool and is no longer
        // used, so it is a BLOCK_ALIGN-aligned block of at least MIN_BLOCK_SIZE bytes that
        // nobody else touches until we hand it out again.
        unsafe {
            self.free_list.push(block);
        }

        // Cannot underflow as long as the caller upholds the safety requirements.
        self.lent = self.lent.wrapping_sub(1);

        #[cfg(debug_assertions)]
        self.integrity_check();
    }

    /// Ensures that at least `additional` blocks can be allocated without obtaining new pages.
    ///
    /// Grows the pool by whole pages. Does nothing if enough blocks are already free.
    ///
    /// # Errors
    ///
    /// Returns [`Error::OutOfMemory`] if the backing allocator could not provide a page. Pages
    /// obtained before the failure are kept.
    ///
    /// # Examples
    ///
    /// ```
    /// use fixed_block_pool::FixedBlockPool;
    /// use new_zealand::nz;
    ///
    /// let mut pool = FixedBlockPool::new(8, nz!(100));
    ///
    /// pool.reserve(250).unwrap();
    /// assert_eq!(pool.page_count(), 3);
    /// assert_eq!(pool.capacity(), 300);
    /// ```
    #[cfg_attr(test, mutants::skip)] // Can be mutated to infinitely growing memory use.
    pub fn reserve(&mut self, additional: usize) -> Result<()> {
        while self.free_list.len() < additional {
            self.grow()?;
        }

        Ok(())
    }

    /// Obtains one new page from the backing allocator and links all its blocks onto the free list.
    fn grow(&mut self) -> Result<()> {
        let page_layout = self.layout.page_layout();

        // Make room for the bookkeeping first, so that nothing can fail between obtaining the
        // page and recording it.
        if self.pages.try_reserve(1).is_err() {
            warn!(
                pages = self.pages.len(),
                "could not grow the page list to record another page"
            );

            return Err(Error::OutOfMemory {
                page_bytes: page_layout.size(),
            });
        }

        // SAFETY: The page layout is not zero-sized - it holds at least one block of at least
        // MIN_BLOCK_SIZE bytes, as enforced by PageLayout::calculate().
        let Some(page) = NonNull::new(unsafe { self.allocator.alloc(page_layout) }) else {
            warn!(
                page_bytes = page_layout.size(),
                pages = self.pages.len(),
                "backing allocator could not provide a page"
            );

            return Err(Error::OutOfMemory {
                page_bytes: page_layout.size(),
            });
        };

        self.pages.push(page);

        // We link the blocks from the end of the page towards the start, so the first block of
        // the page is the first one handed out and allocation proceeds in address order.
        for index in (0..self.blocks_per_page()).rev() {
            // SAFETY: The page was just allocated with the page layout and index is in bounds.
            let block = unsafe { self.layout.block_ptr(page, index) };

            // SAFETY: The block lies within our fresh page, is aligned to BLOCK_ALIGN and at least
            // MIN_BLOCK_SIZE bytes (guaranteed by PageLayout) and nobody else knows about it yet.
            unsafe {
                self.free_list.push(block);
            }
        }

        debug!(
            page_bytes = page_layout.size(),
            blocks_per_page = self.blocks_per_page(),
            pages = self.pages.len(),
            "fixed block pool obtained a new page"
        );

        Ok(())
    }

    #[cfg_attr(test, mutants::skip)] // This is essentially test logic, mutation is meaningless.
    #[cfg(debug_assertions)]
    pub(crate) fn integrity_check(&self) {
        // Cannot overflow because both are bounded by the number of blocks in existence.
        let accounted = self.free_list.len().wrapping_add(self.lent);

        assert!(
            accounted == self.capacity(),
            "{} free + {} lent blocks do not add up to capacity {} in pool of {}",
            self.free_list.len(),
            self.lent,
            self.capacity(),
            type_name::<A>()
        );

        assert!(
            self.lent_blocks.len() == self.lent,
            "{} blocks recorded as lent but lent count is {} in pool of {}",
            self.lent_blocks.len(),
            self.lent,
            type_name::<A>()
        );
    }
}

impl<A: GlobalAlloc> BlockAllocator for FixedBlockPool<A> {
    #[inline]
    fn block_layout(&self) -> Layout {
        Self::block_layout(self)
    }

    #[inline]
    fn allocate(&mut self) -> Result<NonNull<u8>> {
        Self::allocate(self)
    }

    #[inline]
    unsafe fn deallocate(&mut self, block: NonNull<u8>) {
        // SAFETY: Forwarding safety requirements to the caller.
        unsafe {
            Self::deallocate(self, block);
        }
    }
}

impl<A: GlobalAlloc> fmt::Debug for FixedBlockPool<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FixedBlockPool")
            .field("allocator", &format_args!("{}", type_name::<A>()))
            .field("block_size", &self.block_size())
            .field("blocks_per_page", &self.blocks_per_page())
            .field("page_count", &self.page_count())
            .field("len", &self.lent)
            .finish_non_exhaustive()
    }
}

impl<A: GlobalAlloc> Drop for FixedBlockPool<A> {
    fn drop(&mut self) {
        trace!(
            pages = self.pages.len(),
            "fixed block pool releasing its pages"
        );

        let page_layout = self.layout.page_layout();

        for page in &self.pages {
            // SAFETY: Every page was allocated by this allocator with this layout in grow(),
            // and each one is released exactly once, here.
            unsafe {
                self.allocator.dealloc(page.as_ptr(), page_layout);
            }
        }
    }
}

// SAFETY: The pool exclusively owns its pages and the free blocks in them. The raw pointers it
// holds are never shared with other threads by the pool itself and all mutation goes through
// &mut self, so moving the pool to another thread is sound if the allocator can move too.
unsafe impl<A: GlobalAlloc + Send> Send for FixedBlockPool<A> {}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
#[allow(
    clippy::undocumented_unsafe_blocks,
    clippy::multiple_unsafe_ops_per_block,
    clippy::arithmetic_side_effects,
    clippy::indexing_slicing,
    reason = "test code doesn't need the same safety rigor as production code"
)]
mod tests {
    use std::cell::Cell;
    use std::collections::HashSet;
    use std::ptr;
    use std::rc::Rc;

    use static_assertions::{assert_impl_all, assert_not_impl_any};

    use super::*;
    use crate::{BLOCK_ALIGN, MIN_BLOCK_SIZE};

    assert_impl_all!(FixedBlockPool: Send, fmt::Debug);
    assert_not_impl_any!(FixedBlockPool: Sync);
    assert_not_impl_any!(FixedBlockPool<CountingAllocator>: Send, Sync);

    /// Forwards to the system allocator and counts page allocations and releases.
    #[derive(Clone, Debug, Default)]
    struct CountingAllocator {
        allocations: Rc<Cell<usize>>,
        deallocations: Rc<Cell<usize>>,
    }

    unsafe impl GlobalAlloc for CountingAllocator {
        unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
            self.allocations.set(self.allocations.get() + 1);
            unsafe { System.alloc(layout) }
        }

        unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
            self.deallocations.set(self.deallocations.get() + 1);
            unsafe { System.dealloc(ptr, layout) }
        }
    }

    /// Serves a fixed number of page requests from the system allocator, then refuses.
    #[derive(Debug)]
    struct RationedAllocator {
        remaining: Rc<Cell<usize>>,
    }

    unsafe impl GlobalAlloc for RationedAllocator {
        unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
            match self.remaining.get() {
                0 => ptr::null_mut(),
                remaining => {
                    self.remaining.set(remaining - 1);
                    unsafe { System.alloc(layout) }
                }
            }
        }

        unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
            unsafe { System.dealloc(ptr, layout) }
        }
    }

    fn rationed(pages: usize) -> (RationedAllocator, Rc<Cell<usize>>) {
        let remaining = Rc::new(Cell::new(pages));

        (
            RationedAllocator {
                remaining: Rc::clone(&remaining),
            },
            remaining,
        )
    }

    #[test]
    fn smoke_test() {
        let mut pool = FixedBlockPool::new(size_of::<u64>(), nz!(4));

        let a = pool.allocate().unwrap().cast::<u64>();
        let b = pool.allocate().unwrap().cast::<u64>();
        let c = pool.allocate().unwrap().cast::<u64>();

        unsafe {
            a.write(1);
            b.write(2);
            c.write(3);

            assert_eq!(a.read(), 1);
            assert_eq!(b.read(), 2);
            assert_eq!(c.read(), 3);
        }

        assert_eq!(pool.len(), 3);

        unsafe { pool.deallocate(b.cast::<u8>()) };

        assert_eq!(pool.len(), 2);

        let d = pool.allocate().unwrap().cast::<u64>();
        assert_eq!(d, b);

        unsafe {
            d.write(4);

            assert_eq!(a.read(), 1);
            assert_eq!(c.read(), 3);
            assert_eq!(d.read(), 4);
        }

        unsafe {
            pool.deallocate(a.cast::<u8>());
            pool.deallocate(c.cast::<u8>());
            pool.deallocate(d.cast::<u8>());
        }

        assert!(pool.is_empty());
    }

    #[test]
    fn new_pool_has_no_pages() {
        let allocator = CountingAllocator::default();
        let pool = FixedBlockPool::with_allocator(16, nz!(8), allocator.clone());

        assert_eq!(pool.page_count(), 0);
        assert_eq!(pool.capacity(), 0);
        assert_eq!(pool.len(), 0);
        assert!(pool.is_empty());
        assert_eq!(allocator.allocations.get(), 0);
    }

    #[test]
    fn default_blocks_per_page() {
        assert_eq!(DEFAULT_BLOCKS_PER_PAGE.get(), 4096);

        let pool = FixedBlockPool::builder().block_size(32).build();
        assert_eq!(pool.blocks_per_page(), 4096);
    }

    #[test]
    fn block_size_is_adjusted() {
        for requested in [1, 2, 3, 7, 8, 9, 15, 16, 17, 24, 100, 1000] {
            let pool = FixedBlockPool::new(requested, nz!(4));

            assert!(pool.block_size() >= requested);
            assert!(pool.block_size() >= MIN_BLOCK_SIZE);
            assert_eq!(pool.block_size() % BLOCK_ALIGN, 0);
            assert_eq!(pool.block_layout().size(), pool.block_size());
            assert_eq!(pool.block_layout().align(), BLOCK_ALIGN);
        }
    }

    #[test]
    #[should_panic]
    fn zero_block_size_panics() {
        drop(FixedBlockPool::new(0, nz!(4)));
    }

    #[test]
    #[should_panic]
    fn unroundable_block_size_panics() {
        drop(FixedBlockPool::new(usize::MAX, nz!(1)));
    }

    #[test]
    #[should_panic]
    fn oversized_page_panics() {
        drop(FixedBlockPool::new(
            1 << 20,
            NonZero::new(usize::MAX >> 8).unwrap(),
        ));
    }

    #[test]
    fn first_allocation_adds_exactly_one_page() {
        let allocator = CountingAllocator::default();
        let mut pool = FixedBlockPool::with_allocator(16, nz!(8), allocator.clone());

        for _ in 0..8 {
            _ = pool.allocate().unwrap();
            assert_eq!(pool.page_count(), 1);
            assert_eq!(allocator.allocations.get(), 1);
        }

        assert_eq!(pool.capacity(), 8);
        assert_eq!(pool.len(), 8);
    }

    #[test]
    fn allocations_within_a_page_are_distinct_aligned_and_disjoint() {
        let mut pool = FixedBlockPool::new(12, nz!(32));

        let mut addresses: Vec<usize> = (0..32)
            .map(|_| pool.allocate().unwrap().addr().get())
            .collect();

        for address in &addresses {
            assert_eq!(address % BLOCK_ALIGN, 0);
        }

        addresses.sort_unstable();

        for pair in addresses.windows(2) {
            assert!(
                pair[1] - pair[0] >= pool.block_size(),
                "blocks at {:#x} and {:#x} overlap",
                pair[0],
                pair[1]
            );
        }

        assert_eq!(pool.page_count(), 1);
    }

    #[test]
    fn one_more_than_a_page_adds_a_second_page() {
        let allocator = CountingAllocator::default();
        let mut pool = FixedBlockPool::with_allocator(8, nz!(5), allocator.clone());

        for _ in 0..5 {
            _ = pool.allocate().unwrap();
        }

        assert_eq!(pool.page_count(), 1);

        _ = pool.allocate().unwrap();

        assert_eq!(pool.page_count(), 2);
        assert_eq!(pool.capacity(), 10);
        assert_eq!(allocator.allocations.get(), 2);
    }

    #[test]
    fn fresh_page_is_handed_out_in_address_order() {
        let mut pool = FixedBlockPool::new(16, nz!(6));

        let blocks: Vec<NonNull<u8>> = (0..6).map(|_| pool.allocate().unwrap()).collect();

        for pair in blocks.windows(2) {
            assert_eq!(
                pair[1].addr().get() - pair[0].addr().get(),
                pool.block_size()
            );
        }
    }

    #[test]
    fn deallocate_then_allocate_returns_same_block() {
        let mut pool = FixedBlockPool::new(40, nz!(16));

        let _keep = pool.allocate().unwrap();
        let block = pool.allocate().unwrap();

        unsafe { pool.deallocate(block) };

        assert_eq!(pool.allocate().unwrap(), block);
    }

    #[test]
    fn reuse_is_most_recently_freed_first() {
        let mut pool = FixedBlockPool::new(8, nz!(16));

        let blocks: Vec<NonNull<u8>> = (0..5).map(|_| pool.allocate().unwrap()).collect();

        unsafe {
            pool.deallocate(blocks[1]);
            pool.deallocate(blocks[3]);
            pool.deallocate(blocks[0]);
        }

        assert_eq!(pool.allocate().unwrap(), blocks[0]);
        assert_eq!(pool.allocate().unwrap(), blocks[3]);
        assert_eq!(pool.allocate().unwrap(), blocks[1]);
    }

    #[test]
    fn freed_blocks_are_reused_before_growing() {
        let allocator = CountingAllocator::default();
        let mut pool = FixedBlockPool::with_allocator(8, nz!(2), allocator.clone());

        let a = pool.allocate().unwrap();
        let b = pool.allocate().unwrap();

        unsafe { pool.deallocate(a) };

        assert_eq!(pool.allocate().unwrap(), a);
        assert_eq!(pool.page_count(), 1);

        unsafe {
            pool.deallocate(a);
            pool.deallocate(b);
        }

        _ = pool.allocate().unwrap();
        _ = pool.allocate().unwrap();

        assert_eq!(pool.page_count(), 1);
        assert_eq!(allocator.allocations.get(), 1);
    }

    #[test]
    fn deallocate_none_is_noop() {
        let mut pool = FixedBlockPool::new(16, nz!(4));

        let block = pool.allocate().unwrap();
        unsafe { pool.deallocate(block) };

        unsafe {
            pool.deallocate(None::<NonNull<u8>>);
            pool.deallocate(NonNull::new(ptr::null_mut::<u8>()));
        }

        assert!(pool.is_empty());
        assert_eq!(pool.allocate().unwrap(), block);
        assert_eq!(pool.len(), 1);
    }

    #[test]
    fn deallocate_none_on_fresh_pool_is_noop() {
        let mut pool = FixedBlockPool::new(16, nz!(4));

        unsafe { pool.deallocate(None::<NonNull<u8>>) };

        assert_eq!(pool.page_count(), 0);
        assert_eq!(pool.len(), 0);
    }

    #[test]
    fn queries_are_stable_across_use() {
        let mut pool = FixedBlockPool::new(20, nz!(3));

        let block_size = pool.block_size();
        let blocks_per_page = pool.blocks_per_page();

        let blocks: Vec<NonNull<u8>> = (0..10).map(|_| pool.allocate().unwrap()).collect();

        assert_eq!(pool.block_size(), block_size);
        assert_eq!(pool.blocks_per_page(), blocks_per_page);

        for block in blocks {
            unsafe { pool.deallocate(block) };
        }

        assert_eq!(pool.block_size(), block_size);
        assert_eq!(pool.blocks_per_page(), blocks_per_page);
        assert_eq!(blocks_per_page, 3);
    }

    #[test]
    fn whole_block_is_writable() {
        let mut pool = FixedBlockPool::new(100, nz!(4));

        let blocks: Vec<NonNull<u8>> = (0..4).map(|_| pool.allocate().unwrap()).collect();

        for (fill, block) in (1_u8..).zip(&blocks) {
            unsafe { block.write_bytes(fill, pool.block_size()) };
        }

        for (fill, block) in (1_u8..).zip(&blocks) {
            let bytes = unsafe { std::slice::from_raw_parts(block.as_ptr(), pool.block_size()) };
            assert!(bytes.iter().all(|byte| *byte == fill));
        }
    }

    #[test]
    fn out_of_memory_on_first_page_leaves_pool_unchanged() {
        let (allocator, remaining) = rationed(0);
        let mut pool = FixedBlockPool::with_allocator(16, nz!(8), allocator);

        let error = pool.allocate().unwrap_err();

        assert!(matches!(
            error,
            Error::OutOfMemory { page_bytes } if page_bytes == 16 * 8
        ));
        assert_eq!(pool.page_count(), 0);
        assert_eq!(pool.capacity(), 0);
        assert!(pool.is_empty());

        // The caller may retry once memory is available again.
        remaining.set(1);

        let block = pool.allocate().unwrap();
        assert_eq!(pool.page_count(), 1);

        unsafe { pool.deallocate(block) };
    }

    #[test]
    fn out_of_memory_on_later_page_keeps_existing_blocks() {
        let (allocator, _remaining) = rationed(1);
        let mut pool = FixedBlockPool::with_allocator(8, nz!(2), allocator);

        let a = pool.allocate().unwrap();
        let b = pool.allocate().unwrap();

        _ = pool.allocate().unwrap_err();

        assert_eq!(pool.page_count(), 1);
        assert_eq!(pool.len(), 2);

        // Blocks returned after the failure are served without touching the allocator.
        unsafe { pool.deallocate(b) };
        assert_eq!(pool.allocate().unwrap(), b);

        unsafe {
            pool.deallocate(a);
            pool.deallocate(b);
        }
    }

    #[test]
    fn drop_releases_every_page_once() {
        let allocator = CountingAllocator::default();

        {
            let mut pool = FixedBlockPool::with_allocator(8, nz!(4), allocator.clone());

            let blocks: Vec<NonNull<u8>> = (0..10).map(|_| pool.allocate().unwrap()).collect();

            for block in blocks {
                unsafe { pool.deallocate(block) };
            }

            assert_eq!(pool.page_count(), 3);
            assert_eq!(allocator.deallocations.get(), 0);
        }

        assert_eq!(allocator.allocations.get(), 3);
        assert_eq!(allocator.deallocations.get(), 3);
    }

    #[test]
    fn drop_with_blocks_still_lent_out() {
        let allocator = CountingAllocator::default();

        {
            let mut pool = FixedBlockPool::with_allocator(32, nz!(4), allocator.clone());

            for _ in 0..6 {
                _ = pool.allocate().unwrap();
            }
        }

        assert_eq!(allocator.deallocations.get(), 2);
    }

    #[test]
    fn drop_unused_pool_releases_nothing() {
        let allocator = CountingAllocator::default();

        drop(FixedBlockPool::with_allocator(
            8,
            nz!(4),
            allocator.clone(),
        ));

        assert_eq!(allocator.allocations.get(), 0);
        assert_eq!(allocator.deallocations.get(), 0);
    }

    #[test]
    fn reserve_grows_by_whole_pages() {
        let mut pool = FixedBlockPool::new(8, nz!(10));

        pool.reserve(0).unwrap();
        assert_eq!(pool.page_count(), 0);

        pool.reserve(1).unwrap();
        assert_eq!(pool.page_count(), 1);

        pool.reserve(10).unwrap();
        assert_eq!(pool.page_count(), 1);

        pool.reserve(11).unwrap();
        assert_eq!(pool.page_count(), 2);
        assert_eq!(pool.capacity(), 20);
    }

    #[test]
    fn reserve_counts_only_free_blocks() {
        let mut pool = FixedBlockPool::new(8, nz!(4));

        let blocks: Vec<NonNull<u8>> = (0..3).map(|_| pool.allocate().unwrap()).collect();

        pool.reserve(1).unwrap();
        assert_eq!(pool.page_count(), 1);

        pool.reserve(2).unwrap();
        assert_eq!(pool.page_count(), 2);

        // Reserved blocks are served without further growth.
        for _ in 0..5 {
            _ = pool.allocate().unwrap();
        }
        assert_eq!(pool.page_count(), 2);

        for block in blocks {
            unsafe { pool.deallocate(block) };
        }
    }

    #[test]
    fn reserve_out_of_memory_keeps_pages_obtained_so_far() {
        let (allocator, _remaining) = rationed(2);
        let mut pool = FixedBlockPool::with_allocator(8, nz!(4), allocator);

        let error = pool.reserve(100).unwrap_err();

        assert!(matches!(error, Error::OutOfMemory { .. }));
        assert_eq!(pool.page_count(), 2);
        assert_eq!(pool.capacity(), 8);
    }

    #[test]
    fn every_page_is_recorded_when_growing_one_block_at_a_time() {
        let allocator = CountingAllocator::default();

        {
            let mut pool = FixedBlockPool::with_allocator(8, nz!(1), allocator.clone());

            for expected_pages in 1..=100 {
                _ = pool.allocate().unwrap();
                assert_eq!(pool.page_count(), expected_pages);
            }

            assert_eq!(pool.capacity(), 100);
        }

        assert_eq!(allocator.allocations.get(), 100);
        assert_eq!(allocator.deallocations.get(), 100);
    }

    #[test]
    fn addresses_across_pages_are_distinct() {
        let mut pool = FixedBlockPool::new(8, nz!(7));

        let addresses: HashSet<usize> = (0..100)
            .map(|_| pool.allocate().unwrap().addr().get())
            .collect();

        assert_eq!(addresses.len(), 100);
        assert_eq!(pool.page_count(), 15);
    }

    #[test]
    fn can_move_between_threads() {
        let mut pool = FixedBlockPool::new(8, nz!(4));
        let address = pool.allocate().unwrap().addr().get();

        let handle = std::thread::spawn(move || {
            let block = pool.allocate().unwrap();
            assert_ne!(block.addr().get(), address);
            pool
        });

        let pool = handle.join().unwrap();
        assert_eq!(pool.len(), 2);
    }

    #[test]
    fn debug_output_describes_pool() {
        let mut pool = FixedBlockPool::new(24, nz!(4));
        _ = pool.allocate().unwrap();

        let debug_output = format!("{pool:?}");

        assert!(debug_output.contains("FixedBlockPool"), "{debug_output}");
        assert!(debug_output.contains("block_size: 24"), "{debug_output}");
        assert!(debug_output.contains("page_count: 1"), "{debug_output}");
        assert!(debug_output.contains("System"), "{debug_output}");
    }

    #[cfg(debug_assertions)]
    #[test]
    #[should_panic]
    fn double_free_panics_in_debug_builds() {
        let mut pool = FixedBlockPool::new(8, nz!(4));
        let block = pool.allocate().unwrap();

        unsafe {
            pool.deallocate(block);
            pool.deallocate(block);
        }
    }

    #[cfg(debug_assertions)]
    #[test]
    #[should_panic]
    fn foreign_block_panics_in_debug_builds() {
        let mut pool = FixedBlockPool::new(8, nz!(4));
        _ = pool.allocate().unwrap();

        let mut foreign = 0_usize;

        unsafe { pool.deallocate(NonNull::from(&mut foreign).cast::<u8>()) };
    }

    #[cfg(debug_assertions)]
    #[test]
    #[should_panic]
    fn block_from_other_pool_panics_in_debug_builds() {
        let mut pool_a = FixedBlockPool::new(8, nz!(4));
        let mut pool_b = FixedBlockPool::new(8, nz!(4));

        let block = pool_a.allocate().unwrap();
        _ = pool_b.allocate().unwrap();

        unsafe { pool_b.deallocate(block) };
    }
}
