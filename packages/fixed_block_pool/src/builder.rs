use std::alloc::{GlobalAlloc, System};
use std::any::type_name;
use std::cell::Cell;
use std::fmt;
use std::marker::PhantomData;
use std::num::NonZero;

use crate::{BLOCK_ALIGN, DEFAULT_BLOCKS_PER_PAGE, FixedBlockPool};

/// Builder for creating an instance of [`FixedBlockPool`].
///
/// The block size is mandatory and is set with either `.block_size()` or `.block_size_of::<T>()`.
/// The number of blocks per page defaults to [`DEFAULT_BLOCKS_PER_PAGE`] and pages are obtained
/// from the system allocator unless another one is supplied via `.allocator()`.
///
/// # Examples
///
/// Using a byte count:
///
/// ```
/// use fixed_block_pool::FixedBlockPool;
///
/// let pool = FixedBlockPool::builder().block_size(40).build();
/// assert!(pool.block_size() >= 40);
/// ```
///
/// Using a type:
///
/// ```
/// use fixed_block_pool::FixedBlockPool;
/// use new_zealand::nz;
///
/// let pool = FixedBlockPool::builder()
///     .block_size_of::<(u32, u32, u32)>()
///     .blocks_per_page(nz!(1024))
///     .build();
///
/// assert!(pool.block_size() >= 12);
/// assert_eq!(pool.blocks_per_page(), 1024);
/// ```
///
/// # Thread safety
///
/// The builder is thread-mobile ([`Send`], if the allocator is) but not thread-safe ([`Sync`]).
#[must_use]
pub struct FixedBlockPoolBuilder<A: GlobalAlloc = System> {
    block_size: Option<usize>,
    blocks_per_page: NonZero<usize>,
    allocator: A,

    // Prevents Sync while allowing Send - builders are thread-mobile but not thread-safe
    _not_sync: PhantomData<Cell<()>>,
}

impl FixedBlockPoolBuilder {
    #[inline]
    pub(crate) fn new() -> Self {
        Self {
            block_size: None,
            blocks_per_page: DEFAULT_BLOCKS_PER_PAGE,
            allocator: System,
            _not_sync: PhantomData,
        }
    }
}

impl<A: GlobalAlloc> FixedBlockPoolBuilder<A> {
    /// Sets the number of bytes the caller intends to store in each block.
    ///
    /// The pool may round this up; see [`FixedBlockPool::block_size()`].
    ///
    /// # Panics
    ///
    /// Panics if `bytes` is zero.
    #[inline]
    pub fn block_size(mut self, bytes: usize) -> Self {
        assert!(bytes > 0, "FixedBlockPool must have non-zero block size");
        self.block_size = Some(bytes);
        self
    }

    /// Sets the block size to fit one value of type `T`.
    ///
    /// # Panics
    ///
    /// Panics if `T` is zero-sized or if `T` requires a stricter alignment than
    /// [`BLOCK_ALIGN`], which is all the pool can guarantee for its blocks.
    ///
    /// # Examples
    ///
    /// ```
    /// use fixed_block_pool::FixedBlockPool;
    ///
    /// let pool = FixedBlockPool::builder().block_size_of::<usize>().build();
    /// assert_eq!(pool.block_size(), size_of::<usize>());
    /// ```
    #[inline]
    pub fn block_size_of<T>(self) -> Self {
        assert!(
            align_of::<T>() <= BLOCK_ALIGN,
            "{} requires {}-byte alignment but blocks are only aligned to {BLOCK_ALIGN} bytes",
            type_name::<T>(),
            align_of::<T>()
        );

        self.block_size(size_of::<T>())
    }

    /// Sets how many blocks each page is sliced into.
    #[inline]
    pub fn blocks_per_page(mut self, blocks: NonZero<usize>) -> Self {
        self.blocks_per_page = blocks;
        self
    }

    /// Sets the allocator that pages are obtained from and released to.
    ///
    /// # Examples
    ///
    /// ```
    /// use std::alloc::System;
    ///
    /// use fixed_block_pool::FixedBlockPool;
    ///
    /// let pool = FixedBlockPool::builder()
    ///     .block_size(16)
    ///     .allocator(System)
    ///     .build();
    /// ```
    #[inline]
    pub fn allocator<B: GlobalAlloc>(self, allocator: B) -> FixedBlockPoolBuilder<B> {
        FixedBlockPoolBuilder {
            block_size: self.block_size,
            blocks_per_page: self.blocks_per_page,
            allocator,
            _not_sync: PhantomData,
        }
    }

    /// Builds the pool with the specified configuration.
    ///
    /// No memory is requested from the allocator until the first block is allocated.
    ///
    /// # Panics
    ///
    /// Panics if no block size has been set using either [`block_size`](Self::block_size) or
    /// [`block_size_of`](Self::block_size_of), or if a page is too large to be allocated.
    #[must_use]
    #[inline]
    pub fn build(self) -> FixedBlockPool<A> {
        let block_size = self.block_size.expect(
            "block size must be set using .block_size() or .block_size_of::<T>() before calling .build()",
        );

        FixedBlockPool::new_inner(block_size, self.blocks_per_page, self.allocator)
    }
}

impl<A: GlobalAlloc> fmt::Debug for FixedBlockPoolBuilder<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FixedBlockPoolBuilder")
            .field("block_size", &self.block_size)
            .field("blocks_per_page", &self.blocks_per_page)
            .field("allocator", &format_args!("{}", type_name::<A>()))
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use static_assertions::{assert_impl_all, assert_not_impl_any};

    use super::*;
    use crate::MIN_BLOCK_SIZE;

    assert_impl_all!(FixedBlockPoolBuilder: Send, fmt::Debug);
    assert_not_impl_any!(FixedBlockPoolBuilder: Sync);

    #[test]
    fn builder_new_creates_default_state() {
        let builder = FixedBlockPoolBuilder::new();

        assert!(builder.block_size.is_none());
        assert_eq!(builder.blocks_per_page, DEFAULT_BLOCKS_PER_PAGE);
    }

    #[test]
    fn block_size_sets_block_size() {
        let builder = FixedBlockPoolBuilder::new().block_size(24);
        assert_eq!(builder.block_size, Some(24));
    }

    #[test]
    fn block_size_of_uses_type_size() {
        let builder = FixedBlockPoolBuilder::new().block_size_of::<[u16; 7]>();
        assert_eq!(builder.block_size, Some(14));
    }

    #[test]
    fn block_size_can_be_overridden() {
        let builder = FixedBlockPoolBuilder::new()
            .block_size_of::<u8>()
            .block_size(100);
        assert_eq!(builder.block_size, Some(100));

        let builder = FixedBlockPoolBuilder::new()
            .block_size(100)
            .block_size_of::<u32>();
        assert_eq!(builder.block_size, Some(4));
    }

    #[test]
    fn blocks_per_page_sets_fan_out() {
        let pool = FixedBlockPoolBuilder::new()
            .block_size(8)
            .blocks_per_page(NonZero::new(17).unwrap())
            .build();

        assert_eq!(pool.blocks_per_page(), 17);
    }

    #[test]
    fn build_applies_block_size_adjustment() {
        let pool = FixedBlockPoolBuilder::new().block_size(1).build();

        assert_eq!(pool.block_size(), MIN_BLOCK_SIZE);
        assert_eq!(pool.blocks_per_page(), DEFAULT_BLOCKS_PER_PAGE.get());
    }

    #[test]
    fn allocator_keeps_other_settings() {
        let builder = FixedBlockPoolBuilder::new()
            .block_size(48)
            .blocks_per_page(NonZero::new(3).unwrap())
            .allocator(System);

        assert_eq!(builder.block_size, Some(48));
        assert_eq!(builder.blocks_per_page.get(), 3);
    }

    #[test]
    #[should_panic]
    fn build_without_block_size_panics() {
        drop(FixedBlockPoolBuilder::new().build());
    }

    #[test]
    #[should_panic]
    fn zero_block_size_panics() {
        _ = FixedBlockPoolBuilder::new().block_size(0);
    }

    #[test]
    #[should_panic]
    fn zero_sized_type_panics() {
        _ = FixedBlockPoolBuilder::new().block_size_of::<()>();
    }

    #[test]
    #[should_panic]
    fn over_aligned_type_panics() {
        #[repr(align(64))]
        struct CacheLine;

        _ = FixedBlockPoolBuilder::new().block_size_of::<CacheLine>();
    }

    #[test]
    fn builder_is_debug() {
        let builder = FixedBlockPoolBuilder::new().block_size(16);
        let debug_output = format!("{builder:?}");

        assert!(debug_output.contains("FixedBlockPoolBuilder"));
        assert!(debug_output.contains("Some(16)"));
    }

    #[test]
    fn builder_can_move_between_threads() {
        let builder = FixedBlockPoolBuilder::new().block_size_of::<u64>();

        let handle = std::thread::spawn(move || builder.build());
        let pool = handle.join().expect("thread completed successfully");

        assert_eq!(pool.block_size(), 8);
    }
}
