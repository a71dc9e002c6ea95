use std::alloc::Layout;
use std::num::NonZero;
use std::ptr::NonNull;

use crate::{BLOCK_ALIGN, MIN_BLOCK_SIZE, align_up};

/// Layout calculations for the pages of a pool.
///
/// Every page of a pool has the same layout: `blocks_per_page` consecutive blocks of
/// `block_layout.size()` bytes each, with the page aligned to [`BLOCK_ALIGN`]. Because the block
/// size is a multiple of [`BLOCK_ALIGN`], every block in the page is aligned as well.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) struct PageLayout {
    /// Layout of a single block, with the size already adjusted.
    block_layout: Layout,

    blocks_per_page: NonZero<usize>,

    /// Layout of the whole page, as requested from the backing allocator.
    page_layout: Layout,
}

impl PageLayout {
    /// Calculates the page layout for pages of `blocks_per_page` blocks of `block_size` bytes.
    ///
    /// # Panics
    ///
    /// Panics if `block_size` is not an adjusted block size (at least [`MIN_BLOCK_SIZE`] and a
    /// multiple of [`BLOCK_ALIGN`]) or if the page size cannot be represented as a [`Layout`].
    #[must_use]
    pub(crate) fn calculate(block_size: usize, blocks_per_page: NonZero<usize>) -> Self {
        assert!(
            block_size >= MIN_BLOCK_SIZE && align_up(block_size, BLOCK_ALIGN) == Some(block_size),
            "block size {block_size} is not at least {MIN_BLOCK_SIZE} bytes and a multiple of {BLOCK_ALIGN}"
        );

        let block_layout = Layout::from_size_align(block_size, BLOCK_ALIGN)
            .expect("block layout cannot fail for an adjusted block size");

        let page_bytes = block_size
            .checked_mul(blocks_per_page.get())
            .unwrap_or_else(|| {
                panic!(
                    "page of {blocks_per_page} blocks of {block_size} bytes does not fit in the address space"
                )
            });

        let page_layout = Layout::from_size_align(page_bytes, BLOCK_ALIGN).unwrap_or_else(|_| {
            panic!("page of {page_bytes} bytes is too large to be allocated")
        });

        Self {
            block_layout,
            blocks_per_page,
            page_layout,
        }
    }

    #[must_use]
    pub(crate) fn block_layout(&self) -> Layout {
        self.block_layout
    }

    #[must_use]
    pub(crate) fn blocks_per_page(&self) -> NonZero<usize> {
        self.blocks_per_page
    }

    #[must_use]
    pub(crate) fn page_layout(&self) -> Layout {
        self.page_layout
    }

    /// Returns a pointer to the block at `index` within the page starting at `page`.
    ///
    /// # Safety
    ///
    /// The caller must ensure that `page` points to the start of a live allocation made with
    /// [`page_layout()`][Self::page_layout] and that `index` is less than `blocks_per_page`.
    #[must_use]
    pub(crate) unsafe fn block_ptr(&self, page: NonNull<u8>, index: usize) -> NonNull<u8> {
        debug_assert!(
            index < self.blocks_per_page.get(),
            "block {index} out of bounds in page of {} blocks",
            self.blocks_per_page
        );

        // Cannot overflow because the offset lies inside a page whose size fit in a Layout.
        let offset = index.wrapping_mul(self.block_layout.size());

        // SAFETY: The caller guarantees the page is a live allocation of page_layout and that
        // index is in bounds, so the offset stays within that allocation.
        unsafe { page.add(offset) }
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
#[allow(
    clippy::undocumented_unsafe_blocks,
    clippy::arithmetic_side_effects,
    clippy::integer_division,
    reason = "test code doesn't need the same safety rigor as production code"
)]
mod tests {
    use std::alloc::{alloc, dealloc};

    use new_zealand::nz;

    use super::*;

    #[test]
    fn page_is_blocks_times_block_size() {
        let layout = PageLayout::calculate(MIN_BLOCK_SIZE * 3, nz!(10));

        assert_eq!(layout.block_layout().size(), MIN_BLOCK_SIZE * 3);
        assert_eq!(layout.block_layout().align(), BLOCK_ALIGN);
        assert_eq!(layout.blocks_per_page().get(), 10);
        assert_eq!(layout.page_layout().size(), MIN_BLOCK_SIZE * 30);
        assert_eq!(layout.page_layout().align(), BLOCK_ALIGN);
    }

    #[test]
    fn single_block_page() {
        let layout = PageLayout::calculate(MIN_BLOCK_SIZE, nz!(1));

        assert_eq!(layout.page_layout().size(), MIN_BLOCK_SIZE);
    }

    #[test]
    #[should_panic]
    fn unadjusted_block_size_panics() {
        _ = PageLayout::calculate(MIN_BLOCK_SIZE + 1, nz!(4));
    }

    #[test]
    #[should_panic]
    fn block_size_below_minimum_panics() {
        _ = PageLayout::calculate(0, nz!(4));
    }

    #[test]
    #[should_panic]
    fn overflowing_page_panics() {
        _ = PageLayout::calculate(MIN_BLOCK_SIZE * 2, NonZero::new(usize::MAX).unwrap());
    }

    #[test]
    #[should_panic]
    fn page_beyond_isize_panics() {
        // Fits in usize but exceeds the isize::MAX limit of Layout.
        let blocks = usize::MAX / MIN_BLOCK_SIZE;
        _ = PageLayout::calculate(MIN_BLOCK_SIZE, NonZero::new(blocks).unwrap());
    }

    #[test]
    fn block_pointers_are_consecutive_and_aligned() {
        let layout = PageLayout::calculate(MIN_BLOCK_SIZE * 2, nz!(8));

        let page = NonNull::new(unsafe { alloc(layout.page_layout()) }).unwrap();

        let mut previous: Option<NonNull<u8>> = None;

        for index in 0..8 {
            let block = unsafe { layout.block_ptr(page, index) };

            assert_eq!(block.as_ptr().align_offset(BLOCK_ALIGN), 0);
            assert_eq!(
                block.addr().get() - page.addr().get(),
                index * MIN_BLOCK_SIZE * 2
            );

            if let Some(previous) = previous {
                assert_eq!(
                    block.addr().get() - previous.addr().get(),
                    layout.block_layout().size()
                );
            }

            previous = Some(block);
        }

        unsafe { dealloc(page.as_ptr(), layout.page_layout()) };
    }
}
