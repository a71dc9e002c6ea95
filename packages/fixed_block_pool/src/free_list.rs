use std::ptr::NonNull;

use crate::{BLOCK_ALIGN, MIN_BLOCK_SIZE};

/// The interpretation of a free block's leading bytes while the block sits in a [`FreeList`].
///
/// Only ever read or written while the block is known to be free. Once a block is popped,
/// its owner may overwrite these bytes with anything.
#[derive(Clone, Copy, Debug)]
struct FreeNode {
    next: Option<NonNull<FreeNode>>,
}

const _: () = assert!(size_of::<FreeNode>() <= MIN_BLOCK_SIZE);
const _: () = assert!(align_of::<FreeNode>() <= BLOCK_ALIGN);

/// An intrusive singly-linked stack of free blocks.
///
/// The list does not own any memory. It threads the link to the next free block through the
/// first bytes of each free block itself, so pushing and popping are O(1) and need no storage
/// beyond the blocks. The most recently pushed block is the first to be popped.
#[derive(Debug)]
pub(crate) struct FreeList {
    head: Option<NonNull<FreeNode>>,

    /// Number of blocks currently linked into the list.
    len: usize,
}

impl FreeList {
    #[must_use]
    pub(crate) const fn new() -> Self {
        Self { head: None, len: 0 }
    }

    #[must_use]
    pub(crate) fn len(&self) -> usize {
        self.len
    }

    #[must_use]
    pub(crate) fn is_empty(&self) -> bool {
        self.head.is_none()
    }

    /// Links a block onto the head of the list.
    ///
    /// # Safety
    ///
    /// The caller must ensure that:
    /// - `block` is valid for writes of [`MIN_BLOCK_SIZE`] bytes and aligned to [`BLOCK_ALIGN`].
    /// - `block` is not already in this or any other list.
    /// - Nothing reads or writes the block until it has been popped again.
    pub(crate) unsafe fn push(&mut self, block: NonNull<u8>) {
        #[allow(
            clippy::cast_ptr_alignment,
            reason = "caller guarantees the block is aligned to BLOCK_ALIGN"
        )]
        let node = block.cast::<FreeNode>();

        // SAFETY: The caller guarantees the block is writable, large enough and aligned for a
        // FreeNode, and that nobody else is using it.
        unsafe {
            node.write(FreeNode { next: self.head });
        }

        self.head = Some(node);

        // Cannot overflow because every block in the list occupies distinct memory.
        self.len = self.len.wrapping_add(1);
    }

    /// Unlinks the block at the head of the list, if any, and hands it to the caller.
    ///
    /// The returned block is no longer tracked by the list; its contents are unspecified.
    #[must_use]
    pub(crate) fn pop(&mut self) -> Option<NonNull<u8>> {
        let node = self.head?;

        // SAFETY: Every node in the list was written by push() and, per the push() contract,
        // nobody else has touched it since, so it still holds a valid FreeNode.
        let FreeNode { next } = unsafe { node.read() };

        self.head = next;

        // Cannot underflow because we just unlinked a node.
        self.len = self.len.wrapping_sub(1);

        Some(node.cast::<u8>())
    }

    /// Walks the whole chain and returns the number of nodes found.
    #[cfg(test)]
    #[cfg_attr(test, mutants::skip)] // This is essentially test logic, mutation is meaningless.
    pub(crate) fn walk_len(&self) -> usize {
        let mut count: usize = 0;
        let mut current = self.head;

        while let Some(node) = current {
            // SAFETY: See pop() - every linked node holds a valid FreeNode.
            current = unsafe { node.read() }.next;
            count = count.wrapping_add(1);
        }

        count
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
#[allow(
    clippy::undocumented_unsafe_blocks,
    clippy::multiple_unsafe_ops_per_block,
    clippy::indexing_slicing,
    reason = "test code doesn't need the same safety rigor as production code"
)]
mod tests {
    use super::*;

    fn blocks_in(storage: &mut [usize]) -> Vec<NonNull<u8>> {
        storage
            .iter_mut()
            .map(|slot| NonNull::from(slot).cast::<u8>())
            .collect()
    }

    #[test]
    fn new_list_is_empty() {
        let mut list = FreeList::new();

        assert!(list.is_empty());
        assert_eq!(list.len(), 0);
        assert_eq!(list.walk_len(), 0);
        assert!(list.pop().is_none());
    }

    #[test]
    fn pop_returns_blocks_in_reverse_push_order() {
        let mut storage = [0_usize; 4];
        let blocks = blocks_in(&mut storage);

        let mut list = FreeList::new();

        for block in &blocks {
            unsafe { list.push(*block) };
        }

        assert_eq!(list.len(), 4);
        assert_eq!(list.walk_len(), 4);

        assert_eq!(list.pop(), Some(blocks[3]));
        assert_eq!(list.pop(), Some(blocks[2]));
        assert_eq!(list.pop(), Some(blocks[1]));
        assert_eq!(list.pop(), Some(blocks[0]));
        assert_eq!(list.pop(), None);

        assert!(list.is_empty());
    }

    #[test]
    fn push_after_pop_is_popped_first() {
        let mut storage = [0_usize; 3];
        let blocks = blocks_in(&mut storage);

        let mut list = FreeList::new();

        for block in &blocks {
            unsafe { list.push(*block) };
        }

        let first = list.pop().unwrap();
        let second = list.pop().unwrap();

        unsafe { list.push(first) };

        assert_eq!(list.pop(), Some(first));
        assert_eq!(list.pop(), Some(blocks[0]));

        unsafe { list.push(second) };

        assert_eq!(list.len(), 1);
        assert_eq!(list.pop(), Some(second));
        assert!(list.is_empty());
    }

    #[test]
    fn popped_block_may_be_overwritten() {
        let mut storage = [0_usize; 2];
        let blocks = blocks_in(&mut storage);

        let mut list = FreeList::new();
        unsafe {
            list.push(blocks[0]);
            list.push(blocks[1]);
        }

        let popped = list.pop().unwrap();

        // The owner of a popped block is free to scribble over the link bytes.
        unsafe { popped.cast::<usize>().write(usize::MAX) };

        assert_eq!(list.walk_len(), 1);
        assert_eq!(list.pop(), Some(blocks[0]));
    }
}
