/// Alignment of every block handed out by a [`FixedBlockPool`][crate::FixedBlockPool].
///
/// This is the alignment of a pointer on the target platform, which is enough for
/// pointer-sized and typical scalar values placed at the start of a block.
pub const BLOCK_ALIGN: usize = align_of::<*mut u8>();

/// The smallest block a [`FixedBlockPool`][crate::FixedBlockPool] will carve out of a page.
///
/// A free block stores the link to the next free block in its own leading bytes, so it must
/// be able to hold at least one pointer.
pub const MIN_BLOCK_SIZE: usize = size_of::<*mut u8>();

/// Rounds `n` up to the nearest multiple of `align`.
///
/// Returns `None` if the rounded value does not fit in a `usize`.
///
/// # Panics
///
/// Panics if `align` is not a power of two.
///
/// # Examples
///
/// ```
/// use fixed_block_pool::align_up;
///
/// assert_eq!(align_up(0, 8), Some(0));
/// assert_eq!(align_up(1, 8), Some(8));
/// assert_eq!(align_up(16, 8), Some(16));
/// assert_eq!(align_up(usize::MAX, 8), None);
/// ```
#[must_use]
pub const fn align_up(n: usize, align: usize) -> Option<usize> {
    assert!(align.is_power_of_two(), "alignment must be a power of two");

    // `align` is at least 1, so the mask cannot underflow.
    let mask = align.wrapping_sub(1);

    match n.checked_add(mask) {
        Some(padded) => Some(padded & !mask),
        None => None,
    }
}

/// Calculates the block size a pool actually reserves for a requested block size.
///
/// The result is at least [`MIN_BLOCK_SIZE`], at least `requested` and a multiple of
/// [`BLOCK_ALIGN`]. Returns `None` if rounding up overflows `usize`.
///
/// # Examples
///
/// ```
/// use fixed_block_pool::{BLOCK_ALIGN, MIN_BLOCK_SIZE, adjust_block_size};
///
/// assert_eq!(adjust_block_size(1), Some(MIN_BLOCK_SIZE));
///
/// let adjusted = adjust_block_size(MIN_BLOCK_SIZE + 1).unwrap();
/// assert!(adjusted > MIN_BLOCK_SIZE);
/// assert_eq!(adjusted % BLOCK_ALIGN, 0);
/// ```
#[must_use]
pub const fn adjust_block_size(requested: usize) -> Option<usize> {
    let at_least_one_link = if requested < MIN_BLOCK_SIZE {
        MIN_BLOCK_SIZE
    } else {
        requested
    };

    align_up(at_least_one_link, BLOCK_ALIGN)
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
#[allow(
    clippy::arithmetic_side_effects,
    clippy::integer_division,
    reason = "test code doesn't need the same rigor as production code"
)]
mod tests {
    use super::*;

    #[test]
    fn align_up_rounds_to_next_multiple() {
        assert_eq!(align_up(0, 1), Some(0));
        assert_eq!(align_up(7, 1), Some(7));
        assert_eq!(align_up(1, 4), Some(4));
        assert_eq!(align_up(4, 4), Some(4));
        assert_eq!(align_up(5, 4), Some(8));
        assert_eq!(align_up(17, 16), Some(32));
        assert_eq!(align_up(4097, 4096), Some(8192));
    }

    #[test]
    fn align_up_overflow_is_none() {
        assert_eq!(align_up(usize::MAX, 2), None);
        assert_eq!(align_up(usize::MAX - 2, 8), None);
    }

    #[test]
    fn align_up_at_the_edge_of_usize() {
        let largest_multiple_of_8 = usize::MAX - 7;
        assert_eq!(align_up(largest_multiple_of_8, 8), Some(largest_multiple_of_8));
        assert_eq!(align_up(usize::MAX, 1), Some(usize::MAX));
    }

    #[test]
    #[should_panic]
    fn align_up_non_power_of_two_panics() {
        _ = align_up(10, 3);
    }

    #[test]
    #[should_panic]
    fn align_up_zero_alignment_panics() {
        _ = align_up(10, 0);
    }

    #[test]
    fn minimum_block_holds_a_pointer() {
        assert_eq!(MIN_BLOCK_SIZE, size_of::<*mut u8>());
        assert_eq!(BLOCK_ALIGN, align_of::<*mut u8>());
        assert!(MIN_BLOCK_SIZE >= BLOCK_ALIGN);
    }

    #[test]
    fn small_requests_are_raised_to_minimum() {
        for requested in 1..=MIN_BLOCK_SIZE {
            assert_eq!(adjust_block_size(requested), Some(MIN_BLOCK_SIZE));
        }
    }

    #[test]
    fn adjusted_size_properties_hold() {
        for requested in 1..=4096 {
            let adjusted = adjust_block_size(requested).unwrap();

            assert!(adjusted >= requested, "{adjusted} < {requested}");
            assert!(adjusted >= MIN_BLOCK_SIZE);
            assert_eq!(adjusted % BLOCK_ALIGN, 0, "{adjusted} for {requested}");

            // Never more than one alignment step of padding above the floor.
            assert!(adjusted - requested.max(MIN_BLOCK_SIZE) < BLOCK_ALIGN);
        }
    }

    #[test]
    fn struct_of_three_floats_and_an_int() {
        #[allow(dead_code, reason = "only the layout matters")]
        struct Particle {
            x: f32,
            y: f32,
            z: f32,
            life: i32,
        }

        let adjusted = adjust_block_size(size_of::<Particle>()).unwrap();

        assert_eq!(adjusted, align_up(16, BLOCK_ALIGN).unwrap());
    }

    #[test]
    fn adjust_overflow_is_none() {
        assert_eq!(adjust_block_size(usize::MAX), None);
    }

    #[test]
    fn adjust_is_const_evaluable() {
        const ADJUSTED: Option<usize> = adjust_block_size(3);

        assert_eq!(ADJUSTED, Some(MIN_BLOCK_SIZE));
    }
}
