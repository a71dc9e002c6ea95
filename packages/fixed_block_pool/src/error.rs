use thiserror::Error;

/// Errors that can occur when a pool needs more memory.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// The pool could not grow by another page, either because the backing allocator refused the
    /// page or because there was no memory left to record it. The pool is left exactly as it was
    /// before the failed operation, so the caller may retry later.
    #[error("out of memory: could not grow the pool by a {page_bytes} byte page")]
    OutOfMemory {
        /// Size in bytes of the page that could not be allocated.
        page_bytes: usize,
    },
}

/// A specialized `Result` type for pool operations, returning the crate's
/// [`Error`] type as the error value.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use std::fmt::Debug;

    use static_assertions::assert_impl_all;

    use super::*;

    assert_impl_all!(Error: Send, Sync, Debug);

    #[test]
    fn out_of_memory_names_the_page_size() {
        let error = Error::OutOfMemory { page_bytes: 32768 };

        let message = error.to_string();
        assert!(message.contains("out of memory"), "{message}");
        assert!(message.contains("32768"), "{message}");
    }

    #[test]
    fn out_of_memory_is_error() {
        let result: Result<()> = Err(Error::OutOfMemory { page_bytes: 64 });

        assert!(matches!(
            result,
            Err(Error::OutOfMemory { page_bytes: 64 })
        ));
    }
}
