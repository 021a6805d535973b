//! Error types for marmot-heap

use crate::region::Region;
use thiserror::Error;

/// Heap error type
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum HeapError {
    /// A region cannot satisfy a request from reuse or bump allocation.
    /// There is no automatic fallback to another region.
    #[error("out of memory: {requested} bytes do not fit in region {region}")]
    OutOfMemory {
        /// Region that could not satisfy the request
        region: Region,
        /// Requested size in bytes
        requested: usize,
    },

    /// A pointer is outside the arena, misaligned, names a block that
    /// straddles a region boundary, or frees an already-free block.
    #[error("invalid address: {address:#x}")]
    InvalidAddress {
        /// Offending address
        address: usize,
    },

    /// A size is zero or not a multiple of 8. Rejected before any lock
    /// is acquired.
    #[error("invalid size: {size}")]
    InvalidSize {
        /// Offending size
        size: usize,
    },
}

/// Result type using HeapError
pub type HeapResult<T> = Result<T, HeapError>;
