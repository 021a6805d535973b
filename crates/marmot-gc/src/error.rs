//! Error types for marmot-gc

use marmot_heap::HeapError;
use thiserror::Error;

/// Collector error type
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum GcError {
    /// A `free` issued during sweep failed. This signals a malformed
    /// descriptor or a broken allocator/graph invariant and is fatal to
    /// the `gc()` call; nodes already swept stay removed.
    #[error("sweep failed to free object memory: {0}")]
    Sweep(#[from] HeapError),
}

/// Result type using GcError
pub type GcResult<T> = Result<T, GcError>;
