//! Object descriptors
//!
//! The collector never sees application objects. Each simulated object is
//! paired with a descriptor carrying the heap pointer, the logical size,
//! the 8-aligned size the allocator granted, and the root flag. The
//! embedding orchestrator owns the descriptor and fills the memory fields
//! after allocation; the core only reads them.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use marmot_heap::align_size;

/// Pointer value of a descriptor not yet bound to heap memory.
///
/// Sweeping a descriptor that still carries this sentinel fails the
/// collection with an `InvalidAddress` heap error.
pub const UNALLOCATED: usize = usize::MAX;

/// Header record for one simulated object.
#[derive(Debug)]
pub struct ObjectDescriptor {
    /// Start address in the simulated arena
    pointer: AtomicUsize,
    /// Logical (serialized) size in bytes
    size: AtomicUsize,
    /// Size rounded up to a multiple of 8; what the allocator granted
    aligned_size: AtomicUsize,
    /// Roots are always treated as reachable
    is_root: AtomicBool,
}

impl ObjectDescriptor {
    /// Create a descriptor for an object of `size` logical bytes. The
    /// aligned size is derived; the pointer starts out unallocated.
    pub fn new(size: usize, is_root: bool) -> Self {
        Self {
            pointer: AtomicUsize::new(UNALLOCATED),
            size: AtomicUsize::new(size),
            aligned_size: AtomicUsize::new(align_size(size)),
            is_root: AtomicBool::new(is_root),
        }
    }

    /// Current heap pointer.
    pub fn pointer(&self) -> usize {
        self.pointer.load(Ordering::Relaxed)
    }

    /// Bind the descriptor to a heap address.
    pub fn set_pointer(&self, pointer: usize) {
        self.pointer.store(pointer, Ordering::Relaxed);
    }

    /// Logical object size in bytes.
    pub fn size(&self) -> usize {
        self.size.load(Ordering::Relaxed)
    }

    /// Update the logical size. The aligned size is not touched.
    pub fn set_size(&self, size: usize) {
        self.size.store(size, Ordering::Relaxed);
    }

    /// Allocation size in bytes (multiple of 8).
    pub fn aligned_size(&self) -> usize {
        self.aligned_size.load(Ordering::Relaxed)
    }

    /// Update the allocation size.
    pub fn set_aligned_size(&self, aligned_size: usize) {
        self.aligned_size.store(aligned_size, Ordering::Relaxed);
    }

    /// Whether the object is a GC root.
    pub fn is_root(&self) -> bool {
        self.is_root.load(Ordering::Relaxed)
    }

    /// Change the root flag. Only consulted at registration and
    /// disconnect time.
    pub fn set_is_root(&self, is_root: bool) {
        self.is_root.store(is_root, Ordering::Relaxed);
    }

    /// One-line state description.
    pub fn describe(&self) -> String {
        format!(
            "pointer: {}, size: {}, aligned size: {}, root: {}",
            self.pointer(),
            self.size(),
            self.aligned_size(),
            self.is_root()
        )
    }
}

/// Shared handle to a descriptor. Registry identity is the handle's
/// allocation address, so two descriptors are the same object exactly
/// when they are the same `Arc`.
pub type DescriptorRef = Arc<ObjectDescriptor>;

/// Registry key of a descriptor.
#[inline]
pub(crate) fn descriptor_id(descriptor: &DescriptorRef) -> usize {
    Arc::as_ptr(descriptor) as usize
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aligned_size_is_derived() {
        let descriptor = ObjectDescriptor::new(13, false);
        assert_eq!(descriptor.size(), 13);
        assert_eq!(descriptor.aligned_size(), 16);
        assert_eq!(descriptor.pointer(), UNALLOCATED);
        assert!(!descriptor.is_root());
    }

    #[test]
    fn exact_multiple_is_not_padded() {
        let descriptor = ObjectDescriptor::new(64, true);
        assert_eq!(descriptor.aligned_size(), 64);
        assert!(descriptor.is_root());
    }

    #[test]
    fn identity_is_per_handle() {
        let a: DescriptorRef = Arc::new(ObjectDescriptor::new(8, false));
        let b: DescriptorRef = Arc::new(ObjectDescriptor::new(8, false));
        assert_ne!(descriptor_id(&a), descriptor_id(&b));
        assert_eq!(descriptor_id(&a), descriptor_id(&Arc::clone(&a)));
    }
}
