//! Simulation context
//!
//! Explicitly constructed value owning the heap and the reference graph,
//! replacing a global singleton: embedders create one `GcContext` and
//! pass it where it is needed.
//!
//! The context enforces the external locking protocol the collector
//! requires. Mutators (allocation, register, link, disconnect) hold the
//! collection gate in shared mode, so they may interleave freely across
//! threads; `gc()` holds it exclusively for the entire mark+sweep, so no
//! graph or allocator mutation is ever visible mid-collection.

use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use marmot_heap::{GenerationalHeap, HeapConfig, HeapResult, Region};

use crate::descriptor::DescriptorRef;
use crate::error::GcResult;
use crate::graph::{GcStats, ReferenceGraph};

/// Shared heap plus reference graph behind the collection gate.
pub struct GcContext {
    heap: Arc<GenerationalHeap>,
    graph: Mutex<ReferenceGraph>,
    /// Mutators hold this shared; `gc()` holds it exclusive.
    gate: RwLock<()>,
}

impl GcContext {
    /// Create a context with the default heap config.
    pub fn new() -> Self {
        Self::with_config(HeapConfig::default())
    }

    /// Create a context with a custom heap config.
    pub fn with_config(config: HeapConfig) -> Self {
        Self {
            heap: GenerationalHeap::with_config(config),
            graph: Mutex::new(ReferenceGraph::new()),
            gate: RwLock::new(()),
        }
    }

    /// The underlying heap.
    pub fn heap(&self) -> &Arc<GenerationalHeap> {
        &self.heap
    }

    /// Allocate object memory in `region`.
    pub fn allocate(&self, size: usize, region: Region) -> HeapResult<usize> {
        let _shared = self.gate.read();
        self.heap.allocate(size, region)
    }

    /// Move object memory between regions (explicit, caller-driven).
    pub fn move_block(&self, src: usize, dest: usize, size: usize) -> HeapResult<()> {
        let _shared = self.gate.read();
        self.heap.move_block(src, dest, size)
    }

    /// Register a descriptor with the collector.
    pub fn register(&self, descriptor: &DescriptorRef) {
        let _shared = self.gate.read();
        self.graph.lock().register(descriptor);
    }

    /// Add reference edges `from -> to`.
    pub fn link(&self, from: &DescriptorRef, to: &[DescriptorRef]) {
        let _shared = self.gate.read();
        self.graph.lock().link(from, to);
    }

    /// Clear a root's outgoing edges; the root stays registered.
    pub fn disconnect(&self, root: &DescriptorRef) {
        let _shared = self.gate.read();
        self.graph.lock().disconnect(root);
    }

    /// Retire a root and stage it for reclamation at the next sweep.
    pub fn disconnect_and_recycle(&self, root: &DescriptorRef) {
        let _shared = self.gate.read();
        self.graph.lock().disconnect_and_recycle(root);
    }

    /// Current root descriptors.
    pub fn roots(&self) -> Vec<DescriptorRef> {
        let _shared = self.gate.read();
        self.graph.lock().roots()
    }

    /// Whether `descriptor` is currently registered.
    pub fn contains(&self, descriptor: &DescriptorRef) -> bool {
        let _shared = self.gate.read();
        self.graph.lock().contains(descriptor)
    }

    /// Run a stop-the-world collection. Holds the gate exclusively for
    /// the whole mark+sweep. Returns bytes reclaimed.
    pub fn gc(&self) -> GcResult<usize> {
        let _exclusive = self.gate.write();
        let mut graph = self.graph.lock();
        graph.gc(&self.heap)
    }

    /// Snapshot of the collector's statistics.
    pub fn stats(&self) -> GcStats {
        let _shared = self.gate.read();
        self.graph.lock().stats().clone()
    }
}

impl Default for GcContext {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::ObjectDescriptor;

    fn context() -> GcContext {
        GcContext::with_config(HeapConfig { capacity: 64 * 1024 })
    }

    fn new_object(ctx: &GcContext, size: usize, is_root: bool) -> DescriptorRef {
        let descriptor = Arc::new(ObjectDescriptor::new(size, is_root));
        let address = ctx
            .allocate(descriptor.aligned_size(), Region::Eden)
            .unwrap();
        descriptor.set_pointer(address);
        ctx.register(&descriptor);
        descriptor
    }

    #[test]
    fn context_wires_heap_and_graph() {
        let ctx = context();
        let root = new_object(&ctx, 16, true);
        let child = new_object(&ctx, 16, false);
        ctx.link(&root, &[Arc::clone(&child)]);

        assert_eq!(ctx.heap().used(Region::Eden), 32);
        ctx.gc().unwrap();
        assert!(ctx.contains(&child));

        ctx.disconnect(&root);
        ctx.gc().unwrap();
        assert!(!ctx.contains(&child));
        assert_eq!(ctx.heap().used(Region::Eden), 16);
    }

    #[test]
    fn mutators_interleave_across_threads() {
        let ctx = Arc::new(context());

        let mut handles = Vec::new();
        for _ in 0..4 {
            let ctx = Arc::clone(&ctx);
            handles.push(std::thread::spawn(move || {
                let root = new_object(&ctx, 16, true);
                for _ in 0..20 {
                    let child = new_object(&ctx, 16, false);
                    ctx.link(&root, &[child]);
                }
            }));
        }
        for handle in handles {
            handle.join().expect("thread panicked");
        }

        assert_eq!(ctx.roots().len(), 4);
        let reclaimed = ctx.gc().unwrap();
        // Everything is still reachable from the four roots.
        assert_eq!(reclaimed, 0);
        assert_eq!(ctx.stats().last_marked, 4 + 4 * 20);
    }
}
