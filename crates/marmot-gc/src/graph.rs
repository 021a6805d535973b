//! Three-color mark-sweep collector
//!
//! The reference graph wraps every registered descriptor in a node and
//! tracks reachability from an explicit root list. `gc()` runs mark then
//! sweep as one non-interruptible unit; sweep returns unreachable nodes'
//! memory to the generational heap.
//!
//! The graph is **not** internally thread-safe. The caller must guarantee
//! that `gc()` never overlaps any other call; `GcContext` enforces this
//! with a shared/exclusive gate.

use std::collections::VecDeque;
use std::collections::hash_map::Entry;
use std::sync::Arc;
use std::time::Instant;

use rustc_hash::FxHashMap;

use marmot_heap::GenerationalHeap;

use crate::descriptor::{DescriptorRef, descriptor_id};
use crate::error::GcResult;
use crate::node::{Color, GraphNode};

/// Collection statistics
#[derive(Debug, Default, Clone)]
pub struct GcStats {
    /// Number of collections
    pub collections: u64,
    /// Nodes marked reachable in the last collection
    pub last_marked: usize,
    /// Nodes reclaimed in the last collection
    pub last_swept: usize,
    /// Bytes reclaimed in the last collection
    pub last_reclaimed: usize,
    /// Total time spent collecting (nanoseconds)
    pub total_time_ns: u64,
}

/// Reference graph and serial collector.
pub struct ReferenceGraph {
    /// Registry: descriptor identity -> node
    nodes: FxHashMap<usize, GraphNode>,
    /// Mark starting points, in registration order
    roots: Vec<usize>,
    /// Retired roots staged for unconditional reclamation at next sweep
    short_acting_roots: Vec<GraphNode>,
    stats: GcStats,
}

impl ReferenceGraph {
    /// Create an empty graph.
    pub fn new() -> Self {
        Self {
            nodes: FxHashMap::default(),
            roots: Vec::new(),
            short_acting_roots: Vec::new(),
            stats: GcStats::default(),
        }
    }

    /// Register a descriptor, wrapping it in a White node. Roots are
    /// appended to the root list. Re-registering a known descriptor is a
    /// no-op.
    pub fn register(&mut self, descriptor: &DescriptorRef) {
        let id = descriptor_id(descriptor);
        let Entry::Vacant(slot) = self.nodes.entry(id) else {
            return;
        };
        slot.insert(GraphNode::new(Arc::clone(descriptor)));
        if descriptor.is_root() {
            self.roots.push(id);
        }
        tracing::trace!(
            target: "marmot::gc",
            pointer = descriptor.pointer(),
            root = descriptor.is_root(),
            "object registered"
        );
    }

    /// Add edges `from -> to` for every target already registered.
    /// Unknown descriptors on either side are ignored; the edge set
    /// collapses duplicates.
    pub fn link(&mut self, from: &DescriptorRef, to: &[DescriptorRef]) {
        let from_id = descriptor_id(from);
        if !self.nodes.contains_key(&from_id) {
            return;
        }
        let targets: Vec<usize> = to
            .iter()
            .map(descriptor_id)
            .filter(|id| self.nodes.contains_key(id))
            .collect();
        if let Some(node) = self.nodes.get_mut(&from_id) {
            node.edges.extend(targets);
        }
    }

    /// Clear all outgoing edges of a root. The root itself stays
    /// registered and reachable.
    pub fn disconnect(&mut self, root: &DescriptorRef) {
        if !root.is_root() {
            return;
        }
        if let Some(node) = self.nodes.get_mut(&descriptor_id(root)) {
            node.edges.clear();
        }
    }

    /// Retire a root: clear its edges, drop it from the roots and the
    /// registry, and stage it for unconditional reclamation at the next
    /// sweep regardless of its color then.
    pub fn disconnect_and_recycle(&mut self, root: &DescriptorRef) {
        if !root.is_root() {
            return;
        }
        let id = descriptor_id(root);
        if let Some(mut node) = self.nodes.remove(&id) {
            node.edges.clear();
            self.roots.retain(|&r| r != id);
            self.short_acting_roots.push(node);
            tracing::debug!(
                target: "marmot::gc",
                pointer = root.pointer(),
                "root retired for recycling"
            );
        }
    }

    /// Descriptors currently on the root list.
    pub fn roots(&self) -> Vec<DescriptorRef> {
        self.roots
            .iter()
            .filter_map(|id| self.nodes.get(id))
            .map(|node| Arc::clone(&node.descriptor))
            .collect()
    }

    /// Whether `descriptor` is currently registered.
    pub fn contains(&self, descriptor: &DescriptorRef) -> bool {
        self.nodes.contains_key(&descriptor_id(descriptor))
    }

    /// Number of registered nodes.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// True when no node is registered.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Collection statistics.
    pub fn stats(&self) -> &GcStats {
        &self.stats
    }

    /// Run a full collection: mark, then sweep, as one logical unit.
    /// Returns bytes reclaimed.
    ///
    /// A `free` failure during sweep (malformed descriptor) aborts the
    /// call; nodes already swept stay removed.
    pub fn gc(&mut self, heap: &GenerationalHeap) -> GcResult<usize> {
        let start = Instant::now();

        self.mark();
        let reclaimed = self.sweep(heap)?;

        let elapsed = start.elapsed();
        self.stats.collections += 1;
        self.stats.last_reclaimed = reclaimed;
        self.stats.total_time_ns += elapsed.as_nanos() as u64;

        tracing::info!(
            target: "marmot::gc",
            collection = self.stats.collections,
            marked = self.stats.last_marked,
            swept = self.stats.last_swept,
            reclaimed_bytes = reclaimed,
            live_objects = self.nodes.len(),
            pause_us = elapsed.as_micros() as u64,
            "collection complete"
        );
        Ok(reclaimed)
    }

    /// Mark phase: breadth-first from the roots.
    ///
    /// A node turns Grey when discovered and enters the FIFO queue, Black
    /// once its edges are scanned. Color is checked before every enqueue,
    /// so no node is queued twice; when the queue drains, no Black node
    /// points at a White one.
    fn mark(&mut self) {
        tracing::debug!(
            target: "marmot::gc",
            roots = self.roots.len(),
            "mark phase starting"
        );

        let mut marked = 0usize;
        let mut worklist: VecDeque<usize> = VecDeque::new();

        for &root in &self.roots {
            if let Some(node) = self.nodes.get_mut(&root)
                && node.color == Color::White
            {
                node.color = Color::Grey;
                worklist.push_back(root);
            }
        }

        while let Some(id) = worklist.pop_front() {
            let Some(node) = self.nodes.get(&id) else {
                continue;
            };
            let edges: Vec<usize> = node.edges.iter().copied().collect();
            for child in edges {
                if let Some(node) = self.nodes.get_mut(&child)
                    && node.color == Color::White
                {
                    node.color = Color::Grey;
                    worklist.push_back(child);
                }
            }
            if let Some(node) = self.nodes.get_mut(&id) {
                node.color = Color::Black;
                marked += 1;
            }
        }

        self.stats.last_marked = marked;
        tracing::debug!(target: "marmot::gc", marked, "mark phase completed");
    }

    /// Sweep phase: reclaim every node still White, reset survivors to
    /// White, then force-reclaim the staged short-acting roots.
    fn sweep(&mut self, heap: &GenerationalHeap) -> GcResult<usize> {
        tracing::debug!(target: "marmot::gc", "sweep phase starting");

        let mut reclaimed = 0usize;
        let mut swept = 0usize;

        let dead: Vec<usize> = self
            .nodes
            .iter()
            .filter(|(_, node)| node.color == Color::White)
            .map(|(&id, _)| id)
            .collect();
        for id in dead {
            self.reclaim_white(id, heap, &mut reclaimed, &mut swept)?;
        }

        for node in self.nodes.values_mut() {
            node.color = Color::White;
        }

        for node in std::mem::take(&mut self.short_acting_roots) {
            reclaimed += free_object(heap, &node.descriptor)?;
            swept += 1;
        }

        self.stats.last_swept = swept;
        tracing::debug!(target: "marmot::gc", swept, "sweep phase completed");
        Ok(reclaimed)
    }

    /// Remove a White node, cascade into its still-White children, and
    /// free its memory. Removal happens before the free and before the
    /// cascade, so revisiting a node reclaimed earlier in the same pass
    /// is a no-op and nothing is freed twice.
    fn reclaim_white(
        &mut self,
        id: usize,
        heap: &GenerationalHeap,
        reclaimed: &mut usize,
        swept: &mut usize,
    ) -> GcResult<()> {
        let Some(node) = self.nodes.remove(&id) else {
            return Ok(());
        };
        for &child in &node.edges {
            if self
                .nodes
                .get(&child)
                .is_some_and(|node| node.color == Color::White)
            {
                self.reclaim_white(child, heap, reclaimed, swept)?;
            }
        }
        *reclaimed += free_object(heap, &node.descriptor)?;
        *swept += 1;
        tracing::trace!(
            target: "marmot::gc",
            pointer = node.descriptor.pointer(),
            "node swept"
        );
        Ok(())
    }
}

impl Default for ReferenceGraph {
    fn default() -> Self {
        Self::new()
    }
}

/// Return an object's memory to the heap. Frees the aligned size the
/// allocator granted.
fn free_object(heap: &GenerationalHeap, descriptor: &DescriptorRef) -> GcResult<usize> {
    let size = descriptor.aligned_size();
    heap.free(descriptor.pointer(), size)?;
    Ok(size)
}
