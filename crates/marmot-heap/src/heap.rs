//! Generational arena heap
//!
//! A fixed byte arena split into Eden, Survivor1, Survivor2, and Old.
//! Each region has its own bump pointer, skip-list free index, and lock;
//! allocation first tries to reuse a freed block (first fit in address
//! order) and bump-allocates otherwise. Freeing zeroes the block, inserts
//! it into the region's free index, and coalesces with address-adjacent
//! neighbors. There is no cross-region fallback and no automatic
//! promotion; moves between regions are explicit.

use std::cell::UnsafeCell;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::{HeapError, HeapResult};
use crate::region::{ALIGNMENT, REGIONS, Region, RegionLayout};
use crate::skiplist::SkipList;

/// Heap configuration
#[derive(Debug, Clone)]
pub struct HeapConfig {
    /// Total arena capacity in bytes; rounded down to a multiple of 8
    pub capacity: usize,
}

impl Default for HeapConfig {
    fn default() -> Self {
        Self {
            capacity: 64 * 1024 * 1024, // 64MB
        }
    }
}

/// Smallest arena the region split supports without degenerate spans.
const MIN_CAPACITY: usize = 1024;

/// Per-region allocation state, guarded by the region's lock.
struct RegionState {
    /// Next never-assigned address. Monotonically non-decreasing, always
    /// a multiple of 8, never past the region limit.
    bump: usize,
    /// Free-block index: start address -> block length.
    free: SkipList<usize>,
    /// Total free-and-currently-unused bytes in the region.
    reclaimed: usize,
}

/// Generational heap - shared between threads
pub struct GenerationalHeap {
    memory: UnsafeCell<Box<[u8]>>,
    layout: RegionLayout,
    regions: [Mutex<RegionState>; 4],
}

// SAFETY: arena bytes belonging to a region are only read or written while
// that region's lock is held; cross-region moves hold both region locks.
// The layout is immutable after construction.
unsafe impl Send for GenerationalHeap {}
unsafe impl Sync for GenerationalHeap {}

impl GenerationalHeap {
    /// Create a heap with the default config.
    pub fn new() -> Arc<Self> {
        Self::with_config(HeapConfig::default())
    }

    /// Create a heap with a custom config.
    ///
    /// # Panics
    /// Panics when the configured capacity is below the supported minimum.
    pub fn with_config(config: HeapConfig) -> Arc<Self> {
        let layout = RegionLayout::from_capacity(config.capacity);
        assert!(
            layout.capacity() >= MIN_CAPACITY,
            "arena capacity must be at least {MIN_CAPACITY} bytes"
        );

        let regions = REGIONS.map(|region| {
            let span = layout.span(region);
            tracing::debug!(
                target: "marmot::heap",
                region = %region,
                base = span.base,
                limit = span.limit,
                "region initialized"
            );
            Mutex::new(RegionState {
                bump: span.base,
                free: SkipList::new(),
                reclaimed: 0,
            })
        });

        Arc::new(Self {
            memory: UnsafeCell::new(vec![0u8; layout.capacity()].into_boxed_slice()),
            layout,
            regions,
        })
    }

    /// Total arena capacity in bytes.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.layout.capacity()
    }

    /// Region boundaries.
    #[inline]
    pub fn layout(&self) -> &RegionLayout {
        &self.layout
    }

    /// Allocate `size` bytes in `region` and return the block's start
    /// address. The block's contents are not written.
    ///
    /// `size` must be positive and a multiple of 8 (checked before any
    /// lock is taken). Reuse of freed blocks is attempted first, first fit
    /// in ascending address order, splitting when the block is larger;
    /// otherwise the region's bump pointer advances. A request that would
    /// cross the region limit fails with `OutOfMemory` and leaves the
    /// region untouched.
    pub fn allocate(&self, size: usize, region: Region) -> HeapResult<usize> {
        check_size(size)?;

        let mut state = self.regions[region.index()].lock();
        if let Some(address) = take_first_fit(&mut state, size) {
            tracing::debug!(
                target: "marmot::heap",
                region = %region,
                address,
                size,
                "reusing freed block"
            );
            return Ok(address);
        }

        let limit = self.layout.span(region).limit;
        match state.bump.checked_add(size) {
            Some(next) if next <= limit => {
                let address = state.bump;
                state.bump = next;
                tracing::trace!(
                    target: "marmot::heap",
                    region = %region,
                    address,
                    size,
                    "bump allocation"
                );
                Ok(address)
            }
            _ => Err(HeapError::OutOfMemory {
                region,
                requested: size,
            }),
        }
    }

    /// Release the block `[address, address + size)`.
    ///
    /// The owning region is determined from the address. The bytes are
    /// zeroed, the block enters the region's free index, and address-
    /// adjacent free neighbors are merged until none remain. Freeing a
    /// block whose start already heads a free block, or one reaching past
    /// the region's bump pointer, fails with `InvalidAddress`.
    pub fn free(&self, address: usize, size: usize) -> HeapResult<()> {
        check_size(size)?;
        let region = self.block_region(address, size)?;
        let mut state = self.regions[region.index()].lock();
        self.release_block(&mut state, region, address, size)
    }

    /// Copy `size` bytes from `src` to `dest`, then free the source block.
    ///
    /// When source and destination regions differ, both region locks are
    /// taken in ascending region-index order (Eden < Survivor1 <
    /// Survivor2 < Old); a same-region move takes the single lock once.
    /// If freeing the source fails, the destination keeps the copied
    /// bytes: the partial-failure boundary is after the copy, before
    /// source reclamation.
    pub fn move_block(&self, src: usize, dest: usize, size: usize) -> HeapResult<()> {
        check_size(size)?;
        let src_region = self.block_region(src, size)?;
        let dest_region = self.block_region(dest, size)?;

        if src_region == dest_region {
            let mut state = self.regions[src_region.index()].lock();
            // SAFETY: the owning region's lock is held; both ranges lie
            // inside this region.
            unsafe { self.copy_range(src, dest, size) };
            return self.release_block(&mut state, src_region, src, size);
        }

        let (lo, hi) = if src_region.index() < dest_region.index() {
            (src_region, dest_region)
        } else {
            (dest_region, src_region)
        };
        let mut lo_guard = self.regions[lo.index()].lock();
        let mut hi_guard = self.regions[hi.index()].lock();

        // SAFETY: both regions' locks are held.
        unsafe { self.copy_range(src, dest, size) };

        tracing::debug!(
            target: "marmot::heap",
            src = %src_region,
            dest = %dest_region,
            address = src,
            size,
            "cross-region move"
        );

        let src_state = if src_region == lo {
            &mut *lo_guard
        } else {
            &mut *hi_guard
        };
        self.release_block(src_state, src_region, src, size)
    }

    /// Bytes currently assigned and not freed in `region`.
    pub fn used(&self, region: Region) -> usize {
        let state = self.regions[region.index()].lock();
        state.bump - self.layout.span(region).base - state.reclaimed
    }

    /// Bytes available in `region`: the never-assigned tail plus freed
    /// blocks awaiting reuse.
    pub fn free_bytes(&self, region: Region) -> usize {
        let state = self.regions[region.index()].lock();
        let span = self.layout.span(region);
        span.len() - (state.bump - span.base - state.reclaimed)
    }

    /// Free-and-currently-unused bytes tracked by the region's counter.
    pub fn reclaimed_bytes(&self, region: Region) -> usize {
        self.regions[region.index()].lock().reclaimed
    }

    /// One-line usage report for `region`.
    pub fn details(&self, region: Region) -> String {
        format!(
            "{}: Used: {}, Free: {}",
            region,
            self.used(region),
            self.free_bytes(region)
        )
    }

    /// Usage report covering the whole arena.
    pub fn heap_details(&self) -> String {
        format!(
            "Heap Capacity: {}, Eden Used: {}, Survivor1 Used: {}, Survivor2 Used: {}, Old Used: {}",
            self.capacity(),
            self.used(Region::Eden),
            self.used(Region::Survivor1),
            self.used(Region::Survivor2),
            self.used(Region::Old)
        )
    }

    /// Snapshot of `region`'s free index in ascending address order.
    pub fn free_segments(&self, region: Region) -> Vec<(usize, usize)> {
        self.regions[region.index()].lock().free.iter().collect()
    }

    /// Copy `bytes` into the arena at `address`.
    ///
    /// The target range must lie inside a single region; the write happens
    /// under that region's lock. The payload length is the object's real
    /// size and need not be aligned.
    pub fn write(&self, address: usize, bytes: &[u8]) -> HeapResult<()> {
        if bytes.is_empty() {
            return Ok(());
        }
        let region = self.block_region(address, bytes.len())?;
        let _guard = self.regions[region.index()].lock();
        // SAFETY: the owning region's lock is held.
        unsafe { self.slice_mut(address, bytes.len()) }.copy_from_slice(bytes);
        Ok(())
    }

    /// Copy `len` bytes out of the arena starting at `address`.
    pub fn read(&self, address: usize, len: usize) -> HeapResult<Vec<u8>> {
        if len == 0 {
            return Ok(Vec::new());
        }
        let region = self.block_region(address, len)?;
        let _guard = self.regions[region.index()].lock();
        // SAFETY: the owning region's lock is held.
        Ok(unsafe { self.slice(address, len) }.to_vec())
    }

    /// Resolve the owning region of `[address, address + len)`, rejecting
    /// ranges that leave the region.
    fn block_region(&self, address: usize, len: usize) -> HeapResult<Region> {
        let region = self.layout.region_of(address)?;
        let limit = self.layout.span(region).limit;
        match address.checked_add(len) {
            Some(end) if end <= limit => Ok(region),
            _ => Err(HeapError::InvalidAddress { address }),
        }
    }

    /// Zero a block, index it as free, and coalesce with address-adjacent
    /// neighbors. Caller holds the owning region's lock and has validated
    /// the range.
    fn release_block(
        &self,
        state: &mut RegionState,
        region: Region,
        address: usize,
        size: usize,
    ) -> HeapResult<()> {
        // Only assigned space can be freed; anything past the bump pointer
        // was never handed out and would corrupt the usage counters.
        if address + size > state.bump {
            return Err(HeapError::InvalidAddress { address });
        }

        // SAFETY: the owning region's lock is held by the caller.
        unsafe { self.slice_mut(address, size) }.fill(0);

        let Some(handle) = state.free.insert(address, size) else {
            // The start address already heads a free block: double free.
            return Err(HeapError::InvalidAddress { address });
        };

        let mut start = address;
        let mut total = size;

        // Merge left while the predecessor ends where the block starts.
        while let Some(prev) = state.free.prev(handle) {
            let prev_key = state.free.key(prev);
            let prev_len = state.free.value(prev);
            if prev_key + prev_len != start {
                break;
            }
            start = prev_key;
            total += prev_len;
            state.free.delete(prev_key);
        }

        // Merge right while the successor starts where the block ends.
        while let Some(next) = state.free.next(handle) {
            let next_key = state.free.key(next);
            if next_key != start + total {
                break;
            }
            total += state.free.value(next);
            state.free.delete(next_key);
        }

        if start != address || total != size {
            state.free.delete(address);
            state.free.insert(start, total);
            tracing::debug!(
                target: "marmot::heap",
                region = %region,
                start,
                total,
                "coalesced free blocks"
            );
        }

        // Coalescing moves bytes between blocks but never changes the
        // region's free-and-unused total.
        state.reclaimed += size;
        Ok(())
    }

    /// Mutable view of an arena range.
    ///
    /// # Safety
    /// The caller must hold the lock of every region overlapping the range.
    unsafe fn slice_mut(&self, start: usize, len: usize) -> &mut [u8] {
        // SAFETY: lock discipline per the caller contract.
        let memory = unsafe { &mut *self.memory.get() };
        &mut memory[start..start + len]
    }

    /// Shared view of an arena range.
    ///
    /// # Safety
    /// The caller must hold the lock of every region overlapping the range.
    unsafe fn slice(&self, start: usize, len: usize) -> &[u8] {
        // SAFETY: lock discipline per the caller contract.
        let memory = unsafe { &*self.memory.get() };
        &memory[start..start + len]
    }

    /// Copy bytes inside the arena; ranges may overlap.
    ///
    /// # Safety
    /// The caller must hold the locks of the regions owning both ranges.
    unsafe fn copy_range(&self, src: usize, dest: usize, len: usize) {
        // SAFETY: lock discipline per the caller contract.
        let memory = unsafe { &mut *self.memory.get() };
        memory.copy_within(src..src + len, dest);
    }
}

/// Reject zero or misaligned sizes before any lock is acquired.
fn check_size(size: usize) -> HeapResult<()> {
    if size == 0 || size % ALIGNMENT != 0 {
        return Err(HeapError::InvalidSize { size });
    }
    Ok(())
}

/// First fit over the free index in ascending address order, splitting
/// the block when it is larger than the request.
fn take_first_fit(state: &mut RegionState, size: usize) -> Option<usize> {
    let mut cursor = state.free.first();
    while let Some(id) = cursor {
        let length = state.free.value(id);
        if length >= size {
            let start = state.free.key(id);
            state.free.delete(start);
            if length > size {
                state.free.insert(start + size, length - size);
            }
            state.reclaimed -= size;
            return Some(start);
        }
        cursor = state.free.next(id);
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_heap() -> Arc<GenerationalHeap> {
        GenerationalHeap::with_config(HeapConfig { capacity: 64 * 1024 })
    }

    #[test]
    fn allocations_are_aligned_and_disjoint() {
        let heap = small_heap();
        let a = heap.allocate(24, Region::Eden).unwrap();
        let b = heap.allocate(40, Region::Eden).unwrap();
        assert_eq!(a % 8, 0);
        assert_eq!(b % 8, 0);
        assert_eq!(b, a + 24);
    }

    #[test]
    fn size_preconditions_rejected() {
        let heap = small_heap();
        assert_eq!(
            heap.allocate(0, Region::Eden),
            Err(HeapError::InvalidSize { size: 0 })
        );
        assert_eq!(
            heap.allocate(12, Region::Eden),
            Err(HeapError::InvalidSize { size: 12 })
        );
        assert_eq!(heap.free(0, 20), Err(HeapError::InvalidSize { size: 20 }));
    }

    #[test]
    fn out_of_memory_leaves_region_unchanged() {
        let heap = small_heap();
        let span = heap.layout().span(Region::Survivor1);
        let base = heap.allocate(span.len(), Region::Survivor1).unwrap();
        assert_eq!(base, span.base, "region can be filled to its limit");

        let before_used = heap.used(Region::Survivor1);
        let err = heap.allocate(8, Region::Survivor1).unwrap_err();
        assert_eq!(
            err,
            HeapError::OutOfMemory {
                region: Region::Survivor1,
                requested: 8
            }
        );
        assert_eq!(heap.used(Region::Survivor1), before_used);
        assert_eq!(heap.free_bytes(Region::Survivor1), 0);
    }

    #[test]
    fn no_cross_region_fallback() {
        let heap = small_heap();
        let span = heap.layout().span(Region::Survivor2);
        heap.allocate(span.len(), Region::Survivor2).unwrap();
        // Old has plenty of room, but Survivor2 requests must not spill.
        assert!(heap.allocate(16, Region::Survivor2).is_err());
        assert!(heap.allocate(16, Region::Old).is_ok());
    }

    #[test]
    fn freed_block_is_reused_first_fit() {
        let heap = small_heap();
        let a = heap.allocate(64, Region::Eden).unwrap();
        let _b = heap.allocate(64, Region::Eden).unwrap();
        heap.free(a, 64).unwrap();

        // A smaller request splits the freed block low.
        let c = heap.allocate(16, Region::Eden).unwrap();
        assert_eq!(c, a);
        let d = heap.allocate(16, Region::Eden).unwrap();
        assert_eq!(d, a + 16);
        assert_eq!(heap.free_segments(Region::Eden), vec![(a + 32, 32)]);
    }

    #[test]
    fn reuse_skips_undersized_blocks() {
        let heap = small_heap();
        let a = heap.allocate(16, Region::Eden).unwrap();
        let _hold = heap.allocate(8, Region::Eden).unwrap();
        let b = heap.allocate(48, Region::Eden).unwrap();
        let _hold2 = heap.allocate(8, Region::Eden).unwrap();
        heap.free(a, 16).unwrap();
        heap.free(b, 48).unwrap();

        // First fit walks past the 16-byte block to the 48-byte one.
        let c = heap.allocate(32, Region::Eden).unwrap();
        assert_eq!(c, b);
        assert_eq!(
            heap.free_segments(Region::Eden),
            vec![(a, 16), (b + 32, 16)]
        );
    }

    #[test]
    fn free_counters_follow_the_invariant() {
        let heap = small_heap();
        let a = heap.allocate(64, Region::Eden).unwrap();
        let b = heap.allocate(32, Region::Eden).unwrap();
        assert_eq!(heap.used(Region::Eden), 96);
        assert_eq!(heap.reclaimed_bytes(Region::Eden), 0);

        heap.free(a, 64).unwrap();
        assert_eq!(heap.used(Region::Eden), 32);
        assert_eq!(heap.reclaimed_bytes(Region::Eden), 64);

        heap.free(b, 32).unwrap();
        // Both blocks merge; the counter still equals total free bytes.
        assert_eq!(heap.used(Region::Eden), 0);
        assert_eq!(heap.reclaimed_bytes(Region::Eden), 96);
        assert_eq!(heap.free_segments(Region::Eden), vec![(a, 96)]);
    }

    #[test]
    fn double_free_is_rejected() {
        let heap = small_heap();
        let a = heap.allocate(32, Region::Eden).unwrap();
        heap.free(a, 32).unwrap();
        assert_eq!(
            heap.free(a, 32),
            Err(HeapError::InvalidAddress { address: a })
        );
    }

    #[test]
    fn free_validates_addresses() {
        let heap = small_heap();
        let capacity = heap.capacity();
        assert_eq!(
            heap.free(capacity, 8),
            Err(HeapError::InvalidAddress { address: capacity })
        );
        assert_eq!(
            heap.free(4, 8),
            Err(HeapError::InvalidAddress { address: 4 })
        );
        // Block straddling the Eden/Survivor1 boundary.
        let eden = heap.layout().span(Region::Eden);
        assert_eq!(
            heap.free(eden.limit - 8, 16),
            Err(HeapError::InvalidAddress {
                address: eden.limit - 8
            })
        );
        // Space past the bump pointer was never assigned.
        let a = heap.allocate(16, Region::Eden).unwrap();
        assert_eq!(
            heap.free(a + 16, 8),
            Err(HeapError::InvalidAddress { address: a + 16 })
        );
    }

    #[test]
    fn freed_bytes_are_zeroed() {
        let heap = small_heap();
        let a = heap.allocate(16, Region::Eden).unwrap();
        heap.write(a, &[0xAB; 16]).unwrap();
        heap.free(a, 16).unwrap();
        assert_eq!(heap.read(a, 16).unwrap(), vec![0u8; 16]);
    }

    #[test]
    fn move_within_one_region() {
        let heap = small_heap();
        let src = heap.allocate(16, Region::Eden).unwrap();
        let dest = heap.allocate(16, Region::Eden).unwrap();
        heap.write(src, b"marmot heap mem!").unwrap();

        heap.move_block(src, dest, 16).unwrap();
        assert_eq!(heap.read(dest, 16).unwrap(), b"marmot heap mem!");
        // Source is zeroed and back in the free index.
        assert_eq!(heap.free_segments(Region::Eden), vec![(src, 16)]);
    }

    #[test]
    fn move_across_regions_frees_source() {
        let heap = small_heap();
        let src = heap.allocate(24, Region::Eden).unwrap();
        let dest = heap.allocate(24, Region::Old).unwrap();
        heap.write(src, &[7u8; 24]).unwrap();

        heap.move_block(src, dest, 24).unwrap();
        assert_eq!(heap.read(dest, 24).unwrap(), vec![7u8; 24]);
        assert_eq!(heap.used(Region::Eden), 0);
        assert_eq!(heap.used(Region::Old), 24);

        // The freed source is reusable in Eden.
        assert_eq!(heap.allocate(24, Region::Eden).unwrap(), src);
    }

    #[test]
    fn details_report_capacity_and_usage() {
        let heap = small_heap();
        heap.allocate(32, Region::Eden).unwrap();
        let details = heap.heap_details();
        assert!(details.starts_with(&format!("Heap Capacity: {}", heap.capacity())));
        assert!(details.contains("Eden Used: 32"));
        assert!(details.contains("Old Used: 0"));

        let eden = heap.details(Region::Eden);
        assert!(eden.starts_with("Eden: Used: 32"));
    }

    #[test]
    fn write_and_read_round_trip() {
        let heap = small_heap();
        let a = heap.allocate(16, Region::Old).unwrap();
        heap.write(a, &[1, 2, 3]).unwrap();
        assert_eq!(heap.read(a, 3).unwrap(), vec![1, 2, 3]);

        // Writes may not leave the owning region.
        let old = heap.layout().span(Region::Old);
        let tail = old.limit - 8;
        assert!(heap.write(tail, &[0u8; 16]).is_err());
    }

    #[test]
    fn concurrent_allocations_never_overlap() {
        use std::collections::HashSet;
        use std::sync::Mutex as StdMutex;

        let heap = GenerationalHeap::with_config(HeapConfig {
            capacity: 1024 * 1024,
        });
        let seen = Arc::new(StdMutex::new(HashSet::new()));

        let mut handles = Vec::new();
        for t in 0..8usize {
            let heap = Arc::clone(&heap);
            let seen = Arc::clone(&seen);
            handles.push(std::thread::spawn(move || {
                let region = if t % 2 == 0 { Region::Eden } else { Region::Old };
                for _ in 0..200 {
                    let address = heap.allocate(16, region).unwrap();
                    let mut set = seen.lock().unwrap();
                    assert!(set.insert(address), "duplicate address {address:#x}");
                }
            }));
        }
        for handle in handles {
            handle.join().expect("thread panicked");
        }
    }
}
