//! # Object Allocator
//!
//! Segmented pool allocator: a handful of fixed-size classes served from
//! chunk pages, plus a system-allocation fallback for oversized requests.
//!
//! ```text
//! ObjectAllocator
//!   ├─→ Level 0 (16B)   chunks: [c0, c3]   free: c3#9 → c0#2 → ∅
//!   ├─→ Level 1 (32B)   chunks: [c1]       free: ∅
//!   ├─→ ...
//!   └─→ raw blocks      { addr → size }    (requests above the last level)
//! ```
//!
//! Free-list recycling is LIFO: the most recently freed slot of a level is the
//! next one handed out. Chunks are never released before teardown.

#![allow(unsafe_code)]

use std::alloc;
use std::collections::{BTreeMap, HashMap};
use std::ptr::NonNull;

use tracing::{debug, error, info, trace, warn};

use super::chunk::{capacity_overflow, page_layout, Chunk, SlotRef, SlotState};
use super::level::{build_levels, Level};
use super::{RAW_HEADER_SIZE, RAW_SENTINEL};
use crate::config::AllocatorConfig;
use crate::error::{MemoryError, MemoryResult};

/// A system allocation made for a request larger than every level.
pub(crate) struct RawBlock {
    /// Start of the system allocation (the header).
    pub base: NonNull<u8>,
    /// Bytes requested by the caller.
    pub size: usize,
    /// Layout of the whole allocation, header included.
    pub layout: alloc::Layout,
}

// SAFETY: the block is exclusively owned by the allocator's raw table.
unsafe impl Send for RawBlock {}

/// Pooled allocator with fixed size classes.
///
/// # Example
///
/// ```rust,ignore
/// let mut allocator = ObjectAllocator::new(AllocatorConfig::default())?;
/// let block = allocator.allocate(24);        // served by the 32-byte class
/// allocator.free(block)?;
/// ```
pub struct ObjectAllocator {
    pub(super) config: AllocatorConfig,
    pub(super) levels: Vec<Level>,
    /// Chunk arena shared by every level.
    pub(super) chunks: Vec<Chunk>,
    /// Page start address → chunk arena index.
    chunk_starts: BTreeMap<usize, usize>,
    /// Caller address → raw block.
    pub(super) raw_blocks: HashMap<usize, RawBlock>,
    used: usize,
    allocated: usize,
    torn_down: bool,
}

impl ObjectAllocator {
    /// Creates an allocator and generates its size classes.
    ///
    /// No chunk is allocated until the first request for its level.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::InvalidConfig`] when `config` fails validation.
    pub fn new(config: AllocatorConfig) -> MemoryResult<Self> {
        config.validate()?;
        let levels = build_levels(&config)?;

        info!(
            "Initializing object allocator: {} levels, block sizes {:?}, chunk size {}",
            levels.len(),
            levels.iter().map(|l| l.block_size).collect::<Vec<_>>(),
            config.chunk_size
        );

        Ok(Self {
            config,
            levels,
            chunks: Vec::new(),
            chunk_starts: BTreeMap::new(),
            raw_blocks: HashMap::new(),
            used: 0,
            allocated: 0,
            torn_down: false,
        })
    }

    /// Returns the configuration this allocator was built with.
    #[inline]
    #[must_use]
    pub fn config(&self) -> &AllocatorConfig {
        &self.config
    }

    /// Bytes currently handed out, rounded up to class granularity.
    #[inline]
    #[must_use]
    pub fn used_size(&self) -> usize {
        self.used
    }

    /// Bytes obtained from the system: chunk pages plus live raw blocks.
    #[inline]
    #[must_use]
    pub fn allocated_size(&self) -> usize {
        self.allocated
    }

    /// Block size of every level, smallest first.
    #[must_use]
    pub fn block_sizes(&self) -> Vec<usize> {
        self.levels.iter().map(|l| l.block_size).collect()
    }

    /// Slots per chunk of every level, smallest class first.
    #[must_use]
    pub fn blocks_per_chunk(&self) -> Vec<usize> {
        self.levels.iter().map(|l| l.block_num).collect()
    }

    /// Allocates at least `size` bytes.
    ///
    /// The returned pointer is word aligned and sits right after the hidden
    /// back-reference word. Aborts on system out-of-memory.
    pub fn allocate(&mut self, size: usize) -> NonNull<u8> {
        self.allocate_usable(size).0
    }

    /// Allocates at least `size` bytes and reports how many are usable.
    pub fn allocate_usable(&mut self, size: usize) -> (NonNull<u8>, usize) {
        match self.level_for(size) {
            Some(level) => {
                let slot = self.take_slot(level);
                let ptr = self.mark_used(slot);
                let usable = self.levels[level].block_size;
                trace!("Allocated {} bytes from level {} at {:p}", size, level, ptr);
                (ptr, usable)
            }
            None => (self.allocate_raw(size), size),
        }
    }

    /// Returns a block to the allocator.
    ///
    /// # Errors
    ///
    /// - [`MemoryError::DoubleFree`] if the slot was already freed.
    /// - [`MemoryError::InvalidPointer`] if `ptr` was not produced by this allocator.
    pub fn free(&mut self, ptr: NonNull<u8>) -> MemoryResult<()> {
        let address = ptr.as_ptr() as usize;

        if let Some(block) = self.raw_blocks.remove(&address) {
            self.used -= block.size;
            self.allocated -= block.layout.size();
            debug!("Released raw block of {} bytes at {:#x}", block.size, address);
            // SAFETY: allocated in `allocate_raw` with this layout.
            unsafe { alloc::dealloc(block.base.as_ptr(), block.layout) };
            return Ok(());
        }

        let slot = self.resolve(address).map_err(|e| {
            warn!("Rejected free of {:#x}: {}", address, e);
            e
        })?;
        self.release_slot(slot);
        trace!("Freed block at {:#x}", address);
        Ok(())
    }

    /// Whether `ptr` is a live block of this allocator.
    #[must_use]
    pub fn owns(&self, ptr: NonNull<u8>) -> bool {
        let address = ptr.as_ptr() as usize;
        self.raw_blocks.contains_key(&address) || self.resolve(address).is_ok()
    }

    /// Usable bytes of a live block.
    ///
    /// # Errors
    ///
    /// Same as [`ObjectAllocator::free`], without releasing anything.
    pub fn usable_size(&self, ptr: NonNull<u8>) -> MemoryResult<usize> {
        let address = ptr.as_ptr() as usize;
        if let Some(block) = self.raw_blocks.get(&address) {
            return Ok(block.size);
        }
        let slot = self.resolve(address)?;
        Ok(self.chunks[slot.chunk].block_size())
    }

    /// Releases every page and raw block, reporting leaked blocks.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::Leak`] if any block was still live. The memory is
    /// released regardless.
    pub fn teardown(mut self) -> MemoryResult<()> {
        match self.release_all() {
            Some(leak) => Err(leak),
            None => Ok(()),
        }
    }

    /// Smallest level whose blocks fit `size`.
    fn level_for(&self, size: usize) -> Option<usize> {
        self.levels.iter().position(|l| l.block_size >= size)
    }

    /// Picks a slot for `level`: free list first, then bump, then a new chunk.
    fn take_slot(&mut self, level: usize) -> SlotRef {
        if let Some(slot) = self.pop_free(level) {
            return slot;
        }

        if let Some(chunk) = self.levels[level].current_chunk() {
            if let Some(slot) = self.chunks[chunk].take_unused() {
                return SlotRef { chunk, slot };
            }
        }

        let chunk = self.add_chunk(level);
        match self.chunks[chunk].take_unused() {
            Some(slot) => SlotRef { chunk, slot },
            // Every level has at least one slot per chunk.
            None => unreachable!("fresh chunk without slots"),
        }
    }

    fn pop_free(&mut self, level: usize) -> Option<SlotRef> {
        let head = self.levels[level].free_head?;
        let next = match self.chunks[head.chunk].slots[head.slot] {
            SlotState::Free { next } => next,
            state => unreachable!("free list head in state {state:?}"),
        };
        let level = &mut self.levels[level];
        level.free_head = next;
        level.free_count -= 1;
        Some(head)
    }

    fn add_chunk(&mut self, level: usize) -> usize {
        let index = self.chunks.len();
        let chunk = Chunk::new(index, &self.levels[level]);

        self.allocated += chunk.byte_len();
        self.chunk_starts.insert(chunk.start(), index);
        self.levels[level].chunks.push(index);

        debug!(
            "Created chunk {} for level {} ({} bytes, {} slots of {} bytes)",
            index,
            level,
            chunk.byte_len(),
            self.levels[level].block_num,
            self.levels[level].block_size
        );

        self.chunks.push(chunk);
        index
    }

    fn mark_used(&mut self, slot: SlotRef) -> NonNull<u8> {
        let chunk = &mut self.chunks[slot.chunk];
        chunk.slots[slot.slot] = SlotState::Used { chunk: slot.chunk };
        chunk.live += 1;
        chunk.write_back_ref(slot.slot, slot.chunk + 1);
        self.used += chunk.block_size();
        chunk.block_ptr(slot.slot)
    }

    fn release_slot(&mut self, slot: SlotRef) {
        let level = self.chunks[slot.chunk].level;
        let next = self.levels[level].free_head;

        let chunk = &mut self.chunks[slot.chunk];
        chunk.write_back_ref(slot.slot, 0);
        chunk.slots[slot.slot] = SlotState::Free { next };
        chunk.live -= 1;
        self.used -= chunk.block_size();

        let level = &mut self.levels[level];
        level.free_head = Some(slot);
        level.free_count += 1;
    }

    /// Finds the used slot behind `address`.
    fn resolve(&self, address: usize) -> MemoryResult<SlotRef> {
        let invalid = MemoryError::InvalidPointer { address };

        let (_, &chunk_index) = self
            .chunk_starts
            .range(..=address)
            .next_back()
            .ok_or_else(|| invalid.clone())?;
        let chunk = &self.chunks[chunk_index];
        let slot = chunk.slot_of(address).ok_or_else(|| invalid.clone())?;

        let back_ref = chunk.read_back_ref(slot);
        match chunk.slots[slot] {
            SlotState::Used { chunk: owner } if owner == chunk_index && back_ref == owner + 1 => {
                Ok(SlotRef {
                    chunk: chunk_index,
                    slot,
                })
            }
            SlotState::Free { .. } if back_ref == 0 => Err(MemoryError::DoubleFree { address }),
            state => {
                trace!("Slot behind {:#x} is {:?} with back-reference {:#x}", address, state, back_ref);
                Err(invalid)
            }
        }
    }

    fn allocate_raw(&mut self, size: usize) -> NonNull<u8> {
        let total = size
            .checked_add(RAW_HEADER_SIZE)
            .unwrap_or_else(|| capacity_overflow());
        let layout = page_layout(total);

        // SAFETY: the layout is at least RAW_HEADER_SIZE bytes.
        let raw = unsafe { alloc::alloc(layout) };
        let Some(base) = NonNull::new(raw) else {
            alloc::handle_alloc_error(layout)
        };

        // SAFETY: the header words fit in the first RAW_HEADER_SIZE bytes and the
        // block starts right after them, inside the allocation.
        let ptr = unsafe {
            let header = base.as_ptr().cast::<usize>();
            header.write(size);
            header.add(1).write(RAW_SENTINEL);
            NonNull::new_unchecked(base.as_ptr().add(RAW_HEADER_SIZE))
        };

        self.used += size;
        self.allocated += layout.size();
        self.raw_blocks.insert(
            ptr.as_ptr() as usize,
            RawBlock { base, size, layout },
        );

        debug!("Raw allocation of {} bytes at {:p}", size, ptr);
        ptr
    }

    /// Counts live blocks, frees every page, and resets the totals.
    fn release_all(&mut self) -> Option<MemoryError> {
        if self.torn_down {
            return None;
        }
        self.torn_down = true;

        let live_slots: usize = self.chunks.iter().map(|c| c.live).sum();
        let raw_blocks = self.raw_blocks.len();
        let used_bytes = self.used;

        for (_, block) in self.raw_blocks.drain() {
            // SAFETY: allocated in `allocate_raw` with this layout.
            unsafe { alloc::dealloc(block.base.as_ptr(), block.layout) };
        }
        let pages = self.chunks.len();
        self.chunks.clear();
        self.chunk_starts.clear();
        for level in &mut self.levels {
            level.chunks.clear();
            level.free_head = None;
            level.free_count = 0;
        }
        self.used = 0;
        self.allocated = 0;

        debug!("Allocator teardown released {} chunk pages", pages);

        (live_slots > 0 || raw_blocks > 0).then_some(MemoryError::Leak {
            live_slots,
            raw_blocks,
            used_bytes,
        })
    }
}

impl Drop for ObjectAllocator {
    fn drop(&mut self) {
        if let Some(leak) = self.release_all() {
            error!("{}", leak);
            if self.config.fail_on_leak && !std::thread::panicking() {
                panic!("{leak}");
            }
        }
    }
}

impl Default for ObjectAllocator {
    fn default() -> Self {
        match Self::new(AllocatorConfig::default()) {
            Ok(allocator) => allocator,
            Err(e) => unreachable!("default allocator configuration rejected: {e}"),
        }
    }
}

impl std::fmt::Debug for ObjectAllocator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectAllocator")
            .field("levels", &self.levels.len())
            .field("chunks", &self.chunks.len())
            .field("raw_blocks", &self.raw_blocks.len())
            .field("used", &self.used)
            .field("allocated", &self.allocated)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::WORD;

    fn allocator() -> ObjectAllocator {
        ObjectAllocator::new(AllocatorConfig {
            fail_on_leak: false,
            ..AllocatorConfig::default()
        })
        .unwrap()
    }

    #[test]
    fn test_smallest_fitting_level() {
        let mut a = allocator();

        let (p1, usable1) = a.allocate_usable(1);
        let (p2, usable2) = a.allocate_usable(17);
        let (p3, usable3) = a.allocate_usable(8192);

        assert_eq!(usable1, 16);
        assert_eq!(usable2, 32);
        assert_eq!(usable3, 8192);
        assert_eq!(a.used_size(), 16 + 32 + 8192);

        for p in [p1, p2, p3] {
            a.free(p).unwrap();
        }
        assert_eq!(a.used_size(), 0);
        a.teardown().unwrap();
    }

    #[test]
    fn test_free_list_is_lifo() {
        let mut a = allocator();

        let first = a.allocate(16);
        let second = a.allocate(16);
        let third = a.allocate(16);

        a.free(first).unwrap();
        a.free(third).unwrap();

        assert_eq!(a.allocate(16), third);
        assert_eq!(a.allocate(16), first);

        for p in [first, second, third] {
            a.free(p).unwrap();
        }
        a.teardown().unwrap();
    }

    #[test]
    fn test_raw_fallback() {
        let mut a = allocator();
        let before = a.allocated_size();

        let (ptr, usable) = a.allocate_usable(100_000);
        assert_eq!(usable, 100_000);
        assert!(a.owns(ptr));
        assert_eq!(a.used_size(), 100_000);
        assert_eq!(a.allocated_size(), before + 100_000 + RAW_HEADER_SIZE);

        // SAFETY: the header precedes the block.
        let header = unsafe { std::slice::from_raw_parts(ptr.as_ptr().sub(RAW_HEADER_SIZE).cast::<usize>(), 2) };
        assert_eq!(header, &[100_000, RAW_SENTINEL]);

        a.free(ptr).unwrap();
        assert_eq!(a.used_size(), 0);
        assert_eq!(a.allocated_size(), before);
        assert!(!a.owns(ptr));
        a.teardown().unwrap();
    }

    #[test]
    fn test_double_free_detected() {
        let mut a = allocator();
        let keep = a.allocate(16);
        let ptr = a.allocate(16);

        a.free(ptr).unwrap();
        let address = ptr.as_ptr() as usize;
        assert_eq!(a.free(ptr), Err(MemoryError::DoubleFree { address }));

        a.free(keep).unwrap();
        a.teardown().unwrap();
    }

    #[test]
    fn test_foreign_pointer_rejected() {
        let mut a = allocator();
        let ptr = a.allocate(64);

        let mut local = 0u64;
        let foreign = NonNull::from(&mut local).cast::<u8>();
        assert!(matches!(a.free(foreign), Err(MemoryError::InvalidPointer { .. })));

        // SAFETY: stays inside the 64-byte block.
        let interior = unsafe { NonNull::new_unchecked(ptr.as_ptr().add(8)) };
        assert!(matches!(a.free(interior), Err(MemoryError::InvalidPointer { .. })));

        a.free(ptr).unwrap();
        a.teardown().unwrap();
    }

    #[test]
    fn test_never_used_slot_rejected() {
        let mut a = allocator();
        let ptr = a.allocate(16);

        // SAFETY: the next slot of the same chunk, never handed out.
        let neighbour = unsafe { NonNull::new_unchecked(ptr.as_ptr().add(16 + WORD)) };
        assert!(matches!(a.free(neighbour), Err(MemoryError::InvalidPointer { .. })));

        a.free(ptr).unwrap();
        a.teardown().unwrap();
    }

    #[test]
    fn test_back_reference_cleared_on_free() {
        let mut a = allocator();
        let ptr = a.allocate(16);
        // SAFETY: the back-reference word precedes the block.
        let read = |p: NonNull<u8>| unsafe { p.as_ptr().sub(WORD).cast::<usize>().read() };

        assert_eq!(read(ptr), 1);
        a.free(ptr).unwrap();
        assert_eq!(read(ptr), 0);
        a.teardown().unwrap();
    }

    #[test]
    fn test_teardown_reports_leak() {
        let mut a = allocator();
        let _pooled = a.allocate(40);
        let _raw = a.allocate(1 << 20);

        assert_eq!(
            a.teardown(),
            Err(MemoryError::Leak {
                live_slots: 1,
                raw_blocks: 1,
                used_bytes: 64 + (1 << 20),
            })
        );
    }

    #[test]
    fn test_blocks_do_not_overlap() {
        let mut a = allocator();
        let blocks: Vec<_> = (0..64).map(|i| (a.allocate(32), i as u8)).collect();

        for &(ptr, tag) in &blocks {
            // SAFETY: each block is 32 bytes and exclusively ours.
            unsafe { std::ptr::write_bytes(ptr.as_ptr(), tag, 32) };
        }
        for &(ptr, tag) in &blocks {
            // SAFETY: as above.
            let bytes = unsafe { std::slice::from_raw_parts(ptr.as_ptr(), 32) };
            assert!(bytes.iter().all(|&b| b == tag));
            assert_eq!(a.usable_size(ptr), Ok(32));
        }

        for (ptr, _) in blocks {
            a.free(ptr).unwrap();
        }
        a.teardown().unwrap();
    }

    #[test]
    #[should_panic(expected = "leaked")]
    fn test_drop_with_leak_panics_when_configured() {
        let mut a = ObjectAllocator::new(AllocatorConfig {
            fail_on_leak: true,
            ..AllocatorConfig::default()
        })
        .unwrap();
        let _ = a.allocate(16);
        drop(a);
    }
}
