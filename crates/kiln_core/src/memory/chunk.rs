//! # Chunks and Slots
//!
//! A chunk is one page carved into equally sized slots for a single level.
//! Every slot is preceded by a hidden back-reference word:
//!
//! ```text
//! +--------------+-------+------------+-------+------------+-----
//! | chunk header | back  |   block 0  | back  |   block 1  | ...
//! | level, index | ref   |            | ref   |            |
//! +--------------+-------+------------+-------+------------+-----
//!                        ^ pointer handed to the caller
//! ```
//!
//! The back-reference word holds `chunk arena index + 1` while the slot is in
//! use and zero otherwise. The authoritative slot state lives beside the page
//! in [`SlotState`], so a recycled slot never has to be reinterpreted.

#![allow(unsafe_code)]

use std::alloc::{self, Layout};
use std::ptr::{self, NonNull};

use super::level::Level;
use super::{CHUNK_HEADER_SIZE, PAGE_ALIGN, WORD};

/// Address of a slot: chunk arena index plus slot index within the chunk.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub(crate) struct SlotRef {
    /// Index into the allocator's chunk arena.
    pub chunk: usize,
    /// Slot index within that chunk.
    pub slot: usize,
}

/// State of one slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum SlotState {
    /// Never handed out; lies beyond the chunk's bump index.
    Unused,
    /// Live block owned by `chunk`.
    Used {
        /// Arena index of the owning chunk.
        chunk: usize,
    },
    /// Recycled block linked into its level's free list.
    Free {
        /// Next free slot of the same level.
        next: Option<SlotRef>,
    },
}

/// One page of slots for a single level.
pub(crate) struct Chunk {
    /// Level this chunk serves.
    pub level: usize,
    /// Start of the page.
    page: NonNull<u8>,
    /// Layout the page was allocated with.
    layout: Layout,
    /// Distance between consecutive slots.
    stride: usize,
    /// Usable bytes per slot.
    block_size: usize,
    /// Per-slot state, indexed by slot.
    pub slots: Vec<SlotState>,
    /// Index of the first never-used slot.
    pub bump: usize,
    /// Number of used slots.
    pub live: usize,
}

// SAFETY: the page is exclusively owned by the chunk and only touched through
// the allocator that owns the chunk.
unsafe impl Send for Chunk {}

impl Chunk {
    /// Allocates a zeroed page for `level` and stamps the chunk header.
    ///
    /// Aborts through [`alloc::handle_alloc_error`] when the system is out of memory.
    pub fn new(arena_index: usize, level: &Level) -> Self {
        let layout = page_layout(level.chunk_bytes);

        // SAFETY: the layout has a non-zero size.
        let raw = unsafe { alloc::alloc_zeroed(layout) };
        let Some(page) = NonNull::new(raw) else {
            alloc::handle_alloc_error(layout)
        };

        // SAFETY: the header fits in the first CHUNK_HEADER_SIZE bytes of the page,
        // which is aligned to PAGE_ALIGN >= align_of::<usize>().
        unsafe {
            let header = page.as_ptr().cast::<usize>();
            header.write(level.index);
            header.add(1).write(arena_index);
        }

        Self {
            level: level.index,
            page,
            layout,
            stride: level.stride(),
            block_size: level.block_size,
            slots: vec![SlotState::Unused; level.block_num],
            bump: 0,
            live: 0,
        }
    }

    /// Page start address.
    #[inline]
    pub fn start(&self) -> usize {
        self.page.as_ptr() as usize
    }

    /// Page length in bytes.
    #[inline]
    pub fn byte_len(&self) -> usize {
        self.layout.size()
    }

    /// Whether `address` falls inside the page.
    #[inline]
    pub fn contains(&self, address: usize) -> bool {
        address >= self.start() && address < self.start() + self.byte_len()
    }

    /// Takes the next never-used slot, if any remain.
    pub fn take_unused(&mut self) -> Option<usize> {
        if self.bump < self.slots.len() {
            let slot = self.bump;
            self.bump += 1;
            Some(slot)
        } else {
            None
        }
    }

    /// Maps a caller pointer back to its slot index.
    ///
    /// Returns `None` when the address is not the start of a block in this page.
    pub fn slot_of(&self, address: usize) -> Option<usize> {
        if !self.contains(address) {
            return None;
        }
        let offset = address
            .checked_sub(self.start() + CHUNK_HEADER_SIZE + WORD)?;
        if offset % self.stride != 0 {
            return None;
        }
        let slot = offset / self.stride;
        (slot < self.slots.len()).then_some(slot)
    }

    /// Pointer handed to the caller for `slot`.
    pub fn block_ptr(&self, slot: usize) -> NonNull<u8> {
        debug_assert!(slot < self.slots.len());
        // SAFETY: slot < block_num keeps the offset inside the page.
        unsafe {
            NonNull::new_unchecked(
                self.page
                    .as_ptr()
                    .add(CHUNK_HEADER_SIZE + slot * self.stride + WORD),
            )
        }
    }

    fn back_ref_ptr(&self, slot: usize) -> *mut usize {
        // SAFETY: the back-reference word sits WORD bytes before the block,
        // still inside the page and word aligned.
        unsafe { self.block_ptr(slot).as_ptr().sub(WORD).cast::<usize>() }
    }

    /// Reads the hidden back-reference word of `slot`.
    pub fn read_back_ref(&self, slot: usize) -> usize {
        // SAFETY: see `back_ref_ptr`. The word is never handed to callers.
        unsafe { ptr::read(self.back_ref_ptr(slot)) }
    }

    /// Writes the hidden back-reference word of `slot`.
    pub fn write_back_ref(&mut self, slot: usize, value: usize) {
        // SAFETY: see `back_ref_ptr`.
        unsafe { ptr::write(self.back_ref_ptr(slot), value) }
    }

    /// Usable bytes per block.
    #[inline]
    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// Copies the raw bytes of `slot`'s block.
    pub fn block_bytes(&self, slot: usize) -> Vec<u8> {
        let mut bytes = vec![0u8; self.block_size];
        // SAFETY: the block lies inside the zero-initialised page; the copy goes
        // through raw pointers and creates no reference to caller-owned memory.
        unsafe {
            ptr::copy_nonoverlapping(
                self.block_ptr(slot).as_ptr(),
                bytes.as_mut_ptr(),
                self.block_size,
            );
        }
        bytes
    }

    /// Copies the whole page, header included.
    pub fn page_bytes(&self) -> Vec<u8> {
        let mut bytes = vec![0u8; self.byte_len()];
        // SAFETY: as in `block_bytes`, for the full page.
        unsafe {
            ptr::copy_nonoverlapping(self.page.as_ptr(), bytes.as_mut_ptr(), self.byte_len());
        }
        bytes
    }
}

impl Drop for Chunk {
    fn drop(&mut self) {
        // SAFETY: the page was allocated in `Chunk::new` with this exact layout.
        unsafe { alloc::dealloc(self.page.as_ptr(), self.layout) }
    }
}

/// Layout of a page or raw block of `bytes` bytes.
pub(crate) fn page_layout(bytes: usize) -> Layout {
    match Layout::from_size_align(bytes, PAGE_ALIGN) {
        Ok(layout) => layout,
        Err(_) => capacity_overflow(),
    }
}

#[cold]
pub(crate) fn capacity_overflow() -> ! {
    panic!("allocation size overflows the address space")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AllocatorConfig;
    use crate::memory::level::build_levels;

    fn first_level() -> Level {
        build_levels(&AllocatorConfig::default())
            .unwrap()
            .into_iter()
            .next()
            .unwrap()
    }

    #[test]
    fn test_chunk_header_stamped() {
        let level = first_level();
        let chunk = Chunk::new(7, &level);
        let page = chunk.page_bytes();

        let word = |i: usize| usize::from_ne_bytes(page[i * WORD..(i + 1) * WORD].try_into().unwrap());
        assert_eq!(word(0), level.index);
        assert_eq!(word(1), 7);
        assert_eq!(chunk.byte_len(), level.chunk_bytes);
    }

    #[test]
    fn test_bump_exhausts() {
        let level = first_level();
        let mut chunk = Chunk::new(0, &level);

        for expected in 0..level.block_num {
            assert_eq!(chunk.take_unused(), Some(expected));
        }
        assert_eq!(chunk.take_unused(), None);
    }

    #[test]
    fn test_slot_of_round_trip() {
        let level = first_level();
        let chunk = Chunk::new(0, &level);

        for slot in [0, 1, level.block_num / 2, level.block_num - 1] {
            let address = chunk.block_ptr(slot).as_ptr() as usize;
            assert_eq!(chunk.slot_of(address), Some(slot));
            assert_eq!(chunk.slot_of(address + 1), None);
        }
        assert_eq!(chunk.slot_of(chunk.start()), None);
        assert_eq!(chunk.slot_of(chunk.start() + chunk.byte_len()), None);
    }

    #[test]
    fn test_back_ref_word() {
        let level = first_level();
        let mut chunk = Chunk::new(3, &level);

        assert_eq!(chunk.read_back_ref(5), 0);
        chunk.write_back_ref(5, 4);
        assert_eq!(chunk.read_back_ref(5), 4);
        assert_eq!(chunk.read_back_ref(4), 0);
        assert_eq!(chunk.read_back_ref(6), 0);
    }

    #[test]
    fn test_blocks_are_word_aligned() {
        let level = first_level();
        let chunk = Chunk::new(0, &level);
        for slot in 0..8 {
            assert_eq!(chunk.block_ptr(slot).as_ptr() as usize % WORD, 0);
        }
    }
}
