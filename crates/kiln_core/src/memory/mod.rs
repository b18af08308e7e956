//! # Memory Management
//!
//! Pooled allocation for the whole engine.
//!
//! ## Design Philosophy
//!
//! - A few fixed size classes, each served from chunk pages
//! - Freed blocks are recycled LIFO, pages are kept until teardown
//! - Oversized requests fall through to the system allocator
//! - Misuse (double free, foreign pointers) is detected, never tolerated

mod allocator;
mod chunk;
mod dump;
mod global;
mod level;

use std::mem;

pub use allocator::ObjectAllocator;
pub use dump::{AllocatorStats, DumpRecord, LevelStats, DUMP_MAGIC};
pub use global::GlobalAllocator;

/// Machine word size; every block is preceded by one back-reference word.
pub const WORD: usize = mem::size_of::<usize>();

/// Bytes reserved at the start of each chunk page (level index, chunk index).
pub const CHUNK_HEADER_SIZE: usize = 2 * WORD;

/// Bytes preceding a raw allocation (size word, sentinel word).
pub const RAW_HEADER_SIZE: usize = 2 * WORD;

/// Back-reference value marking a raw system allocation.
pub const RAW_SENTINEL: usize = usize::MAX;

/// Alignment of chunk pages and raw allocations.
pub const PAGE_ALIGN: usize = 16;

/// Largest chunk size a configuration may ask for; pages above it cannot be laid out.
pub const MAX_CHUNK_BYTES: usize = isize::MAX as usize - PAGE_ALIGN;

/// Largest element alignment a block can satisfy.
pub const MAX_BLOCK_ALIGN: usize = WORD;
