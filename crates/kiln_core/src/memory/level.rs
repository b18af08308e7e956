//! # Size Classes
//!
//! A level is one bucket of fixed-size blocks. Levels are generated once from
//! the allocator configuration with geometrically increasing block size:
//!
//! ```text
//! level i: block_size = min_size * zoom^i          (rounded up to a word)
//!          block_num  = ceil((chunk_size - CHUNK_HEADER_SIZE) / (block_size + WORD))
//!          chunk      = CHUNK_HEADER_SIZE + block_num * (block_size + WORD)
//! ```

use super::chunk::SlotRef;
use super::{CHUNK_HEADER_SIZE, MAX_CHUNK_BYTES, WORD};
use crate::config::AllocatorConfig;
use crate::error::{MemoryError, MemoryResult};

/// Largest block size a level may describe. Keeps stride arithmetic far from overflow.
const MAX_BLOCK_SIZE: usize = isize::MAX as usize / 4;

/// One size class and its runtime bookkeeping.
#[derive(Debug)]
pub(crate) struct Level {
    /// Position in the level table.
    pub index: usize,
    /// Usable bytes per block.
    pub block_size: usize,
    /// Slots per chunk.
    pub block_num: usize,
    /// Byte size of one chunk page, header included.
    pub chunk_bytes: usize,
    /// Arena indices of this level's chunks, oldest first. The last one is current.
    pub chunks: Vec<usize>,
    /// Head of the LIFO free list.
    pub free_head: Option<SlotRef>,
    /// Number of slots currently on the free list.
    pub free_count: usize,
}

impl Level {
    fn new(index: usize, block_size: usize, chunk_size: usize) -> MemoryResult<Self> {
        let stride = block_size + WORD;
        let block_num = chunk_size.saturating_sub(CHUNK_HEADER_SIZE).div_ceil(stride);

        let chunk_bytes = block_num
            .checked_mul(stride)
            .and_then(|bytes| bytes.checked_add(CHUNK_HEADER_SIZE))
            .filter(|&bytes| bytes <= MAX_CHUNK_BYTES)
            .ok_or_else(|| {
                MemoryError::InvalidConfig(format!(
                    "level {index} chunk of {block_num} x {stride} bytes exceeds the addressable range"
                ))
            })?;

        Ok(Self {
            index,
            block_size,
            block_num,
            chunk_bytes,
            chunks: Vec::new(),
            free_head: None,
            free_count: 0,
        })
    }

    /// Distance between two consecutive slots (block plus back-reference word).
    #[inline]
    pub fn stride(&self) -> usize {
        self.block_size + WORD
    }

    /// Arena index of the chunk bump allocation currently draws from.
    #[inline]
    pub fn current_chunk(&self) -> Option<usize> {
        self.chunks.last().copied()
    }
}

/// Rounds `size` up to the next multiple of the machine word.
#[inline]
pub(crate) fn align_to_word(size: usize) -> usize {
    (size + WORD - 1) & !(WORD - 1)
}

/// Builds the level table for a validated configuration.
///
/// # Errors
///
/// Returns [`MemoryError::InvalidConfig`] if a level's block size or chunk page
/// would exceed the addressable range.
pub(crate) fn build_levels(config: &AllocatorConfig) -> MemoryResult<Vec<Level>> {
    let mut levels = Vec::with_capacity(config.zoom_level);

    for index in 0..config.zoom_level {
        let exponent = i32::try_from(index).map_err(|_| {
            MemoryError::InvalidConfig(format!("zoom_level {} is too large", config.zoom_level))
        })?;
        #[allow(clippy::cast_precision_loss)]
        let raw = (config.min_size as f64 * config.zoom.powi(exponent)).ceil();
        #[allow(clippy::cast_precision_loss)]
        let limit = MAX_BLOCK_SIZE as f64;

        if raw > limit {
            return Err(MemoryError::InvalidConfig(format!(
                "level {index} block size {raw} exceeds the addressable range"
            )));
        }

        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let block_size = align_to_word(raw as usize);
        levels.push(Level::new(index, block_size, config.chunk_size)?);
    }

    Ok(levels)
}
