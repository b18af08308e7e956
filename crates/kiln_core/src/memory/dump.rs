//! # Diagnostics
//!
//! Read-only introspection of an allocator: per-level statistics and two
//! operator-facing dumps of the raw chunk contents. The dump formats are for
//! humans and debugging tools only.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use bytemuck::{Pod, Zeroable};

use super::allocator::ObjectAllocator;
use super::chunk::SlotState;
use super::RAW_HEADER_SIZE;
use crate::error::{MemoryError, MemoryResult};

/// Magic prefix of a binary dump.
pub const DUMP_MAGIC: [u8; 8] = *b"KILNDUMP";

/// Per-chunk record header of a binary dump. The page bytes follow it.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Pod, Zeroable)]
pub struct DumpRecord {
    /// Level the chunk serves.
    pub level: u32,
    /// Arena index of the chunk.
    pub chunk: u32,
    /// Block size of the level.
    pub block_size: u64,
    /// Number of page bytes that follow.
    pub byte_len: u64,
}

/// Statistics of one size class.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LevelStats {
    /// Level index.
    pub index: usize,
    /// Usable bytes per block.
    pub block_size: usize,
    /// Slots per chunk.
    pub blocks_per_chunk: usize,
    /// Bytes per chunk page.
    pub chunk_bytes: usize,
    /// Chunks created so far.
    pub chunks: usize,
    /// Slots currently in use.
    pub live_slots: usize,
    /// Slots waiting on the free list.
    pub free_slots: usize,
}

/// Snapshot of an allocator.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AllocatorStats {
    /// One entry per level, smallest first.
    pub levels: Vec<LevelStats>,
    /// Live raw (system) allocations.
    pub raw_blocks: usize,
    /// See [`ObjectAllocator::used_size`].
    pub used_size: usize,
    /// See [`ObjectAllocator::allocated_size`].
    pub allocated_size: usize,
}

impl ObjectAllocator {
    /// Collects per-level statistics.
    #[must_use]
    pub fn stats(&self) -> AllocatorStats {
        let levels = self
            .levels
            .iter()
            .map(|level| LevelStats {
                index: level.index,
                block_size: level.block_size,
                blocks_per_chunk: level.block_num,
                chunk_bytes: level.chunk_bytes,
                chunks: level.chunks.len(),
                live_slots: level.chunks.iter().map(|&c| self.chunks[c].live).sum(),
                free_slots: level.free_count,
            })
            .collect();

        AllocatorStats {
            levels,
            raw_blocks: self.raw_blocks.len(),
            used_size: self.used_size(),
            allocated_size: self.allocated_size(),
        }
    }

    /// Writes every chunk page as raw bytes.
    ///
    /// Layout: [`DUMP_MAGIC`], then per chunk a [`DumpRecord`] followed by the
    /// page bytes. Native endianness.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::Dump`] if the file cannot be written.
    pub fn dump<P: AsRef<Path>>(&self, path: P) -> MemoryResult<()> {
        let path = path.as_ref();
        let mut out = create(path)?;

        write_all(&mut out, path, &DUMP_MAGIC)?;
        for (index, chunk) in self.chunks.iter().enumerate() {
            let record = DumpRecord {
                level: to_u32(chunk.level),
                chunk: to_u32(index),
                block_size: chunk.block_size() as u64,
                byte_len: chunk.byte_len() as u64,
            };
            write_all(&mut out, path, bytemuck::bytes_of(&record))?;
            write_all(&mut out, path, &chunk.page_bytes())?;
        }
        out.flush().map_err(|e| dump_error(path, &e))
    }

    /// Writes a human-readable listing of every level, chunk, slot and raw block.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::Dump`] if the file cannot be written.
    pub fn dump_as_text<P: AsRef<Path>>(&self, path: P) -> MemoryResult<()> {
        let path = path.as_ref();
        let mut out = create(path)?;
        let text = self.render_text();
        write_all(&mut out, path, text.as_bytes())?;
        out.flush().map_err(|e| dump_error(path, &e))
    }

    fn render_text(&self) -> String {
        use std::fmt::Write as _;

        let mut text = String::new();
        let _ = writeln!(
            text,
            "allocator: used {} / allocated {} bytes",
            self.used_size(),
            self.allocated_size()
        );

        for level in &self.levels {
            let _ = writeln!(
                text,
                "level {}: block {} bytes, {} per chunk, {} chunks, {} free",
                level.index,
                level.block_size,
                level.block_num,
                level.chunks.len(),
                level.free_count
            );

            for &index in &level.chunks {
                let chunk = &self.chunks[index];
                let _ = writeln!(
                    text,
                    "  chunk {} @ {:#x}: {} live, {} touched",
                    index,
                    chunk.start(),
                    chunk.live,
                    chunk.bump
                );

                for (slot, state) in chunk.slots.iter().enumerate().take(chunk.bump) {
                    let label = match state {
                        SlotState::Used { .. } => "used".to_string(),
                        SlotState::Free { next: Some(next) } => {
                            format!("free -> {}#{}", next.chunk, next.slot)
                        }
                        SlotState::Free { next: None } => "free -> end".to_string(),
                        SlotState::Unused => "unused".to_string(),
                    };
                    let _ = writeln!(
                        text,
                        "    #{:<5} {:#x} back={:#x} {}",
                        slot,
                        chunk.block_ptr(slot).as_ptr() as usize,
                        chunk.read_back_ref(slot),
                        label
                    );
                    push_hex(&mut text, &chunk.block_bytes(slot));
                }
            }
        }

        let _ = writeln!(text, "raw blocks: {}", self.raw_blocks.len());
        let mut raw: Vec<_> = self.raw_blocks.iter().collect();
        raw.sort_by_key(|(address, _)| **address);
        for (address, block) in raw {
            let _ = writeln!(
                text,
                "  {:#x}: {} bytes (+{} header)",
                address, block.size, RAW_HEADER_SIZE
            );
        }

        text
    }
}

/// Appends `bytes` as rows of 16 hex pairs.
fn push_hex(text: &mut String, bytes: &[u8]) {
    use std::fmt::Write as _;

    for row in bytes.chunks(16) {
        text.push_str("      ");
        for byte in row {
            let _ = write!(text, "{byte:02x} ");
        }
        text.push('\n');
    }
}

fn to_u32(value: usize) -> u32 {
    u32::try_from(value).unwrap_or(u32::MAX)
}

fn create(path: &Path) -> MemoryResult<BufWriter<File>> {
    File::create(path)
        .map(BufWriter::new)
        .map_err(|e| dump_error(path, &e))
}

fn write_all(out: &mut BufWriter<File>, path: &Path, bytes: &[u8]) -> MemoryResult<()> {
    out.write_all(bytes).map_err(|e| dump_error(path, &e))
}

fn dump_error(path: &Path, e: &std::io::Error) -> MemoryError {
    MemoryError::Dump {
        path: path.display().to_string(),
        reason: e.to_string(),
    }
}
