//! # Memory Error Types
//!
//! All errors that can occur in the allocator, the shared pointers and the
//! containers built on them.

use thiserror::Error;

/// Errors that can occur in the memory core.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MemoryError {
    /// Allocator configuration rejected at construction.
    #[error("invalid allocator configuration: {0}")]
    InvalidConfig(String),

    /// Pointer handed to `free` was not produced by this allocator.
    #[error("pointer {address:#x} is not owned by this allocator")]
    InvalidPointer {
        /// Address of the offending pointer.
        address: usize,
    },

    /// Slot back-reference was already cleared.
    #[error("double free of block at {address:#x}")]
    DoubleFree {
        /// Address of the offending pointer.
        address: usize,
    },

    /// Dereferenced a shared pointer whose pointee is empty.
    #[error("dereference of an empty shared pointer")]
    NullDereference,

    /// Pointee is already borrowed in a conflicting way.
    #[error("shared pointee is already borrowed")]
    BorrowConflict,

    /// Reference count would drop below zero.
    #[error("reference count decremented past zero")]
    CounterUnderflow,

    /// Index or range outside the container.
    #[error("index {index} out of range for length {len}")]
    IndexOutOfRange {
        /// Requested index (or range end).
        index: usize,
        /// Current element count.
        len: usize,
    },

    /// Allocator torn down while slots were still live.
    #[error("allocator leaked {live_slots} pooled blocks and {raw_blocks} raw blocks ({used_bytes} bytes)")]
    Leak {
        /// Pooled slots still marked used.
        live_slots: usize,
        /// Raw system allocations never freed.
        raw_blocks: usize,
        /// Bytes still accounted as used.
        used_bytes: usize,
    },

    /// Diagnostics dump could not be written.
    #[error("failed to write dump to {path}: {reason}")]
    Dump {
        /// Target path.
        path: String,
        /// Underlying I/O error message.
        reason: String,
    },
}

/// Result type for memory core operations.
pub type MemoryResult<T> = Result<T, MemoryError>;
