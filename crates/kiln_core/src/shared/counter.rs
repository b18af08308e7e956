//! # Reference Counter
//!
//! One shared count cell living in a block of the [`GlobalAllocator`].
//! Cloning a handle increments the count, dropping one decrements it. The
//! manual [`ReferenceCounter::increment`] / [`ReferenceCounter::decrement`]
//! entry points let intrusive structures hold references that are not
//! handles (an event node kept alive by both a list and an outside handle).
//!
//! The cell also tracks how many handles exist, so the block is returned to
//! the allocator only when the last handle is gone, whatever the manual
//! adjustments did to the count.

#![allow(unsafe_code)]

use std::fmt;
use std::marker::PhantomData;
use std::mem;
use std::ptr::NonNull;

use bytemuck::{Pod, Zeroable};
use tracing::error;

use crate::error::{MemoryError, MemoryResult};
use crate::memory::GlobalAllocator;

#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
struct CountCell {
    /// Logical reference count.
    count: usize,
    /// Live `ReferenceCounter` handles.
    handles: usize,
}

/// Shared reference count backed by an allocator-owned cell.
///
/// Not thread-safe.
pub struct ReferenceCounter {
    cell: NonNull<CountCell>,
    _not_send: PhantomData<*const CountCell>,
}

impl ReferenceCounter {
    /// Allocates a new cell with a count of one.
    #[must_use]
    pub fn new() -> Self {
        let cell = GlobalAllocator::allocate(mem::size_of::<CountCell>()).cast::<CountCell>();
        // SAFETY: the block is at least two words long and word aligned.
        unsafe {
            cell.as_ptr().write(CountCell {
                count: 1,
                handles: 1,
            });
        }
        Self {
            cell,
            _not_send: PhantomData,
        }
    }

    #[inline]
    fn read(&self) -> CountCell {
        // SAFETY: the cell stays allocated while any handle exists.
        unsafe { self.cell.as_ptr().read() }
    }

    #[inline]
    fn write(&self, cell: CountCell) {
        // SAFETY: as in `read`; handles are confined to one thread.
        unsafe { self.cell.as_ptr().write(cell) }
    }

    /// Current count.
    #[inline]
    #[must_use]
    pub fn count(&self) -> usize {
        self.read().count
    }

    /// Whether exactly one reference exists.
    #[inline]
    #[must_use]
    pub fn is_unique(&self) -> bool {
        self.count() == 1
    }

    /// Adds a reference that is not a handle. Returns the new count.
    pub fn increment(&self) -> usize {
        let mut cell = self.read();
        cell.count += 1;
        self.write(cell);
        cell.count
    }

    /// Removes a reference. Returns the new count; zero means the last
    /// reference is gone and the owner should release what it guards.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::CounterUnderflow`] if the count is already zero.
    pub fn decrement(&self) -> MemoryResult<usize> {
        let mut cell = self.read();
        if cell.count == 0 {
            return Err(MemoryError::CounterUnderflow);
        }
        cell.count -= 1;
        self.write(cell);
        Ok(cell.count)
    }

    /// Whether `self` and `other` share one cell.
    #[inline]
    #[must_use]
    pub fn same_cell(&self, other: &Self) -> bool {
        self.cell == other.cell
    }
}

impl Default for ReferenceCounter {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for ReferenceCounter {
    fn clone(&self) -> Self {
        let mut cell = self.read();
        cell.count += 1;
        cell.handles += 1;
        self.write(cell);
        Self {
            cell: self.cell,
            _not_send: PhantomData,
        }
    }
}

impl Drop for ReferenceCounter {
    fn drop(&mut self) {
        let mut cell = self.read();
        cell.count = cell.count.saturating_sub(1);
        cell.handles -= 1;

        if cell.handles > 0 {
            self.write(cell);
            return;
        }
        if let Err(e) = GlobalAllocator::free(self.cell.cast()) {
            error!("Failed to release reference count cell: {}", e);
        }
    }
}

impl fmt::Debug for ReferenceCounter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let cell = self.read();
        f.debug_struct("ReferenceCounter")
            .field("count", &cell.count)
            .field("handles", &cell.handles)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clone_and_drop_track_count() {
        let a = ReferenceCounter::new();
        assert_eq!(a.count(), 1);
        assert!(a.is_unique());

        let b = a.clone();
        assert_eq!(a.count(), 2);
        assert!(a.same_cell(&b));
        assert!(!b.is_unique());

        drop(b);
        assert_eq!(a.count(), 1);
    }

    #[test]
    fn test_manual_increment_decrement() {
        let counter = ReferenceCounter::new();
        assert_eq!(counter.increment(), 2);
        assert_eq!(counter.decrement(), Ok(1));
        assert_eq!(counter.decrement(), Ok(0));
        assert_eq!(counter.decrement(), Err(MemoryError::CounterUnderflow));
        assert_eq!(counter.count(), 0);
    }

    #[test]
    fn test_cell_released_with_last_handle() {
        let a = ReferenceCounter::new();
        let b = a.clone();
        let cell = a.cell.cast::<u8>();

        // Intrusive owner drops its reference to zero while both handles live.
        a.decrement().unwrap();
        a.decrement().unwrap();
        drop(a);
        assert!(GlobalAllocator::owns(cell));
        assert_eq!(b.count(), 0);
        drop(b);
    }

    #[test]
    fn test_distinct_counters_do_not_share() {
        let a = ReferenceCounter::new();
        let b = ReferenceCounter::new();
        assert!(!a.same_cell(&b));
        a.increment();
        assert_eq!(b.count(), 1);
    }
}
