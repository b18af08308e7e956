//! Fixed-capacity element storage carved from the global allocator.

#![allow(unsafe_code)]

use std::marker::PhantomData;
use std::mem;
use std::ptr::{self, NonNull};
use std::slice;

use tracing::error;

use super::lifecycle::Lifecycle;
use crate::memory::{GlobalAllocator, MAX_BLOCK_ALIGN};

/// `len` initialized elements followed by `capacity - len` free slots.
///
/// Never grows in place; the list replaces the whole buffer instead.
pub(crate) struct ElementBuffer<T, L: Lifecycle<T>> {
    ptr: NonNull<T>,
    capacity: usize,
    len: usize,
    _marker: PhantomData<(T, fn() -> L)>,
}

impl<T, L: Lifecycle<T>> ElementBuffer<T, L> {
    const ALIGN_CHECK: () = assert!(
        mem::align_of::<T>() <= MAX_BLOCK_ALIGN,
        "element alignment exceeds what allocator blocks guarantee"
    );

    pub fn with_capacity(capacity: usize) -> Self {
        let () = Self::ALIGN_CHECK;

        let Some(bytes) = mem::size_of::<T>().checked_mul(capacity) else {
            panic!("list capacity overflow");
        };
        let ptr = GlobalAllocator::allocate(bytes).cast::<T>();

        Self {
            ptr,
            capacity,
            len: 0,
            _marker: PhantomData,
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    #[inline]
    pub fn as_slice(&self) -> &[T] {
        // SAFETY: the first `len` elements are initialized.
        unsafe { slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }

    #[inline]
    pub fn as_mut_slice(&mut self) -> &mut [T] {
        // SAFETY: as in `as_slice`, and `&mut self` is exclusive.
        unsafe { slice::from_raw_parts_mut(self.ptr.as_ptr(), self.len) }
    }

    pub fn push(&mut self, value: T) {
        assert!(self.len < self.capacity, "push into a full buffer");
        // SAFETY: `len < capacity`, the slot is uninitialized.
        unsafe { self.ptr.as_ptr().add(self.len).write(value) };
        self.len += 1;
    }

    pub fn pop(&mut self) -> Option<T> {
        if self.len == 0 {
            return None;
        }
        self.len -= 1;
        // SAFETY: the element was initialized and is now outside `len`.
        Some(unsafe { self.ptr.as_ptr().add(self.len).read() })
    }

    /// Shifts `[index..len]` up by one and writes `value` at `index`.
    pub fn insert(&mut self, index: usize, value: T) {
        assert!(index <= self.len, "insert past the end");
        assert!(self.len < self.capacity, "insert into a full buffer");
        // SAFETY: the shifted range ends at `len + 1 <= capacity`; `ptr::copy`
        // handles the overlap.
        unsafe {
            let at = self.ptr.as_ptr().add(index);
            ptr::copy(at, at.add(1), self.len - index);
            at.write(value);
        }
        self.len += 1;
    }

    /// Destroys `[start..start + count]` and closes the gap.
    pub fn remove_range(&mut self, start: usize, count: usize) {
        let end = start + count;
        assert!(end <= self.len, "remove past the end");
        let tail = self.len - end;

        // Truncate first so a panicking destructor cannot cause a double drop.
        self.len = start;
        // SAFETY: `[start..end]` was initialized and is dropped once; the tail
        // is moved down bitwise, overlap handled by `ptr::copy`.
        unsafe {
            let at = self.ptr.as_ptr().add(start);
            L::destroy(at, count);
            ptr::copy(at.add(count), at, tail);
        }
        self.len = start + tail;
    }

    /// Moves every element into a new buffer of `capacity`, leaving `self` empty.
    pub fn move_to(&mut self, capacity: usize) -> Self {
        assert!(capacity >= self.len, "move into a smaller buffer");
        let mut target = Self::with_capacity(capacity);
        // SAFETY: distinct allocations, `len` fits both.
        unsafe { ptr::copy_nonoverlapping(self.ptr.as_ptr(), target.ptr.as_ptr(), self.len) };
        target.len = self.len;
        self.len = 0;
        target
    }

    /// Duplicates `[start..start + count]` into a new buffer of `capacity`.
    pub fn copy_range(&self, start: usize, count: usize, capacity: usize) -> Self {
        assert!(start + count <= self.len, "copy past the end");
        assert!(capacity >= count, "copy into a smaller buffer");
        let mut target = Self::with_capacity(capacity);
        // SAFETY: the source range is initialized, the target is fresh.
        unsafe { L::copy_out(self.ptr.as_ptr().add(start), target.ptr.as_ptr(), count) };
        target.len = count;
        target
    }

    /// Duplicates every element outside `[start..start + count]` into a new
    /// buffer of `capacity`.
    pub fn copy_without(&self, start: usize, count: usize, capacity: usize) -> Self {
        let end = start + count;
        assert!(end <= self.len, "skip past the end");
        let tail = self.len - end;
        assert!(capacity >= start + tail, "copy into a smaller buffer");

        let mut target = self.copy_range(0, start, capacity);
        // SAFETY: the tail is initialized and lands right after the head,
        // inside the fresh target.
        unsafe { L::copy_out(self.ptr.as_ptr().add(end), target.ptr.as_ptr().add(start), tail) };
        target.len = start + tail;
        target
    }

    /// Duplicates every element into a new buffer of `capacity`.
    pub fn copy_out(&self, capacity: usize) -> Self {
        self.copy_range(0, self.len, capacity)
    }
}

impl<T, L: Lifecycle<T>> Drop for ElementBuffer<T, L> {
    fn drop(&mut self) {
        let len = mem::replace(&mut self.len, 0);
        // SAFETY: the first `len` elements are initialized and dropped once.
        unsafe { L::destroy(self.ptr.as_ptr(), len) };

        if let Err(e) = GlobalAllocator::free(self.ptr.cast()) {
            error!("Failed to release list buffer: {}", e);
        }
    }
}
