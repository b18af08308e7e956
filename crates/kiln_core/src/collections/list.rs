//! # List
//!
//! The growable array every higher collection builds on.
//!
//! ## Buffer Sharing
//!
//! ```text
//! let b = a.clone();        a ─┐
//!                              ├─→ SharedPointer<ElementBuffer>  (refs = 2)
//!                           b ─┘
//! a.push_back(x);           a ───→ ElementBuffer' (copied, then pushed)
//!                           b ───→ ElementBuffer  (refs = 1, unchanged)
//! ```
//!
//! ## Capacity Policy
//!
//! Starts at [`MIN_CAPACITY`], doubles when a push finds the buffer full, and
//! halves while fewer than a quarter of the slots are in use, never below
//! [`MIN_CAPACITY`].

#![allow(unsafe_code)]

use std::cmp::Ordering;
use std::fmt;
use std::ops::{Index, IndexMut};

use super::buffer::ElementBuffer;
use super::lifecycle::{Lifecycle, Managed};
use crate::error::{MemoryError, MemoryResult};
use crate::shared::SharedPointer;

/// Smallest capacity a list ever has.
pub const MIN_CAPACITY: usize = 5;

/// Growable array with copy-on-write buffer sharing.
///
/// `L` picks the element discipline: [`Managed`] (clone/drop, the default) or
/// [`Direct`](super::Direct) (raw byte copies for
/// [`DirectMemoryAccess`](super::DirectMemoryAccess) types).
///
/// Elements may be aligned to at most one machine word
/// ([`MAX_BLOCK_ALIGN`](crate::memory::MAX_BLOCK_ALIGN)), the alignment every
/// pool block guarantees. Wider alignment is rejected at compile time:
///
/// ```compile_fail
/// use kiln_core::List;
///
/// #[derive(Clone)]
/// #[repr(align(32))]
/// struct Wide(u64);
///
/// let list: List<Wide> = List::new();
/// ```
///
/// Structural mutation needs `&mut self`, so it cannot happen while
/// [`List::for_each`] or any other borrow of the same list is running:
///
/// ```compile_fail
/// use kiln_core::List;
///
/// let mut list: List<i32> = (0..3).collect();
/// list.for_each(|_| {
///     list.push_back(1);
///     true
/// });
/// ```
pub struct List<T, L = Managed>
where
    L: Lifecycle<T>,
{
    buffer: SharedPointer<ElementBuffer<T, L>>,
}

impl<T, L: Lifecycle<T>> List<T, L> {
    /// Creates an empty list with [`MIN_CAPACITY`] slots.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(MIN_CAPACITY)
    }

    /// Creates an empty list with at least `capacity` slots.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self::from_buffer(ElementBuffer::with_capacity(capacity.max(MIN_CAPACITY)))
    }

    fn from_buffer(buffer: ElementBuffer<T, L>) -> Self {
        Self {
            buffer: SharedPointer::new(buffer),
        }
    }

    #[inline]
    fn buffer(&self) -> &ElementBuffer<T, L> {
        // SAFETY: the buffer pointer never leaves this type and is only
        // mutated through `get_exclusive`, which requires sole ownership and
        // therefore `&mut` access to the only list holding it.
        match unsafe { self.buffer.get_unguarded() } {
            Ok(buffer) => buffer,
            Err(e) => unreachable!("list buffer unavailable: {e}"),
        }
    }

    /// Gives exclusive access to a buffer of `capacity` slots, copying out of
    /// a shared buffer or moving into a resized one as needed.
    fn unique_with_capacity(&mut self, capacity: usize) -> &mut ElementBuffer<T, L> {
        if !self.buffer.is_unique() {
            let copy = self.buffer().copy_out(capacity);
            self.buffer = SharedPointer::new(copy);
        } else if capacity != self.capacity() {
            if let Some(buffer) = self.buffer.get_exclusive() {
                let moved = buffer.move_to(capacity);
                self.buffer = SharedPointer::new(moved);
            }
        }

        match self.buffer.get_exclusive() {
            Some(buffer) => buffer,
            None => unreachable!("list buffer still shared after copy-out"),
        }
    }

    fn make_unique(&mut self) -> &mut ElementBuffer<T, L> {
        let capacity = self.capacity();
        self.unique_with_capacity(capacity)
    }

    /// Capacity with room for one more element.
    fn grown_capacity(&self) -> usize {
        let capacity = self.capacity();
        if self.count() == capacity {
            capacity * 2
        } else {
            capacity
        }
    }

    /// Capacity after halving while under a quarter full.
    fn shrunk_capacity(len: usize, capacity: usize) -> usize {
        let mut target = capacity;
        while target > MIN_CAPACITY && len * 4 < target {
            target = (target / 2).max(MIN_CAPACITY);
        }
        target
    }

    fn shrink_to_fit_policy(&mut self) {
        let capacity = self.capacity();
        let target = Self::shrunk_capacity(self.count(), capacity);
        if target != capacity {
            self.unique_with_capacity(target);
        }
    }

    /// Number of elements.
    #[inline]
    #[must_use]
    pub fn count(&self) -> usize {
        self.buffer().len()
    }

    /// Number of slots in the current buffer.
    #[inline]
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.buffer().capacity()
    }

    /// Whether the list has no elements.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.count() == 0
    }

    /// Whether the buffer is shared with another list.
    #[inline]
    #[must_use]
    pub fn is_shared(&self) -> bool {
        !self.buffer.is_unique()
    }

    /// Elements as a slice.
    #[must_use]
    pub fn as_slice(&self) -> &[T] {
        self.buffer().as_slice()
    }

    /// Elements as a mutable slice; detaches a shared buffer first.
    pub fn as_mut_slice(&mut self) -> &mut [T] {
        self.make_unique().as_mut_slice()
    }

    /// Iterates over the elements.
    pub fn iter(&self) -> std::slice::Iter<'_, T> {
        self.as_slice().iter()
    }

    /// Element at `index`.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::IndexOutOfRange`] if `index >= count()`.
    pub fn at(&self, index: usize) -> MemoryResult<&T> {
        let slice = self.as_slice();
        slice.get(index).ok_or(MemoryError::IndexOutOfRange {
            index,
            len: slice.len(),
        })
    }

    /// Mutable element at `index`; detaches a shared buffer first.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::IndexOutOfRange`] if `index >= count()`.
    pub fn at_mut(&mut self, index: usize) -> MemoryResult<&mut T> {
        self.check_index(index)?;
        Ok(&mut self.as_mut_slice()[index])
    }

    /// First element.
    #[must_use]
    pub fn first(&self) -> Option<&T> {
        self.as_slice().first()
    }

    /// Last element.
    #[must_use]
    pub fn last(&self) -> Option<&T> {
        self.as_slice().last()
    }

    fn check_index(&self, index: usize) -> MemoryResult<()> {
        let len = self.count();
        if index < len {
            Ok(())
        } else {
            Err(MemoryError::IndexOutOfRange { index, len })
        }
    }

    /// Appends `value`, doubling the capacity if the buffer is full.
    pub fn push_back(&mut self, value: T) {
        let capacity = self.grown_capacity();
        self.unique_with_capacity(capacity).push(value);
    }

    /// Removes the last element.
    pub fn pop_back(&mut self) -> Option<T> {
        if self.is_empty() {
            return None;
        }
        // The shrunk capacity still fits every current element.
        let target = Self::shrunk_capacity(self.count() - 1, self.capacity());
        self.unique_with_capacity(target).pop()
    }

    /// Inserts `value` at `index`, shifting later elements up.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::IndexOutOfRange`] if `index > count()`.
    pub fn insert(&mut self, index: usize, value: T) -> MemoryResult<()> {
        let len = self.count();
        if index > len {
            return Err(MemoryError::IndexOutOfRange { index, len });
        }
        let capacity = self.grown_capacity();
        self.unique_with_capacity(capacity).insert(index, value);
        Ok(())
    }

    /// Removes `count` elements starting at `index`, shifting later ones down.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::IndexOutOfRange`] if the range extends past the end.
    pub fn remove(&mut self, index: usize, count: usize) -> MemoryResult<()> {
        let len = self.count();
        match index.checked_add(count) {
            Some(end) if end <= len => {}
            _ => return Err(MemoryError::IndexOutOfRange { index, len }),
        }
        if count == 0 {
            return Ok(());
        }

        if self.is_shared() {
            let target = Self::shrunk_capacity(len - count, self.capacity());
            let kept = self.buffer().copy_without(index, count, target);
            self.buffer = SharedPointer::new(kept);
        } else {
            self.make_unique().remove_range(index, count);
            self.shrink_to_fit_policy();
        }
        Ok(())
    }

    /// Removes every element and returns to [`MIN_CAPACITY`].
    pub fn clear(&mut self) {
        *self = Self::new();
    }

    /// Exchanges the elements at `a` and `b`.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::IndexOutOfRange`] if either index is invalid.
    pub fn swap(&mut self, a: usize, b: usize) -> MemoryResult<()> {
        self.check_index(a)?;
        self.check_index(b)?;
        if a != b {
            self.as_mut_slice().swap(a, b);
        }
        Ok(())
    }

    /// Exchanges the contents of two lists without copying elements.
    pub fn swap_with(&mut self, other: &mut Self) {
        std::mem::swap(&mut self.buffer, &mut other.buffer);
    }

    /// Copies `count` elements starting at `start` into a new list.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::IndexOutOfRange`] if the range extends past the end.
    pub fn sub_sequence(&self, start: usize, count: usize) -> MemoryResult<Self> {
        let len = self.count();
        match start.checked_add(count) {
            Some(end) if end <= len => {}
            _ => return Err(MemoryError::IndexOutOfRange { index: start, len }),
        }
        let capacity = count.max(MIN_CAPACITY);
        Ok(Self::from_buffer(
            self.buffer().copy_range(start, count, capacity),
        ))
    }

    /// First element matching `predicate`.
    pub fn find<P>(&self, mut predicate: P) -> Option<&T>
    where
        P: FnMut(&T) -> bool,
    {
        self.iter().find(|item| predicate(item))
    }

    /// Index of the first element matching `predicate`.
    pub fn find_index<P>(&self, predicate: P) -> Option<usize>
    where
        P: FnMut(&T) -> bool,
    {
        self.iter().position(predicate)
    }

    /// Calls `f` on each element in order until it returns `false`.
    ///
    /// Returns `true` if every element was visited.
    pub fn for_each<F>(&self, mut f: F) -> bool
    where
        F: FnMut(&T) -> bool,
    {
        for item in self.iter() {
            if !f(item) {
                return false;
            }
        }
        true
    }
}

impl<T, L: Lifecycle<T>> Default for List<T, L> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T, L: Lifecycle<T>> Clone for List<T, L> {
    /// Shares the buffer; the first structural mutation on either side copies it.
    fn clone(&self) -> Self {
        Self {
            buffer: self.buffer.clone(),
        }
    }
}

impl<T: fmt::Debug, L: Lifecycle<T>> fmt::Debug for List<T, L> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.iter()).finish()
    }
}

impl<T, L: Lifecycle<T>> Index<usize> for List<T, L> {
    type Output = T;

    fn index(&self, index: usize) -> &T {
        &self.as_slice()[index]
    }
}

impl<T, L: Lifecycle<T>> IndexMut<usize> for List<T, L> {
    fn index_mut(&mut self, index: usize) -> &mut T {
        &mut self.as_mut_slice()[index]
    }
}

impl<T, L: Lifecycle<T>> Extend<T> for List<T, L> {
    fn extend<I: IntoIterator<Item = T>>(&mut self, iter: I) {
        for item in iter {
            self.push_back(item);
        }
    }
}

impl<T, L: Lifecycle<T>> FromIterator<T> for List<T, L> {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        let mut list = Self::new();
        list.extend(iter);
        list
    }
}

impl<'a, T, L: Lifecycle<T>> IntoIterator for &'a List<T, L> {
    type Item = &'a T;
    type IntoIter = std::slice::Iter<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl<T: PartialEq, L: Lifecycle<T>> PartialEq for List<T, L> {
    fn eq(&self, other: &Self) -> bool {
        L::equal(self.as_slice(), other.as_slice())
    }
}

impl<T: Eq, L: Lifecycle<T>> Eq for List<T, L> {}

impl<T: PartialOrd, L: Lifecycle<T>> PartialOrd for List<T, L> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        L::partial_compare(self.as_slice(), other.as_slice())
    }
}

impl<T: Ord, L: Lifecycle<T>> Ord for List<T, L> {
    fn cmp(&self, other: &Self) -> Ordering {
        L::compare(self.as_slice(), other.as_slice())
    }
}
