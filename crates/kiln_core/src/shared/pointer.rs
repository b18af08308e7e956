//! # Shared Pointer
//!
//! Shared ownership of one pointee with an optional release callback.
//!
//! ```text
//! SharedPointer ─┐
//! SharedPointer ─┼─→ Rc<Indirection> ─→ pointee (Option<T>) + release callback
//! SharedPointer ─┘        ReferenceCounter (allocator cell)
//! ```
//!
//! The release callback runs exactly once, on the pointee, when the last
//! pointer sharing the indirection is dropped.

#![allow(unsafe_code)]

use std::cell::{Cell, Ref, RefCell, RefMut};
use std::fmt;
use std::mem;
use std::rc::Rc;

use super::counter::ReferenceCounter;
use crate::error::{MemoryError, MemoryResult};

type Release<T> = Box<dyn FnOnce(T)>;

struct Indirection<T> {
    pointee: RefCell<Option<T>>,
    release: Cell<Option<Release<T>>>,
}

/// Reference-counted pointer whose aliases share one pointee slot.
///
/// # Example
///
/// ```rust,ignore
/// let texture = SharedPointer::with_release(atlas_page, |page| page.unload());
/// let alias = texture.clone();
/// drop(texture);   // still referenced, nothing released
/// drop(alias);     // `unload` runs here
/// ```
pub struct SharedPointer<T> {
    cell: Rc<Indirection<T>>,
    counter: ReferenceCounter,
}

impl<T> SharedPointer<T> {
    fn from_parts(pointee: Option<T>, release: Option<Release<T>>) -> Self {
        Self {
            cell: Rc::new(Indirection {
                pointee: RefCell::new(pointee),
                release: Cell::new(release),
            }),
            counter: ReferenceCounter::new(),
        }
    }

    /// Takes ownership of `value`; it is dropped normally when the last alias goes.
    #[must_use]
    pub fn new(value: T) -> Self {
        Self::from_parts(Some(value), None)
    }

    /// Takes ownership of `value`; `release` receives it when the last alias goes.
    #[must_use]
    pub fn with_release<F>(value: T, release: F) -> Self
    where
        F: FnOnce(T) + 'static,
    {
        Self::from_parts(Some(value), Some(Box::new(release)))
    }

    /// A pointer with no pointee, to be filled later with [`SharedPointer::reseat`].
    #[must_use]
    pub fn empty() -> Self {
        Self::from_parts(None, None)
    }

    /// Borrows the pointee.
    ///
    /// # Errors
    ///
    /// - [`MemoryError::NullDereference`] if there is no pointee.
    /// - [`MemoryError::BorrowConflict`] if it is mutably borrowed.
    pub fn get(&self) -> MemoryResult<Ref<'_, T>> {
        let slot = self
            .cell
            .pointee
            .try_borrow()
            .map_err(|_| MemoryError::BorrowConflict)?;
        Ref::filter_map(slot, Option::as_ref).map_err(|_| MemoryError::NullDereference)
    }

    /// Mutably borrows the pointee. Every alias observes the change.
    ///
    /// # Errors
    ///
    /// - [`MemoryError::NullDereference`] if there is no pointee.
    /// - [`MemoryError::BorrowConflict`] if it is already borrowed.
    pub fn get_mut(&self) -> MemoryResult<RefMut<'_, T>> {
        let slot = self
            .cell
            .pointee
            .try_borrow_mut()
            .map_err(|_| MemoryError::BorrowConflict)?;
        RefMut::filter_map(slot, Option::as_mut).map_err(|_| MemoryError::NullDereference)
    }

    /// Mutable access without runtime borrow tracking, only while this is the
    /// sole pointer to the indirection.
    pub fn get_exclusive(&mut self) -> Option<&mut T> {
        Rc::get_mut(&mut self.cell)?.pointee.get_mut().as_mut()
    }

    /// Shared access without a borrow guard.
    ///
    /// # Safety
    ///
    /// No mutable borrow of the pointee, through any alias, may be taken while
    /// the returned reference is alive.
    pub(crate) unsafe fn get_unguarded(&self) -> MemoryResult<&T> {
        // SAFETY: upheld by the caller.
        let slot = unsafe { self.cell.pointee.try_borrow_unguarded() }
            .map_err(|_| MemoryError::BorrowConflict)?;
        slot.as_ref().ok_or(MemoryError::NullDereference)
    }

    /// Replaces the pointee of the shared indirection; all aliases see `value`.
    ///
    /// The release callback does not run. The previous pointee, if any, is
    /// handed back to the caller.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::BorrowConflict`] if the pointee is borrowed.
    pub fn reseat(&self, value: T) -> MemoryResult<Option<T>> {
        let mut slot = self
            .cell
            .pointee
            .try_borrow_mut()
            .map_err(|_| MemoryError::BorrowConflict)?;
        Ok(slot.replace(value))
    }

    /// Detaches from the current indirection and takes sole ownership of `value`.
    ///
    /// If this was the last owner, the old pointee is released before returning.
    pub fn reset(&mut self, value: T) {
        drop(mem::replace(self, Self::new(value)));
    }

    /// Like [`SharedPointer::reset`], with a release callback for `value`.
    pub fn reset_with<F>(&mut self, value: T, release: F)
    where
        F: FnOnce(T) + 'static,
    {
        drop(mem::replace(self, Self::with_release(value, release)));
    }

    /// Detaches from the current indirection, leaving this pointer empty.
    pub fn clear(&mut self) {
        drop(mem::replace(self, Self::empty()));
    }

    /// Whether there is no pointee.
    #[must_use]
    pub fn is_null(&self) -> bool {
        self.cell
            .pointee
            .try_borrow()
            .map(|slot| slot.is_none())
            .unwrap_or(false)
    }

    /// Number of pointers sharing the indirection.
    #[inline]
    #[must_use]
    pub fn ref_count(&self) -> usize {
        self.counter.count()
    }

    /// Whether this is the only pointer to the indirection.
    #[inline]
    #[must_use]
    pub fn is_unique(&self) -> bool {
        self.counter.is_unique()
    }

    /// Whether both pointers share one indirection.
    #[inline]
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.cell, &other.cell)
    }

    fn release(&self) {
        let Ok(mut slot) = self.cell.pointee.try_borrow_mut() else {
            return;
        };
        let Some(value) = slot.take() else {
            return;
        };
        drop(slot);

        match self.cell.release.take() {
            Some(release) => release(value),
            None => drop(value),
        }
    }
}

impl<T> Clone for SharedPointer<T> {
    fn clone(&self) -> Self {
        Self {
            cell: Rc::clone(&self.cell),
            counter: self.counter.clone(),
        }
    }
}

impl<T> Drop for SharedPointer<T> {
    fn drop(&mut self) {
        if self.counter.is_unique() {
            self.release();
        }
    }
}

impl<T> Default for SharedPointer<T> {
    fn default() -> Self {
        Self::empty()
    }
}

impl<T: fmt::Debug> fmt::Debug for SharedPointer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut s = f.debug_struct("SharedPointer");
        s.field("refs", &self.ref_count());
        match self.cell.pointee.try_borrow() {
            Ok(slot) => s.field("pointee", &*slot),
            Err(_) => s.field("pointee", &"<borrowed>"),
        };
        s.finish()
    }
}
