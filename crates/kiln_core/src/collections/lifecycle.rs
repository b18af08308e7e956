//! Element lifecycle disciplines for [`List`](super::List).

#![allow(unsafe_code)]

use std::cmp::Ordering;
use std::ptr;

use bytemuck::Pod;

/// Types that may be copied, moved and compared as raw bytes.
///
/// Implemented for every [`bytemuck::Pod`] type.
pub trait DirectMemoryAccess: Pod {}

impl<T: Pod> DirectMemoryAccess for T {}

/// How a buffer copies, destroys and compares its elements.
///
/// Moving elements inside or between buffers is always a bitwise copy; only
/// duplicating and destroying them depends on the discipline.
///
/// # Safety
///
/// `copy_out` must initialize exactly `len` elements of `dst`, and `destroy`
/// must leave each of its `len` elements logically uninitialized.
pub unsafe trait Lifecycle<T> {
    /// Duplicates `src[..len]` into the uninitialized `dst[..len]`.
    ///
    /// # Safety
    ///
    /// `src` must hold `len` initialized elements, `dst` must be valid for
    /// `len` writes, and the ranges must not overlap.
    unsafe fn copy_out(src: *const T, dst: *mut T, len: usize);

    /// Ends the lifetime of `len` elements starting at `ptr`.
    ///
    /// # Safety
    ///
    /// The elements must be initialized and never used again.
    unsafe fn destroy(ptr: *mut T, len: usize);

    /// Element-wise equality of two slices.
    fn equal(a: &[T], b: &[T]) -> bool
    where
        T: PartialEq;

    /// Lexicographic ordering of two slices. Returns `Some(Equal)` exactly
    /// when [`Lifecycle::equal`] holds.
    fn partial_compare(a: &[T], b: &[T]) -> Option<Ordering>
    where
        T: PartialOrd;

    /// Total lexicographic ordering of two slices, `Equal` exactly when
    /// [`Lifecycle::equal`] holds.
    fn compare(a: &[T], b: &[T]) -> Ordering
    where
        T: Ord;
}

/// Raw byte discipline for [`DirectMemoryAccess`] types: `memcpy` copies, no
/// drop calls, byte-wise equality.
///
/// Ordering follows the element order, and slices that compare equal by value
/// but differ in bytes (`0.0` and `-0.0`) are ordered by their bytes.
#[derive(Debug, Clone, Copy, Default)]
pub struct Direct;

/// Clone/drop discipline for arbitrary `Clone` types.
#[derive(Debug, Clone, Copy, Default)]
pub struct Managed;

// SAFETY: Pod values are valid after a byte copy and need no drop.
unsafe impl<T: DirectMemoryAccess> Lifecycle<T> for Direct {
    #[inline]
    unsafe fn copy_out(src: *const T, dst: *mut T, len: usize) {
        // SAFETY: upheld by the caller.
        unsafe { ptr::copy_nonoverlapping(src, dst, len) }
    }

    #[inline]
    unsafe fn destroy(_ptr: *mut T, _len: usize) {}

    fn equal(a: &[T], b: &[T]) -> bool
    where
        T: PartialEq,
    {
        bytemuck::cast_slice::<T, u8>(a) == bytemuck::cast_slice::<T, u8>(b)
    }

    fn partial_compare(a: &[T], b: &[T]) -> Option<Ordering>
    where
        T: PartialOrd,
    {
        let (x, y) = (bytemuck::cast_slice::<T, u8>(a), bytemuck::cast_slice::<T, u8>(b));
        if x == y {
            return Some(Ordering::Equal);
        }
        match a.partial_cmp(b) {
            Some(Ordering::Equal) => Some(x.cmp(y)),
            order => order,
        }
    }

    fn compare(a: &[T], b: &[T]) -> Ordering
    where
        T: Ord,
    {
        let (x, y) = (bytemuck::cast_slice::<T, u8>(a), bytemuck::cast_slice::<T, u8>(b));
        if x == y {
            return Ordering::Equal;
        }
        a.cmp(b).then_with(|| x.cmp(y))
    }
}

// SAFETY: every destination slot is written once with a clone; destroy drops
// each element in place exactly once.
unsafe impl<T: Clone> Lifecycle<T> for Managed {
    unsafe fn copy_out(src: *const T, dst: *mut T, len: usize) {
        for i in 0..len {
            // SAFETY: `i < len`, both ranges are valid per the caller.
            unsafe { dst.add(i).write((*src.add(i)).clone()) };
        }
    }

    unsafe fn destroy(ptr: *mut T, len: usize) {
        // SAFETY: upheld by the caller.
        unsafe { ptr::drop_in_place(ptr::slice_from_raw_parts_mut(ptr, len)) }
    }

    fn equal(a: &[T], b: &[T]) -> bool
    where
        T: PartialEq,
    {
        a == b
    }

    fn partial_compare(a: &[T], b: &[T]) -> Option<Ordering>
    where
        T: PartialOrd,
    {
        a.partial_cmp(b)
    }

    fn compare(a: &[T], b: &[T]) -> Ordering
    where
        T: Ord,
    {
        a.cmp(b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::mem::MaybeUninit;
    use std::rc::Rc;

    #[test]
    fn test_direct_copy_and_equality() {
        let src = [1u32, 2, 3];
        let mut dst = [0u32; 3];
        // SAFETY: both arrays hold three elements.
        unsafe { <Direct as Lifecycle<u32>>::copy_out(src.as_ptr(), dst.as_mut_ptr(), 3) };

        assert_eq!(src, dst);
        assert!(<Direct as Lifecycle<u32>>::equal(&src, &dst));
        assert!(!<Direct as Lifecycle<u32>>::equal(&src, &dst[..2]));
    }

    #[test]
    fn test_managed_clones_and_drops() {
        let tracker = Rc::new(());
        let src = [Rc::clone(&tracker), Rc::clone(&tracker)];
        let mut dst: [MaybeUninit<Rc<()>>; 2] = [MaybeUninit::uninit(), MaybeUninit::uninit()];

        // SAFETY: `dst` has room for two elements.
        unsafe { <Managed as Lifecycle<Rc<()>>>::copy_out(src.as_ptr(), dst.as_mut_ptr().cast::<Rc<()>>(), 2) };
        assert_eq!(Rc::strong_count(&tracker), 5);

        // SAFETY: both were initialized above and are not touched again.
        unsafe { <Managed as Lifecycle<Rc<()>>>::destroy(dst.as_mut_ptr().cast::<Rc<()>>(), 2) };
        assert_eq!(Rc::strong_count(&tracker), 3);
    }

    #[test]
    fn test_direct_ordering_tracks_bytes() {
        let zero = [0.0f64];
        let negative_zero = [-0.0f64];
        let order = <Direct as Lifecycle<f64>>::partial_compare(&zero, &negative_zero);
        assert!(!<Direct as Lifecycle<f64>>::equal(&zero, &negative_zero));
        assert!(matches!(order, Some(Ordering::Less | Ordering::Greater)));
        assert_eq!(
            <Direct as Lifecycle<f64>>::partial_compare(&negative_zero, &zero),
            order.map(Ordering::reverse)
        );

        let nan = [f64::NAN];
        assert_eq!(
            <Direct as Lifecycle<f64>>::partial_compare(&nan, &nan),
            Some(Ordering::Equal)
        );
        assert_eq!(<Direct as Lifecycle<f64>>::partial_compare(&nan, &[1.0]), None);

        assert_eq!(
            <Direct as Lifecycle<u32>>::compare(&[1, 2], &[1, 3]),
            Ordering::Less
        );
        assert_eq!(<Direct as Lifecycle<u32>>::compare(&[4], &[4]), Ordering::Equal);
    }
}
