//! # Collections
//!
//! [`List`], the growable array, and the element disciplines it is generic over.
//!
//! | Discipline  | Elements                  | Copy      | Destroy        | Equality   |
//! |-------------|---------------------------|-----------|----------------|------------|
//! | [`Managed`] | any `Clone`               | `clone()` | `drop_in_place`| `==`       |
//! | [`Direct`]  | [`DirectMemoryAccess`]    | `memcpy`  | nothing        | byte-wise  |
//!
//! Buffers come from the [`GlobalAllocator`](crate::memory::GlobalAllocator),
//! so element alignment is limited to one machine word.

mod buffer;
mod lifecycle;
mod list;

pub use lifecycle::{Direct, DirectMemoryAccess, Lifecycle, Managed};
pub use list::{List, MIN_CAPACITY};
