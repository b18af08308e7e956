//! # Shared Ownership
//!
//! Lets several data structures alias one heap object and agree on when to
//! release it, without a central owner.
//!
//! - [`ReferenceCounter`]: a bare shared count, cell allocated from the global pool
//! - [`SharedPointer`]: shared pointee with an optional release callback
//!
//! Both are single-threaded (`!Send`).

mod counter;
mod pointer;

pub use counter::ReferenceCounter;
pub use pointer::SharedPointer;
