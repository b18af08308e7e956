//! # KILN Core
//!
//! Memory substrate of the KILN engine:
//! - Segmented pool allocator with fixed size classes
//! - Reference-counted shared pointers with release callbacks
//! - Copy-on-write growable list every higher collection builds on
//!
//! ## Architecture Rules
//!
//! 1. **Everything allocates through the pool** - [`GlobalAllocator`] is the only path to memory
//! 2. **Misuse fails fast** - double frees, foreign pointers and empty dereferences are errors
//! 3. **Unsafe stays local** - raw memory handling is confined to the modules that need it
//!
//! ## Example
//!
//! ```rust
//! use kiln_core::{List, SharedPointer};
//!
//! let mut names: List<String> = List::new();
//! names.push_back("ash".to_string());
//!
//! let snapshot = names.clone();          // shares the buffer
//! names.push_back("ember".to_string());  // copies before mutating
//! assert_eq!(snapshot.count(), 1);
//!
//! let shared = SharedPointer::new(names);
//! assert_eq!(shared.get().unwrap().count(), 2);
//! ```

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![deny(clippy::perf)]

pub mod collections;
pub mod config;
pub mod error;
pub mod memory;
pub mod shared;

pub use collections::{Direct, DirectMemoryAccess, Lifecycle, List, Managed, MIN_CAPACITY};
pub use config::AllocatorConfig;
pub use error::{MemoryError, MemoryResult};
pub use memory::{AllocatorStats, GlobalAllocator, LevelStats, ObjectAllocator};
pub use shared::{ReferenceCounter, SharedPointer};
