//! # Global Allocator
//!
//! The process-wide [`ObjectAllocator`] every other subsystem allocates through.
//! Constructed lazily on first use; torn down explicitly with
//! [`GlobalAllocator::shutdown`] since statics never run destructors.

use std::path::Path;
use std::ptr::NonNull;

use parking_lot::{const_mutex, Mutex};
use tracing::{error, info};

use super::allocator::ObjectAllocator;
use super::dump::AllocatorStats;
use crate::config::AllocatorConfig;
use crate::error::{MemoryError, MemoryResult};

static GLOBAL: Mutex<Option<ObjectAllocator>> = const_mutex(None);

/// Handle to the process-wide allocator.
///
/// Every method takes the global lock for the duration of one allocator call.
pub struct GlobalAllocator;

impl GlobalAllocator {
    /// Installs a configuration before first use.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::InvalidConfig`] if the configuration is rejected or
    /// the allocator was already constructed.
    pub fn configure(config: AllocatorConfig) -> MemoryResult<()> {
        let mut global = GLOBAL.lock();
        if global.is_some() {
            return Err(MemoryError::InvalidConfig(
                "global allocator is already initialized".to_string(),
            ));
        }
        *global = Some(ObjectAllocator::new(config)?);
        Ok(())
    }

    /// Whether the allocator has been constructed.
    #[must_use]
    pub fn is_initialized() -> bool {
        GLOBAL.lock().is_some()
    }

    fn with<R>(f: impl FnOnce(&mut ObjectAllocator) -> R) -> R {
        let mut global = GLOBAL.lock();
        let allocator = global.get_or_insert_with(|| {
            info!("Constructing global allocator with default configuration");
            ObjectAllocator::default()
        });
        f(allocator)
    }

    /// See [`ObjectAllocator::allocate`].
    pub fn allocate(size: usize) -> NonNull<u8> {
        Self::with(|a| a.allocate(size))
    }

    /// See [`ObjectAllocator::allocate_usable`].
    pub fn allocate_usable(size: usize) -> (NonNull<u8>, usize) {
        Self::with(|a| a.allocate_usable(size))
    }

    /// See [`ObjectAllocator::free`].
    ///
    /// # Errors
    ///
    /// Propagates the allocator's misuse errors.
    pub fn free(ptr: NonNull<u8>) -> MemoryResult<()> {
        Self::with(|a| a.free(ptr))
    }

    /// See [`ObjectAllocator::owns`].
    #[must_use]
    pub fn owns(ptr: NonNull<u8>) -> bool {
        Self::with(|a| a.owns(ptr))
    }

    /// See [`ObjectAllocator::used_size`].
    #[must_use]
    pub fn used_size() -> usize {
        Self::with(|a| a.used_size())
    }

    /// See [`ObjectAllocator::allocated_size`].
    #[must_use]
    pub fn allocated_size() -> usize {
        Self::with(|a| a.allocated_size())
    }

    /// See [`ObjectAllocator::stats`].
    #[must_use]
    pub fn stats() -> AllocatorStats {
        Self::with(|a| a.stats())
    }

    /// See [`ObjectAllocator::dump`].
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::Dump`] if the file cannot be written.
    pub fn dump<P: AsRef<Path>>(path: P) -> MemoryResult<()> {
        Self::with(|a| a.dump(path))
    }

    /// See [`ObjectAllocator::dump_as_text`].
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::Dump`] if the file cannot be written.
    pub fn dump_as_text<P: AsRef<Path>>(path: P) -> MemoryResult<()> {
        Self::with(|a| a.dump_as_text(path))
    }

    /// Tears the global allocator down, releasing every page.
    ///
    /// Blocks still held anywhere in the process dangle afterwards. The next
    /// call into the global allocator constructs a fresh one.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::Leak`] if blocks were still live.
    pub fn shutdown() -> MemoryResult<()> {
        let Some(allocator) = GLOBAL.lock().take() else {
            return Ok(());
        };
        allocator.teardown().map_err(|leak| {
            error!("Global allocator shutdown: {}", leak);
            leak
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_global_round_trip() {
        let (ptr, usable) = GlobalAllocator::allocate_usable(48);
        assert!(usable >= 48);
        assert!(GlobalAllocator::owns(ptr));
        assert!(GlobalAllocator::is_initialized());

        GlobalAllocator::free(ptr).unwrap();
    }

    #[test]
    fn test_global_rejects_foreign_pointer() {
        let mut local = 0u64;
        let foreign = NonNull::from(&mut local).cast::<u8>();
        assert!(!GlobalAllocator::owns(foreign));
        assert!(matches!(
            GlobalAllocator::free(foreign),
            Err(MemoryError::InvalidPointer { .. })
        ));
    }

    #[test]
    fn test_configure_after_use_rejected() {
        let ptr = GlobalAllocator::allocate(8);
        assert!(matches!(
            GlobalAllocator::configure(AllocatorConfig::default()),
            Err(MemoryError::InvalidConfig(_))
        ));
        GlobalAllocator::free(ptr).unwrap();
    }
}
