//! # Allocator Configuration
//!
//! Size-class geometry for the pooled allocator. Loaded once at startup,
//! either from code or from a TOML file:
//!
//! ```toml
//! chunk_size = 65536
//! min_size = 16
//! zoom_level = 10
//! zoom = 2.0
//! ```
//!
//! Missing keys fall back to [`AllocatorConfig::default`].

use std::mem;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{MemoryError, MemoryResult};

/// Default page size of a chunk (64 KiB).
pub const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;

/// Default smallest block size.
pub const DEFAULT_MIN_SIZE: usize = 16;

/// Default number of size classes.
pub const DEFAULT_ZOOM_LEVEL: usize = 10;

/// Default growth factor between consecutive size classes.
pub const DEFAULT_ZOOM: f64 = 2.0;

/// Construction parameters of an [`ObjectAllocator`](crate::memory::ObjectAllocator).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AllocatorConfig {
    /// Page size of one chunk in bytes.
    pub chunk_size: usize,
    /// Block size of the smallest class. At least two machine words.
    pub min_size: usize,
    /// Number of size classes.
    pub zoom_level: usize,
    /// Growth factor per class. At least `1.0`.
    pub zoom: f64,
    /// Panic when the allocator is dropped with live blocks.
    pub fail_on_leak: bool,
}

impl Default for AllocatorConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            min_size: DEFAULT_MIN_SIZE,
            zoom_level: DEFAULT_ZOOM_LEVEL,
            zoom: DEFAULT_ZOOM,
            fail_on_leak: cfg!(debug_assertions),
        }
    }
}

impl AllocatorConfig {
    /// Parses a configuration from TOML text and validates it.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::InvalidConfig`] on malformed TOML or rejected values.
    pub fn from_toml_str(text: &str) -> MemoryResult<Self> {
        let config: Self = toml::from_str(text)
            .map_err(|e| MemoryError::InvalidConfig(format!("Failed to parse config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Reads and validates a TOML configuration file.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::InvalidConfig`] if the file cannot be read or parsed.
    pub fn load<P: AsRef<Path>>(path: P) -> MemoryResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            MemoryError::InvalidConfig(format!("Failed to read {}: {e}", path.display()))
        })?;
        Self::from_toml_str(&text)
    }

    /// Checks every parameter.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::InvalidConfig`] naming the first offending parameter.
    pub fn validate(&self) -> MemoryResult<()> {
        let word = mem::size_of::<usize>();

        if self.min_size < 2 * word {
            return Err(MemoryError::InvalidConfig(format!(
                "min_size {} is below two machine words ({})",
                self.min_size,
                2 * word
            )));
        }
        if self.zoom_level == 0 {
            return Err(MemoryError::InvalidConfig(
                "zoom_level must be at least 1".to_string(),
            ));
        }
        if !self.zoom.is_finite() || self.zoom < 1.0 {
            return Err(MemoryError::InvalidConfig(format!(
                "zoom {} must be a finite factor >= 1.0",
                self.zoom
            )));
        }
        if self.chunk_size <= crate::memory::CHUNK_HEADER_SIZE {
            return Err(MemoryError::InvalidConfig(format!(
                "chunk_size {} does not exceed the chunk header ({} bytes)",
                self.chunk_size,
                crate::memory::CHUNK_HEADER_SIZE
            )));
        }
        if self.chunk_size > crate::memory::MAX_CHUNK_BYTES {
            return Err(MemoryError::InvalidConfig(format!(
                "chunk_size {} exceeds the largest allocatable page ({} bytes)",
                self.chunk_size,
                crate::memory::MAX_CHUNK_BYTES
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        let config = AllocatorConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.chunk_size, 64 * 1024);
        assert_eq!(config.zoom_level, 10);
    }

    #[test]
    fn test_rejects_small_min_size() {
        let config = AllocatorConfig {
            min_size: mem::size_of::<usize>(),
            ..AllocatorConfig::default()
        };
        assert!(matches!(config.validate(), Err(MemoryError::InvalidConfig(_))));
    }

    #[test]
    fn test_rejects_shrinking_zoom() {
        let config = AllocatorConfig {
            zoom: 0.5,
            ..AllocatorConfig::default()
        };
        assert!(config.validate().is_err());

        let config = AllocatorConfig {
            zoom: f64::NAN,
            ..AllocatorConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_toml_partial_override() {
        let config = AllocatorConfig::from_toml_str("min_size = 32\nzoom = 1.5\n").unwrap();
        assert_eq!(config.min_size, 32);
        assert!((config.zoom - 1.5).abs() < f64::EPSILON);
        assert_eq!(config.chunk_size, DEFAULT_CHUNK_SIZE);
    }

    #[test]
    fn test_toml_rejects_invalid_values() {
        let err = AllocatorConfig::from_toml_str("zoom_level = 0").unwrap_err();
        assert!(matches!(err, MemoryError::InvalidConfig(_)));

        let err = AllocatorConfig::from_toml_str("chunk_size = \"big\"").unwrap_err();
        assert!(matches!(err, MemoryError::InvalidConfig(_)));
    }

    #[test]
    fn test_rejects_unaddressable_chunk_size() {
        let config = AllocatorConfig {
            chunk_size: usize::MAX,
            ..AllocatorConfig::default()
        };
        assert!(matches!(config.validate(), Err(MemoryError::InvalidConfig(_))));

        let config = AllocatorConfig {
            chunk_size: crate::memory::MAX_CHUNK_BYTES + 1,
            ..AllocatorConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
