//! Storage manager configuration: bucket geometry, cache size, byte order.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::ConfigError;
use crate::value::Endian;

/// Minimum bucket size: 512 bytes.
pub const MIN_BUCKET_SIZE: usize = 512;

/// Maximum bucket size: 16 MiB.
pub const MAX_BUCKET_SIZE: usize = 16 * 1024 * 1024;

/// Minimum size of the user-level I/O buffer.
const MIN_IO_BUFFER_SIZE: usize = 512;

/// Storage layer configuration.
///
/// # Validation Rules
///
/// - `bucket_size` must be within 512 bytes and 16 MiB
/// - `cache_size` (in buckets) must be >= 1
/// - `reserved_row_bytes` must be smaller than `bucket_size`
/// - `io_buffer_size` must be >= 512
///
/// # Example
///
/// ```no_run
/// # use coltable_types::config::StorageConfig;
/// let config = StorageConfig::builder()
///     .bucket_size(8192)
///     .cache_size(32)
///     .build()
///     .expect("valid storage config");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct StorageConfig {
    /// Size in bytes of one bucket in a bucket file.
    #[serde(default = "default_bucket_size")]
    pub bucket_size: usize,
    /// Maximum number of buckets held by one bucket cache.
    #[serde(default = "default_cache_size")]
    pub cache_size: usize,
    /// Spare bytes reserved in every row slot so that small columns can be
    /// added later without rearranging buckets.
    #[serde(default = "default_reserved_row_bytes")]
    pub reserved_row_bytes: usize,
    /// Block size of the buffered file I/O layer.
    #[serde(default = "default_io_buffer_size")]
    pub io_buffer_size: usize,
    /// Byte order used for all values written by new storage files.
    #[serde(default)]
    pub byte_order: Endian,
}

#[bon::bon]
impl StorageConfig {
    /// Creates a new storage configuration with validation.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Validation`] if any value is out of range.
    #[builder]
    pub fn new(
        #[builder(default = default_bucket_size())] bucket_size: usize,
        #[builder(default = default_cache_size())] cache_size: usize,
        #[builder(default = default_reserved_row_bytes())] reserved_row_bytes: usize,
        #[builder(default = default_io_buffer_size())] io_buffer_size: usize,
        #[builder(default)] byte_order: Endian,
    ) -> Result<Self, ConfigError> {
        let config = Self { bucket_size, cache_size, reserved_row_bytes, io_buffer_size, byte_order };
        config.validate()?;
        Ok(config)
    }
}

impl StorageConfig {
    /// Validates the configuration values.
    ///
    /// Call after deserialization to ensure values are within valid ranges.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Validation`] if any value is out of range.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(MIN_BUCKET_SIZE..=MAX_BUCKET_SIZE).contains(&self.bucket_size) {
            return Err(ConfigError::Validation {
                message: format!(
                    "bucket_size must be {}-{}, got {}",
                    MIN_BUCKET_SIZE, MAX_BUCKET_SIZE, self.bucket_size
                ),
            });
        }
        if self.cache_size == 0 {
            return Err(ConfigError::Validation {
                message: "cache_size must be >= 1 bucket".to_string(),
            });
        }
        if self.reserved_row_bytes >= self.bucket_size {
            return Err(ConfigError::Validation {
                message: format!(
                    "reserved_row_bytes ({}) must be smaller than bucket_size ({})",
                    self.reserved_row_bytes, self.bucket_size
                ),
            });
        }
        if self.io_buffer_size < MIN_IO_BUFFER_SIZE {
            return Err(ConfigError::Validation {
                message: format!(
                    "io_buffer_size must be >= {}, got {}",
                    MIN_IO_BUFFER_SIZE, self.io_buffer_size
                ),
            });
        }
        Ok(())
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            bucket_size: default_bucket_size(),
            cache_size: default_cache_size(),
            reserved_row_bytes: default_reserved_row_bytes(),
            io_buffer_size: default_io_buffer_size(),
            byte_order: Endian::default(),
        }
    }
}

fn default_bucket_size() -> usize {
    32 * 1024
}

fn default_cache_size() -> usize {
    64 // 2 MiB at the default bucket size
}

fn default_reserved_row_bytes() -> usize {
    16
}

fn default_io_buffer_size() -> usize {
    64 * 1024
}
