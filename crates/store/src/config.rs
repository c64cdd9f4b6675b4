//! Store configuration: page size, cache capacities and durability.

use serde::{Deserialize, Serialize};
use snafu::Snafu;

/// Default page size: 8 KiB.
pub const DEFAULT_PAGE_SIZE: usize = 8192;

/// Smallest accepted page size.
pub const MIN_PAGE_SIZE: usize = 64;

/// Largest accepted page size: 1 MiB.
pub const MAX_PAGE_SIZE: usize = 1024 * 1024;

/// Configuration validation error.
#[derive(Debug, Snafu)]
pub enum ConfigError {
    /// A configuration value is invalid.
    #[snafu(display("invalid config: {message}"))]
    Validation {
        /// Description of the validation failure.
        message: String,
    },
}

/// Page store configuration.
///
/// # Validation Rules
///
/// - `page_size` must be a multiple of 8 within `64..=1 MiB`
///
/// A cache capacity of zero disables that cache.
///
/// # Example
///
/// ```no_run
/// # use aof_store::StoreConfig;
/// let config = StoreConfig::builder()
///     .page_size(4096)
///     .page_cache_capacity(256)
///     .build()
///     .expect("valid store config");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Size of every page in bytes.
    #[serde(default = "default_page_size")]
    pub page_size: usize,
    /// Maximum number of raw pages held in the page cache.
    #[serde(default = "default_page_cache_capacity")]
    pub page_cache_capacity: usize,
    /// Maximum number of decoded nodes held in the object cache.
    #[serde(default = "default_object_cache_capacity")]
    pub object_cache_capacity: usize,
    /// Flush the backend to durable storage after every commit.
    #[serde(default = "default_sync_on_commit")]
    pub sync_on_commit: bool,
}

#[bon::bon]
impl StoreConfig {
    /// Creates a new store configuration with validation.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Validation`] if `page_size` is out of range or
    /// not a multiple of 8.
    #[builder]
    pub fn new(
        #[builder(default = default_page_size())] page_size: usize,
        #[builder(default = default_page_cache_capacity())] page_cache_capacity: usize,
        #[builder(default = default_object_cache_capacity())] object_cache_capacity: usize,
        #[builder(default = default_sync_on_commit())] sync_on_commit: bool,
    ) -> Result<Self, ConfigError> {
        let config = Self { page_size, page_cache_capacity, object_cache_capacity, sync_on_commit };
        config.validate()?;
        Ok(config)
    }
}

impl StoreConfig {
    /// Validates the configuration values.
    ///
    /// Call after deserialization to ensure values are within valid ranges.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Validation`] if any value is out of range.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.page_size < MIN_PAGE_SIZE || self.page_size > MAX_PAGE_SIZE {
            return Err(ConfigError::Validation {
                message: format!(
                    "page_size must be {}-{}, got {}",
                    MIN_PAGE_SIZE, MAX_PAGE_SIZE, self.page_size
                ),
            });
        }
        if self.page_size % 8 != 0 {
            return Err(ConfigError::Validation {
                message: format!("page_size must be a multiple of 8, got {}", self.page_size),
            });
        }
        Ok(())
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            page_size: default_page_size(),
            page_cache_capacity: default_page_cache_capacity(),
            object_cache_capacity: default_object_cache_capacity(),
            sync_on_commit: default_sync_on_commit(),
        }
    }
}

fn default_page_size() -> usize {
    DEFAULT_PAGE_SIZE
}

fn default_page_cache_capacity() -> usize {
    1024
}

fn default_object_cache_capacity() -> usize {
    4096
}

fn default_sync_on_commit() -> bool {
    true
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_config_error_display() {
        let err = ConfigError::Validation { message: "test error".to_string() };
        assert_eq!(err.to_string(), "invalid config: test error");
    }

    #[test]
    fn test_store_config_defaults_are_valid() {
        let config = StoreConfig::builder().build().expect("defaults should be valid");
        assert_eq!(config, StoreConfig::default());
        assert_eq!(config.page_size, 8192);
        assert_eq!(config.page_cache_capacity, 1024);
        assert_eq!(config.object_cache_capacity, 4096);
        assert!(config.sync_on_commit);
    }

    #[test]
    fn test_store_config_rejects_small_page() {
        let err = StoreConfig::builder().page_size(32).build().unwrap_err();
        assert!(err.to_string().contains("page_size must be 64-1048576"), "got: {err}");
    }

    #[test]
    fn test_store_config_rejects_large_page() {
        assert!(StoreConfig::builder().page_size(2 * MAX_PAGE_SIZE).build().is_err());
    }

    #[test]
    fn test_store_config_rejects_unaligned_page() {
        let err = StoreConfig::builder().page_size(100).build().unwrap_err();
        assert!(err.to_string().contains("multiple of 8"), "got: {err}");
    }

    #[test]
    fn test_store_config_accepts_small_test_page() {
        let config = StoreConfig::builder().page_size(96).build().unwrap();
        assert_eq!(config.page_size, 96);
    }

    #[test]
    fn test_store_config_serde_defaults() {
        let config: StoreConfig = serde_json::from_str(r#"{"page_size": 4096}"#).unwrap();
        assert_eq!(config.page_size, 4096);
        assert_eq!(config.page_cache_capacity, 1024);
        assert!(config.sync_on_commit);
        config.validate().unwrap();
    }

    #[test]
    fn test_store_config_validate_after_deserialize() {
        let config: StoreConfig = serde_json::from_str(r#"{"page_size": 12}"#).unwrap();
        assert!(config.validate().is_err());
    }
}
