//! Table locking configuration.

use std::time::Duration;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::ConfigError;

/// How a table uses the cooperative lock file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum LockMode {
    /// A lock is acquired when the table is opened and held until it is closed.
    Permanent,
    /// The caller locks and unlocks explicitly around each transaction.
    #[default]
    User,
    /// No lock file is used; locking operations always succeed.
    NoLocking,
}

/// Lock acquisition configuration.
///
/// # Validation Rules
///
/// - `retry_interval` must be > 0
/// - `max_retry_interval` must be >= `retry_interval`
///
/// # Example
///
/// ```no_run
/// # use std::time::Duration;
/// # use coltable_types::config::{LockConfig, LockMode};
/// let config = LockConfig::builder()
///     .mode(LockMode::Permanent)
///     .attempts(20)
///     .build()
///     .expect("valid lock config");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct LockConfig {
    /// Locking mode of the table.
    #[serde(default)]
    pub mode: LockMode,
    /// Minimum time between two inspections of the pending-request list.
    #[serde(default = "default_inspect_interval")]
    #[serde(with = "super::humantime_serde")]
    #[schemars(with = "String")]
    pub inspect_interval: Duration,
    /// Number of attempts made to acquire a lock (0 waits indefinitely).
    #[serde(default)]
    pub attempts: u32,
    /// Initial wait between two acquisition attempts.
    #[serde(default = "default_retry_interval")]
    #[serde(with = "super::humantime_serde")]
    #[schemars(with = "String")]
    pub retry_interval: Duration,
    /// Upper bound of the exponentially growing wait between attempts.
    #[serde(default = "default_max_retry_interval")]
    #[serde(with = "super::humantime_serde")]
    #[schemars(with = "String")]
    pub max_retry_interval: Duration,
}

#[bon::bon]
impl LockConfig {
    /// Creates a new lock configuration with validation.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Validation`] if the retry intervals are invalid.
    #[builder]
    pub fn new(
        #[builder(default)] mode: LockMode,
        #[builder(default = default_inspect_interval())] inspect_interval: Duration,
        #[builder(default)] attempts: u32,
        #[builder(default = default_retry_interval())] retry_interval: Duration,
        #[builder(default = default_max_retry_interval())] max_retry_interval: Duration,
    ) -> Result<Self, ConfigError> {
        let config =
            Self { mode, inspect_interval, attempts, retry_interval, max_retry_interval };
        config.validate()?;
        Ok(config)
    }
}

impl LockConfig {
    /// Validates the configuration values.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Validation`] if any value is out of range.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.retry_interval.is_zero() {
            return Err(ConfigError::Validation {
                message: "retry_interval must be > 0".to_string(),
            });
        }
        if self.max_retry_interval < self.retry_interval {
            return Err(ConfigError::Validation {
                message: format!(
                    "max_retry_interval ({:?}) must be >= retry_interval ({:?})",
                    self.max_retry_interval, self.retry_interval
                ),
            });
        }
        Ok(())
    }
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            mode: LockMode::default(),
            inspect_interval: default_inspect_interval(),
            attempts: 0,
            retry_interval: default_retry_interval(),
            max_retry_interval: default_max_retry_interval(),
        }
    }
}

fn default_inspect_interval() -> Duration {
    Duration::from_secs(5)
}

fn default_retry_interval() -> Duration {
    Duration::from_millis(10)
}

fn default_max_retry_interval() -> Duration {
    Duration::from_secs(1)
}
