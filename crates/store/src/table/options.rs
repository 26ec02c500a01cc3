//! Options for creating and opening tables.

use std::sync::Arc;

use coltable_types::config::{LockConfig, StorageConfig};

use crate::stman::{StManRegistry, StandardStMan};

/// Table configuration options.
#[derive(Debug, Clone, bon::Builder)]
pub struct TableOptions {
    /// Bucket and I/O tuning for new storage managers.
    #[builder(default)]
    pub storage: StorageConfig,
    /// Lock mode and acquisition backoff.
    #[builder(default)]
    pub lock: LockConfig,
    /// Storage manager types the table may instantiate.
    #[builder(default = Arc::new(StManRegistry::with_defaults()))]
    pub registry: Arc<StManRegistry>,
    /// Open for writing (default true).
    #[builder(default = true)]
    pub writable: bool,
    /// Storage manager type and instance name for columns without a binding.
    #[builder(default = StandardStMan::TYPE_NAME.to_string(), into)]
    pub default_stman: String,
}

impl Default for TableOptions {
    fn default() -> Self {
        Self {
            storage: StorageConfig::default(),
            lock: LockConfig::default(),
            registry: Arc::new(StManRegistry::with_defaults()),
            writable: true,
            default_stman: StandardStMan::TYPE_NAME.to_string(),
        }
    }
}

impl TableOptions {
    /// The same options, opening read-only.
    #[must_use]
    pub fn read_only(mut self) -> Self {
        self.writable = false;
        self
    }
}
