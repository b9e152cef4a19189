//! # Bulk Engine Configuration
//!
//! Engine-wide settings, grouped by the component that reads them. Values come
//! from three layers, later ones winning: built-in defaults, an optional TOML
//! file, and `BULK__SECTION__KEY` environment variables.
//!
//! ```rust,no_run
//! use bulk_core::config::ConfigLoader;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = ConfigLoader::new().with_file("config/bulk.toml").load()?;
//! println!("{} partitions", config.channel.partitions);
//! # Ok(())
//! # }
//! ```

pub mod loader;

pub use loader::ConfigLoader;

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::constants::{
    DEFAULT_BATCH_SIZE, DEFAULT_BUCKET_SIZE, DEFAULT_PARTITIONS, DEFAULT_PARTITION_CAPACITY,
    DEFAULT_SCROLL_FETCH_MULTIPLIER, DEFAULT_STATUS_EVENT_CAPACITY,
    DEFAULT_STATUS_RETENTION_SECONDS,
};
use crate::error::{BulkError, Result};

/// Root configuration structure
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BulkConfig {
    /// Scroll loop and command defaults
    pub dispatcher: DispatcherConfig,

    /// Bucket channel shape
    pub channel: ChannelConfig,

    /// Status tracking and retention
    pub status: StatusConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatcherConfig {
    /// Used when neither the command nor its action sets a bucket size
    pub default_bucket_size: usize,
    pub default_batch_size: usize,
    /// Each scroll call asks for `bucket_size * scroll_fetch_multiplier` ids
    pub scroll_fetch_multiplier: usize,
    /// Repository given to commands that name none
    pub default_repository: Option<String>,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            default_bucket_size: DEFAULT_BUCKET_SIZE,
            default_batch_size: DEFAULT_BATCH_SIZE,
            scroll_fetch_multiplier: DEFAULT_SCROLL_FETCH_MULTIPLIER,
            default_repository: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelConfig {
    /// Number of partitions, and of consumer tasks
    pub partitions: usize,
    /// Buckets buffered per partition
    pub capacity: usize,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            partitions: DEFAULT_PARTITIONS,
            capacity: DEFAULT_PARTITION_CAPACITY,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StatusConfig {
    /// How long terminal statuses stay queryable
    pub retention_seconds: u64,
    pub event_capacity: usize,
}

impl Default for StatusConfig {
    fn default() -> Self {
        Self {
            retention_seconds: DEFAULT_STATUS_RETENTION_SECONDS,
            event_capacity: DEFAULT_STATUS_EVENT_CAPACITY,
        }
    }
}

impl StatusConfig {
    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_seconds)
    }
}

impl BulkConfig {
    pub fn validate(&self) -> Result<()> {
        let positive = [
            ("dispatcher.default_bucket_size", self.dispatcher.default_bucket_size),
            ("dispatcher.default_batch_size", self.dispatcher.default_batch_size),
            ("dispatcher.scroll_fetch_multiplier", self.dispatcher.scroll_fetch_multiplier),
            ("channel.partitions", self.channel.partitions),
            ("channel.capacity", self.channel.capacity),
            ("status.event_capacity", self.status.event_capacity),
        ];
        for (field, value) in positive {
            if value == 0 {
                return Err(BulkError::configuration(format!(
                    "{field} must be greater than 0"
                )));
            }
        }

        if self.dispatcher.default_batch_size > self.dispatcher.default_bucket_size {
            return Err(BulkError::configuration(format!(
                "dispatcher.default_batch_size ({}) must not exceed dispatcher.default_bucket_size ({})",
                self.dispatcher.default_batch_size, self.dispatcher.default_bucket_size
            )));
        }

        if matches!(&self.dispatcher.default_repository, Some(name) if name.trim().is_empty()) {
            return Err(BulkError::configuration(
                "dispatcher.default_repository cannot be blank",
            ));
        }
        Ok(())
    }
}
