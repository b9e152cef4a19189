//! # System Constants
//!
//! Defaults that define the operational boundaries of the bulk engine when
//! neither the action nor the configuration says otherwise.

/// Identifiers per published bucket
pub const DEFAULT_BUCKET_SIZE: usize = 100;

/// Identifiers per transactional batch
pub const DEFAULT_BATCH_SIZE: usize = 25;

/// The scroller is asked for this many buckets' worth of ids per call
pub const DEFAULT_SCROLL_FETCH_MULTIPLIER: usize = 4;

pub const DEFAULT_PARTITIONS: usize = 4;

/// Buckets buffered per partition before publishers wait
pub const DEFAULT_PARTITION_CAPACITY: usize = 64;

/// Terminal statuses are kept this long
pub const DEFAULT_STATUS_RETENTION_SECONDS: u64 = 3600;

pub const DEFAULT_STATUS_EVENT_CAPACITY: usize = 1000;

/// Prefix of environment overrides, e.g. `BULK__CHANNEL__PARTITIONS`
pub const ENV_PREFIX: &str = "BULK";

pub const ENV_SEPARATOR: &str = "__";

/// Environment variable naming the configuration file
pub const CONFIG_PATH_ENV: &str = "BULK_CONFIG_PATH";

/// Status event names, as published and logged
pub mod events {
    pub const COMMAND_SCHEDULED: &str = "command.scheduled";
    pub const COMMAND_SCROLLING: &str = "command.scrolling_running";
    pub const COMMAND_RUNNING: &str = "command.running";
    pub const COMMAND_COMPLETED: &str = "command.completed";
    pub const COMMAND_COMPLETED_WITH_ERRORS: &str = "command.completed_with_errors";
    pub const COMMAND_ABORTED: &str = "command.aborted";
}
