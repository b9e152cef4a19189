//! # Command Status
//!
//! Progress and outcome of bulk commands. The [`StatusTracker`] is the only
//! writer; everything else reads [`BulkStatus`] snapshots.

mod tracker;

pub use tracker::StatusTracker;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::command::CommandId;

/// Command lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum CommandState {
    /// Accepted, scroll not started yet
    Scheduled = 0,
    /// Scroller is producing buckets while workers consume them
    ScrollingRunning = 1,
    /// Scroll finished, remaining buckets are being processed
    Running = 2,
    Completed = 3,
    CompletedWithErrors = 4,
    /// Cancelled, or stopped by a fatal scroll/action failure
    Aborted = 5,
}

impl CommandState {
    /// Check if this is a terminal state (no further transitions allowed)
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed | Self::CompletedWithErrors | Self::Aborted
        )
    }

    pub(crate) fn as_u8(self) -> u8 {
        self as u8
    }

    pub(crate) fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Scheduled,
            1 => Self::ScrollingRunning,
            2 => Self::Running,
            3 => Self::Completed,
            4 => Self::CompletedWithErrors,
            _ => Self::Aborted,
        }
    }
}

impl fmt::Display for CommandState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Scheduled => write!(f, "scheduled"),
            Self::ScrollingRunning => write!(f, "scrolling_running"),
            Self::Running => write!(f, "running"),
            Self::Completed => write!(f, "completed"),
            Self::CompletedWithErrors => write!(f, "completed_with_errors"),
            Self::Aborted => write!(f, "aborted"),
        }
    }
}

impl std::str::FromStr for CommandState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "scheduled" => Ok(Self::Scheduled),
            "scrolling_running" => Ok(Self::ScrollingRunning),
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "completed_with_errors" => Ok(Self::CompletedWithErrors),
            "aborted" => Ok(Self::Aborted),
            _ => Err(format!("Invalid command state: {s}")),
        }
    }
}

impl Default for CommandState {
    fn default() -> Self {
        Self::Scheduled
    }
}

/// Point-in-time view of a command's progress
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BulkStatus {
    pub id: CommandId,
    pub action: String,
    pub username: Option<String>,
    pub state: CommandState,
    /// Identifiers produced by the scroller so far
    pub scroll_count: u64,
    /// Identifiers with a recorded batch outcome
    pub processed: u64,
    pub error_count: u64,
    /// The scroll is over; no more buckets will be published
    pub submitted: bool,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub scroll_started_at: Option<DateTime<Utc>>,
    pub scroll_ended_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl BulkStatus {
    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    pub fn has_error(&self) -> bool {
        self.error_count > 0 || self.error_message.is_some()
    }
}
