//! # Bulk Error Types
//!
//! One structured error for the whole engine. Collaborator contracts
//! (actions, query sources, transactions) keep their own narrow error types
//! and convert into [`BulkError`] at the boundary.

use thiserror::Error;

use crate::action::ActionError;
use crate::command::CommandId;
use crate::scroll::SourceError;
use crate::transaction::TransactionError;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BulkError {
    /// Bad command construction or invalid engine configuration. Raised
    /// before anything is scheduled.
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// The scroller could not produce identifiers (invalid query, source
    /// unreachable). Ends the scroll; published buckets still run.
    #[error("Scroll error: {message}")]
    Scroll { message: String },

    #[error("Unknown action: {action}")]
    UnknownAction { action: String },

    #[error("Unknown scroller: {scroller}")]
    UnknownScroller { scroller: String },

    /// Batch-level infrastructure failure; every identifier of the batch is
    /// counted as an error.
    #[error("Transaction error: {message}")]
    Transaction { message: String },

    #[error("Record {record_id} failed: {message}")]
    PerRecord { record_id: String, message: String },

    #[error("Command not found: {command_id}")]
    NotFound { command_id: CommandId },

    #[error("Channel error: {message}")]
    Channel { message: String },
}

impl BulkError {
    /// Create a configuration error
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create a scroll error
    pub fn scroll(message: impl Into<String>) -> Self {
        Self::Scroll {
            message: message.into(),
        }
    }

    pub fn unknown_action(action: impl Into<String>) -> Self {
        Self::UnknownAction {
            action: action.into(),
        }
    }

    pub fn unknown_scroller(scroller: impl Into<String>) -> Self {
        Self::UnknownScroller {
            scroller: scroller.into(),
        }
    }

    /// Create a transaction error
    pub fn transaction(message: impl Into<String>) -> Self {
        Self::Transaction {
            message: message.into(),
        }
    }

    pub fn per_record(record_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::PerRecord {
            record_id: record_id.into(),
            message: message.into(),
        }
    }

    pub fn not_found(command_id: CommandId) -> Self {
        Self::NotFound { command_id }
    }

    /// Create a channel error
    pub fn channel(message: impl Into<String>) -> Self {
        Self::Channel {
            message: message.into(),
        }
    }
}

impl From<SourceError> for BulkError {
    fn from(err: SourceError) -> Self {
        Self::scroll(err.to_string())
    }
}

impl From<TransactionError> for BulkError {
    fn from(err: TransactionError) -> Self {
        Self::transaction(err.to_string())
    }
}

impl From<ActionError> for BulkError {
    fn from(err: ActionError) -> Self {
        match err {
            ActionError::RecordFailed { record_id, message } => {
                Self::per_record(record_id, message)
            }
            ActionError::Configuration(message) => Self::configuration(message),
            ActionError::Transaction(message) => Self::transaction(message),
        }
    }
}

impl From<config::ConfigError> for BulkError {
    fn from(err: config::ConfigError) -> Self {
        Self::configuration(err.to_string())
    }
}

impl From<serde_json::Error> for BulkError {
    fn from(err: serde_json::Error) -> Self {
        Self::configuration(format!("serialization: {err}"))
    }
}

pub type Result<T> = std::result::Result<T, BulkError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = BulkError::configuration("bucket size must be > 0");
        assert_eq!(
            err.to_string(),
            "Configuration error: bucket size must be > 0"
        );

        let err = BulkError::per_record("doc-1", "locked");
        let display = format!("{err}");
        assert!(display.contains("doc-1"));
        assert!(display.contains("locked"));
    }

    #[test]
    fn test_action_error_conversion() {
        let err: BulkError = ActionError::record_failed("doc-7", "no such property").into();
        assert!(matches!(err, BulkError::PerRecord { ref record_id, .. } if record_id == "doc-7"));

        let err: BulkError = ActionError::Configuration("missing param".to_string()).into();
        assert!(matches!(err, BulkError::Configuration { .. }));
    }
}
