//! # Bulk Actions
//!
//! An action is the per-record work a command applies, registered by name in
//! an [`ActionRegistry`]. The executor hands it one batch of identifiers at a
//! time, inside a transactional scope, and expects one [`RecordOutcome`] per
//! identifier back.
//!
//! An action that stops on a record reports [`ActionError::RecordFailed`]; the
//! executor then records that identifier as failed and applies the action to
//! each remaining identifier of the batch on its own, so one bad record never
//! drops its siblings.

mod registry;

pub use registry::{ActionDescriptor, ActionRegistry, ActionRegistryBuilder, RegisteredAction};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::command::{BulkCommand, CommandId, Params};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ActionError {
    /// Application stopped at `record_id`; records after it were not touched
    #[error("record {record_id} failed: {message}")]
    RecordFailed { record_id: String, message: String },

    /// The action cannot run with this command at all
    #[error("action configuration: {0}")]
    Configuration(String),

    /// Storage failure that invalidates the whole batch
    #[error("transaction failure: {0}")]
    Transaction(String),
}

impl ActionError {
    pub fn record_failed(record_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::RecordFailed {
            record_id: record_id.into(),
            message: message.into(),
        }
    }
}

/// What an action sees of the command it runs for
#[derive(Debug, Clone, Copy)]
pub struct ActionContext<'a> {
    pub command_id: CommandId,
    pub action: &'a str,
    pub repository: Option<&'a str>,
    pub username: Option<&'a str>,
    pub params: &'a Params,
}

impl<'a> ActionContext<'a> {
    pub fn from_command(command: &'a BulkCommand) -> Self {
        Self {
            command_id: command.id(),
            action: command.action(),
            repository: command.repository(),
            username: command.username(),
            params: command.params(),
        }
    }
}

/// Result of applying an action to one record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordOutcome {
    pub record_id: String,
    pub error: Option<String>,
}

impl RecordOutcome {
    pub fn success(record_id: impl Into<String>) -> Self {
        Self {
            record_id: record_id.into(),
            error: None,
        }
    }

    pub fn failure(record_id: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            record_id: record_id.into(),
            error: Some(error.into()),
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

#[async_trait]
pub trait BulkAction: Send + Sync + fmt::Debug {
    /// Check the command before it is scheduled
    fn validate(&self, _command: &BulkCommand) -> Result<(), ActionError> {
        Ok(())
    }

    /// Apply the action to `ids`, in order, within the current transaction
    async fn apply(
        &self,
        ctx: &ActionContext<'_>,
        ids: &[String],
    ) -> Result<Vec<RecordOutcome>, ActionError>;
}
