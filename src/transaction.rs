//! # Transactional Scopes
//!
//! Each batch runs inside one scope obtained from a [`TransactionManager`].
//! The executor commits after the action returns and rolls back when the
//! action or the commit reports an infrastructure failure.

use async_trait::async_trait;
use std::fmt;
use thiserror::Error;

use crate::command::CommandId;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransactionError {
    #[error("failed to begin transaction: {0}")]
    Begin(String),

    #[error("commit failed: {0}")]
    Commit(String),

    #[error("rollback failed: {0}")]
    Rollback(String),
}

/// Identifies the batch a scope is opened for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchScope {
    pub command_id: CommandId,
    pub bucket_sequence: u64,
    pub batch_index: usize,
}

#[async_trait]
pub trait TransactionScope: Send {
    async fn commit(self: Box<Self>) -> Result<(), TransactionError>;

    async fn rollback(self: Box<Self>) -> Result<(), TransactionError>;
}

#[async_trait]
pub trait TransactionManager: Send + Sync + fmt::Debug {
    async fn begin(&self, scope: BatchScope) -> Result<Box<dyn TransactionScope>, TransactionError>;
}

/// Manager for stores without transactions; every commit succeeds
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopTransactionManager;

struct NoopScope;

#[async_trait]
impl TransactionScope for NoopScope {
    async fn commit(self: Box<Self>) -> Result<(), TransactionError> {
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), TransactionError> {
        Ok(())
    }
}

#[async_trait]
impl TransactionManager for NoopTransactionManager {
    async fn begin(&self, _scope: BatchScope) -> Result<Box<dyn TransactionScope>, TransactionError> {
        Ok(Box::new(NoopScope))
    }
}
