use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

use super::{ScrollChunk, ScrollCursor, Scroller, ScrollerKind, SourceError, SourcePage};
use crate::command::BulkCommand;
use crate::error::Result;

/// Scope of a query as seen by the query engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryRequest {
    pub query: String,
    pub repository: Option<String>,
    pub username: Option<String>,
}

impl QueryRequest {
    pub fn from_command(command: &BulkCommand) -> Self {
        Self {
            query: command.query().to_string(),
            repository: command.repository().map(str::to_string),
            username: command.username().map(str::to_string),
        }
    }
}

/// The external query engine answering document queries page by page
#[async_trait]
pub trait QuerySource: Send + Sync + fmt::Debug {
    /// Reject a query before any page is read
    async fn validate(&self, _request: &QueryRequest) -> std::result::Result<(), SourceError> {
        Ok(())
    }

    async fn page(
        &self,
        request: &QueryRequest,
        position: Option<String>,
        page_size: usize,
    ) -> std::result::Result<SourcePage, SourceError>;
}

/// Scroller backed by the document query engine
#[derive(Debug, Clone)]
pub struct QueryScroller {
    source: Arc<dyn QuerySource>,
}

impl QueryScroller {
    pub fn new(source: Arc<dyn QuerySource>) -> Self {
        Self { source }
    }
}

#[async_trait]
impl Scroller for QueryScroller {
    fn kind(&self) -> ScrollerKind {
        ScrollerKind::Query
    }

    async fn open(&self, command: &BulkCommand) -> Result<ScrollCursor> {
        self.source
            .validate(&QueryRequest::from_command(command))
            .await?;
        debug!(
            command_id = %command.id(),
            query = %command.query(),
            limit = ?command.effective_query_limit(),
            "Opened query scroll"
        );
        Ok(ScrollCursor::new(command))
    }

    async fn next(&self, cursor: &mut ScrollCursor, max_count: usize) -> Result<ScrollChunk> {
        let request = QueryRequest::from_command(cursor.command());
        let source = &self.source;
        let chunk = cursor
            .fill(max_count, |position, page_size| {
                let request = request.clone();
                async move { source.page(&request, position, page_size).await }
            })
            .await?;
        Ok(chunk)
    }
}
