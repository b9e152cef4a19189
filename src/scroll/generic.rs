use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

use super::{ScrollChunk, ScrollCursor, Scroller, ScrollerKind, SourceError, SourcePage};
use crate::command::{BulkCommand, Params};
use crate::error::Result;

/// A record source reached by convention rather than by the query language.
///
/// The command query is passed through untouched as `descriptor`; its syntax
/// is whatever the source defines (a path prefix, a list name, a range...).
#[async_trait]
pub trait RecordSource: Send + Sync + fmt::Debug {
    async fn scan(
        &self,
        descriptor: &str,
        params: &Params,
        position: Option<String>,
        page_size: usize,
    ) -> std::result::Result<SourcePage, SourceError>;
}

/// Scroller for commands built with `use_generic_scroller()`
#[derive(Debug, Clone)]
pub struct GenericScroller {
    source: Arc<dyn RecordSource>,
}

impl GenericScroller {
    pub fn new(source: Arc<dyn RecordSource>) -> Self {
        Self { source }
    }
}

#[async_trait]
impl Scroller for GenericScroller {
    fn kind(&self) -> ScrollerKind {
        ScrollerKind::Generic
    }

    async fn open(&self, command: &BulkCommand) -> Result<ScrollCursor> {
        debug!(
            command_id = %command.id(),
            descriptor = %command.query(),
            "Opened generic scroll"
        );
        Ok(ScrollCursor::new(command))
    }

    async fn next(&self, cursor: &mut ScrollCursor, max_count: usize) -> Result<ScrollChunk> {
        let descriptor = cursor.command().query().to_string();
        let params = cursor.command().params().clone();
        let source = &self.source;
        let chunk = cursor
            .fill(max_count, |position, page_size| {
                let descriptor = descriptor.clone();
                let params = params.clone();
                async move { source.scan(&descriptor, &params, position, page_size).await }
            })
            .await?;
        Ok(chunk)
    }
}
