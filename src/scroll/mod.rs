//! # Scrolling
//!
//! A [`Scroller`] turns a command's query into a stream of record identifiers,
//! chunk by chunk, through a [`ScrollCursor`]. Two kinds exist behind the same
//! contract:
//!
//! - [`QueryScroller`] runs the command query against a [`QuerySource`]
//!   (the external query engine), scoped by repository and user.
//! - [`GenericScroller`] hands the query to a [`RecordSource`] verbatim, as a
//!   descriptor whose syntax is a convention of that source.
//!
//! Both share the cursor mechanics: `next` fills up to `max_count` ids across as
//! many source pages as needed, never crosses the command's query limit, and
//! only returns a short chunk together with `exhausted = true`.

mod generic;
mod query;
mod registry;

pub use generic::{GenericScroller, RecordSource};
pub use query::{QueryRequest, QueryScroller, QuerySource};
pub use registry::{ScrollerRegistry, ScrollerRegistryBuilder, DEFAULT_SCROLLER};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::future::Future;
use thiserror::Error;

use crate::command::{BulkCommand, CommandId};
use crate::error::Result;

/// Failures reported by a query or record source
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SourceError {
    #[error("invalid query: {0}")]
    InvalidQuery(String),

    #[error("source unavailable: {0}")]
    Unavailable(String),

    #[error("protocol violation: {0}")]
    Protocol(String),
}

/// Which family of scroller a command selects
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScrollerKind {
    Query,
    Generic,
}

impl ScrollerKind {
    pub fn for_command(command: &BulkCommand) -> Self {
        if command.uses_generic_scroller() {
            Self::Generic
        } else {
            Self::Query
        }
    }
}

impl fmt::Display for ScrollerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Query => write!(f, "query"),
            Self::Generic => write!(f, "generic"),
        }
    }
}

/// One page handed back by a source.
///
/// `next` is the opaque position to resume from; `None` means the source has no
/// more matches.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SourcePage {
    pub ids: Vec<String>,
    pub next: Option<String>,
}

impl SourcePage {
    pub fn new(ids: Vec<String>, next: Option<String>) -> Self {
        Self { ids, next }
    }

    pub fn last(ids: Vec<String>) -> Self {
        Self { ids, next: None }
    }
}

/// Result of one `next` call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScrollChunk {
    pub ids: Vec<String>,
    pub exhausted: bool,
}

/// Scroll position for one command, owned by the dispatcher's scroll loop
#[derive(Debug)]
pub struct ScrollCursor {
    command: BulkCommand,
    position: Option<String>,
    produced: u64,
    limit: Option<u64>,
    buffered: VecDeque<String>,
    source_done: bool,
    exhausted: bool,
}

impl ScrollCursor {
    pub fn new(command: &BulkCommand) -> Self {
        let limit = command.effective_query_limit();
        Self {
            command: command.clone(),
            position: None,
            produced: 0,
            limit,
            buffered: VecDeque::new(),
            source_done: false,
            exhausted: false,
        }
    }

    pub fn command_id(&self) -> CommandId {
        self.command.id()
    }

    /// The command this cursor scrolls for
    pub fn command(&self) -> &BulkCommand {
        &self.command
    }

    /// Identifiers handed out so far
    pub fn produced(&self) -> u64 {
        self.produced
    }

    pub fn is_exhausted(&self) -> bool {
        self.exhausted
    }

    /// Opaque source position the next page is read from
    pub fn position(&self) -> Option<&str> {
        self.position.as_deref()
    }

    fn remaining(&self) -> Option<u64> {
        self.limit.map(|limit| limit.saturating_sub(self.produced))
    }

    /// Drive `fetch` until `max_count` ids are gathered, the limit is reached,
    /// or the source runs dry.
    pub(crate) async fn fill<F, Fut>(
        &mut self,
        max_count: usize,
        mut fetch: F,
    ) -> std::result::Result<ScrollChunk, SourceError>
    where
        F: FnMut(Option<String>, usize) -> Fut,
        Fut: Future<Output = std::result::Result<SourcePage, SourceError>>,
    {
        if max_count == 0 {
            return Err(SourceError::Protocol("max_count must be > 0".to_string()));
        }
        if self.exhausted {
            return Ok(ScrollChunk {
                ids: Vec::new(),
                exhausted: true,
            });
        }

        let wanted = match self.remaining() {
            Some(remaining) => max_count.min(usize::try_from(remaining).unwrap_or(usize::MAX)),
            None => max_count,
        };

        let mut ids = Vec::with_capacity(wanted);
        while ids.len() < wanted {
            if let Some(id) = self.buffered.pop_front() {
                ids.push(id);
                continue;
            }
            if self.source_done {
                break;
            }

            let page = fetch(self.position.clone(), wanted - ids.len()).await?;
            if page.ids.is_empty() && page.next.is_some() {
                return Err(SourceError::Protocol(format!(
                    "source returned an empty page with a continuation for command {}",
                    self.command.id()
                )));
            }
            self.source_done = page.next.is_none();
            self.position = page.next;
            self.buffered.extend(page.ids);
        }

        self.produced += ids.len() as u64;
        self.exhausted =
            self.remaining() == Some(0) || (self.source_done && self.buffered.is_empty());

        Ok(ScrollChunk {
            ids,
            exhausted: self.exhausted,
        })
    }
}

/// Produces the identifiers matched by a command
#[async_trait]
pub trait Scroller: Send + Sync + fmt::Debug {
    fn kind(&self) -> ScrollerKind;

    /// Start a fresh scroll for `command`
    async fn open(&self, command: &BulkCommand) -> Result<ScrollCursor>;

    /// Next chunk of at most `max_count` identifiers. A chunk shorter than
    /// `max_count` is always marked exhausted.
    async fn next(&self, cursor: &mut ScrollCursor, max_count: usize) -> Result<ScrollChunk>;
}
