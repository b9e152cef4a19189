//! # Dispatcher
//!
//! Accepts commands and drives their scroll. `submit` validates and registers
//! a command synchronously, then spawns one scroll loop for it: the loop pulls
//! identifiers from the command's scroller, groups them into buckets and
//! publishes the buckets in scroll order on the bucket channel. Publishing
//! waits while the command's partition is full, so a slow worker pool slows
//! the scroll down.
//!
//! A scroll failure ends the scroll, not the work: every identifier scrolled so
//! far is still published and processed, then the command turns `Aborted`
//! with the failure as its message. An abort stops the loop at its next step.

use futures::future::join_all;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::action::ActionRegistry;
use crate::bucket::Bucketizer;
use crate::command::{BulkCommand, CommandId};
use crate::config::DispatcherConfig;
use crate::error::{BulkError, Result};
use crate::logging::{log_command_operation, log_error};
use crate::messaging::BucketPublisher;
use crate::scroll::{ScrollChunk, ScrollCursor, Scroller, ScrollerRegistry};
use crate::status::StatusTracker;

/// How a scroll loop ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScrollOutcome {
    /// Every identifier was published and the command marked submitted
    Submitted { scrolled: u64, buckets: u64 },
    /// The command was aborted while scrolling
    Stopped { scrolled: u64, buckets: u64 },
}

#[derive(Debug)]
pub struct Dispatcher {
    actions: Arc<ActionRegistry>,
    scrollers: Arc<ScrollerRegistry>,
    tracker: Arc<StatusTracker>,
    publisher: BucketPublisher,
    config: DispatcherConfig,
    scrolls: Mutex<Vec<JoinHandle<()>>>,
}

impl Dispatcher {
    pub fn new(
        actions: Arc<ActionRegistry>,
        scrollers: Arc<ScrollerRegistry>,
        tracker: Arc<StatusTracker>,
        publisher: BucketPublisher,
        config: DispatcherConfig,
    ) -> Self {
        Self {
            actions,
            scrollers,
            tracker,
            publisher,
            config,
            scrolls: Mutex::new(Vec::new()),
        }
    }

    /// Resolve everything `command` needs before it is scheduled: its action,
    /// its sizing defaults and its scroller. Nothing is registered.
    pub fn prepare(&self, command: BulkCommand) -> Result<(BulkCommand, Arc<dyn Scroller>)> {
        let registered = self.actions.resolve(command.action())?;
        let descriptor = &registered.descriptor;

        let command = command
            .with_defaults(
                descriptor
                    .default_bucket_size
                    .unwrap_or(self.config.default_bucket_size),
                descriptor
                    .default_batch_size
                    .unwrap_or(self.config.default_batch_size),
                descriptor.default_query_limit,
            )?
            .with_default_repository(self.config.default_repository.as_deref());

        registered.action.validate(&command).map_err(|err| {
            BulkError::configuration(format!(
                "Action {} rejected command: {err}",
                command.action()
            ))
        })?;

        let scroller = self.scrollers.resolve(&command)?;
        Ok((command, scroller))
    }

    /// Schedule `command` and start its scroll in the background.
    ///
    /// Configuration, unknown action and unknown scroller errors come back
    /// here and leave nothing scheduled. Must be called within a Tokio
    /// runtime.
    pub fn submit(&self, command: BulkCommand) -> Result<CommandId> {
        let (command, scroller) = self.prepare(command)?;
        let command = self.tracker.register(command)?;
        let command_id = command.id();

        log_command_operation(
            "submit",
            command_id,
            Some(command.action()),
            "scheduled",
            Some(command.query()),
        );

        let fetch_size = command
            .bucket_size()
            .saturating_mul(self.config.scroll_fetch_multiplier.max(1));
        let task = ScrollTask {
            command,
            scroller,
            tracker: self.tracker.clone(),
            publisher: self.publisher.clone(),
            fetch_size,
        };
        let handle = tokio::spawn(task.run());

        let mut scrolls = self.scrolls.lock();
        scrolls.retain(|handle| !handle.is_finished());
        scrolls.push(handle);
        Ok(command_id)
    }

    /// Scroll loops still running
    pub fn active_scrolls(&self) -> usize {
        self.scrolls
            .lock()
            .iter()
            .filter(|handle| !handle.is_finished())
            .count()
    }

    /// Wait for every scroll loop started so far
    pub async fn join_scrolls(&self) {
        let handles: Vec<JoinHandle<()>> = std::mem::take(&mut *self.scrolls.lock());
        for result in join_all(handles).await {
            if let Err(err) = result {
                log_error("dispatcher", "join_scroll", &err.to_string(), None);
            }
        }
    }
}

/// Everything one scroll loop owns
struct ScrollTask {
    command: Arc<BulkCommand>,
    scroller: Arc<dyn Scroller>,
    tracker: Arc<StatusTracker>,
    publisher: BucketPublisher,
    fetch_size: usize,
}

impl ScrollTask {
    async fn run(self) {
        let command_id = self.command.id();
        match self.drive().await {
            Ok(outcome) => debug!(command_id = %command_id, outcome = ?outcome, "Scroll loop finished"),
            Err(err) => {
                log_error(
                    "dispatcher",
                    "scroll",
                    &err.to_string(),
                    Some(&command_id.to_string()),
                );
                // the record may be gone after a purge; nothing left to abort then
                let _ = match err {
                    BulkError::Scroll { .. } => self.tracker.fail_scroll(command_id, err.to_string()),
                    _ => self
                        .tracker
                        .abort_with_error(command_id, err.to_string())
                        .map(|_| ()),
                };
            }
        }
    }

    async fn drive(&self) -> Result<ScrollOutcome> {
        let command_id = self.command.id();
        self.tracker.start_scrolling(command_id)?;

        let mut cursor = self.scroller.open(&self.command).await?;
        let mut bucketizer = Bucketizer::new(command_id, self.command.bucket_size())?;
        let mut scrolled = 0u64;

        loop {
            if self.tracker.is_aborted(command_id) {
                return Ok(self.stopped(scrolled, bucketizer.emitted()));
            }

            let chunk = match self.next_chunk(&mut cursor).await {
                Ok(chunk) => chunk,
                Err(err) => {
                    // what was scrolled before the failure still runs
                    if let Some(bucket) = bucketizer.finish() {
                        self.publisher.publish(bucket).await?;
                    }
                    return Err(err);
                }
            };
            let exhausted = chunk.exhausted;
            let count = chunk.ids.len() as u64;
            scrolled += count;
            self.tracker.add_scrolled(command_id, count)?;

            for bucket in bucketizer.push(chunk.ids) {
                if self.tracker.is_aborted(command_id) {
                    return Ok(self.stopped(scrolled, bucketizer.emitted()));
                }
                self.publisher.publish(bucket).await?;
            }
            if exhausted {
                break;
            }
        }

        let buckets = bucketizer.emitted() + u64::from(bucketizer.pending() > 0);
        if let Some(bucket) = bucketizer.finish() {
            self.publisher.publish(bucket).await?;
        }
        self.tracker.mark_submitted(command_id)?;

        info!(
            command_id = %command_id,
            scrolled = scrolled,
            buckets = buckets,
            "Scroll completed"
        );
        Ok(ScrollOutcome::Submitted { scrolled, buckets })
    }

    /// Next chunk from the scroller, held to the cursor contract
    async fn next_chunk(&self, cursor: &mut ScrollCursor) -> Result<ScrollChunk> {
        let chunk = self.scroller.next(cursor, self.fetch_size).await?;
        if chunk.ids.len() > self.fetch_size {
            return Err(BulkError::scroll(format!(
                "scroller returned {} ids, more than the {} requested",
                chunk.ids.len(),
                self.fetch_size
            )));
        }
        if chunk.ids.is_empty() && !chunk.exhausted {
            return Err(BulkError::scroll(
                "scroller returned an empty chunk without being exhausted",
            ));
        }
        Ok(chunk)
    }

    fn stopped(&self, scrolled: u64, buckets: u64) -> ScrollOutcome {
        info!(
            command_id = %self.command.id(),
            scrolled = scrolled,
            buckets = buckets,
            "Command aborted, scroll stopped"
        );
        ScrollOutcome::Stopped { scrolled, buckets }
    }
}
