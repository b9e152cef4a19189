//! # Bulk Service
//!
//! The caller-facing entry point. [`BulkService::start`] wires the status
//! tracker, the bucket channel, the dispatcher and one consumer per partition;
//! [`BulkService::shutdown`] lets in-flight scrolls finish, closes the channel
//! and waits for the consumers to drain it.
//!
//! ```rust
//! use std::sync::Arc;
//! use std::time::Duration;
//! use bulk_core::action::{ActionDescriptor, ActionRegistry};
//! use bulk_core::command::BulkCommand;
//! use bulk_core::config::BulkConfig;
//! use bulk_core::scroll::{QueryScroller, ScrollerRegistry, DEFAULT_SCROLLER};
//! use bulk_core::service::BulkService;
//! use bulk_core::status::CommandState;
//! use bulk_core::testing::{record_ids, InMemoryQuerySource, RecordingAction};
//! use bulk_core::transaction::NoopTransactionManager;
//!
//! # #[tokio::main]
//! # async fn main() -> bulk_core::error::Result<()> {
//! let query = "SELECT * FROM Document WHERE ecm:primaryType = 'Folder'";
//! let actions = ActionRegistry::builder()
//!     .register(ActionDescriptor::new("setProperties"), Arc::new(RecordingAction::new()))
//!     .build()?;
//! let source = InMemoryQuerySource::new().with_results(query, record_ids("doc", 23));
//! let scrollers = ScrollerRegistry::builder()
//!     .register(DEFAULT_SCROLLER, Arc::new(QueryScroller::new(Arc::new(source))))
//!     .build()?;
//!
//! let service = BulkService::start(
//!     BulkConfig::default(),
//!     actions,
//!     scrollers,
//!     Arc::new(NoopTransactionManager),
//! )?;
//! let command = BulkCommand::builder("setProperties", query)?
//!     .bucket(10)?
//!     .batch(5)?
//!     .build();
//! let id = service.submit(command)?;
//!
//! assert!(service.await_completion(id, Duration::from_secs(5)).await?);
//! assert_eq!(service.get_status(id)?.state, CommandState::Completed);
//! service.shutdown().await;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::info;

use crate::action::ActionRegistry;
use crate::command::{BulkCommand, CommandId};
use crate::config::BulkConfig;
use crate::dispatcher::Dispatcher;
use crate::error::Result;
use crate::events::{StatusEvent, StatusEventPublisher};
use crate::logging::log_command_operation;
use crate::messaging::bucket_channel;
use crate::scroll::ScrollerRegistry;
use crate::status::{BulkStatus, StatusTracker};
use crate::transaction::TransactionManager;
use crate::worker::{BucketExecutor, ConsumerSummary, WorkerPool};

#[derive(Debug)]
pub struct BulkService {
    config: BulkConfig,
    tracker: Arc<StatusTracker>,
    dispatcher: Dispatcher,
    workers: WorkerPool,
}

impl BulkService {
    /// Validate `config` and start the worker pool. Registries are read-only
    /// from here on. Must be called within a Tokio runtime.
    pub fn start(
        config: BulkConfig,
        actions: ActionRegistry,
        scrollers: ScrollerRegistry,
        transactions: Arc<dyn TransactionManager>,
    ) -> Result<Self> {
        config.validate()?;

        let events = StatusEventPublisher::new(config.status.event_capacity);
        let tracker = Arc::new(StatusTracker::new(events, config.status.retention()));
        let actions = Arc::new(actions);
        let (publisher, receivers) = bucket_channel(config.channel.partitions, config.channel.capacity);

        let executor = Arc::new(BucketExecutor::new(
            actions.clone(),
            tracker.clone(),
            transactions,
        ));
        let workers = WorkerPool::spawn(executor, receivers);
        let dispatcher = Dispatcher::new(
            actions,
            Arc::new(scrollers),
            tracker.clone(),
            publisher,
            config.dispatcher.clone(),
        );

        info!(
            partitions = config.channel.partitions,
            capacity = config.channel.capacity,
            "Bulk service started"
        );
        Ok(Self {
            config,
            tracker,
            dispatcher,
            workers,
        })
    }

    pub fn config(&self) -> &BulkConfig {
        &self.config
    }

    pub fn tracker(&self) -> &Arc<StatusTracker> {
        &self.tracker
    }

    /// Schedule a command; its scroll runs in the background
    pub fn submit(&self, command: BulkCommand) -> Result<CommandId> {
        self.dispatcher.submit(command)
    }

    /// Snapshot of a command's progress. Unknown and expired ids are
    /// `NotFound`.
    pub fn get_status(&self, id: CommandId) -> Result<BulkStatus> {
        self.tracker.get(id)
    }

    /// Cooperative cancellation. Returns `false` when the command already
    /// reached a terminal state.
    pub fn abort(&self, id: CommandId) -> Result<bool> {
        let aborted = self.tracker.abort(id)?;
        log_command_operation(
            "abort",
            id,
            None,
            if aborted { "aborted" } else { "already_terminal" },
            None,
        );
        Ok(aborted)
    }

    /// Wait until the command is terminal; `false` on timeout
    pub async fn await_completion(&self, id: CommandId, timeout: Duration) -> Result<bool> {
        self.tracker.await_completion(id, timeout).await
    }

    pub fn statuses_for_user(&self, username: &str) -> Vec<BulkStatus> {
        self.tracker.statuses_for_user(username)
    }

    /// Drop terminal statuses past retention
    pub fn purge_expired(&self) -> usize {
        self.tracker.purge_expired()
    }

    /// Stream of state transitions of every command
    pub fn subscribe(&self) -> broadcast::Receiver<StatusEvent> {
        self.tracker.events().subscribe()
    }

    /// Let running scrolls finish, close the channel and wait for the workers
    /// to drain it
    pub async fn shutdown(self) -> Vec<ConsumerSummary> {
        info!(
            active_scrolls = self.dispatcher.active_scrolls(),
            "Bulk service shutting down"
        );
        self.dispatcher.join_scrolls().await;
        // last publisher goes with the dispatcher
        drop(self.dispatcher);
        self.workers.join().await
    }
}
