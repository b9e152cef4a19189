use std::sync::Arc;
use std::time::Duration;

use bulk_core::action::{ActionDescriptor, ActionRegistry};
use bulk_core::command::{BulkCommand, CommandId};
use bulk_core::config::BulkConfig;
use bulk_core::scroll::{
    GenericScroller, QueryScroller, ScrollerKind, ScrollerRegistry, DEFAULT_SCROLLER,
};
use bulk_core::service::BulkService;
use bulk_core::status::BulkStatus;
use bulk_core::testing::{InMemoryQuerySource, InMemoryRecordSource, RecordingAction};
use bulk_core::transaction::{NoopTransactionManager, TransactionManager};

pub const ACTION: &str = "setProperties";
pub const FOLDER_QUERY: &str = "SELECT * FROM Document WHERE ecm:primaryType = 'Folder'";
pub const LIST: &str = "list";

pub const WAIT: Duration = Duration::from_secs(10);

/// A started service around in-memory collaborators
pub struct Harness {
    pub service: BulkService,
    pub action: Arc<RecordingAction>,
}

pub struct HarnessBuilder {
    config: BulkConfig,
    query_source: InMemoryQuerySource,
    record_source: InMemoryRecordSource,
    action: RecordingAction,
    transactions: Arc<dyn TransactionManager>,
}

impl Harness {
    pub fn builder() -> HarnessBuilder {
        HarnessBuilder {
            config: BulkConfig::default(),
            query_source: InMemoryQuerySource::new(),
            record_source: InMemoryRecordSource::new(),
            action: RecordingAction::new(),
            transactions: Arc::new(NoopTransactionManager),
        }
    }

    /// Submit and wait until terminal
    pub async fn run(&self, command: BulkCommand) -> BulkStatus {
        let id = self.service.submit(command).expect("submit");
        self.wait(id).await
    }

    pub async fn wait(&self, id: CommandId) -> BulkStatus {
        assert!(
            self.service.await_completion(id, WAIT).await.expect("await"),
            "command {id} did not finish in time"
        );
        self.service.get_status(id).expect("status")
    }
}

impl HarnessBuilder {
    pub fn config(mut self, config: BulkConfig) -> Self {
        self.config = config;
        self
    }

    pub fn query_results(mut self, query: &str, ids: Vec<String>) -> Self {
        self.query_source = self.query_source.with_results(query, ids);
        self
    }

    pub fn query_source(mut self, source: InMemoryQuerySource) -> Self {
        self.query_source = source;
        self
    }

    pub fn list(mut self, descriptor: &str, ids: Vec<String>) -> Self {
        self.record_source = self.record_source.with_list(descriptor, ids);
        self
    }

    pub fn action(mut self, action: RecordingAction) -> Self {
        self.action = action;
        self
    }

    pub fn transactions(mut self, transactions: Arc<dyn TransactionManager>) -> Self {
        self.transactions = transactions;
        self
    }

    pub fn start(self) -> Harness {
        let action = Arc::new(self.action);
        let actions = ActionRegistry::builder()
            .register(ActionDescriptor::new(ACTION), action.clone())
            .build()
            .expect("action registry");
        let scrollers = ScrollerRegistry::builder()
            .register(
                DEFAULT_SCROLLER,
                Arc::new(QueryScroller::new(Arc::new(self.query_source))),
            )
            .register(
                LIST,
                Arc::new(GenericScroller::new(Arc::new(self.record_source))),
            )
            .default_for(ScrollerKind::Generic, LIST)
            .build()
            .expect("scroller registry");

        let service = BulkService::start(self.config, actions, scrollers, self.transactions)
            .expect("service start");
        Harness { service, action }
    }
}

/// `setProperties` over the folder query, bucket 10, batch 5
pub fn folder_command() -> BulkCommand {
    BulkCommand::builder(ACTION, FOLDER_QUERY)
        .expect("builder")
        .bucket(10)
        .expect("bucket")
        .batch(5)
        .expect("batch")
        .build()
}
