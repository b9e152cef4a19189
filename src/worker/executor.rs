use std::slice;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

use crate::action::{ActionContext, ActionError, ActionRegistry, BulkAction, RecordOutcome};
use crate::batch::{batches, Batch};
use crate::bucket::Bucket;
use crate::command::BulkCommand;
use crate::error::{BulkError, Result};
use crate::logging::log_bucket_operation;
use crate::status::StatusTracker;
use crate::transaction::{BatchScope, TransactionManager};

/// What happened to one delivered bucket
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BucketOutcome {
    /// Every batch ran and was reported
    Processed { processed: u64, errors: u64 },
    /// The command was already terminal (aborted, usually); nothing applied
    SkippedTerminal,
    /// The bucket was fully processed by an earlier delivery
    SkippedDuplicate,
    /// The command is unknown or expired from retention
    SkippedUnknown,
    /// The command was aborted while this bucket was running; later batches
    /// were discarded
    Interrupted { processed: u64, errors: u64 },
    /// The action could not run at all; the command is now aborted
    CommandAborted,
}

impl BucketOutcome {
    pub fn is_skipped(&self) -> bool {
        matches!(
            self,
            Self::SkippedTerminal | Self::SkippedDuplicate | Self::SkippedUnknown
        )
    }
}

/// Counts reported for one batch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct BatchReport {
    processed: u64,
    errors: u64,
}

impl BatchReport {
    fn failed(len: usize) -> Self {
        Self {
            processed: len as u64,
            errors: len as u64,
        }
    }
}

/// Applies the action of a bucket's command, batch after batch
#[derive(Debug, Clone)]
pub struct BucketExecutor {
    actions: Arc<ActionRegistry>,
    tracker: Arc<StatusTracker>,
    transactions: Arc<dyn TransactionManager>,
}

impl BucketExecutor {
    pub fn new(
        actions: Arc<ActionRegistry>,
        tracker: Arc<StatusTracker>,
        transactions: Arc<dyn TransactionManager>,
    ) -> Self {
        Self {
            actions,
            tracker,
            transactions,
        }
    }

    pub fn tracker(&self) -> &Arc<StatusTracker> {
        &self.tracker
    }

    /// Run every batch of `bucket` in order and fold the outcomes into the
    /// command status.
    ///
    /// Per-record and per-batch failures are counted, never returned. An
    /// error only comes back when the status record vanished mid-bucket.
    pub async fn execute(&self, bucket: &Bucket) -> Result<BucketOutcome> {
        let command_id = bucket.command_id;
        let command = match self.tracker.command(command_id) {
            Ok(command) => command,
            Err(BulkError::NotFound { .. }) => {
                warn!(command_id = %command_id, sequence = bucket.sequence, "Bucket for unknown command, skipping");
                return Ok(BucketOutcome::SkippedUnknown);
            }
            Err(err) => return Err(err),
        };

        if self.tracker.state(command_id)?.is_terminal() {
            debug!(command_id = %command_id, sequence = bucket.sequence, "Command is terminal, discarding bucket");
            return Ok(BucketOutcome::SkippedTerminal);
        }
        if self.tracker.is_bucket_done(command_id, bucket.sequence) {
            debug!(command_id = %command_id, sequence = bucket.sequence, "Bucket already processed, skipping redelivery");
            return Ok(BucketOutcome::SkippedDuplicate);
        }

        let action = match self.actions.resolve(command.action()) {
            Ok(registered) => registered.action.clone(),
            Err(err) => {
                self.tracker.abort_with_error(command_id, err.to_string())?;
                return Ok(BucketOutcome::CommandAborted);
            }
        };

        let started = Instant::now();
        let mut processed = 0;
        let mut errors = 0;
        for batch in batches(bucket, command.batch_size()) {
            if self.tracker.is_aborted(command_id) {
                debug!(
                    command_id = %command_id,
                    sequence = bucket.sequence,
                    batch = batch.index,
                    "Command aborted, discarding remaining batches"
                );
                return Ok(BucketOutcome::Interrupted { processed, errors });
            }

            let report = match self.run_batch(&command, action.as_ref(), bucket, batch).await {
                Ok(report) => report,
                Err(err) => {
                    self.tracker.abort_with_error(command_id, err.to_string())?;
                    return Ok(BucketOutcome::CommandAborted);
                }
            };
            self.tracker
                .record_batch(command_id, report.processed, report.errors)?;
            processed += report.processed;
            errors += report.errors;
        }

        self.tracker.complete_bucket(command_id, bucket.sequence)?;
        log_bucket_operation(
            "execute",
            command_id,
            bucket.sequence,
            bucket.len(),
            if errors > 0 { "completed_with_errors" } else { "completed" },
            Some(started.elapsed().as_millis() as u64),
        );
        Ok(BucketOutcome::Processed { processed, errors })
    }

    /// One batch in one transactional scope. Only a configuration failure of
    /// the action comes back as an error.
    async fn run_batch(
        &self,
        command: &BulkCommand,
        action: &dyn BulkAction,
        bucket: &Bucket,
        batch: Batch<'_>,
    ) -> Result<BatchReport> {
        let scope = BatchScope {
            command_id: command.id(),
            bucket_sequence: bucket.sequence,
            batch_index: batch.index,
        };
        let transaction = match self.transactions.begin(scope).await {
            Ok(transaction) => transaction,
            Err(err) => {
                warn!(
                    command_id = %scope.command_id,
                    sequence = scope.bucket_sequence,
                    batch = scope.batch_index,
                    error = %err,
                    "Could not open transaction, batch failed"
                );
                return Ok(BatchReport::failed(batch.len()));
            }
        };

        let ctx = ActionContext::from_command(command);
        match apply_isolating(action, &ctx, batch.ids).await {
            Ok(errors) => match transaction.commit().await {
                Ok(()) => Ok(BatchReport {
                    processed: batch.len() as u64,
                    errors,
                }),
                Err(err) => {
                    warn!(
                        command_id = %scope.command_id,
                        sequence = scope.bucket_sequence,
                        batch = scope.batch_index,
                        size = batch.len(),
                        error = %err,
                        "Commit failed, whole batch counted as errors"
                    );
                    Ok(BatchReport::failed(batch.len()))
                }
            },
            Err(err) => {
                if let Err(rollback_err) = transaction.rollback().await {
                    warn!(
                        command_id = %scope.command_id,
                        error = %rollback_err,
                        "Rollback failed"
                    );
                }
                match BulkError::from(err) {
                    err @ BulkError::Configuration { .. } => Err(err),
                    other => {
                        warn!(
                            command_id = %scope.command_id,
                            sequence = scope.bucket_sequence,
                            batch = scope.batch_index,
                            error = %other,
                            "Batch rolled back"
                        );
                        Ok(BatchReport::failed(batch.len()))
                    }
                }
            }
        }
    }
}

fn failures(outcomes: &[RecordOutcome], expected: usize) -> u64 {
    let failed = outcomes.iter().filter(|outcome| !outcome.is_success()).count();
    // a record without an outcome was not applied
    (failed + expected.saturating_sub(outcomes.len())) as u64
}

/// Apply `ids` as one call; when the action stops on a record, count it and
/// apply every record after it on its own. Returns the number of failed
/// records. `Configuration` and `Transaction` failures propagate.
async fn apply_isolating(
    action: &dyn BulkAction,
    ctx: &ActionContext<'_>,
    ids: &[String],
) -> std::result::Result<u64, ActionError> {
    let (record_id, message) = match action.apply(ctx, ids).await {
        Ok(outcomes) => return Ok(failures(&outcomes, ids.len())),
        Err(ActionError::RecordFailed { record_id, message }) => (record_id, message),
        Err(err) => return Err(err),
    };

    debug!(
        command_id = %ctx.command_id,
        error = %BulkError::per_record(record_id.as_str(), message),
        "Record failed"
    );
    let Some(position) = ids.iter().position(|id| *id == record_id) else {
        warn!(
            command_id = %ctx.command_id,
            record_id = %record_id,
            "Action reported a record outside the batch, counting the batch as failed"
        );
        return Ok(ids.len() as u64);
    };

    let mut errors = 1;
    for id in &ids[position + 1..] {
        match action.apply(ctx, slice::from_ref(id)).await {
            Ok(outcomes) => errors += failures(&outcomes, 1),
            Err(ActionError::RecordFailed { record_id, message }) => {
                debug!(
                    command_id = %ctx.command_id,
                    error = %BulkError::per_record(record_id, message),
                    "Record failed"
                );
                errors += 1;
            }
            Err(err) => return Err(err),
        }
    }
    Ok(errors)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::ActionDescriptor;
    use crate::bucket::bucketize;
    use crate::status::CommandState;
    use crate::testing::{record_ids, FailingCommitManager, RecordingAction};
    use crate::transaction::NoopTransactionManager;

    struct Fixture {
        executor: BucketExecutor,
        action: Arc<RecordingAction>,
        command: Arc<BulkCommand>,
    }

    fn fixture(action: RecordingAction, transactions: Arc<dyn TransactionManager>) -> Fixture {
        let action = Arc::new(action);
        let actions = ActionRegistry::builder()
            .register(ActionDescriptor::new("setProperties"), action.clone())
            .build()
            .unwrap();
        let tracker = Arc::new(StatusTracker::default());
        let command = BulkCommand::builder("setProperties", "SELECT * FROM Folder")
            .unwrap()
            .bucket(10)
            .unwrap()
            .batch(5)
            .unwrap()
            .build();
        let command = tracker.register(command).unwrap();
        Fixture {
            executor: BucketExecutor::new(Arc::new(actions), tracker, transactions),
            action,
            command,
        }
    }

    fn buckets(command: &BulkCommand, count: usize) -> Vec<Bucket> {
        bucketize(command.id(), record_ids("doc", count), 10).unwrap()
    }

    fn scroll_all(fixture: &Fixture, count: u64) {
        let tracker = fixture.executor.tracker();
        tracker.start_scrolling(fixture.command.id()).unwrap();
        tracker.add_scrolled(fixture.command.id(), count).unwrap();
        tracker.mark_submitted(fixture.command.id()).unwrap();
    }

    #[tokio::test]
    async fn test_batches_applied_in_order() {
        let fixture = fixture(RecordingAction::new(), Arc::new(NoopTransactionManager));
        scroll_all(&fixture, 23);

        for bucket in buckets(&fixture.command, 23) {
            let outcome = fixture.executor.execute(&bucket).await.unwrap();
            assert!(matches!(outcome, BucketOutcome::Processed { errors: 0, .. }));
        }

        assert_eq!(fixture.action.applied(), record_ids("doc", 23));
        // (5,5) + (5,5) + (3)
        assert_eq!(fixture.action.apply_calls(), 5);
        let status = fixture.executor.tracker().get(fixture.command.id()).unwrap();
        assert_eq!(status.processed, 23);
        assert_eq!(status.state, CommandState::Completed);
    }

    #[tokio::test]
    async fn test_failing_record_does_not_drop_siblings() {
        let fixture = fixture(
            RecordingAction::new().failing_on(["doc-2"]),
            Arc::new(NoopTransactionManager),
        );
        scroll_all(&fixture, 5);

        let bucket = &buckets(&fixture.command, 5)[0];
        let outcome = fixture.executor.execute(bucket).await.unwrap();
        assert_eq!(outcome, BucketOutcome::Processed { processed: 5, errors: 1 });
        assert_eq!(
            fixture.action.applied(),
            vec!["doc-0", "doc-1", "doc-3", "doc-4"]
        );
        let status = fixture.executor.tracker().get(fixture.command.id()).unwrap();
        assert_eq!(status.state, CommandState::CompletedWithErrors);
        assert_eq!(status.error_count, 1);
    }

    #[tokio::test]
    async fn test_commit_failure_fails_whole_batch() {
        let transactions = Arc::new(FailingCommitManager::new().fail_batch(0, 1));
        let fixture = fixture(RecordingAction::new(), transactions.clone());
        scroll_all(&fixture, 10);

        let bucket = &buckets(&fixture.command, 10)[0];
        let outcome = fixture.executor.execute(bucket).await.unwrap();
        assert_eq!(outcome, BucketOutcome::Processed { processed: 10, errors: 5 });
        assert_eq!(transactions.commits(), 1);
        assert_eq!(transactions.rollbacks(), 1);
    }

    #[tokio::test]
    async fn test_redelivered_bucket_is_skipped() {
        let fixture = fixture(RecordingAction::new(), Arc::new(NoopTransactionManager));
        fixture
            .executor
            .tracker()
            .add_scrolled(fixture.command.id(), 10)
            .unwrap();

        let bucket = &buckets(&fixture.command, 10)[0];
        fixture.executor.execute(bucket).await.unwrap();
        let again = fixture.executor.execute(bucket).await.unwrap();

        assert_eq!(again, BucketOutcome::SkippedDuplicate);
        assert_eq!(fixture.action.applied().len(), 10);
        let status = fixture.executor.tracker().get(fixture.command.id()).unwrap();
        assert_eq!(status.processed, 10);
    }

    #[tokio::test]
    async fn test_aborted_command_discards_bucket() {
        let fixture = fixture(RecordingAction::new(), Arc::new(NoopTransactionManager));
        fixture.executor.tracker().abort(fixture.command.id()).unwrap();

        let bucket = &buckets(&fixture.command, 10)[0];
        let outcome = fixture.executor.execute(bucket).await.unwrap();
        assert_eq!(outcome, BucketOutcome::SkippedTerminal);
        assert_eq!(fixture.action.apply_calls(), 0);
    }

    #[tokio::test]
    async fn test_misconfigured_action_aborts_command() {
        let fixture = fixture(
            RecordingAction::new().misconfigured("missing xpath"),
            Arc::new(NoopTransactionManager),
        );
        let bucket = &buckets(&fixture.command, 10)[0];

        let outcome = fixture.executor.execute(bucket).await.unwrap();
        assert_eq!(outcome, BucketOutcome::CommandAborted);
        let status = fixture.executor.tracker().get(fixture.command.id()).unwrap();
        assert_eq!(status.state, CommandState::Aborted);
        assert!(status.error_message.unwrap().contains("missing xpath"));
    }

    #[tokio::test]
    async fn test_unknown_action_aborts_command() {
        let fixture = fixture(RecordingAction::new(), Arc::new(NoopTransactionManager));
        let tracker = fixture.executor.tracker();
        let command = tracker
            .register(BulkCommand::builder("trash", "q").unwrap().build())
            .unwrap();

        let bucket = &buckets(&command, 3)[0];
        let outcome = fixture.executor.execute(bucket).await.unwrap();
        assert_eq!(outcome, BucketOutcome::CommandAborted);
        assert_eq!(tracker.state(command.id()).unwrap(), CommandState::Aborted);
    }

    #[tokio::test]
    async fn test_unknown_command_is_skipped() {
        let fixture = fixture(RecordingAction::new(), Arc::new(NoopTransactionManager));
        let stranger = BulkCommand::builder("setProperties", "q").unwrap().build();

        let bucket = &buckets(&stranger, 3)[0];
        assert_eq!(
            fixture.executor.execute(bucket).await.unwrap(),
            BucketOutcome::SkippedUnknown
        );
    }
}
