//! At-least-once delivery: a bucket that comes back after it already ran
//! must not be applied or counted twice.

mod common;

use std::sync::Arc;

use bulk_core::action::{ActionDescriptor, ActionRegistry};
use bulk_core::bucket::bucketize;
use bulk_core::command::CommandId;
use bulk_core::messaging::{bucket_channel, BucketPublisher, PartitionReceiver};
use bulk_core::status::{CommandState, StatusTracker};
use bulk_core::testing::{record_ids, RecordingAction};
use bulk_core::transaction::NoopTransactionManager;
use bulk_core::worker::{BucketExecutor, BucketOutcome};
use common::*;

struct Fixture {
    action: Arc<RecordingAction>,
    tracker: Arc<StatusTracker>,
    executor: BucketExecutor,
    publisher: BucketPublisher,
    partition: PartitionReceiver,
    command_id: CommandId,
}

/// One command of `total` ids, scrolled and published in buckets of 10
async fn fixture(total: usize) -> Fixture {
    let action = Arc::new(RecordingAction::new());
    let actions = ActionRegistry::builder()
        .register(ActionDescriptor::new(ACTION), action.clone())
        .build()
        .unwrap();
    let tracker = Arc::new(StatusTracker::default());
    let executor = BucketExecutor::new(
        Arc::new(actions),
        tracker.clone(),
        Arc::new(NoopTransactionManager),
    );

    let command_id = tracker.register(folder_command()).unwrap().id();
    tracker.start_scrolling(command_id).unwrap();
    tracker.add_scrolled(command_id, total as u64).unwrap();

    let (publisher, mut partitions) = bucket_channel(1, 16);
    for bucket in bucketize(command_id, record_ids("folder", total), 10).unwrap() {
        publisher.publish(bucket).await.unwrap();
    }
    tracker.mark_submitted(command_id).unwrap();

    Fixture {
        action,
        tracker,
        executor,
        publisher,
        partition: partitions.remove(0),
        command_id,
    }
}

#[tokio::test]
async fn test_bucket_redelivered_after_processing_is_not_counted_twice() {
    let mut fx = fixture(23).await;

    let first = fx.partition.recv().await.unwrap();
    assert_eq!(first.bucket().sequence, 0);
    assert_eq!(
        fx.executor.execute(first.bucket()).await.unwrap(),
        BucketOutcome::Processed { processed: 10, errors: 0 }
    );
    // consumer went away before acknowledging
    first.nack();

    let again = fx.partition.recv().await.unwrap();
    assert_eq!(again.bucket().sequence, 0);
    assert_eq!(
        fx.executor.execute(again.bucket()).await.unwrap(),
        BucketOutcome::SkippedDuplicate
    );
    again.ack();

    while let Some(delivery) = fx.partition.try_recv() {
        fx.executor.execute(delivery.bucket()).await.unwrap();
        delivery.ack();
    }

    let status = fx.tracker.get(fx.command_id).unwrap();
    assert_eq!(status.state, CommandState::Completed);
    assert_eq!(status.processed, 23);
    assert_eq!(fx.action.applied(), record_ids("folder", 23));

    let stats = fx.publisher.stats();
    assert_eq!(stats.published, 3);
    assert_eq!(stats.redelivered, 1);
    assert_eq!(stats.acknowledged, 3);
}

#[tokio::test]
async fn test_bucket_nacked_before_processing_runs_once() {
    let mut fx = fixture(15).await;

    let first = fx.partition.recv().await.unwrap();
    first.nack();

    let mut outcomes = Vec::new();
    while let Some(delivery) = fx.partition.try_recv() {
        outcomes.push(fx.executor.execute(delivery.bucket()).await.unwrap());
        delivery.ack();
    }

    assert_eq!(
        outcomes,
        vec![
            BucketOutcome::Processed { processed: 10, errors: 0 },
            BucketOutcome::Processed { processed: 5, errors: 0 },
        ]
    );
    let status = fx.tracker.get(fx.command_id).unwrap();
    assert_eq!(status.state, CommandState::Completed);
    assert_eq!(status.processed, 15);
    assert_eq!(fx.action.applied().len(), 15);
}

#[tokio::test]
async fn test_redelivery_after_completion_keeps_terminal_status() {
    let mut fx = fixture(10).await;

    let only = fx.partition.recv().await.unwrap();
    fx.executor.execute(only.bucket()).await.unwrap();
    only.nack();
    assert_eq!(
        fx.tracker.state(fx.command_id).unwrap(),
        CommandState::Completed
    );

    let again = fx.partition.recv().await.unwrap();
    assert_eq!(
        fx.executor.execute(again.bucket()).await.unwrap(),
        BucketOutcome::SkippedTerminal
    );
    again.ack();

    let status = fx.tracker.get(fx.command_id).unwrap();
    assert_eq!(status.processed, 10);
    assert_eq!(fx.action.apply_calls(), 2);
}
