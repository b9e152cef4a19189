use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use super::{BucketExecutor, BucketOutcome};
use crate::logging::log_error;
use crate::messaging::PartitionReceiver;

/// What one consumer did before its partition closed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsumerSummary {
    pub partition: usize,
    pub buckets_executed: u64,
    pub buckets_skipped: u64,
    /// Buckets stopped early by an abort or an action failure
    pub buckets_interrupted: u64,
    pub failures: u64,
}

/// One consumer task per partition
#[derive(Debug)]
pub struct WorkerPool {
    consumers: Vec<JoinHandle<ConsumerSummary>>,
}

impl WorkerPool {
    /// Start consuming every partition in `receivers`
    pub fn spawn(executor: Arc<BucketExecutor>, receivers: Vec<PartitionReceiver>) -> Self {
        let consumers = receivers
            .into_iter()
            .map(|receiver| tokio::spawn(consume(executor.clone(), receiver)))
            .collect::<Vec<_>>();
        info!(consumers = consumers.len(), "Worker pool started");
        Self { consumers }
    }

    pub fn size(&self) -> usize {
        self.consumers.len()
    }

    /// Wait for every consumer to drain its partition. Consumers stop once all
    /// publishers are dropped.
    pub async fn join(self) -> Vec<ConsumerSummary> {
        let summaries: Vec<ConsumerSummary> = join_all(self.consumers)
            .await
            .into_iter()
            .filter_map(|result| match result {
                Ok(summary) => Some(summary),
                Err(err) => {
                    log_error("worker_pool", "join", &err.to_string(), None);
                    None
                }
            })
            .collect();

        info!(
            consumers = summaries.len(),
            executed = summaries.iter().map(|s| s.buckets_executed).sum::<u64>(),
            skipped = summaries.iter().map(|s| s.buckets_skipped).sum::<u64>(),
            "Worker pool stopped"
        );
        summaries
    }
}

async fn consume(executor: Arc<BucketExecutor>, mut receiver: PartitionReceiver) -> ConsumerSummary {
    let mut summary = ConsumerSummary {
        partition: receiver.partition(),
        ..ConsumerSummary::default()
    };
    debug!(partition = summary.partition, "Consumer started");

    while let Some(delivery) = receiver.recv().await {
        match executor.execute(delivery.bucket()).await {
            Ok(BucketOutcome::Processed { .. }) => summary.buckets_executed += 1,
            Ok(outcome) if outcome.is_skipped() => summary.buckets_skipped += 1,
            // interrupted by an abort, or the action could not run
            Ok(_) => summary.buckets_interrupted += 1,
            Err(err) => {
                // per-command fault; the consumer keeps going
                summary.failures += 1;
                error!(
                    partition = summary.partition,
                    command_id = %delivery.bucket().command_id,
                    sequence = delivery.bucket().sequence,
                    error = %err,
                    "Bucket execution failed"
                );
            }
        }
        delivery.ack();
    }

    debug!(partition = summary.partition, "Consumer stopped, partition closed");
    summary
}
