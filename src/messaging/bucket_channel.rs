//! # Partitioned Bucket Channel
//!
//! In-process stand-in for a partitioned log: every bucket of a command lands
//! on the partition chosen from its command id, each partition is a bounded
//! FIFO, and a consumer acknowledges a delivery once all of its batches are
//! committed. A delivery that is negatively acknowledged goes back to the head
//! of its partition, which gives at-least-once semantics.
//!
//! ```rust
//! use bulk_core::bucket::Bucket;
//! use bulk_core::command::CommandId;
//! use bulk_core::messaging::bucket_channel;
//!
//! # tokio_test::block_on(async {
//! let (publisher, mut partitions) = bucket_channel(4, 16);
//! let command_id = CommandId::new();
//! publisher
//!     .publish(Bucket { command_id, sequence: 0, ids: vec!["doc-1".into()] })
//!     .await
//!     .unwrap();
//!
//! let partition = publisher.partition_for(&command_id);
//! let delivery = partitions[partition].recv().await.unwrap();
//! assert_eq!(delivery.bucket().sequence, 0);
//! delivery.ack();
//! assert_eq!(publisher.stats().acknowledged, 1);
//! # });
//! ```

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::debug;

use crate::bucket::Bucket;
use crate::command::CommandId;
use crate::error::{BulkError, Result};

/// Delivery counters shared by both ends of the channel
#[derive(Debug, Default)]
pub struct ChannelStats {
    published: AtomicU64,
    acknowledged: AtomicU64,
    redelivered: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelStatsSnapshot {
    pub published: u64,
    pub acknowledged: u64,
    pub redelivered: u64,
}

impl ChannelStats {
    pub fn snapshot(&self) -> ChannelStatsSnapshot {
        ChannelStatsSnapshot {
            published: self.published.load(Ordering::Relaxed),
            acknowledged: self.acknowledged.load(Ordering::Relaxed),
            redelivered: self.redelivered.load(Ordering::Relaxed),
        }
    }
}

/// Create a channel with `partitions` bounded partitions of `capacity` buckets
pub fn bucket_channel(
    partitions: usize,
    capacity: usize,
) -> (BucketPublisher, Vec<PartitionReceiver>) {
    let partitions = partitions.max(1);
    let stats = Arc::new(ChannelStats::default());

    let (senders, receivers): (Vec<_>, Vec<_>) = (0..partitions)
        .map(|partition| {
            let (tx, rx) = mpsc::channel(capacity.max(1));
            let receiver = PartitionReceiver {
                partition,
                receiver: rx,
                redelivered: Arc::new(Mutex::new(VecDeque::new())),
                stats: stats.clone(),
            };
            (tx, receiver)
        })
        .unzip();

    let publisher = BucketPublisher {
        partitions: senders.into(),
        stats,
    };
    (publisher, receivers)
}

/// Publishing end, cheap to clone. The channel closes once every clone is
/// dropped and the partitions are drained.
#[derive(Debug, Clone)]
pub struct BucketPublisher {
    partitions: Arc<[mpsc::Sender<Bucket>]>,
    stats: Arc<ChannelStats>,
}

impl BucketPublisher {
    /// Partition owning every bucket of `command_id`
    pub fn partition_for(&self, command_id: &CommandId) -> usize {
        (command_id.as_uuid().as_u128() % self.partitions.len() as u128) as usize
    }

    pub fn partition_count(&self) -> usize {
        self.partitions.len()
    }

    /// Enqueue a bucket, waiting while its partition is full
    pub async fn publish(&self, bucket: Bucket) -> Result<()> {
        let partition = self.partition_for(&bucket.command_id);
        let command_id = bucket.command_id;
        let sequence = bucket.sequence;

        self.partitions[partition]
            .send(bucket)
            .await
            .map_err(|_| BulkError::channel(format!("partition {partition} is closed")))?;
        self.stats.published.fetch_add(1, Ordering::Relaxed);

        debug!(
            command_id = %command_id,
            sequence = sequence,
            partition = partition,
            "Published bucket"
        );
        Ok(())
    }

    pub fn stats(&self) -> ChannelStatsSnapshot {
        self.stats.snapshot()
    }
}

/// Consuming end of one partition
#[derive(Debug)]
pub struct PartitionReceiver {
    partition: usize,
    receiver: mpsc::Receiver<Bucket>,
    redelivered: Arc<Mutex<VecDeque<Bucket>>>,
    stats: Arc<ChannelStats>,
}

impl PartitionReceiver {
    pub fn partition(&self) -> usize {
        self.partition
    }

    /// Next delivery; redelivered buckets come first. `None` once the
    /// publishers are gone and the partition is empty.
    pub async fn recv(&mut self) -> Option<Delivery> {
        let redelivered = self.redelivered.lock().pop_front();
        let bucket = match redelivered {
            Some(bucket) => bucket,
            None => self.receiver.recv().await?,
        };
        Some(Delivery {
            bucket,
            partition: self.partition,
            redelivered: self.redelivered.clone(),
            stats: self.stats.clone(),
        })
    }

    /// Non-blocking variant of [`recv`](Self::recv)
    pub fn try_recv(&mut self) -> Option<Delivery> {
        let redelivered = self.redelivered.lock().pop_front();
        let bucket = match redelivered {
            Some(bucket) => bucket,
            None => self.receiver.try_recv().ok()?,
        };
        Some(Delivery {
            bucket,
            partition: self.partition,
            redelivered: self.redelivered.clone(),
            stats: self.stats.clone(),
        })
    }
}

/// A bucket handed to a consumer, pending acknowledgement
#[derive(Debug)]
pub struct Delivery {
    bucket: Bucket,
    partition: usize,
    redelivered: Arc<Mutex<VecDeque<Bucket>>>,
    stats: Arc<ChannelStats>,
}

impl Delivery {
    pub fn bucket(&self) -> &Bucket {
        &self.bucket
    }

    pub fn partition(&self) -> usize {
        self.partition
    }

    /// The bucket is done (processed or deliberately skipped)
    pub fn ack(self) {
        self.stats.acknowledged.fetch_add(1, Ordering::Relaxed);
    }

    /// Hand the bucket back; it is the next one this partition delivers
    pub fn nack(self) {
        self.stats.redelivered.fetch_add(1, Ordering::Relaxed);
        self.redelivered.lock().push_front(self.bucket);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bucket(command_id: CommandId, sequence: u64) -> Bucket {
        Bucket {
            command_id,
            sequence,
            ids: vec![format!("doc-{sequence}")],
        }
    }

    #[tokio::test]
    async fn test_per_command_order_is_kept() {
        let (publisher, mut partitions) = bucket_channel(3, 8);
        let command_id = CommandId::new();
        for sequence in 0..5 {
            publisher.publish(bucket(command_id, sequence)).await.unwrap();
        }

        let receiver = &mut partitions[publisher.partition_for(&command_id)];
        let mut sequences = Vec::new();
        while let Some(delivery) = receiver.try_recv() {
            sequences.push(delivery.bucket().sequence);
            delivery.ack();
        }
        assert_eq!(sequences, vec![0, 1, 2, 3, 4]);
        assert_eq!(publisher.stats().published, 5);
        assert_eq!(publisher.stats().acknowledged, 5);
    }

    #[tokio::test]
    async fn test_nack_redelivers_first() {
        let (publisher, mut partitions) = bucket_channel(1, 8);
        let command_id = CommandId::new();
        publisher.publish(bucket(command_id, 0)).await.unwrap();
        publisher.publish(bucket(command_id, 1)).await.unwrap();

        let receiver = &mut partitions[0];
        let first = receiver.recv().await.unwrap();
        assert_eq!(first.bucket().sequence, 0);
        first.nack();

        let again = receiver.recv().await.unwrap();
        assert_eq!(again.bucket().sequence, 0);
        again.ack();
        assert_eq!(receiver.recv().await.unwrap().bucket().sequence, 1);
        assert_eq!(publisher.stats().redelivered, 1);
    }

    #[tokio::test]
    async fn test_closes_when_publishers_dropped() {
        let (publisher, mut partitions) = bucket_channel(2, 4);
        drop(publisher);
        for receiver in &mut partitions {
            assert!(receiver.recv().await.is_none());
        }
    }

    #[tokio::test]
    async fn test_full_partition_applies_backpressure() {
        let (publisher, mut partitions) = bucket_channel(1, 1);
        let command_id = CommandId::new();
        publisher.publish(bucket(command_id, 0)).await.unwrap();

        let blocked = tokio::time::timeout(
            std::time::Duration::from_millis(20),
            publisher.publish(bucket(command_id, 1)),
        )
        .await;
        assert!(blocked.is_err());

        partitions[0].recv().await.unwrap().ack();
        publisher.publish(bucket(command_id, 1)).await.unwrap();
    }
}
