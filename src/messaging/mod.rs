//! # Messaging Module
//!
//! Bucket transport between the dispatcher and the worker pool. Buckets are
//! keyed by command id onto a fixed set of bounded partitions, which gives one
//! delivery order per command and backpressure on the publisher.

pub mod bucket_channel;

pub use bucket_channel::{
    bucket_channel, BucketPublisher, ChannelStats, ChannelStatsSnapshot, Delivery,
    PartitionReceiver,
};
