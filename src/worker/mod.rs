//! # Worker Pool
//!
//! Consumers of the bucket channel. Each partition has one consumer task that
//! hands every delivered bucket to the shared [`BucketExecutor`] and
//! acknowledges it once the executor is done with it, whether it ran or was
//! skipped. Buckets of one command share a partition, so they are executed in
//! publication order; different commands run in parallel.

mod executor;
mod pool;

pub use executor::{BucketExecutor, BucketOutcome};
pub use pool::{ConsumerSummary, WorkerPool};
