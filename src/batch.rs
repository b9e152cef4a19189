//! # Batcher
//!
//! Slices a bucket into transactional batches. Batches borrow from the bucket,
//! cover it with no gaps or overlaps, and keep the original order.

use crate::bucket::Bucket;

/// One transactional unit of work within a bucket
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Batch<'a> {
    /// Position of the batch within its bucket
    pub index: usize,
    /// Offset of the first identifier within the bucket
    pub offset: usize,
    pub ids: &'a [String],
}

impl Batch<'_> {
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

/// Iterate the batches of `bucket`, each holding at most `batch_size` ids.
///
/// A `batch_size` of 0 is treated as 1; commands reaching the worker always
/// carry a validated size.
pub fn batches(bucket: &Bucket, batch_size: usize) -> impl Iterator<Item = Batch<'_>> {
    let batch_size = batch_size.max(1);
    bucket
        .ids
        .chunks(batch_size)
        .enumerate()
        .map(move |(index, ids)| Batch {
            index,
            offset: index * batch_size,
            ids,
        })
}

/// Number of batches a bucket of `bucket_len` ids splits into
pub fn batch_count(bucket_len: usize, batch_size: usize) -> usize {
    bucket_len.div_ceil(batch_size.max(1))
}
