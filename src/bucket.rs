//! # Bucketizer
//!
//! Groups scrolled record identifiers into fixed-size buckets, the unit of
//! transport on the bucket channel. Every bucket but the last of a command holds
//! exactly `bucket_size` identifiers and carries a 0-based sequence number.

use serde::{Deserialize, Serialize};

use crate::command::CommandId;
use crate::error::{BulkError, Result};

/// Ordered chunk of record identifiers belonging to one command
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bucket {
    pub command_id: CommandId,
    /// Position of this bucket among the buckets of its command
    pub sequence: u64,
    pub ids: Vec<String>,
}

impl Bucket {
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

/// Streaming bucketizer for one command.
///
/// Identifiers are fed in scroll order with [`push`](Self::push), which returns
/// the buckets that became full. [`finish`](Self::finish) flushes the short
/// trailing bucket, if any.
#[derive(Debug)]
pub struct Bucketizer {
    command_id: CommandId,
    bucket_size: usize,
    next_sequence: u64,
    pending: Vec<String>,
}

impl Bucketizer {
    pub fn new(command_id: CommandId, bucket_size: usize) -> Result<Self> {
        if bucket_size == 0 {
            return Err(BulkError::configuration("Invalid bucket size, must be > 0"));
        }
        Ok(Self {
            command_id,
            bucket_size,
            next_sequence: 0,
            pending: Vec::with_capacity(bucket_size),
        })
    }

    pub fn push<I>(&mut self, ids: I) -> Vec<Bucket>
    where
        I: IntoIterator<Item = String>,
    {
        let mut full = Vec::new();
        for id in ids {
            self.pending.push(id);
            if self.pending.len() == self.bucket_size {
                full.push(self.emit());
            }
        }
        full
    }

    pub fn finish(mut self) -> Option<Bucket> {
        (!self.pending.is_empty()).then(|| self.emit())
    }

    /// Buckets emitted so far
    pub fn emitted(&self) -> u64 {
        self.next_sequence
    }

    /// Identifiers buffered for the next bucket
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    fn emit(&mut self) -> Bucket {
        let ids = std::mem::replace(&mut self.pending, Vec::with_capacity(self.bucket_size));
        let bucket = Bucket {
            command_id: self.command_id,
            sequence: self.next_sequence,
            ids,
        };
        self.next_sequence += 1;
        bucket
    }
}

/// Split a complete identifier sequence into buckets.
///
/// Produces `ceil(ids.len() / bucket_size)` buckets, none of them empty.
pub fn bucketize(command_id: CommandId, ids: Vec<String>, bucket_size: usize) -> Result<Vec<Bucket>> {
    let mut bucketizer = Bucketizer::new(command_id, bucket_size)?;
    let mut buckets = bucketizer.push(ids);
    buckets.extend(bucketizer.finish());
    Ok(buckets)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("doc-{i}")).collect()
    }

    #[test]
    fn test_bucketize_twenty_three_by_ten() {
        let command_id = CommandId::new();
        let buckets = bucketize(command_id, ids(23), 10).unwrap();

        let sizes: Vec<usize> = buckets.iter().map(Bucket::len).collect();
        assert_eq!(sizes, vec![10, 10, 3]);
        let sequences: Vec<u64> = buckets.iter().map(|b| b.sequence).collect();
        assert_eq!(sequences, vec![0, 1, 2]);
        assert!(buckets.iter().all(|b| b.command_id == command_id));
    }

    #[test]
    fn test_no_input_no_buckets() {
        assert!(bucketize(CommandId::new(), Vec::new(), 10).unwrap().is_empty());
    }

    #[test]
    fn test_exact_multiple_has_no_trailing_bucket() {
        let buckets = bucketize(CommandId::new(), ids(20), 10).unwrap();
        assert_eq!(buckets.len(), 2);
        assert!(buckets.iter().all(|b| b.len() == 10));
    }

    #[test]
    fn test_streaming_across_pushes() {
        let mut bucketizer = Bucketizer::new(CommandId::new(), 4).unwrap();
        assert!(bucketizer.push(ids(3)).is_empty());
        assert_eq!(bucketizer.pending(), 3);

        let full = bucketizer.push(vec!["a".to_string(), "b".to_string()]);
        assert_eq!(full.len(), 1);
        assert_eq!(full[0].ids, vec!["doc-0", "doc-1", "doc-2", "a"]);
        assert_eq!(bucketizer.emitted(), 1);

        let last = bucketizer.finish().unwrap();
        assert_eq!(last.sequence, 1);
        assert_eq!(last.ids, vec!["b"]);
    }

    #[test]
    fn test_zero_bucket_size_rejected() {
        assert!(Bucketizer::new(CommandId::new(), 0).is_err());
    }
}
