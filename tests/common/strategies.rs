use proptest::prelude::*;

/// Strategy for record identifier sequences
pub fn record_ids_strategy(max_len: usize) -> impl Strategy<Value = Vec<String>> {
    prop::collection::vec("[a-z0-9]{1,12}", 0..max_len)
}

/// Strategy for `(bucket_size, batch_size)` with `bucket_size >= batch_size > 0`
pub fn valid_sizes_strategy() -> impl Strategy<Value = (usize, usize)> {
    (1usize..200).prop_flat_map(|bucket| (Just(bucket), 1..=bucket))
}

/// Strategy for `(bucket_size, batch_size)` with `batch_size > bucket_size > 0`
pub fn invalid_sizes_strategy() -> impl Strategy<Value = (usize, usize)> {
    (1usize..200).prop_flat_map(|bucket| (Just(bucket), (bucket + 1)..(bucket + 200)))
}

/// Strategy for `(total, reports)`: batch reports covering a scroll of `total`
/// ids, in an arbitrary order
pub fn shuffled_reports_strategy() -> impl Strategy<Value = (u64, Vec<(u64, u64)>)> {
    (1u64..400, 1u64..40, 0usize..5).prop_flat_map(|(total, batch, error_every)| {
        (Just(total), Just(batch_reports(total, batch, error_every)).prop_shuffle())
    })
}

/// Split `total` into batch reports `(processed, errors)` of at most `batch`
/// ids; every `error_every`-th report fails entirely when non-zero
pub fn batch_reports(total: u64, batch: u64, error_every: usize) -> Vec<(u64, u64)> {
    let mut reports = Vec::new();
    let mut remaining = total;
    while remaining > 0 {
        let size = remaining.min(batch);
        let errors = if error_every > 0 && (reports.len() + 1) % error_every == 0 {
            size
        } else {
            0
        };
        reports.push((size, errors));
        remaining -= size;
    }
    reports
}
