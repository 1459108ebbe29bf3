//! Batch eviction for the bounded per-user maps.

use dashmap::DashMap;
use herald_core::types::DbId;
use tokio::time::Instant;

/// A full map drops this fraction (1/N) of its capacity per pass.
const BATCH_DIVISOR: usize = 10;

/// Number of entries one pass removes from a map bounded at `capacity`.
pub(crate) fn batch_size(capacity: usize) -> usize {
    (capacity / BATCH_DIVISOR).max(1)
}

/// Drop the `batch_size(capacity)` oldest entries of `map`, as ranked by
/// `stamp`. Returns the number removed.
///
/// One pass is a single scan plus a selection, so a map that stays full pays
/// it once every `batch_size` inserts rather than on every insert.
pub(crate) fn evict_oldest<V>(
    map: &DashMap<DbId, V>,
    capacity: usize,
    stamp: impl Fn(&V) -> Instant,
) -> usize {
    let mut ages: Vec<(Instant, DbId)> = map
        .iter()
        .map(|entry| (stamp(entry.value()), *entry.key()))
        .collect();
    let batch = batch_size(capacity).min(ages.len());
    if batch == 0 {
        return 0;
    }

    ages.select_nth_unstable(batch - 1);
    ages[..batch]
        .iter()
        .filter(|(_, user_id)| map.remove(user_id).is_some())
        .count()
}
