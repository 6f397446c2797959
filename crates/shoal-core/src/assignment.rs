//! Deterministic shard-to-worker assignment.
//!
//! Every worker computes its own slice of the shard set from the same
//! sorted snapshot: worker `i` of `n` takes positions `i`, `i + n`,
//! `i + 2n`, … All workers must stride over an identical list for the
//! partition to be disjoint and complete, which is why callers feed this
//! from the coordination store's persisted snapshot rather than from a
//! live source query — a shared, possibly lagging view beats a fresh,
//! divergent one.

use crate::record::ShardId;

/// Selects the shards owned by `worker_index` out of `worker_count`.
///
/// `sorted_shard_ids` must be the externally agreed, lexicographically
/// sorted shard list. An empty result is valid — with more workers than
/// shards, high-indexed workers simply idle.
#[must_use]
pub fn assign(
    sorted_shard_ids: &[ShardId],
    worker_index: usize,
    worker_count: usize,
) -> Vec<ShardId> {
    debug_assert!(
        worker_count == 0 || worker_index < worker_count,
        "worker index {worker_index} out of range for {worker_count} workers"
    );
    if worker_count == 0 {
        return Vec::new();
    }
    sorted_shard_ids
        .iter()
        .skip(worker_index)
        .step_by(worker_count)
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(names: &[&str]) -> Vec<ShardId> {
        names.iter().map(|name| ShardId::new(*name)).collect()
    }

    #[test]
    fn test_strided_selection() {
        let shards = ids(&["a", "b", "c", "d", "e"]);
        assert_eq!(assign(&shards, 0, 2), ids(&["a", "c", "e"]));
        assert_eq!(assign(&shards, 1, 2), ids(&["b", "d"]));
    }

    #[test]
    fn test_partition_is_disjoint_and_complete() {
        let shards = ids(&["a", "b", "c", "d", "e", "f", "g"]);
        let mut union = Vec::new();
        for worker_index in 0..3 {
            union.extend(assign(&shards, worker_index, 3));
        }
        union.sort();
        assert_eq!(union, shards);
    }

    #[test]
    fn test_more_workers_than_shards() {
        let shards = ids(&["a", "b"]);
        assert_eq!(assign(&shards, 0, 4), ids(&["a"]));
        assert_eq!(assign(&shards, 1, 4), ids(&["b"]));
        assert!(assign(&shards, 2, 4).is_empty());
        assert!(assign(&shards, 3, 4).is_empty());
    }

    #[test]
    fn test_single_worker_takes_everything() {
        let shards = ids(&["a", "b", "c"]);
        assert_eq!(assign(&shards, 0, 1), shards);
    }

    #[test]
    fn test_empty_inputs() {
        assert!(assign(&[], 0, 2).is_empty());
        assert!(assign(&ids(&["a"]), 0, 0).is_empty());
    }
}
