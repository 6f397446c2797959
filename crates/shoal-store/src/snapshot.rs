//! The persisted shard-list document.
//!
//! One document per stream lives at the store's shard-list key: the sorted
//! set of shard ids, each annotated with its lineage edges in the source's
//! native form — a split child names one parent, a merge child names a
//! parent and an adjacent parent. Every worker derives its assignment from
//! this document rather than from a live source query, so all workers
//! stride over the same view even when it lags the true topology.

use serde::{Deserialize, Serialize};

use shoal_core::{ShardId, ShardLineage};

/// One shard's entry in the persisted list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardListEntry {
    /// The shard id.
    pub shard_id: ShardId,
    /// Parent shard, present for split and merge children.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<ShardId>,
    /// Second parent, present only for merge children.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub adjacent_parent: Option<ShardId>,
}

impl ShardListEntry {
    /// Entry for a root shard (no lineage).
    #[must_use]
    pub fn root(shard_id: impl Into<ShardId>) -> Self {
        Self {
            shard_id: shard_id.into(),
            parent: None,
            adjacent_parent: None,
        }
    }

    /// Entry for a shard produced by a split.
    #[must_use]
    pub fn split_child(shard_id: impl Into<ShardId>, parent: impl Into<ShardId>) -> Self {
        Self {
            shard_id: shard_id.into(),
            parent: Some(parent.into()),
            adjacent_parent: None,
        }
    }

    /// Entry for a shard produced by a merge of two parents.
    #[must_use]
    pub fn merge_child(
        shard_id: impl Into<ShardId>,
        parent: impl Into<ShardId>,
        adjacent_parent: impl Into<ShardId>,
    ) -> Self {
        Self {
            shard_id: shard_id.into(),
            parent: Some(parent.into()),
            adjacent_parent: Some(adjacent_parent.into()),
        }
    }

    /// Returns `true` if this entry carries any lineage annotation.
    #[must_use]
    pub fn has_lineage(&self) -> bool {
        self.parent.is_some()
    }
}

/// A consistent snapshot of a stream's shard set, sorted by shard id.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardListSnapshot {
    entries: Vec<ShardListEntry>,
}

impl ShardListSnapshot {
    /// Builds a snapshot, sorting entries and dropping duplicate ids
    /// (the first occurrence wins).
    #[must_use]
    pub fn new(mut entries: Vec<ShardListEntry>) -> Self {
        entries.sort_by(|a, b| a.shard_id.cmp(&b.shard_id));
        entries.dedup_by(|a, b| a.shard_id == b.shard_id);
        Self { entries }
    }

    /// Convenience constructor for lineage-free shard sets.
    #[must_use]
    pub fn from_ids(ids: impl IntoIterator<Item = impl Into<ShardId>>) -> Self {
        Self::new(ids.into_iter().map(ShardListEntry::root).collect())
    }

    /// The sorted entries.
    #[must_use]
    pub fn entries(&self) -> &[ShardListEntry] {
        &self.entries
    }

    /// The sorted shard ids, cloned for assignment computation.
    #[must_use]
    pub fn shard_ids(&self) -> Vec<ShardId> {
        self.entries.iter().map(|e| e.shard_id.clone()).collect()
    }

    /// Returns `true` if the snapshot contains `shard_id`.
    #[must_use]
    pub fn contains(&self, shard_id: &ShardId) -> bool {
        self.entries
            .binary_search_by(|e| e.shard_id.cmp(shard_id))
            .is_ok()
    }

    /// Number of shards in the snapshot.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if the snapshot is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Merges `other` into this snapshot, keeping sort order.
    ///
    /// Shards unknown to `self` are added; for shards present in both, a
    /// lineage annotation from `other` fills in a missing one here (the
    /// source may discover a shard before its relationships). Returns
    /// `true` if anything changed.
    pub fn merge(&mut self, other: &Self) -> bool {
        let mut changed = false;
        for entry in &other.entries {
            match self
                .entries
                .binary_search_by(|e| e.shard_id.cmp(&entry.shard_id))
            {
                Ok(index) => {
                    if !self.entries[index].has_lineage() && entry.has_lineage() {
                        self.entries[index] = entry.clone();
                        changed = true;
                    }
                }
                Err(index) => {
                    self.entries.insert(index, entry.clone());
                    changed = true;
                }
            }
        }
        changed
    }

    /// Records every annotated lineage edge into `lineage`.
    ///
    /// All shards are registered first so edges resolve regardless of the
    /// order parents and children sort in.
    pub fn apply_lineage(&self, lineage: &mut ShardLineage) {
        for entry in &self.entries {
            lineage.observe_shard(entry.shard_id.clone());
        }
        for entry in &self.entries {
            match (&entry.parent, &entry.adjacent_parent) {
                (Some(parent), Some(adjacent)) => {
                    lineage.record_merge(parent, adjacent, entry.shard_id.clone());
                }
                (Some(parent), None) => {
                    lineage.record_split(parent, entry.shard_id.clone());
                }
                _ => {}
            }
        }
    }
}
