//! Shard lineage tracking across splits and merges.
//!
//! Shard topology forms an immutable DAG: a split gives one parent two
//! children, a merge gives one child two parents, and a shard with any
//! children is closed (no further records will be appended to it, though
//! pending reads must still drain it). Lineage is advisory — it informs
//! reshard reactions but never gates checkpoint safety — so malformed
//! updates are logged and dropped rather than surfaced as errors.

use std::collections::HashMap;

use tracing::warn;

use crate::record::ShardId;

#[derive(Debug, Clone, Default)]
struct ShardRelations {
    parents: Vec<ShardId>,
    children: Vec<ShardId>,
}

/// Parent/child relationships between the shards of one stream.
#[derive(Debug, Clone, Default)]
pub struct ShardLineage {
    relations: HashMap<ShardId, ShardRelations>,
}

impl ShardLineage {
    /// Creates an empty lineage graph.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a shard with no lineage edges yet.
    pub fn observe_shard(&mut self, shard_id: ShardId) {
        self.relations.entry(shard_id).or_default();
    }

    /// Records that `parent` split and produced `child`.
    ///
    /// Unknown parents indicate a malformed topology update and are
    /// ignored after a warning.
    pub fn record_split(&mut self, parent: &ShardId, child: ShardId) {
        if !self.relations.contains_key(parent) {
            warn!(parent = %parent, child = %child, "split references an unknown parent shard, ignoring");
            return;
        }
        self.link(parent, &child);
    }

    /// Records that `parent_a` and `parent_b` merged into `child`.
    ///
    /// Both parents must already be known; otherwise the whole update is
    /// ignored after a warning.
    pub fn record_merge(&mut self, parent_a: &ShardId, parent_b: &ShardId, child: ShardId) {
        if !self.relations.contains_key(parent_a) || !self.relations.contains_key(parent_b) {
            warn!(
                parent_a = %parent_a,
                parent_b = %parent_b,
                child = %child,
                "merge references an unknown parent shard, ignoring"
            );
            return;
        }
        self.link(parent_a, &child);
        self.link(parent_b, &child);
    }

    /// Direct parents of a shard: empty for roots and unknown shards, one
    /// entry for a split child, two for a merge child.
    #[must_use]
    pub fn parents(&self, shard_id: &ShardId) -> &[ShardId] {
        self.relations
            .get(shard_id)
            .map_or(&[], |r| r.parents.as_slice())
    }

    /// Direct children of a shard.
    #[must_use]
    pub fn children(&self, shard_id: &ShardId) -> &[ShardId] {
        self.relations
            .get(shard_id)
            .map_or(&[], |r| r.children.as_slice())
    }

    /// A shard is closed once it has children.
    #[must_use]
    pub fn is_closed(&self, shard_id: &ShardId) -> bool {
        !self.children(shard_id).is_empty()
    }

    /// Number of shards known to the graph.
    #[must_use]
    pub fn len(&self) -> usize {
        self.relations.len()
    }

    /// Returns `true` if no shards are known.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.relations.is_empty()
    }

    /// Adds the parent→child edge in both directions, idempotently —
    /// topology updates may be replayed.
    fn link(&mut self, parent: &ShardId, child: &ShardId) {
        if let Some(relations) = self.relations.get_mut(parent) {
            if !relations.children.contains(child) {
                relations.children.push(child.clone());
            }
        }
        let child_relations = self.relations.entry(child.clone()).or_default();
        if !child_relations.parents.contains(parent) {
            child_relations.parents.push(parent.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shard(id: &str) -> ShardId {
        ShardId::new(id)
    }

    #[test]
    fn test_split_records_both_directions() {
        let mut lineage = ShardLineage::new();
        lineage.observe_shard(shard("p"));
        lineage.record_split(&shard("p"), shard("c1"));
        lineage.record_split(&shard("p"), shard("c2"));

        assert_eq!(lineage.children(&shard("p")), &[shard("c1"), shard("c2")]);
        assert_eq!(lineage.parents(&shard("c1")), &[shard("p")]);
        assert_eq!(lineage.parents(&shard("c2")), &[shard("p")]);
        assert!(lineage.is_closed(&shard("p")));
        assert!(!lineage.is_closed(&shard("c1")));
    }

    #[test]
    fn test_merge_records_two_parents() {
        let mut lineage = ShardLineage::new();
        lineage.observe_shard(shard("a"));
        lineage.observe_shard(shard("b"));
        lineage.record_merge(&shard("a"), &shard("b"), shard("m"));

        assert_eq!(lineage.parents(&shard("m")), &[shard("a"), shard("b")]);
        assert_eq!(lineage.children(&shard("a")), &[shard("m")]);
        assert_eq!(lineage.children(&shard("b")), &[shard("m")]);
        assert!(lineage.is_closed(&shard("a")));
        assert!(lineage.is_closed(&shard("b")));
    }

    #[test]
    fn test_unknown_parent_is_ignored() {
        let mut lineage = ShardLineage::new();
        lineage.record_split(&shard("ghost"), shard("c"));
        assert!(lineage.is_empty());

        lineage.observe_shard(shard("a"));
        lineage.record_merge(&shard("a"), &shard("ghost"), shard("m"));
        assert!(lineage.children(&shard("a")).is_empty());
        assert!(lineage.parents(&shard("m")).is_empty());
    }

    #[test]
    fn test_replayed_updates_are_idempotent() {
        let mut lineage = ShardLineage::new();
        lineage.observe_shard(shard("p"));
        lineage.record_split(&shard("p"), shard("c"));
        lineage.record_split(&shard("p"), shard("c"));

        assert_eq!(lineage.children(&shard("p")), &[shard("c")]);
        assert_eq!(lineage.parents(&shard("c")), &[shard("p")]);
    }

    #[test]
    fn test_unknown_shard_queries_are_empty() {
        let lineage = ShardLineage::new();
        assert!(lineage.parents(&shard("x")).is_empty());
        assert!(lineage.children(&shard("x")).is_empty());
        assert!(!lineage.is_closed(&shard("x")));
    }
}
