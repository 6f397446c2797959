//! Per-shard in-flight record tracking and checkpoint computation.
//!
//! [`InflightTracker`] owns every record that has been emitted to the host
//! but not yet settled (acknowledged or evicted) for a single shard.
//! Acknowledgements and failures arrive asynchronously and out of emission
//! order; the tracker's job is to compute, at any point, the highest
//! sequence number whose entire emission prefix is settled — the only
//! position that is safe to persist as the shard's checkpoint.
//!
//! Records live in an index-addressed doubly linked list ordered by
//! emission: a slab of slots with explicit `prev`/`next` indices, a free
//! list for reuse, and a sequence-number → slot map for O(1) routing of
//! acks and fails. Settling a record marks its node acked and then compacts
//! the list prefix: every leading acked node advances the checkpoint to its
//! sequence number and is unlinked, stopping at the first pending node. An
//! ack behind a gap therefore parks in place until the gap closes, and each
//! node is visited exactly once on its way out.
//!
//! Failed records queue for re-emission until the retry budget is spent;
//! after that a further failure evicts the record as poison, settled
//! exactly as if it had been acknowledged. That trades completeness for
//! liveness within the at-least-once contract: a permanently failing
//! record cannot pin the checkpoint forever.

use std::collections::VecDeque;

use rustc_hash::FxHashMap;
use tracing::{debug, error, trace};

use crate::record::{Record, ShardId};
use crate::retry::RetryPolicy;
use crate::sequence::SequenceNumber;

/// How a failure notification was handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailDisposition {
    /// The record was queued for re-emission.
    Queued,
    /// The retry budget was exhausted: the record was evicted as poison
    /// and settled as if acknowledged.
    Evicted,
    /// The sequence number is unknown or already settled; nothing to do.
    Ignored,
}

/// One in-flight record: the record itself, its retry budget consumption,
/// and its settle state, linked into emission order by slot index.
#[derive(Debug)]
struct RecordNode {
    record: Record,
    retry_count: u32,
    acked: bool,
    prev: Option<usize>,
    next: Option<usize>,
}

/// Slab-backed doubly linked list of [`RecordNode`]s in emission order.
#[derive(Debug, Default)]
struct NodeList {
    slots: Vec<Option<RecordNode>>,
    free: Vec<usize>,
    head: Option<usize>,
    tail: Option<usize>,
    len: usize,
}

impl NodeList {
    fn push_back(&mut self, record: Record) -> usize {
        let node = RecordNode {
            record,
            retry_count: 0,
            acked: false,
            prev: self.tail,
            next: None,
        };
        let slot = match self.free.pop() {
            Some(slot) => {
                self.slots[slot] = Some(node);
                slot
            }
            None => {
                self.slots.push(Some(node));
                self.slots.len() - 1
            }
        };
        if let Some(tail) = self.tail {
            if let Some(tail_node) = self.get_mut(tail) {
                tail_node.next = Some(slot);
            }
        } else {
            self.head = Some(slot);
        }
        self.tail = Some(slot);
        self.len += 1;
        slot
    }

    /// Removes the node at `slot`, stitching its neighbours together.
    fn unlink(&mut self, slot: usize) -> Option<RecordNode> {
        let node = self.slots.get_mut(slot)?.take()?;
        match node.prev {
            Some(prev) => {
                if let Some(prev_node) = self.get_mut(prev) {
                    prev_node.next = node.next;
                }
            }
            None => self.head = node.next,
        }
        match node.next {
            Some(next) => {
                if let Some(next_node) = self.get_mut(next) {
                    next_node.prev = node.prev;
                }
            }
            None => self.tail = node.prev,
        }
        self.free.push(slot);
        self.len -= 1;
        Some(node)
    }

    fn get(&self, slot: usize) -> Option<&RecordNode> {
        self.slots.get(slot).and_then(Option::as_ref)
    }

    fn get_mut(&mut self, slot: usize) -> Option<&mut RecordNode> {
        self.slots.get_mut(slot).and_then(Option::as_mut)
    }

    fn head(&self) -> Option<usize> {
        self.head
    }

    fn len(&self) -> usize {
        self.len
    }
}

/// Tracks the in-flight window of a single shard.
#[derive(Debug)]
pub struct InflightTracker {
    shard_id: ShardId,
    nodes: NodeList,
    slots_by_sequence: FxHashMap<SequenceNumber, usize>,
    retry_queue: VecDeque<SequenceNumber>,
    checkpoint: SequenceNumber,
    dirty: bool,
    policy: RetryPolicy,
}

impl InflightTracker {
    /// Creates a tracker resuming from `checkpoint` — the last committed
    /// position, or the numeric zero for a shard never checkpointed.
    #[must_use]
    pub fn new(shard_id: ShardId, checkpoint: SequenceNumber, policy: RetryPolicy) -> Self {
        Self {
            shard_id,
            nodes: NodeList::default(),
            slots_by_sequence: FxHashMap::default(),
            retry_queue: VecDeque::new(),
            checkpoint,
            dirty: false,
            policy,
        }
    }

    /// The shard this tracker belongs to.
    #[must_use]
    pub fn shard_id(&self) -> &ShardId {
        &self.shard_id
    }

    /// Registers an emission.
    ///
    /// A first-time emission appends a node at the tail; sequence numbers
    /// arrive in increasing order within a shard, so emission order and
    /// sequence order coincide. A retry emission consumes the pending
    /// retry-queue entry and bumps the node's retry counter instead.
    /// Re-emissions of settled or unknown sequence numbers are no-ops.
    pub fn on_emit(&mut self, record: Record, is_retry: bool) {
        let sequence = record.sequence_number().clone();
        match self.slots_by_sequence.get(&sequence).copied() {
            Some(slot) => {
                if !is_retry {
                    debug!(shard = %self.shard_id, sequence = %sequence,
                        "duplicate emission of a tracked sequence number, ignoring");
                    return;
                }
                self.drop_from_retry_queue(&sequence);
                let Some(node) = self.nodes.get_mut(slot) else {
                    return;
                };
                if node.acked {
                    debug!(shard = %self.shard_id, sequence = %sequence,
                        "retry emission for an already settled record, ignoring");
                    return;
                }
                node.retry_count += 1;
                let retries = node.retry_count;
                trace!(shard = %self.shard_id, sequence = %sequence, retries, "record re-emitted");
                if retries > self.policy.limit() {
                    error!(shard = %self.shard_id, sequence = %sequence, retries,
                        "record re-emitted past its retry budget, evicting as poison");
                    self.settle(slot);
                }
            }
            None => {
                if is_retry {
                    debug!(shard = %self.shard_id, sequence = %sequence,
                        "retry emission for an evicted record, ignoring");
                    return;
                }
                debug_assert!(
                    sequence > self.checkpoint,
                    "emission at or behind the checkpoint: {sequence} <= {}",
                    self.checkpoint
                );
                let slot = self.nodes.push_back(record);
                self.slots_by_sequence.insert(sequence, slot);
            }
        }
    }

    /// Acknowledges a record.
    ///
    /// Unknown sequence numbers (already compacted away, or duplicate
    /// acks) are ignored.
    pub fn on_ack(&mut self, sequence: &SequenceNumber) {
        match self.slots_by_sequence.get(sequence).copied() {
            Some(slot) => self.settle(slot),
            None => {
                debug!(shard = %self.shard_id, sequence = %sequence,
                    "ack for an untracked sequence number, ignoring");
            }
        }
    }

    /// Registers a delivery failure.
    ///
    /// Queues the record for re-emission while budget remains; once the
    /// budget is spent the record is evicted as poison. Failures for
    /// unknown or already acknowledged records are ignored.
    pub fn on_fail(&mut self, sequence: &SequenceNumber) -> FailDisposition {
        let Some(slot) = self.slots_by_sequence.get(sequence).copied() else {
            debug!(shard = %self.shard_id, sequence = %sequence,
                "failure for an untracked sequence number, ignoring");
            return FailDisposition::Ignored;
        };
        let Some(node) = self.nodes.get(slot) else {
            return FailDisposition::Ignored;
        };
        if node.acked {
            debug!(shard = %self.shard_id, sequence = %sequence,
                "failure for an acknowledged record, ignoring");
            return FailDisposition::Ignored;
        }
        if self.policy.should_evict(node.retry_count) {
            error!(shard = %self.shard_id, sequence = %sequence,
                retries = node.retry_count, limit = self.policy.limit(),
                "retry budget exhausted, evicting poison record");
            self.settle(slot);
            return FailDisposition::Evicted;
        }
        if !self.retry_queue.contains(sequence) {
            self.retry_queue.push_back(sequence.clone());
        }
        FailDisposition::Queued
    }

    /// Returns `true` if a failed record is waiting for re-emission.
    #[must_use]
    pub fn should_retry(&self) -> bool {
        !self.retry_queue.is_empty()
    }

    /// Dequeues the next retry candidate.
    ///
    /// The caller must re-emit the returned record via
    /// `on_emit(record, true)`. Returns `None` when nothing is queued;
    /// entries whose records settled while queued are skipped.
    pub fn record_to_retry(&mut self) -> Option<Record> {
        while let Some(sequence) = self.retry_queue.pop_front() {
            let Some(slot) = self.slots_by_sequence.get(&sequence).copied() else {
                continue;
            };
            if let Some(node) = self.nodes.get(slot) {
                if !node.acked {
                    return Some(node.record.clone());
                }
            }
        }
        None
    }

    /// The highest sequence number with a fully settled emission prefix.
    #[must_use]
    pub fn checkpoint(&self) -> &SequenceNumber {
        &self.checkpoint
    }

    /// Returns `true` if the checkpoint advanced since the last
    /// [`clear_dirty`](Self::clear_dirty).
    #[must_use]
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Marks the current checkpoint as durably committed.
    pub fn clear_dirty(&mut self) {
        self.dirty = false;
    }

    /// Number of in-flight records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Returns `true` if no records are in flight.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.len() == 0
    }

    /// Marks the node settled and compacts the acked prefix.
    fn settle(&mut self, slot: usize) {
        if let Some(node) = self.nodes.get_mut(slot) {
            node.acked = true;
        }
        self.compact_prefix();
    }

    /// Unlinks leading acked nodes, advancing the checkpoint past each.
    /// The walk stops at the first pending node: a gap in acknowledgements
    /// blocks the checkpoint, never individual node removal elsewhere.
    fn compact_prefix(&mut self) {
        let mut advanced = false;
        while let Some(head) = self.nodes.head() {
            if !self.nodes.get(head).is_some_and(|node| node.acked) {
                break;
            }
            let Some(node) = self.nodes.unlink(head) else {
                break;
            };
            self.slots_by_sequence.remove(node.record.sequence_number());
            self.checkpoint = node.record.sequence_number().clone();
            advanced = true;
        }
        if advanced {
            self.dirty = true;
            trace!(shard = %self.shard_id, checkpoint = %self.checkpoint, "checkpoint advanced");
        }
    }

    fn drop_from_retry_queue(&mut self, sequence: &SequenceNumber) {
        if let Some(position) = self.retry_queue.iter().position(|queued| queued == sequence) {
            self.retry_queue.remove(position);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RETRY_LIMIT: u32 = 3;

    fn tracker() -> InflightTracker {
        InflightTracker::new(
            ShardId::new("shard-0"),
            SequenceNumber::new("000"),
            RetryPolicy::new(RETRY_LIMIT),
        )
    }

    fn record(sequence: &str) -> Record {
        Record::new(sequence, "test-key", bytes::Bytes::new())
    }

    fn emit_all(tracker: &mut InflightTracker, sequences: &[&str]) {
        for sequence in sequences {
            tracker.on_emit(record(sequence), false);
        }
    }

    fn ack(tracker: &mut InflightTracker, sequence: &str) {
        tracker.on_ack(&SequenceNumber::new(sequence));
    }

    fn fail(tracker: &mut InflightTracker, sequence: &str) -> FailDisposition {
        tracker.on_fail(&SequenceNumber::new(sequence))
    }

    /// Walks the whole structure checking the documented invariants:
    /// map and list agree, links are consistent, sequence numbers increase
    /// front to back, and everything tracked is ahead of the checkpoint.
    fn assert_invariants(tracker: &InflightTracker) {
        assert_eq!(tracker.slots_by_sequence.len(), tracker.nodes.len());
        let mut cursor = tracker.nodes.head();
        let mut previous: Option<usize> = None;
        let mut previous_sequence: Option<SequenceNumber> = None;
        let mut visited = 0;
        while let Some(slot) = cursor {
            let node = tracker.nodes.get(slot).expect("linked slot must be live");
            assert_eq!(node.prev, previous);
            assert_eq!(tracker.slots_by_sequence.get(node.record.sequence_number()), Some(&slot));
            assert!(*node.record.sequence_number() > tracker.checkpoint);
            if let Some(ref prev_seq) = previous_sequence {
                assert!(node.record.sequence_number() > prev_seq);
            }
            previous_sequence = Some(node.record.sequence_number().clone());
            previous = Some(slot);
            cursor = node.next;
            visited += 1;
        }
        assert_eq!(visited, tracker.nodes.len());
        assert_eq!(tracker.nodes.tail, previous);
    }

    #[test]
    fn test_checkpoint_progression_with_gaps_and_poison() {
        let mut t = tracker();
        assert_eq!(t.checkpoint().as_str(), "000");

        emit_all(&mut t, &["1", "2", "3", "4"]);
        assert_eq!(t.checkpoint().as_str(), "000");

        fail(&mut t, "1");
        assert_eq!(t.checkpoint().as_str(), "000");
        ack(&mut t, "1");
        assert_eq!(t.checkpoint().as_str(), "1");
        ack(&mut t, "3");
        assert_eq!(t.checkpoint().as_str(), "1");

        // Burn record 2's retry budget without ever acking it.
        for _ in 0..RETRY_LIMIT {
            assert_eq!(fail(&mut t, "2"), FailDisposition::Queued);
            let retry = t.record_to_retry().expect("retry queued");
            t.on_emit(retry, true);
            assert_eq!(t.checkpoint().as_str(), "1");
        }
        // The next failure is poison: settled like an ack, so the prefix
        // 2-3 compacts and the checkpoint jumps over both.
        assert_eq!(fail(&mut t, "2"), FailDisposition::Evicted);
        assert_eq!(t.checkpoint().as_str(), "3");

        ack(&mut t, "4");
        assert_eq!(t.checkpoint().as_str(), "4");
        assert!(t.is_empty());
        assert_invariants(&t);
    }

    #[test]
    fn test_emit_tracks_new_record() {
        let mut t = tracker();
        t.on_emit(record("1"), false);

        assert_eq!(t.len(), 1);
        assert!(!t.should_retry());
        assert!(!t.is_dirty());
        assert_invariants(&t);
    }

    #[test]
    fn test_duplicate_emit_is_ignored() {
        let mut t = tracker();
        t.on_emit(record("1"), false);
        t.on_emit(record("1"), false);

        assert_eq!(t.len(), 1);
        assert_invariants(&t);
    }

    #[test]
    fn test_ack_single_record_compacts() {
        let mut t = tracker();
        t.on_emit(record("1"), false);
        ack(&mut t, "1");

        assert!(t.is_empty());
        assert_eq!(t.checkpoint().as_str(), "1");
        assert!(t.is_dirty());
        assert_invariants(&t);
    }

    #[test]
    fn test_ack_behind_gap_parks_until_gap_closes() {
        let mut t = tracker();
        emit_all(&mut t, &["1", "2", "3"]);

        ack(&mut t, "2");
        assert_eq!(t.checkpoint().as_str(), "000");
        assert_eq!(t.len(), 3);
        assert!(!t.is_dirty());

        ack(&mut t, "1");
        assert_eq!(t.checkpoint().as_str(), "2");
        assert_eq!(t.len(), 1);
        assert!(t.is_dirty());
        assert_invariants(&t);
    }

    #[test]
    fn test_double_ack_is_idempotent() {
        let mut t = tracker();
        emit_all(&mut t, &["1", "2"]);
        ack(&mut t, "2");
        ack(&mut t, "2");
        assert_eq!(t.checkpoint().as_str(), "000");
        assert_eq!(t.len(), 2);

        ack(&mut t, "1");
        ack(&mut t, "1");
        assert_eq!(t.checkpoint().as_str(), "2");
        assert!(t.is_empty());
        assert_invariants(&t);
    }

    #[test]
    fn test_fail_queues_for_retry_round_trip() {
        let mut t = tracker();
        t.on_emit(record("1"), false);
        assert_eq!(fail(&mut t, "1"), FailDisposition::Queued);

        assert!(t.should_retry());
        let retry = t.record_to_retry().expect("queued record");
        assert_eq!(retry.sequence_number().as_str(), "1");
        assert!(!t.should_retry());

        // Still tracked, not settled: only an ack or eviction removes it.
        t.on_emit(retry, true);
        assert_eq!(t.len(), 1);
        assert_eq!(t.checkpoint().as_str(), "000");
        assert_invariants(&t);
    }

    #[test]
    fn test_fail_unknown_or_acked_is_noop() {
        let mut t = tracker();
        assert_eq!(fail(&mut t, "9"), FailDisposition::Ignored);

        emit_all(&mut t, &["1", "2"]);
        ack(&mut t, "2");
        // Acked-but-parked record: a late failure must not resurrect it.
        assert_eq!(fail(&mut t, "2"), FailDisposition::Ignored);
        assert!(!t.should_retry());

        ack(&mut t, "1");
        // Fully compacted record: same story.
        assert_eq!(fail(&mut t, "1"), FailDisposition::Ignored);
        assert_eq!(t.checkpoint().as_str(), "2");
        assert_invariants(&t);
    }

    #[test]
    fn test_duplicate_fail_queues_once() {
        let mut t = tracker();
        t.on_emit(record("1"), false);
        fail(&mut t, "1");
        fail(&mut t, "1");

        assert!(t.record_to_retry().is_some());
        assert!(t.record_to_retry().is_none());
    }

    #[test]
    fn test_poison_pill_lifecycle() {
        let mut t = tracker();
        t.on_emit(record("1"), false);

        for expected_retries in 1..=RETRY_LIMIT {
            assert_eq!(fail(&mut t, "1"), FailDisposition::Queued);
            let retry = t.record_to_retry().expect("retry queued");
            t.on_emit(retry, true);
            assert_eq!(t.len(), 1);
            let slot = t.slots_by_sequence[&SequenceNumber::new("1")];
            assert_eq!(t.nodes.get(slot).unwrap().retry_count, expected_retries);
        }

        assert_eq!(fail(&mut t, "1"), FailDisposition::Evicted);
        assert!(t.is_empty());
        assert!(!t.should_retry());
        assert_eq!(t.checkpoint().as_str(), "1");

        // A straggling retry emission after eviction changes nothing.
        t.on_emit(record("1"), true);
        assert!(t.is_empty());
        assert!(!t.should_retry());
        assert_invariants(&t);
    }

    #[test]
    fn test_zero_retry_limit_evicts_on_first_failure() {
        let mut t = InflightTracker::new(
            ShardId::new("shard-0"),
            SequenceNumber::new("0"),
            RetryPolicy::new(0),
        );
        t.on_emit(record("1"), false);
        assert_eq!(t.on_fail(&SequenceNumber::new("1")), FailDisposition::Evicted);
        assert!(t.is_empty());
        assert_eq!(t.checkpoint().as_str(), "1");
    }

    #[test]
    fn test_retry_candidate_skips_settled_entries() {
        let mut t = tracker();
        emit_all(&mut t, &["1", "2"]);
        fail(&mut t, "1");
        fail(&mut t, "2");
        ack(&mut t, "1");

        // "1" settled while queued; the next candidate must be "2".
        let retry = t.record_to_retry().expect("one live candidate");
        assert_eq!(retry.sequence_number().as_str(), "2");
        assert!(t.record_to_retry().is_none());
    }

    #[test]
    fn test_numeric_ordering_across_width_change() {
        let mut t = tracker();
        emit_all(&mut t, &["99", "100"]);

        ack(&mut t, "100");
        assert_eq!(t.checkpoint().as_str(), "000");

        ack(&mut t, "99");
        assert_eq!(t.checkpoint().as_str(), "100");
        assert!(t.is_empty());
        assert_invariants(&t);
    }

    #[test]
    fn test_every_ack_permutation_converges_to_the_tail() {
        fn permutations(items: &mut Vec<&'static str>, k: usize, out: &mut Vec<Vec<&'static str>>) {
            if k == items.len() {
                out.push(items.clone());
                return;
            }
            for i in k..items.len() {
                items.swap(k, i);
                permutations(items, k + 1, out);
                items.swap(k, i);
            }
        }

        let mut orders = Vec::new();
        permutations(&mut vec!["1", "2", "3", "4"], 0, &mut orders);
        assert_eq!(orders.len(), 24);

        for order in orders {
            let mut t = tracker();
            emit_all(&mut t, &["1", "2", "3", "4"]);
            for (index, sequence) in order.iter().enumerate() {
                ack(&mut t, sequence);
                // The checkpoint never passes an emitted-but-unacked record.
                for unacked in &order[index + 1..] {
                    assert!(
                        *t.checkpoint() < SequenceNumber::new(*unacked),
                        "order {order:?}: checkpoint {} passed unacked {unacked}",
                        t.checkpoint()
                    );
                }
                assert_invariants(&t);
            }
            assert_eq!(t.checkpoint().as_str(), "4", "order {order:?}");
            assert!(t.is_empty());
        }
    }

    #[test]
    fn test_slot_reuse_after_compaction() {
        let mut t = tracker();
        emit_all(&mut t, &["1", "2", "3"]);
        ack(&mut t, "1");
        ack(&mut t, "2");

        // Two slots were freed; new emissions must reuse them.
        emit_all(&mut t, &["4", "5"]);
        assert_eq!(t.nodes.slots.len(), 3);
        assert_eq!(t.len(), 3);

        ack(&mut t, "3");
        ack(&mut t, "4");
        ack(&mut t, "5");
        assert_eq!(t.checkpoint().as_str(), "5");
        assert!(t.is_empty());
        assert_invariants(&t);
    }

    #[test]
    fn test_dirty_flag_tracks_flush_cycle() {
        let mut t = tracker();
        t.on_emit(record("1"), false);
        assert!(!t.is_dirty());

        ack(&mut t, "1");
        assert!(t.is_dirty());

        t.clear_dirty();
        assert!(!t.is_dirty());
        assert_eq!(t.checkpoint().as_str(), "1");
    }
}
