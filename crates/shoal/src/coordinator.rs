//! The per-worker coordination state machine.
//!
//! [`ShardCoordinator`] owns everything one worker knows about its slice
//! of the stream: the coordination-store session, the per-shard in-flight
//! trackers, the lineage graph, and the current assignment. It moves
//! between two states — inactive and active — and while active it answers
//! the host's delivery calls (emit/ack/fail/retry), flushes dirty
//! checkpoints, and rebalances whenever the shard topology or the worker
//! population changes.
//!
//! All methods take `&mut self`: the coordinator is built to be owned by
//! exactly one execution context (the worker task), which serializes
//! emissions, acknowledgement routing, topology reactions, and flushes by
//! construction. There is no interior locking to misuse and no ambient
//! shared state.
//!
//! Failure handling follows a strict taxonomy. Anything that prevents the
//! coordinator from trusting the shard list — a failed read during
//! activation or rebalance, a watch that cannot be re-armed — is fatal,
//! because guessing an assignment risks two workers owning the same shard.
//! Checkpoint-write failures are merely logged: the local tracker stays
//! dirty and the next flush retries, so durable state lags but nothing is
//! lost. Acks and fails for shards this worker no longer owns are ignored;
//! after a rebalance the new owner replays from the committed checkpoint
//! and the stale signals mean nothing.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, info, warn};

use shoal_core::{
    assignment, FailDisposition, InflightTracker, Record, RetryPolicy, SequenceNumber,
    ShardId, ShardLineage,
};
use shoal_store::{CoordinationStore, ShardListSnapshot};

use crate::config::WorkerConfig;
use crate::error::CoordinationError;
use crate::metrics::WorkerMetrics;
use crate::source::SeekPosition;

/// Callback installed on the store's topology watch.
///
/// Invoked from the store's notification path; implementations should do
/// nothing but signal the worker task.
pub type TopologySignal = Arc<dyn Fn() + Send + Sync>;

/// What a rebalance changed, so the driver can adjust its fetchers.
#[derive(Debug)]
pub struct RebalanceOutcome {
    /// Shards gained by this worker, with the position to resume reading
    /// from (the committed checkpoint, or the configured default).
    pub gained: Vec<(ShardId, SeekPosition)>,
    /// Shards this worker no longer owns.
    pub lost: Vec<ShardId>,
    /// The full assignment after the rebalance, sorted.
    pub assigned: Vec<ShardId>,
}

/// Result of one checkpoint flush pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushReport {
    /// Checkpoints durably written.
    pub committed: usize,
    /// Writes that failed and remain dirty for the next pass.
    pub failed: usize,
}

/// Coordination state machine for one worker.
pub struct ShardCoordinator {
    config: WorkerConfig,
    store: Arc<dyn CoordinationStore>,
    metrics: Arc<WorkerMetrics>,
    lineage: ShardLineage,
    trackers: HashMap<ShardId, InflightTracker>,
    assigned: Vec<ShardId>,
    cursor: usize,
    worker_index: usize,
    worker_count: usize,
    active: bool,
    watch_signal: Option<TopologySignal>,
}

impl ShardCoordinator {
    /// Creates an inactive coordinator over the given store session.
    #[must_use]
    pub fn new(
        config: WorkerConfig,
        store: Arc<dyn CoordinationStore>,
        metrics: Arc<WorkerMetrics>,
    ) -> Self {
        Self {
            config,
            store,
            metrics,
            lineage: ShardLineage::new(),
            trackers: HashMap::new(),
            assigned: Vec::new(),
            cursor: 0,
            worker_index: 0,
            worker_count: 1,
            active: false,
            watch_signal: None,
        }
    }

    /// Returns `true` while a coordination session is open.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.active
    }

    /// The shards currently assigned to this worker, sorted.
    #[must_use]
    pub fn assigned_shards(&self) -> &[ShardId] {
        &self.assigned
    }

    /// The lineage graph accumulated from store snapshots.
    #[must_use]
    pub fn lineage(&self) -> &ShardLineage {
        &self.lineage
    }

    /// A shard's current local checkpoint, if the shard is assigned here.
    #[must_use]
    pub fn checkpoint(&self, shard_id: &ShardId) -> Option<&SequenceNumber> {
        self.trackers.get(shard_id).map(InflightTracker::checkpoint)
    }

    // ── Lifecycle ──

    /// Opens the coordination session.
    ///
    /// Publishes the discovered topology (merged into whatever the store
    /// already holds) and arms the topology watch with `signal`. The
    /// caller follows up with [`rebalance`](Self::rebalance) to pick up an
    /// assignment.
    ///
    /// # Errors
    ///
    /// Fatal if the shard list cannot be read/published or the watch
    /// cannot be armed — the worker must not guess at an assignment.
    pub async fn activate(
        &mut self,
        discovered: ShardListSnapshot,
        signal: TopologySignal,
    ) -> Result<(), CoordinationError> {
        self.watch_signal = Some(signal);
        self.publish_topology(discovered).await?;
        self.arm_watch().await?;
        self.active = true;
        info!("coordination session activated");
        Ok(())
    }

    /// Merges `discovered` into the persisted shard list and writes it
    /// back.
    ///
    /// The write fires every worker's topology watch — including this
    /// one's, once armed — so publication doubles as the reshard signal.
    /// The unconditional write is deliberate: re-publishing an unchanged
    /// list re-notifies workers, and the change handler is idempotent.
    ///
    /// # Errors
    ///
    /// Fatal on any store failure, as for [`activate`](Self::activate).
    pub async fn publish_topology(
        &mut self,
        discovered: ShardListSnapshot,
    ) -> Result<(), CoordinationError> {
        let merged = match self.store.read_shard_list().await {
            Ok(Some(mut persisted)) => {
                persisted.merge(&discovered);
                persisted
            }
            Ok(None) => discovered,
            Err(e) => {
                return Err(CoordinationError::ShardList(format!(
                    "reading persisted shard list: {e}"
                )))
            }
        };
        self.store
            .write_shard_list(&merged)
            .await
            .map_err(|e| CoordinationError::ShardList(format!("publishing shard list: {e}")))?;
        info!(shards = merged.len(), "published shard topology");
        Ok(())
    }

    /// Reacts to a fired topology watch.
    ///
    /// The watch is re-armed *before* the change is read so an update
    /// racing with this handler is never missed; the same change may then
    /// be processed twice, which the rebalance tolerates. Current progress
    /// is flushed first so a shard moving away carries the freshest
    /// checkpoint with it.
    ///
    /// # Errors
    ///
    /// Fatal if the watch cannot be re-armed or the rebalance cannot read
    /// the shard list.
    pub async fn on_topology_changed(&mut self) -> Result<RebalanceOutcome, CoordinationError> {
        self.ensure_active("topology change")?;
        info!("shard topology changed, re-syncing from the coordination store");
        self.arm_watch().await?;
        self.commit_checkpoints().await;
        self.rebalance(self.worker_index, self.worker_count).await
    }

    /// Recomputes this worker's assignment as slot `worker_index` of
    /// `worker_count`.
    ///
    /// The shard list is read from the store — never from the live source
    /// — so all workers stride over one consistent, possibly lagging view.
    /// Lost shards get a final flush and are dropped; gained shards get a
    /// tracker seeded from the committed checkpoint, falling back to the
    /// configured initial position. Re-running with unchanged inputs is a
    /// no-op apart from cursor reset.
    ///
    /// # Errors
    ///
    /// Fatal if inactive, the slot is invalid, or the shard list cannot
    /// be read.
    pub async fn rebalance(
        &mut self,
        worker_index: usize,
        worker_count: usize,
    ) -> Result<RebalanceOutcome, CoordinationError> {
        self.ensure_active("rebalance")?;
        if worker_count == 0 || worker_index >= worker_count {
            return Err(CoordinationError::WorkerSlot {
                index: worker_index,
                count: worker_count,
            });
        }
        self.worker_index = worker_index;
        self.worker_count = worker_count;

        let snapshot = self
            .store
            .read_shard_list()
            .await
            .map_err(|e| CoordinationError::ShardList(format!("reading shard list: {e}")))?
            .unwrap_or_default();
        snapshot.apply_lineage(&mut self.lineage);

        let assignment = assignment::assign(&snapshot.shard_ids(), worker_index, worker_count);

        let lost: Vec<ShardId> = self
            .trackers
            .keys()
            .filter(|&shard_id| !assignment.contains(shard_id))
            .cloned()
            .collect();
        for shard_id in &lost {
            if let Some(mut tracker) = self.trackers.remove(shard_id) {
                self.flush_released_tracker(shard_id, &mut tracker).await;
            }
        }

        let mut gained = Vec::new();
        for shard_id in &assignment {
            if self.trackers.contains_key(shard_id) {
                debug!(shard = %shard_id, "keeping existing shard state across rebalance");
                continue;
            }
            let (checkpoint, resume) = self.stored_resume_position(shard_id).await;
            self.trackers.insert(
                shard_id.clone(),
                InflightTracker::new(
                    shard_id.clone(),
                    checkpoint,
                    RetryPolicy::new(self.config.retry_limit),
                ),
            );
            gained.push((shard_id.clone(), resume));
        }

        self.assigned = assignment;
        self.cursor = 0;
        self.metrics.record_rebalance();
        info!(
            worker = self.worker_index,
            workers = self.worker_count,
            assigned = self.assigned.len(),
            gained = gained.len(),
            lost = lost.len(),
            "rebalanced shard assignment"
        );

        Ok(RebalanceOutcome {
            gained,
            lost,
            assigned: self.assigned.clone(),
        })
    }

    /// Writes every dirty shard's checkpoint to the store.
    ///
    /// A failed write leaves the tracker dirty and is retried on the next
    /// call; local state keeps accumulating progress in the meantime, so
    /// only the durable checkpoint lags.
    pub async fn commit_checkpoints(&mut self) -> FlushReport {
        let mut report = FlushReport::default();
        for (shard_id, tracker) in &mut self.trackers {
            if !tracker.is_dirty() {
                continue;
            }
            match self
                .store
                .write_checkpoint(shard_id, tracker.checkpoint())
                .await
            {
                Ok(()) => {
                    tracker.clear_dirty();
                    report.committed += 1;
                    self.metrics.record_checkpoint_commit();
                    info!(shard = %shard_id, checkpoint = %tracker.checkpoint(),
                        "advanced durable checkpoint");
                }
                Err(e) => {
                    report.failed += 1;
                    self.metrics.record_checkpoint_failure();
                    warn!(shard = %shard_id, error = %e,
                        "checkpoint write failed, will retry on the next flush");
                }
            }
        }
        report
    }

    /// Closes the session: final flush, then best-effort store close.
    ///
    /// Failures are logged only — the worker is shutting down regardless.
    /// Local shard state is retained in case the coordinator is activated
    /// again.
    pub async fn deactivate(&mut self) {
        let report = self.commit_checkpoints().await;
        self.active = false;
        self.watch_signal = None;
        if let Err(e) = self.store.close().await {
            warn!(error = %e, "coordination store close failed during deactivation");
        }
        info!(
            committed = report.committed,
            failed = report.failed,
            "coordination session deactivated"
        );
    }

    // ── Delivery surface ──

    /// Registers a record emission on its shard's tracker.
    ///
    /// # Errors
    ///
    /// Emitting on an unassigned shard means assignment bookkeeping is
    /// broken — fatal.
    pub fn on_emit(
        &mut self,
        shard_id: &ShardId,
        record: Record,
        is_retry: bool,
    ) -> Result<(), CoordinationError> {
        let tracker = self
            .trackers
            .get_mut(shard_id)
            .ok_or_else(|| CoordinationError::ShardNotAssigned(shard_id.clone()))?;
        tracker.on_emit(record, is_retry);
        self.metrics.record_emit(is_retry);
        Ok(())
    }

    /// Routes an acknowledgement.
    ///
    /// A shard with no tracker here was reassigned after the record was
    /// emitted; its checkpoint went with it and the new owner replays, so
    /// the ack is dropped.
    pub fn on_ack(&mut self, shard_id: &ShardId, sequence: &SequenceNumber) {
        match self.trackers.get_mut(shard_id) {
            Some(tracker) => {
                tracker.on_ack(sequence);
                self.metrics.record_ack();
            }
            None => {
                debug!(shard = %shard_id, sequence = %sequence,
                    "ack for a shard this worker no longer owns, ignoring");
            }
        }
    }

    /// Routes a delivery failure. Same reassignment tolerance as
    /// [`on_ack`](Self::on_ack).
    pub fn on_fail(&mut self, shard_id: &ShardId, sequence: &SequenceNumber) {
        match self.trackers.get_mut(shard_id) {
            Some(tracker) => match tracker.on_fail(sequence) {
                FailDisposition::Queued => self.metrics.record_fail(),
                FailDisposition::Evicted => self.metrics.record_poison(),
                FailDisposition::Ignored => {}
            },
            None => {
                debug!(shard = %shard_id, sequence = %sequence,
                    "failure for a shard this worker no longer owns, ignoring");
            }
        }
    }

    /// Returns `true` if `shard_id` has a record queued for re-emission.
    ///
    /// # Errors
    ///
    /// Fatal if the shard is not assigned here.
    pub fn should_retry(&self, shard_id: &ShardId) -> Result<bool, CoordinationError> {
        self.trackers
            .get(shard_id)
            .map(InflightTracker::should_retry)
            .ok_or_else(|| CoordinationError::ShardNotAssigned(shard_id.clone()))
    }

    /// Dequeues `shard_id`'s next retry candidate.
    ///
    /// # Errors
    ///
    /// Fatal if the shard is not assigned here.
    pub fn record_to_retry(
        &mut self,
        shard_id: &ShardId,
    ) -> Result<Option<Record>, CoordinationError> {
        self.trackers
            .get_mut(shard_id)
            .map(InflightTracker::record_to_retry)
            .ok_or_else(|| CoordinationError::ShardNotAssigned(shard_id.clone()))
    }

    /// Returns `true` if any shard is assigned to this worker.
    #[must_use]
    pub fn has_assigned_shards(&self) -> bool {
        !self.assigned.is_empty()
    }

    /// The next shard to poll, round-robin over the assignment.
    pub fn next_assigned_shard(&mut self) -> Option<ShardId> {
        if self.assigned.is_empty() {
            return None;
        }
        let shard_id = self.assigned[self.cursor % self.assigned.len()].clone();
        self.cursor = (self.cursor + 1) % self.assigned.len();
        Some(shard_id)
    }

    // ── Internals ──

    fn ensure_active(&self, operation: &'static str) -> Result<(), CoordinationError> {
        if self.active {
            Ok(())
        } else {
            Err(CoordinationError::NotActive(operation))
        }
    }

    /// Re-arms the one-shot topology watch.
    async fn arm_watch(&self) -> Result<(), CoordinationError> {
        let Some(signal) = &self.watch_signal else {
            return Err(CoordinationError::WatchLost(
                "no topology signal installed".to_string(),
            ));
        };
        let signal = Arc::clone(signal);
        self.store
            .watch_shard_list(Box::new(move || signal()))
            .await
            .map_err(|e| CoordinationError::WatchLost(e.to_string()))
    }

    /// Final flush for a shard leaving this worker. Failure loses only
    /// the uncommitted tail of progress: the next owner resumes from the
    /// last committed checkpoint and replays, within the at-least-once
    /// contract.
    async fn flush_released_tracker(&self, shard_id: &ShardId, tracker: &mut InflightTracker) {
        if tracker.is_dirty() {
            match self
                .store
                .write_checkpoint(shard_id, tracker.checkpoint())
                .await
            {
                Ok(()) => {
                    tracker.clear_dirty();
                    self.metrics.record_checkpoint_commit();
                }
                Err(e) => {
                    self.metrics.record_checkpoint_failure();
                    warn!(shard = %shard_id, error = %e,
                        "final checkpoint flush failed for released shard");
                }
            }
        }
        info!(shard = %shard_id, inflight = tracker.len(),
            "released shard state after reassignment");
    }

    /// Resolves where a newly gained shard resumes: the committed
    /// checkpoint when one exists, otherwise the configured initial
    /// position. An unreadable checkpoint degrades to the initial
    /// position — re-reading old records is within the delivery contract,
    /// silently skipping them would not be.
    async fn stored_resume_position(
        &self,
        shard_id: &ShardId,
    ) -> (SequenceNumber, SeekPosition) {
        match self.store.read_checkpoint(shard_id).await {
            Ok(Some(sequence)) => {
                info!(shard = %shard_id, checkpoint = %sequence,
                    "resuming shard from committed checkpoint");
                (sequence.clone(), SeekPosition::AfterSequence(sequence))
            }
            Ok(None) => {
                info!(shard = %shard_id, position = %SeekPosition::from(self.config.initial_position),
                    "no committed checkpoint, resuming shard from initial position");
                (
                    SequenceNumber::zero(),
                    self.config.initial_position.into(),
                )
            }
            Err(e) => {
                warn!(shard = %shard_id, error = %e,
                    "could not read committed checkpoint, resuming from initial position");
                (
                    SequenceNumber::zero(),
                    self.config.initial_position.into(),
                )
            }
        }
    }
}

impl std::fmt::Debug for ShardCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShardCoordinator")
            .field("active", &self.active)
            .field("worker_index", &self.worker_index)
            .field("worker_count", &self.worker_count)
            .field("assigned", &self.assigned.len())
            .field("trackers", &self.trackers.len())
            .finish_non_exhaustive()
    }
}
