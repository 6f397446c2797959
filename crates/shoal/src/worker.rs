//! The worker driver task.
//!
//! One tokio task owns a [`ShardCoordinator`] and a [`RecordFetcher`]
//! exclusively — the single execution context the whole design assumes.
//! Everything that must not interleave with emission (acks and fails from
//! the host runtime, topology-change notifications, host-requested
//! rebalances, the periodic checkpoint flush) arrives as a message and is
//! applied between emission steps; there is no lock because there is no
//! sharing.
//!
//! The loop is a biased `select!`: shutdown first, then control events,
//! then delivery events, then the flush tick, and only when none of those
//! are ready one emission step — a queued retry takes precedence over a
//! fresh fetch, an empty fetch sleeps the configured backoff, and a fetch
//! reporting the shard closed triggers one topology republication. Fatal
//! coordination errors end the task; the error is observable through the
//! join handle so a supervisor can restart the worker, which rejoins via
//! activation and rebalance.

use std::collections::HashSet;
use std::sync::Arc;

use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use shoal_core::{Record, SequenceNumber, ShardId};
use shoal_store::CoordinationStore;

use crate::config::WorkerConfig;
use crate::coordinator::{RebalanceOutcome, ShardCoordinator, TopologySignal};
use crate::error::CoordinationError;
use crate::metrics::WorkerMetrics;
use crate::source::{RecordFetcher, StreamLister};

/// Asynchronous delivery outcomes from the host runtime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryEvent {
    /// The record was fully processed downstream.
    Ack {
        /// Shard the record was emitted from.
        shard_id: ShardId,
        /// The record's sequence number.
        sequence: SequenceNumber,
    },
    /// Downstream processing failed; the record is a retry candidate.
    Fail {
        /// Shard the record was emitted from.
        shard_id: ShardId,
        /// The record's sequence number.
        sequence: SequenceNumber,
    },
}

/// Control-plane messages for the worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlEvent {
    /// The shard-list watch fired; re-sync from the store.
    TopologyChanged,
    /// The worker population changed; recompute the assignment.
    Rebalance {
        /// This worker's new index.
        worker_index: usize,
        /// The new total worker count.
        worker_count: usize,
    },
}

/// Host emission hook: hands each record to the surrounding runtime.
///
/// Called before the record is registered in-flight, mirroring the order
/// a host emits a tuple and then books it. Acks and fails for emitted
/// records come back through the delivery channel.
pub trait RecordEmitter: Send {
    /// Emits one record. `is_retry` marks re-emissions of failed records.
    fn emit(&mut self, shard_id: &ShardId, record: &Record, is_retry: bool);
}

/// Handle to a spawned worker.
pub struct WorkerHandle {
    /// Control-plane sender (rebalances; topology signals use it too).
    pub control: mpsc::UnboundedSender<ControlEvent>,
    /// Delivery sender for acks and fails. Bounded: a full channel
    /// back-pressures the host's delivery path.
    pub delivery: mpsc::Sender<DeliveryEvent>,
    /// Signal to drain, deactivate, and exit.
    pub shutdown: Arc<Notify>,
    /// Shared counters (lock-free reads).
    pub metrics: Arc<WorkerMetrics>,
    /// Task join handle; resolves to the worker's terminal result.
    pub join: JoinHandle<Result<(), CoordinationError>>,
}

/// Spawns a worker task as slot `worker_index` of `worker_count`.
///
/// The coordinator session, fetcher, and emitter are moved into the task.
#[must_use]
pub fn spawn_worker(
    config: WorkerConfig,
    store: Arc<dyn CoordinationStore>,
    lister: Arc<dyn StreamLister>,
    fetcher: Box<dyn RecordFetcher>,
    emitter: Box<dyn RecordEmitter>,
    worker_index: usize,
    worker_count: usize,
) -> WorkerHandle {
    let metrics = Arc::new(WorkerMetrics::default());
    let (control_tx, control_rx) = mpsc::unbounded_channel();
    let (delivery_tx, delivery_rx) = mpsc::channel(config.delivery_channel_capacity);
    let shutdown = Arc::new(Notify::new());

    let coordinator = ShardCoordinator::new(config.clone(), store, Arc::clone(&metrics));
    let task = WorkerTask {
        config,
        coordinator,
        lister,
        fetcher,
        emitter,
        control_tx: control_tx.clone(),
        reported_closed: HashSet::new(),
        worker_index,
        worker_count,
    };
    let join = tokio::spawn(task.run(control_rx, delivery_rx, Arc::clone(&shutdown)));

    WorkerHandle {
        control: control_tx,
        delivery: delivery_tx,
        shutdown,
        metrics,
        join,
    }
}

struct WorkerTask {
    config: WorkerConfig,
    coordinator: ShardCoordinator,
    lister: Arc<dyn StreamLister>,
    fetcher: Box<dyn RecordFetcher>,
    emitter: Box<dyn RecordEmitter>,
    control_tx: mpsc::UnboundedSender<ControlEvent>,
    /// Shards whose closure already triggered a topology republication,
    /// so a drained shard is not re-announced on every poll.
    reported_closed: HashSet<ShardId>,
    worker_index: usize,
    worker_count: usize,
}

impl WorkerTask {
    async fn run(
        mut self,
        control_rx: mpsc::UnboundedReceiver<ControlEvent>,
        delivery_rx: mpsc::Receiver<DeliveryEvent>,
        shutdown: Arc<Notify>,
    ) -> Result<(), CoordinationError> {
        let result = self.drive(control_rx, delivery_rx, &shutdown).await;
        // Deactivation runs on every exit path; its failures are logged
        // inside and never mask the driving result.
        self.coordinator.deactivate().await;
        if let Err(ref e) = result {
            error!(error = %e, "worker terminated on fatal coordination error");
        }
        result
    }

    async fn drive(
        &mut self,
        mut control_rx: mpsc::UnboundedReceiver<ControlEvent>,
        mut delivery_rx: mpsc::Receiver<DeliveryEvent>,
        shutdown: &Notify,
    ) -> Result<(), CoordinationError> {
        let discovered = self.lister.list_shards().await.map_err(|e| {
            CoordinationError::Source(format!("initial shard discovery failed: {e}"))
        })?;

        let control = self.control_tx.clone();
        let signal: TopologySignal = Arc::new(move || {
            let _ = control.send(ControlEvent::TopologyChanged);
        });
        self.coordinator.activate(discovered, signal).await?;
        let outcome = self
            .coordinator
            .rebalance(self.worker_index, self.worker_count)
            .await?;
        self.apply_rebalance(&outcome).await?;

        let mut flush = tokio::time::interval(self.config.flush_interval);
        flush.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        flush.reset();
        info!(
            worker = self.worker_index,
            workers = self.worker_count,
            "worker started"
        );

        loop {
            tokio::select! {
                biased;

                () = shutdown.notified() => {
                    info!("worker shutdown signal received");
                    break;
                }

                Some(event) = control_rx.recv() => {
                    let outcome = match event {
                        ControlEvent::TopologyChanged => {
                            self.coordinator.on_topology_changed().await?
                        }
                        ControlEvent::Rebalance { worker_index, worker_count } => {
                            self.worker_index = worker_index;
                            self.worker_count = worker_count;
                            self.coordinator.commit_checkpoints().await;
                            self.coordinator.rebalance(worker_index, worker_count).await?
                        }
                    };
                    self.apply_rebalance(&outcome).await?;
                }

                Some(event) = delivery_rx.recv() => {
                    match event {
                        DeliveryEvent::Ack { shard_id, sequence } => {
                            self.coordinator.on_ack(&shard_id, &sequence);
                        }
                        DeliveryEvent::Fail { shard_id, sequence } => {
                            self.coordinator.on_fail(&shard_id, &sequence);
                        }
                    }
                }

                _ = flush.tick() => {
                    self.coordinator.commit_checkpoints().await;
                }

                // Nothing pending: run one emission step.
                () = std::future::ready(()) => {
                    self.step().await?;
                }
            }
        }
        Ok(())
    }

    /// One emission step: a queued retry first, otherwise a fetch from
    /// the round-robin shard. Idle paths sleep the configured backoff so
    /// a quiet stream does not spin the task.
    async fn step(&mut self) -> Result<(), CoordinationError> {
        let Some(shard_id) = self.coordinator.next_assigned_shard() else {
            tokio::time::sleep(self.config.empty_fetch_backoff).await;
            return Ok(());
        };

        if self.coordinator.should_retry(&shard_id)? {
            if let Some(record) = self.coordinator.record_to_retry(&shard_id)? {
                debug!(shard = %shard_id, sequence = %record.sequence_number(),
                    "re-emitting failed record");
                self.emitter.emit(&shard_id, &record, true);
                self.coordinator.on_emit(&shard_id, record, true)?;
                return Ok(());
            }
        }

        match self
            .fetcher
            .get_next(&shard_id, self.config.max_records_per_fetch)
            .await
        {
            Ok(batch) => {
                let emitted = !batch.records.is_empty();
                for record in batch.records {
                    self.emitter.emit(&shard_id, &record, false);
                    self.coordinator.on_emit(&shard_id, record, false)?;
                }
                if batch.shard_closed && self.reported_closed.insert(shard_id.clone()) {
                    self.announce_reshard(&shard_id).await?;
                }
                if !emitted {
                    tokio::time::sleep(self.config.empty_fetch_backoff).await;
                }
            }
            Err(e) => {
                warn!(shard = %shard_id, error = %e, "record fetch failed, backing off");
                tokio::time::sleep(self.config.empty_fetch_backoff).await;
            }
        }
        Ok(())
    }

    /// Republishes the topology after a shard reported closed. The store
    /// write trips every worker's watch — ours included — and the
    /// rebalance that follows picks up the child shards.
    async fn announce_reshard(&mut self, shard_id: &ShardId) -> Result<(), CoordinationError> {
        info!(shard = %shard_id, "shard closed by a reshard, republishing topology");
        match self.lister.list_shards().await {
            Ok(snapshot) => self.coordinator.publish_topology(snapshot).await,
            Err(e) => {
                // Discovery is retried the next time this shard polls.
                self.reported_closed.remove(shard_id);
                warn!(shard = %shard_id, error = %e,
                    "shard discovery failed, republication deferred");
                Ok(())
            }
        }
    }

    /// Points the fetcher at every gained shard's resume position and
    /// forgets closure bookkeeping for lost shards.
    async fn apply_rebalance(
        &mut self,
        outcome: &RebalanceOutcome,
    ) -> Result<(), CoordinationError> {
        for shard_id in &outcome.lost {
            self.reported_closed.remove(shard_id);
        }
        for (shard_id, position) in &outcome.gained {
            self.fetcher.seek(shard_id, position).await.map_err(|e| {
                CoordinationError::Source(format!(
                    "seeking shard '{shard_id}' to {position}: {e}"
                ))
            })?;
            debug!(shard = %shard_id, position = %position, "fetcher positioned");
        }
        Ok(())
    }
}
