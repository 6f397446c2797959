//! Checkpointed, rebalancing multi-worker consumer for sharded record
//! streams.
//!
//! Shoal consumes partitioned, ordered streams under an at-least-once
//! contract. Each worker owns a deterministic slice of the shard set,
//! tracks every emitted record until it is acknowledged or evicted, and
//! periodically commits the highest safely-resumable position per shard
//! to a shared coordination store. Workers never talk to each other:
//! assignment is a pure function of the store's shard list and the
//! worker's slot, and a watch on that list drives reactive rebalancing
//! when shards split, merge, or the worker population changes.
//!
//! ## Architecture
//!
//! - [`ShardCoordinator`] — the per-worker state machine: activation,
//!   rebalancing, checkpoint flushing, and delivery routing, owned by a
//!   single execution context.
//! - [`worker`] — the driver task that owns the coordinator, selects over
//!   shutdown / control / delivery / flush signals, and runs the emission
//!   loop against a [`RecordFetcher`].
//! - `shoal-core` — the pure state machines underneath: the in-flight
//!   tracker, retry policy, shard assignment, lineage.
//! - `shoal-store` — the [`CoordinationStore`] boundary and the persisted
//!   shard-list document.
//!
//! The stream transport itself stays behind the [`StreamLister`] and
//! [`RecordFetcher`] traits; the embedding host forwards downstream acks
//! and fails through the worker's delivery channel.

pub mod config;
pub mod coordinator;
pub mod error;
pub mod metrics;
pub mod source;
pub mod testing;
pub mod worker;

pub use config::WorkerConfig;
pub use coordinator::{FlushReport, RebalanceOutcome, ShardCoordinator, TopologySignal};
pub use error::CoordinationError;
pub use metrics::{MetricsSnapshot, WorkerMetrics};
pub use source::{
    FetchBatch, InitialPosition, RecordFetcher, SeekPosition, SourceError, StreamLister,
};
pub use worker::{spawn_worker, ControlEvent, DeliveryEvent, RecordEmitter, WorkerHandle};

pub use shoal_core::{
    FailDisposition, InflightTracker, Record, RetryPolicy, SequenceNumber, ShardId, ShardLineage,
};
pub use shoal_store::{
    CoordinationStore, MemoryCoordinationStore, ShardListEntry, ShardListSnapshot, StoreError,
};
