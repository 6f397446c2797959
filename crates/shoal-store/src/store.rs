//! The coordination-store boundary.
//!
//! Workers synchronize exclusively through a shared durable key store
//! that offers atomic single-key writes and change notification on the
//! shard-list key. The store is deliberately weaker than a lock service:
//! checkpoint writes are last-write-wins, and single-writer-per-shard is
//! guaranteed by the assignment algorithm, not by the store.

use async_trait::async_trait;

use shoal_core::{SequenceNumber, ShardId};

use crate::snapshot::ShardListSnapshot;

/// One-shot shard-list change notification.
///
/// Fired at most once, after which the consumer must re-arm the watch.
/// Watchers run on the store's notification path, so they should do
/// nothing beyond signalling the owning worker (e.g. a channel send).
pub type TopologyWatcher = Box<dyn FnOnce() + Send + 'static>;

/// Errors surfaced by a coordination-store backend.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The backend could not be reached or timed out.
    #[error("coordination store unavailable: {0}")]
    Unavailable(String),

    /// The session was closed; no further operations are possible.
    #[error("coordination store session is closed")]
    Closed,

    /// A stored payload could not be decoded.
    #[error("malformed coordination payload: {0}")]
    Corrupt(String),
}

/// Durable coordination state shared by all workers of a stream.
///
/// The session is owned by exactly one coordinator per worker; no other
/// component talks to the store directly.
#[async_trait]
pub trait CoordinationStore: Send + Sync {
    /// Reads the persisted shard-list document, `None` if never written.
    async fn read_shard_list(&self) -> Result<Option<ShardListSnapshot>, StoreError>;

    /// Replaces the shard-list document (last write wins) and fires any
    /// armed watchers — including the writer's own.
    async fn write_shard_list(&self, snapshot: &ShardListSnapshot) -> Result<(), StoreError>;

    /// Arms a one-shot watcher on the shard-list key.
    async fn watch_shard_list(&self, watcher: TopologyWatcher) -> Result<(), StoreError>;

    /// Reads a shard's committed checkpoint, `None` if never committed.
    async fn read_checkpoint(&self, shard_id: &ShardId)
        -> Result<Option<SequenceNumber>, StoreError>;

    /// Commits a shard's checkpoint (last write wins).
    async fn write_checkpoint(
        &self,
        shard_id: &ShardId,
        sequence: &SequenceNumber,
    ) -> Result<(), StoreError>;

    /// Closes the session. Further operations fail with
    /// [`StoreError::Closed`].
    async fn close(&self) -> Result<(), StoreError>;
}
