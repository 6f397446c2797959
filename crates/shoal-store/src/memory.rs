//! In-process coordination store.
//!
//! Backs tests and single-process runs with the same contract a remote
//! store provides: last-write-wins keys, one-shot watchers fired on
//! shard-list writes, and closeable sessions. The backing state is shared
//! — [`session`](MemoryCoordinationStore::session) hands out additional
//! handles over it, each with its own lifetime, the way every worker
//! holds its own connection to one remote store. Write and read failures
//! can be injected to exercise the callers' retry paths.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::debug;

use shoal_core::{SequenceNumber, ShardId};

use crate::layout::KeyLayout;
use crate::snapshot::ShardListSnapshot;
use crate::store::{CoordinationStore, StoreError, TopologyWatcher};

#[derive(Default)]
struct Shared {
    shard_list: Option<ShardListSnapshot>,
    checkpoints: HashMap<String, SequenceNumber>,
    watchers: Vec<TopologyWatcher>,
    fail_checkpoint_writes: u32,
    fail_shard_list_reads: u32,
    shard_list_writes: u64,
    checkpoint_writes: u64,
}

/// One session over shared in-memory coordination state.
pub struct MemoryCoordinationStore {
    layout: KeyLayout,
    shared: Arc<Mutex<Shared>>,
    closed: AtomicBool,
}

impl MemoryCoordinationStore {
    /// Creates fresh backing state under `namespace` and a first session
    /// over it.
    #[must_use]
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            layout: KeyLayout::new(namespace),
            shared: Arc::new(Mutex::new(Shared::default())),
            closed: AtomicBool::new(false),
        }
    }

    /// Opens another session over the same backing state.
    ///
    /// Closing a session never affects its siblings — only the handle it
    /// was called on.
    #[must_use]
    pub fn session(&self) -> Self {
        Self {
            layout: self.layout.clone(),
            shared: Arc::clone(&self.shared),
            closed: AtomicBool::new(false),
        }
    }

    /// The key layout this store persists under.
    #[must_use]
    pub fn layout(&self) -> &KeyLayout {
        &self.layout
    }

    /// Makes the next `count` checkpoint writes fail as unavailable.
    pub fn fail_next_checkpoint_writes(&self, count: u32) {
        self.shared.lock().fail_checkpoint_writes = count;
    }

    /// Makes the next `count` shard-list reads fail as unavailable.
    pub fn fail_next_shard_list_reads(&self, count: u32) {
        self.shared.lock().fail_shard_list_reads = count;
    }

    /// Synchronous checkpoint accessor for assertions.
    #[must_use]
    pub fn committed_checkpoint(&self, shard_id: &ShardId) -> Option<SequenceNumber> {
        self.shared
            .lock()
            .checkpoints
            .get(&self.layout.checkpoint_key(shard_id))
            .cloned()
    }

    /// Total shard-list writes accepted.
    #[must_use]
    pub fn shard_list_writes(&self) -> u64 {
        self.shared.lock().shard_list_writes
    }

    /// Total checkpoint writes accepted.
    #[must_use]
    pub fn checkpoint_writes(&self) -> u64 {
        self.shared.lock().checkpoint_writes
    }

    /// Number of currently armed watchers.
    #[must_use]
    pub fn armed_watchers(&self) -> usize {
        self.shared.lock().watchers.len()
    }

    fn ensure_open(&self) -> Result<(), StoreError> {
        if self.closed.load(Ordering::Acquire) {
            Err(StoreError::Closed)
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl CoordinationStore for MemoryCoordinationStore {
    async fn read_shard_list(&self) -> Result<Option<ShardListSnapshot>, StoreError> {
        self.ensure_open()?;
        let mut shared = self.shared.lock();
        if shared.fail_shard_list_reads > 0 {
            shared.fail_shard_list_reads -= 1;
            return Err(StoreError::Unavailable("injected read failure".into()));
        }
        Ok(shared.shard_list.clone())
    }

    async fn write_shard_list(&self, snapshot: &ShardListSnapshot) -> Result<(), StoreError> {
        self.ensure_open()?;
        let watchers = {
            let mut shared = self.shared.lock();
            shared.shard_list = Some(snapshot.clone());
            shared.shard_list_writes += 1;
            std::mem::take(&mut shared.watchers)
        };
        debug!(
            key = %self.layout.shard_list_key(),
            shards = snapshot.len(),
            watchers = watchers.len(),
            "shard list written"
        );
        // Watchers may immediately re-arm through this store, so they run
        // with the lock released.
        for watcher in watchers {
            watcher();
        }
        Ok(())
    }

    async fn watch_shard_list(&self, watcher: TopologyWatcher) -> Result<(), StoreError> {
        self.ensure_open()?;
        self.shared.lock().watchers.push(watcher);
        Ok(())
    }

    async fn read_checkpoint(
        &self,
        shard_id: &ShardId,
    ) -> Result<Option<SequenceNumber>, StoreError> {
        self.ensure_open()?;
        Ok(self
            .shared
            .lock()
            .checkpoints
            .get(&self.layout.checkpoint_key(shard_id))
            .cloned())
    }

    async fn write_checkpoint(
        &self,
        shard_id: &ShardId,
        sequence: &SequenceNumber,
    ) -> Result<(), StoreError> {
        self.ensure_open()?;
        let mut shared = self.shared.lock();
        if shared.fail_checkpoint_writes > 0 {
            shared.fail_checkpoint_writes -= 1;
            return Err(StoreError::Unavailable("injected write failure".into()));
        }
        shared
            .checkpoints
            .insert(self.layout.checkpoint_key(shard_id), sequence.clone());
        shared.checkpoint_writes += 1;
        Ok(())
    }

    async fn close(&self) -> Result<(), StoreError> {
        self.closed.store(true, Ordering::Release);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use super::*;

    fn store() -> MemoryCoordinationStore {
        MemoryCoordinationStore::new("test-ns")
    }

    #[tokio::test]
    async fn test_shard_list_last_write_wins() {
        let store = store();
        assert!(store.read_shard_list().await.unwrap().is_none());

        store
            .write_shard_list(&ShardListSnapshot::from_ids(["a"]))
            .await
            .unwrap();
        store
            .write_shard_list(&ShardListSnapshot::from_ids(["a", "b"]))
            .await
            .unwrap();

        let read = store.read_shard_list().await.unwrap().unwrap();
        assert_eq!(read.len(), 2);
        assert_eq!(store.shard_list_writes(), 2);
    }

    #[tokio::test]
    async fn test_watchers_fire_once_per_arming() {
        let store = store();
        let fired = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&fired);
        store
            .watch_shard_list(Box::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            }))
            .await
            .unwrap();
        assert_eq!(store.armed_watchers(), 1);

        let snapshot = ShardListSnapshot::from_ids(["a"]);
        store.write_shard_list(&snapshot).await.unwrap();
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert_eq!(store.armed_watchers(), 0);

        // Not re-armed: a second write fires nothing.
        store.write_shard_list(&snapshot).await.unwrap();
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_sessions_share_state_and_watches() {
        let root = store();
        let session = root.session();

        session
            .write_checkpoint(&ShardId::new("s"), &SequenceNumber::new("9"))
            .await
            .unwrap();
        assert_eq!(
            root.committed_checkpoint(&ShardId::new("s")),
            Some(SequenceNumber::new("9"))
        );

        // A watcher armed on one session fires on another's write.
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&fired);
        session
            .watch_shard_list(Box::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            }))
            .await
            .unwrap();
        root.write_shard_list(&ShardListSnapshot::from_ids(["s"]))
            .await
            .unwrap();
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_checkpoint_read_back() {
        let store = store();
        let shard = ShardId::new("shard-1");
        assert!(store.read_checkpoint(&shard).await.unwrap().is_none());

        store
            .write_checkpoint(&shard, &SequenceNumber::new("42"))
            .await
            .unwrap();
        assert_eq!(
            store.read_checkpoint(&shard).await.unwrap(),
            Some(SequenceNumber::new("42"))
        );
        assert_eq!(
            store.committed_checkpoint(&shard),
            Some(SequenceNumber::new("42"))
        );
    }

    #[tokio::test]
    async fn test_injected_checkpoint_write_failures() {
        let store = store();
        let shard = ShardId::new("shard-1");
        store.fail_next_checkpoint_writes(1);

        let err = store
            .write_checkpoint(&shard, &SequenceNumber::new("1"))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Unavailable(_)));
        assert!(store.committed_checkpoint(&shard).is_none());

        // The failure budget is spent; the retry lands.
        store
            .write_checkpoint(&shard, &SequenceNumber::new("1"))
            .await
            .unwrap();
        assert_eq!(store.checkpoint_writes(), 1);
    }

    #[tokio::test]
    async fn test_closing_one_session_leaves_siblings_open() {
        let root = store();
        let session = root.session();
        session.close().await.unwrap();

        assert!(matches!(
            session.read_shard_list().await,
            Err(StoreError::Closed)
        ));
        assert!(matches!(
            session
                .write_checkpoint(&ShardId::new("s"), &SequenceNumber::new("1"))
                .await,
            Err(StoreError::Closed)
        ));
        assert!(matches!(
            session.watch_shard_list(Box::new(|| {})).await,
            Err(StoreError::Closed)
        ));

        // The sibling still works against the shared state.
        root.write_checkpoint(&ShardId::new("s"), &SequenceNumber::new("1"))
            .await
            .unwrap();
        assert!(root.read_shard_list().await.is_ok());
    }
}
