//! Test doubles for the source-side and host-side boundaries.
//!
//! Used by this crate's own tests and available to embedders wiring the
//! engine into their own test harnesses.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;

use shoal_core::{Record, ShardId};
use shoal_store::ShardListSnapshot;

use crate::source::{FetchBatch, RecordFetcher, SeekPosition, SourceError, StreamLister};
use crate::worker::RecordEmitter;

/// Builds a record with the given sequence number and a fixed payload.
#[must_use]
pub fn record(sequence: &str) -> Record {
    Record::new(sequence, "test-key", Bytes::from_static(b"payload"))
}

/// [`StreamLister`] serving a swappable snapshot, with injectable
/// failures.
pub struct MockStreamLister {
    snapshot: Mutex<ShardListSnapshot>,
    fail_next: Mutex<u32>,
}

impl MockStreamLister {
    /// Creates a lister serving `snapshot`.
    #[must_use]
    pub fn new(snapshot: ShardListSnapshot) -> Self {
        Self {
            snapshot: Mutex::new(snapshot),
            fail_next: Mutex::new(0),
        }
    }

    /// Replaces the snapshot served to subsequent calls.
    pub fn set_snapshot(&self, snapshot: ShardListSnapshot) {
        *self.snapshot.lock() = snapshot;
    }

    /// Makes the next `count` calls fail.
    pub fn fail_next_calls(&self, count: u32) {
        *self.fail_next.lock() = count;
    }
}

#[async_trait]
impl StreamLister for MockStreamLister {
    async fn list_shards(&self) -> Result<ShardListSnapshot, SourceError> {
        {
            let mut fail_next = self.fail_next.lock();
            if *fail_next > 0 {
                *fail_next -= 1;
                return Err(SourceError::new("injected discovery failure"));
            }
        }
        Ok(self.snapshot.lock().clone())
    }
}

/// Shared script and observation state behind a [`ScriptedFetcher`].
#[derive(Default)]
pub struct FetcherScript {
    batches: Mutex<HashMap<ShardId, VecDeque<FetchBatch>>>,
    seeks: Mutex<Vec<(ShardId, SeekPosition)>>,
}

impl FetcherScript {
    /// Queues a plain batch of records for `shard_id`.
    pub fn push_records(&self, shard_id: &ShardId, records: Vec<Record>) {
        self.push_batch(
            shard_id,
            FetchBatch {
                records,
                shard_closed: false,
            },
        );
    }

    /// Queues an arbitrary batch for `shard_id`.
    pub fn push_batch(&self, shard_id: &ShardId, batch: FetchBatch) {
        self.batches
            .lock()
            .entry(shard_id.clone())
            .or_default()
            .push_back(batch);
    }

    /// Every seek the fetcher received, in order.
    #[must_use]
    pub fn seeks(&self) -> Vec<(ShardId, SeekPosition)> {
        self.seeks.lock().clone()
    }
}

/// [`RecordFetcher`] draining pre-scripted batches; shards with an empty
/// script return empty batches.
pub struct ScriptedFetcher {
    script: Arc<FetcherScript>,
}

impl ScriptedFetcher {
    /// Creates a fetcher and the script handle that feeds and observes it.
    #[must_use]
    pub fn new() -> (Self, Arc<FetcherScript>) {
        let script = Arc::new(FetcherScript::default());
        (
            Self {
                script: Arc::clone(&script),
            },
            script,
        )
    }
}

#[async_trait]
impl RecordFetcher for ScriptedFetcher {
    async fn seek(
        &mut self,
        shard_id: &ShardId,
        position: &SeekPosition,
    ) -> Result<(), SourceError> {
        self.script
            .seeks
            .lock()
            .push((shard_id.clone(), position.clone()));
        Ok(())
    }

    async fn get_next(
        &mut self,
        shard_id: &ShardId,
        _max: usize,
    ) -> Result<FetchBatch, SourceError> {
        Ok(self
            .script
            .batches
            .lock()
            .get_mut(shard_id)
            .and_then(VecDeque::pop_front)
            .unwrap_or_default())
    }
}

/// One observed emission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmittedRecord {
    /// Shard the record came from.
    pub shard_id: ShardId,
    /// The emitted record.
    pub record: Record,
    /// Whether this was a re-emission of a failed record.
    pub is_retry: bool,
}

/// Shared, cloneable view over a [`CollectingEmitter`]'s emissions.
#[derive(Clone, Default)]
pub struct EmissionLog {
    inner: Arc<Mutex<Vec<EmittedRecord>>>,
}

impl EmissionLog {
    /// Number of emissions observed so far.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    /// Returns `true` if nothing has been emitted yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    /// Copies out every emission observed so far, in order.
    #[must_use]
    pub fn snapshot(&self) -> Vec<EmittedRecord> {
        self.inner.lock().clone()
    }
}

/// [`RecordEmitter`] that appends every emission to a shared log.
pub struct CollectingEmitter {
    log: EmissionLog,
}

impl CollectingEmitter {
    /// Creates an emitter and the shared log it appends to.
    #[must_use]
    pub fn new() -> (Self, EmissionLog) {
        let log = EmissionLog::default();
        (Self { log: log.clone() }, log)
    }
}

impl RecordEmitter for CollectingEmitter {
    fn emit(&mut self, shard_id: &ShardId, record: &Record, is_retry: bool) {
        self.log.inner.lock().push(EmittedRecord {
            shard_id: shard_id.clone(),
            record: record.clone(),
            is_retry,
        });
    }
}
