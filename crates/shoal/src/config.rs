//! Worker configuration.

use std::time::Duration;

use crate::source::InitialPosition;

/// Configuration for one consumer worker.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Coordination-store namespace this stream's state lives under.
    pub namespace: String,

    /// Re-emissions granted to a failing record before it is evicted as
    /// poison. Zero means the first failure already evicts.
    pub retry_limit: u32,

    /// Interval between periodic checkpoint flushes to the store.
    pub flush_interval: Duration,

    /// Where to start reading a shard that has no committed checkpoint.
    pub initial_position: InitialPosition,

    /// Maximum records taken from the fetcher per emission step.
    pub max_records_per_fetch: usize,

    /// Sleep applied when the current shard has nothing to emit, so an
    /// idle worker does not spin.
    pub empty_fetch_backoff: Duration,

    /// Capacity of the bounded ack/fail delivery channel. A full channel
    /// back-pressures the host's delivery path.
    pub delivery_channel_capacity: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            namespace: "shoal".to_string(),
            retry_limit: 3,
            flush_interval: Duration::from_secs(10),
            initial_position: InitialPosition::TrimHorizon,
            max_records_per_fetch: 1,
            empty_fetch_backoff: Duration::from_millis(5),
            delivery_channel_capacity: 256,
        }
    }
}
