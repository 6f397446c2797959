//! Error types for the worker facade.
//!
//! Every variant here is fatal for the worker task: either the coordinator
//! cannot establish a trustworthy view of the shard topology (continuing
//! would risk two workers believing they own the same shard), or local
//! bookkeeping has been caught out of sync with the assignment, which
//! means checkpoint safety can no longer be argued. Transient store
//! failures never surface as these errors — checkpoint flushes log a
//! warning and retry on the next cycle, and late acks or fails for
//! reassigned shards are silently ignored.

use shoal_core::ShardId;

/// Fatal coordination failures.
#[derive(Debug, thiserror::Error)]
pub enum CoordinationError {
    /// A safe shard list could not be read from or published to the
    /// coordination store.
    ShardList(String),

    /// The topology watch could not be re-armed; changes would go
    /// unnoticed from here on.
    WatchLost(String),

    /// A shard was referenced that this worker has no tracker for —
    /// assignment bookkeeping is broken.
    ShardNotAssigned(ShardId),

    /// An operation that needs an open coordination session was called
    /// while inactive.
    NotActive(&'static str),

    /// Worker index/count pair that cannot describe a valid slot.
    WorkerSlot {
        /// The requested worker index.
        index: usize,
        /// The total worker count.
        count: usize,
    },

    /// The record source rejected a seek or failed while bootstrapping.
    Source(String),
}

impl std::fmt::Display for CoordinationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ShardList(msg) => {
                write!(f, "cannot establish a trusted shard list: {msg}")
            }
            Self::WatchLost(msg) => {
                write!(f, "failed to re-arm the topology watch: {msg}")
            }
            Self::ShardNotAssigned(shard_id) => {
                write!(f, "shard '{shard_id}' is not assigned to this worker")
            }
            Self::NotActive(operation) => {
                write!(f, "'{operation}' requires an active coordination session")
            }
            Self::WorkerSlot { index, count } => {
                write!(f, "worker index {index} is not a valid slot out of {count}")
            }
            Self::Source(msg) => write!(f, "record source error: {msg}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_messages() {
        assert_eq!(
            CoordinationError::ShardNotAssigned(ShardId::new("s-1")).to_string(),
            "shard 's-1' is not assigned to this worker"
        );
        assert_eq!(
            CoordinationError::NotActive("rebalance").to_string(),
            "'rebalance' requires an active coordination session"
        );
        assert_eq!(
            CoordinationError::WorkerSlot { index: 3, count: 2 }.to_string(),
            "worker index 3 is not a valid slot out of 2"
        );
    }
}
