//! Source-side collaborator boundary.
//!
//! The engine never talks to the stream service directly. Topology
//! discovery and record transport are behind two traits the embedding
//! host implements: [`StreamLister`] for the periodic shard census and
//! [`RecordFetcher`] for paginated per-shard reads. Both are expected to
//! handle their own transport-level buffering and retries; errors that
//! reach the worker are either survivable (a failed poll, backed off and
//! repeated) or fatal (an invalid seek during bootstrap).

use async_trait::async_trait;

use shoal_core::{Record, SequenceNumber, ShardId};
use shoal_store::ShardListSnapshot;

/// Default read position for shards without a committed checkpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InitialPosition {
    /// Start at the oldest record the source retains.
    #[default]
    TrimHorizon,
    /// Start at the tip, seeing only records produced from now on.
    Latest,
}

/// A concrete position to seek a shard fetcher to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SeekPosition {
    /// The oldest retained record.
    TrimHorizon,
    /// The current tip of the shard.
    Latest,
    /// Immediately after the given sequence number.
    AfterSequence(SequenceNumber),
}

impl From<InitialPosition> for SeekPosition {
    fn from(position: InitialPosition) -> Self {
        match position {
            InitialPosition::TrimHorizon => Self::TrimHorizon,
            InitialPosition::Latest => Self::Latest,
        }
    }
}

impl std::fmt::Display for SeekPosition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::TrimHorizon => write!(f, "trim-horizon"),
            Self::Latest => write!(f, "latest"),
            Self::AfterSequence(sequence) => write!(f, "after-sequence({sequence})"),
        }
    }
}

/// One fetch result from a shard.
#[derive(Debug, Clone, Default)]
pub struct FetchBatch {
    /// Records in sequence order; may be empty.
    pub records: Vec<Record>,
    /// `true` once the shard has been split or merged away: the retained
    /// records still drain, but no new ones will ever appear.
    pub shard_closed: bool,
}

/// Failure from the source-side collaborators.
#[derive(Debug, thiserror::Error)]
#[error("{message}")]
pub struct SourceError {
    message: String,
}

impl SourceError {
    /// Creates an error with the given message.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Periodic shard-topology discovery.
#[async_trait]
pub trait StreamLister: Send + Sync {
    /// Lists the stream's current shards with their lineage edges.
    async fn list_shards(&self) -> Result<ShardListSnapshot, SourceError>;
}

/// Paginated per-shard record transport.
#[async_trait]
pub trait RecordFetcher: Send {
    /// Positions subsequent reads of `shard_id` at `position`.
    async fn seek(&mut self, shard_id: &ShardId, position: &SeekPosition)
        -> Result<(), SourceError>;

    /// Reads up to `max` records from `shard_id`.
    async fn get_next(&mut self, shard_id: &ShardId, max: usize)
        -> Result<FetchBatch, SourceError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_position_maps_to_seek() {
        assert_eq!(
            SeekPosition::from(InitialPosition::TrimHorizon),
            SeekPosition::TrimHorizon
        );
        assert_eq!(
            SeekPosition::from(InitialPosition::Latest),
            SeekPosition::Latest
        );
    }

    #[test]
    fn test_seek_position_display() {
        assert_eq!(
            SeekPosition::AfterSequence(SequenceNumber::new("7")).to_string(),
            "after-sequence(7)"
        );
        assert_eq!(SeekPosition::TrimHorizon.to_string(), "trim-horizon");
    }
}
