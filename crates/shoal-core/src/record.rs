//! Shard identifiers and stream records.

use std::fmt;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::sequence::SequenceNumber;

/// Unique identifier of a shard within a stream.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ShardId(pub String);

impl ShardId {
    /// Creates a new shard identifier.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the inner string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ShardId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ShardId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for ShardId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// A single record read from a shard.
///
/// Carries the source-assigned sequence number, the partition key the
/// producer wrote it with, and the opaque payload. Cloning is cheap: the
/// payload is reference-counted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    sequence_number: SequenceNumber,
    partition_key: String,
    data: Bytes,
}

impl Record {
    /// Creates a record.
    #[must_use]
    pub fn new(
        sequence_number: impl Into<SequenceNumber>,
        partition_key: impl Into<String>,
        data: impl Into<Bytes>,
    ) -> Self {
        Self {
            sequence_number: sequence_number.into(),
            partition_key: partition_key.into(),
            data: data.into(),
        }
    }

    /// The record's position within its shard.
    #[must_use]
    pub fn sequence_number(&self) -> &SequenceNumber {
        &self.sequence_number
    }

    /// The producer-assigned partition key.
    #[must_use]
    pub fn partition_key(&self) -> &str {
        &self.partition_key
    }

    /// The record payload.
    #[must_use]
    pub fn data(&self) -> &Bytes {
        &self.data
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_accessors() {
        let record = Record::new("42", "key-a", Bytes::from_static(b"payload"));
        assert_eq!(record.sequence_number().as_str(), "42");
        assert_eq!(record.partition_key(), "key-a");
        assert_eq!(record.data().as_ref(), b"payload");
    }

    #[test]
    fn test_shard_id_display() {
        let id = ShardId::new("shardId-000000000001");
        assert_eq!(id.to_string(), "shardId-000000000001");
        assert_eq!(id.as_str(), "shardId-000000000001");
    }
}
