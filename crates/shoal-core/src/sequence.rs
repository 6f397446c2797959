//! Sequence numbers ordered by numeric value.
//!
//! Stream sources hand out record positions as unbounded decimal strings.
//! Comparing them lexicographically is wrong the moment the width changes
//! (`"99"` sorts after `"100"`), so [`SequenceNumber`] implements ordering,
//! equality, and hashing over the numeric value while preserving the
//! original text for display and persistence.

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

/// A record's position within its shard.
///
/// Opaque decimal-digit string, strictly increasing in emission order
/// within a shard. Two values with different text but the same numeric
/// value (`"000"` and `"0"`) compare equal.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SequenceNumber(String);

impl SequenceNumber {
    /// Creates a sequence number from its decimal-string form.
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        let value = value.into();
        debug_assert!(
            !value.is_empty() && value.bytes().all(|b| b.is_ascii_digit()),
            "sequence numbers are non-empty decimal strings, got {value:?}"
        );
        Self(value)
    }

    /// The numeric zero, used to seed shards that have no committed
    /// checkpoint yet.
    #[must_use]
    pub fn zero() -> Self {
        Self("0".to_string())
    }

    /// Returns the original string form.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The significant digits: leading zeros stripped, `"0"` for zero.
    fn digits(&self) -> &str {
        let trimmed = self.0.trim_start_matches('0');
        if trimmed.is_empty() {
            "0"
        } else {
            trimmed
        }
    }
}

impl Ord for SequenceNumber {
    fn cmp(&self, other: &Self) -> Ordering {
        let (a, b) = (self.digits(), other.digits());
        // Same number of significant digits — plain byte order is numeric
        // order; otherwise the longer value is larger.
        a.len().cmp(&b.len()).then_with(|| a.cmp(b))
    }
}

impl PartialOrd for SequenceNumber {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for SequenceNumber {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for SequenceNumber {}

impl Hash for SequenceNumber {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.digits().hash(state);
    }
}

impl fmt::Display for SequenceNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for SequenceNumber {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for SequenceNumber {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}
