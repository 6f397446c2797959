//! Bounded per-record retry policy.

/// Decides when a repeatedly failing record becomes poison.
///
/// The limit counts re-emissions: a record may be re-emitted up to `limit`
/// times before a further failure evicts it. A limit of zero means the
/// first failure is already poison.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    limit: u32,
}

impl RetryPolicy {
    /// Creates a policy with the given retry limit.
    #[must_use]
    pub fn new(limit: u32) -> Self {
        Self { limit }
    }

    /// The configured retry limit.
    #[must_use]
    pub fn limit(&self) -> u32 {
        self.limit
    }

    /// Returns `true` once a record with `retry_count` prior re-emissions
    /// has exhausted its budget and must be evicted instead of re-queued.
    #[must_use]
    pub fn should_evict(&self, retry_count: u32) -> bool {
        retry_count >= self.limit
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_eviction_boundary() {
        let policy = RetryPolicy::new(3);
        assert!(!policy.should_evict(0));
        assert!(!policy.should_evict(2));
        assert!(policy.should_evict(3));
        assert!(policy.should_evict(4));
    }

    #[test]
    fn test_zero_limit_never_retries() {
        let policy = RetryPolicy::new(0);
        assert!(policy.should_evict(0));
    }
}
