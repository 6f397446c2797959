//! Key layout for coordination-store backends.
//!
//! All of a stream's coordination state lives under one namespace:
//!
//! ```text
//! {namespace}/shards                     — the shard-list document
//! {namespace}/checkpoints/{shard_id}     — one sequence number per shard
//! ```

use shoal_core::ShardId;

/// Namespace-prefixed key construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyLayout {
    namespace: String,
}

impl KeyLayout {
    /// Creates a layout rooted at `namespace` (trailing slashes trimmed).
    #[must_use]
    pub fn new(namespace: impl Into<String>) -> Self {
        let mut namespace = namespace.into();
        while namespace.ends_with('/') {
            namespace.pop();
        }
        Self { namespace }
    }

    /// The configured namespace.
    #[must_use]
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Key of the shard-list document.
    #[must_use]
    pub fn shard_list_key(&self) -> String {
        format!("{}/shards", self.namespace)
    }

    /// Key of one shard's committed checkpoint.
    #[must_use]
    pub fn checkpoint_key(&self, shard_id: &ShardId) -> String {
        format!("{}/checkpoints/{}", self.namespace, shard_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_construction() {
        let layout = KeyLayout::new("streams/orders");
        assert_eq!(layout.shard_list_key(), "streams/orders/shards");
        assert_eq!(
            layout.checkpoint_key(&ShardId::new("shard-1")),
            "streams/orders/checkpoints/shard-1"
        );
    }

    #[test]
    fn test_trailing_slash_is_trimmed() {
        let layout = KeyLayout::new("ns/");
        assert_eq!(layout.namespace(), "ns");
        assert_eq!(layout.shard_list_key(), "ns/shards");
    }
}
