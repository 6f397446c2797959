//! Coordination-store boundary for the Shoal shard-consumer engine.
//!
//! Defines the durable key store every worker synchronizes through
//! ([`CoordinationStore`]), the persisted shard-list document
//! ([`ShardListSnapshot`]), the key layout backends persist under
//! ([`KeyLayout`]), and an in-memory implementation
//! ([`MemoryCoordinationStore`]) for tests and single-process runs.

pub mod layout;
pub mod memory;
pub mod snapshot;
pub mod store;

pub use layout::KeyLayout;
pub use memory::MemoryCoordinationStore;
pub use snapshot::{ShardListEntry, ShardListSnapshot};
pub use store::{CoordinationStore, StoreError, TopologyWatcher};
