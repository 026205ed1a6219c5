//! Snapshot table + delta log storage.
//!
//! One scope owns two colocated structures: a latest-value table keyed by
//! object name, and an append-only delta log whose ids the store assigns.
//! `SnapshotStore::commit` mutates both as one atomic unit.

pub mod error;
pub mod memory;
pub mod redis_store;
pub mod store;

#[cfg(feature = "test-utils")]
pub mod testutil;

pub use error::{CacheError, Result};
pub use memory::MemoryStore;
pub use redis_store::RedisStore;
pub use store::{DeltaRecord, DeltaTail, RawSnapshot, SnapshotStore};
