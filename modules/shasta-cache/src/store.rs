//! Storage traits.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use shasta_core::{ScopeKeys, SequenceId};

use crate::error::Result;

/// A snapshot table as read from the store, with the reserved `seqno` slot
/// lifted out of the field map.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawSnapshot {
    /// `None` when the scope has never been committed to.
    pub seqno: Option<SequenceId>,
    /// Object name -> encoded `Envelope`.
    pub fields: HashMap<String, Vec<u8>>,
}

/// One delta log record: store-assigned id and the encoded `Value`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeltaRecord {
    pub id: SequenceId,
    pub value: Vec<u8>,
}

/// Snapshot table + delta log store.
///
/// Implemented by `RedisStore` (production) and `MemoryStore` (tests, dev).
/// Also implemented for `Arc<S>` so one store can back several components.
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// Atomically, in this order: append `encoded_value` to the delta log and
    /// take the id the log assigns; write the envelope `{value, id}` under
    /// `name` in the snapshot table; write `id` into the reserved `seqno` slot.
    /// Either all three effects become visible or none do.
    async fn commit(&self, keys: &ScopeKeys, name: &str, encoded_value: &[u8])
        -> Result<SequenceId>;

    /// Read the whole snapshot table of one scope.
    async fn read_snapshot(&self, keys: &ScopeKeys) -> Result<RawSnapshot>;

    /// A handle dedicated to blocking delta reads, so a long tail read never
    /// stalls commits or snapshot reads issued through `self`.
    async fn open_tail(&self) -> Result<Box<dyn DeltaTail>>;

    /// Drop a scope's snapshot table and delta log in one step, returning
    /// how many of the two existed. Stop live tails of the scope first: a
    /// later commit restarts the log's ids.
    async fn delete_scope(&self, keys: &ScopeKeys) -> Result<usize>;

    /// Release the connection. Later calls through this handle fail with
    /// `CacheError::ConnectionClosed`. Closing twice is a no-op.
    async fn close(&self) -> Result<()>;
}

/// Blocking reads of one or more delta logs.
#[async_trait]
pub trait DeltaTail: Send + Sync {
    /// Records with id strictly greater than `after`, oldest first, at most
    /// `count`. Waits up to `block` for the first record; returns an empty
    /// batch when the wait elapses. A zero `block` never waits.
    async fn read_deltas(
        &self,
        keys: &ScopeKeys,
        after: SequenceId,
        count: usize,
        block: Duration,
    ) -> Result<Vec<DeltaRecord>>;
}

#[async_trait]
impl<S: SnapshotStore + ?Sized> SnapshotStore for Arc<S> {
    async fn commit(
        &self,
        keys: &ScopeKeys,
        name: &str,
        encoded_value: &[u8],
    ) -> Result<SequenceId> {
        (**self).commit(keys, name, encoded_value).await
    }

    async fn read_snapshot(&self, keys: &ScopeKeys) -> Result<RawSnapshot> {
        (**self).read_snapshot(keys).await
    }

    async fn open_tail(&self) -> Result<Box<dyn DeltaTail>> {
        (**self).open_tail().await
    }

    async fn delete_scope(&self, keys: &ScopeKeys) -> Result<usize> {
        (**self).delete_scope(keys).await
    }

    async fn close(&self) -> Result<()> {
        (**self).close().await
    }
}
