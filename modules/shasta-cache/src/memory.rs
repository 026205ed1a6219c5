//! In-process sharded store.
//!
//! Keys route to a shard by their hash tag, exactly like a cluster would
//! route them, and a commit holds one shard lock across the delta append and
//! both table writes. Keys of one scope that failed to colocate would surface
//! as `CacheError::CrossSlot` rather than as a torn commit.

use std::collections::HashMap;
use std::hash::Hasher;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use siphasher::sip::SipHasher;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::debug;

use shasta_core::keys::SEQNO_FIELD;
use shasta_core::wire::{envelope_prefix, seal_envelope};
use shasta_core::{hash_tag, ScopeKeys, SequenceId};

use crate::error::{CacheError, Result};
use crate::store::{DeltaRecord, DeltaTail, RawSnapshot, SnapshotStore};

const DEFAULT_SHARDS: usize = 16;

#[derive(Default)]
struct Shard {
    tables: HashMap<String, HashMap<String, Vec<u8>>>,
    logs: HashMap<String, Vec<DeltaRecord>>,
}

struct ShardCell {
    state: Mutex<Shard>,
    appended: Notify,
}

/// A handle onto a shared in-memory store.
///
/// `Clone` shares the handle (closing one closes both); `handle()` opens an
/// independent handle onto the same data, like a second connection.
#[derive(Clone)]
pub struct MemoryStore {
    shards: Arc<Vec<ShardCell>>,
    closed: Arc<AtomicBool>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_shards(DEFAULT_SHARDS)
    }

    pub fn with_shards(count: usize) -> Self {
        let shards = (0..count.max(1))
            .map(|_| ShardCell {
                state: Mutex::new(Shard::default()),
                appended: Notify::new(),
            })
            .collect();
        Self {
            shards: Arc::new(shards),
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// A new connection onto the same data.
    pub fn handle(&self) -> Self {
        Self {
            shards: self.shards.clone(),
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    /// Shard a key routes to.
    pub fn shard_of(&self, key: &str) -> usize {
        let mut hasher = SipHasher::new();
        hasher.write(hash_tag(key).as_bytes());
        (hasher.finish() % self.shards.len() as u64) as usize
    }

    /// Number of records in one delta log (test and inspection helper).
    pub fn delta_len(&self, keys: &ScopeKeys) -> usize {
        let cell = &self.shards[self.shard_of(&keys.deltas)];
        lock(cell)
            .logs
            .get(&keys.deltas)
            .map(Vec::len)
            .unwrap_or(0)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(CacheError::ConnectionClosed);
        }
        Ok(())
    }

    fn colocated_shard(&self, keys: &ScopeKeys) -> Result<usize> {
        if hash_tag(&keys.snapshot) != hash_tag(&keys.deltas) {
            return Err(CacheError::CrossSlot(
                keys.snapshot.clone(),
                keys.deltas.clone(),
            ));
        }
        Ok(self.shard_of(&keys.snapshot))
    }
}

fn lock(cell: &ShardCell) -> MutexGuard<'_, Shard> {
    cell.state.lock().unwrap_or_else(|p| p.into_inner())
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[async_trait]
impl SnapshotStore for MemoryStore {
    async fn commit(
        &self,
        keys: &ScopeKeys,
        name: &str,
        encoded_value: &[u8],
    ) -> Result<SequenceId> {
        self.ensure_open()?;
        if name == SEQNO_FIELD {
            return Err(CacheError::ReservedField(name.to_string()));
        }
        let cell = &self.shards[self.colocated_shard(keys)?];
        let prefix = envelope_prefix(encoded_value);

        let id = {
            let mut guard = lock(cell);
            let shard = &mut *guard;

            let log = shard.logs.entry(keys.deltas.clone()).or_default();
            let last = log.last().map(|r| r.id).unwrap_or(SequenceId::ZERO);
            let id = last.next_after(now_millis());
            log.push(DeltaRecord {
                id,
                value: encoded_value.to_vec(),
            });

            let table = shard.tables.entry(keys.snapshot.clone()).or_default();
            table.insert(name.to_string(), seal_envelope(&prefix, &id));
            table.insert(SEQNO_FIELD.to_string(), id.to_string().into_bytes());
            id
        };

        cell.appended.notify_waiters();
        debug!(key = keys.deltas.as_str(), seqno = %id, "Committed to memory store");
        Ok(id)
    }

    async fn read_snapshot(&self, keys: &ScopeKeys) -> Result<RawSnapshot> {
        self.ensure_open()?;
        let cell = &self.shards[self.shard_of(&keys.snapshot)];
        let mut fields = lock(cell)
            .tables
            .get(&keys.snapshot)
            .cloned()
            .unwrap_or_default();

        let seqno = match fields.remove(SEQNO_FIELD) {
            Some(raw) => Some(
                String::from_utf8_lossy(&raw)
                    .parse::<SequenceId>()
                    .map_err(CacheError::from)?,
            ),
            None => None,
        };
        Ok(RawSnapshot { seqno, fields })
    }

    async fn open_tail(&self) -> Result<Box<dyn DeltaTail>> {
        self.ensure_open()?;
        Ok(Box::new(self.handle()))
    }

    async fn delete_scope(&self, keys: &ScopeKeys) -> Result<usize> {
        self.ensure_open()?;
        let cell = &self.shards[self.colocated_shard(keys)?];
        let mut shard = lock(cell);
        let removed = usize::from(shard.tables.remove(&keys.snapshot).is_some())
            + usize::from(shard.logs.remove(&keys.deltas).is_some());
        debug!(key = keys.snapshot.as_str(), removed, "Deleted scope from memory store");
        Ok(removed)
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::Release);
        Ok(())
    }
}

#[async_trait]
impl DeltaTail for MemoryStore {
    async fn read_deltas(
        &self,
        keys: &ScopeKeys,
        after: SequenceId,
        count: usize,
        block: Duration,
    ) -> Result<Vec<DeltaRecord>> {
        let cell = &self.shards[self.shard_of(&keys.deltas)];
        let deadline = Instant::now() + block;

        loop {
            // Register interest before looking, so an append between the
            // check and the wait still wakes us.
            let notified = cell.appended.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            self.ensure_open()?;
            let batch: Vec<DeltaRecord> = {
                let shard = lock(cell);
                match shard.logs.get(&keys.deltas) {
                    Some(log) => {
                        let start = log.partition_point(|r| r.id <= after);
                        log[start..].iter().take(count.max(1)).cloned().collect()
                    }
                    None => Vec::new(),
                }
            };
            if !batch.is_empty() {
                return Ok(batch);
            }

            let now = Instant::now();
            if block.is_zero() || now >= deadline {
                return Ok(Vec::new());
            }
            if tokio::time::timeout(deadline - now, notified).await.is_err() {
                return Ok(Vec::new());
            }
        }
    }
}
