//! Read side: one snapshot, then a gapless ordered tail of deltas.
//!
//! The snapshot table carries the id of the last delta folded into it, and a
//! commit moves both together. Reading the table and then tailing the delta
//! log strictly after that id therefore neither skips nor repeats a change.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use shasta_cache::{CacheError, DeltaTail, SnapshotStore};
use shasta_core::wire::{decode_envelope, decode_value};
use shasta_core::{
    Envelope, Instrumentation, Message, ObjectIdentifier, Phase, ScopeKey, ScopeKeys, SequenceId,
    Snapshot, TuningConfig,
};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::error::SubscriberError;
use crate::queue::MessageQueue;

#[derive(Debug, Clone)]
pub struct SubscriberOptions {
    /// Longest a tail read blocks; also how quickly `disconnect` is noticed.
    pub tail_block: Duration,
    pub delta_batch: usize,
    pub instrumentation: Instrumentation,
}

impl Default for SubscriberOptions {
    fn default() -> Self {
        Self::from_tuning(&TuningConfig::default())
    }
}

impl SubscriberOptions {
    pub fn from_tuning(tuning: &TuningConfig) -> Self {
        Self {
            tail_block: tuning.tail_block(),
            delta_batch: tuning.delta_batch,
            instrumentation: if tuning.instrumentation {
                Instrumentation::enabled()
            } else {
                Instrumentation::disabled()
            },
        }
    }
}

pub struct Subscriber<S: SnapshotStore + 'static> {
    store: Arc<S>,
    options: SubscriberOptions,
    cancel: Arc<AtomicBool>,
}

/// A live stream of one scope.
pub struct Subscription {
    queue: Arc<MessageQueue>,
    sequence: SequenceId,
    task: JoinHandle<Result<(), SubscriberError>>,
}

impl Subscription {
    /// Sequence id of the bootstrap snapshot.
    pub fn sequence(&self) -> SequenceId {
        self.sequence
    }

    /// Shared handle onto the output queue, for additional consumers.
    pub fn queue(&self) -> Arc<MessageQueue> {
        self.queue.clone()
    }

    pub async fn get(&self) -> Option<Message> {
        self.queue.get().await
    }

    pub fn try_get(&self) -> Option<Message> {
        self.queue.try_get()
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait for the tail task to end and return how it ended.
    pub async fn closed(self) -> Result<(), SubscriberError> {
        match self.task.await {
            Ok(result) => result,
            Err(e) => Err(SubscriberError::TailPanicked(e.to_string())),
        }
    }
}

impl<S: SnapshotStore + 'static> Subscriber<S> {
    pub fn new(store: Arc<S>, options: SubscriberOptions) -> Self {
        Self {
            store,
            options,
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Bootstrap from the scope's snapshot and start tailing its deltas.
    ///
    /// The returned queue yields exactly one `Message::Snapshot` first, then
    /// `Message::Delta`s in delta-log order. Fails with
    /// `MissingSnapshotSequence` if the scope was never committed to.
    pub async fn stream(
        &self,
        identifier: &ObjectIdentifier,
    ) -> Result<Subscription, SubscriberError> {
        if self.cancel.load(Ordering::Acquire) {
            return Err(SubscriberError::Disconnected);
        }
        let instrumentation = &self.options.instrumentation;
        let scope = ScopeKey::of(identifier);
        let keys = scope.keys();

        instrumentation.record(identifier, Phase::SnapshotFetchStarted);
        let snapshot = self.read_snapshot(&scope, &keys).await?;
        instrumentation.record(identifier, Phase::SnapshotFetched);

        let sequence = snapshot.seqno;
        info!(scope = %scope.hex(), seqno = %sequence, entries = snapshot.len(), "Snapshot loaded");

        // Opened before the snapshot is queued so a store that is already gone
        // fails `stream` instead of the tail task.
        let tail = self.store.open_tail().await?;

        let queue = Arc::new(MessageQueue::new());
        queue.put(Message::Snapshot(snapshot));

        let task = tokio::spawn(tail_deltas(
            tail,
            keys,
            sequence,
            queue.clone(),
            self.cancel.clone(),
            self.options.clone(),
        ));

        Ok(Subscription {
            queue,
            sequence,
            task,
        })
    }

    /// Stop every tail started by this subscriber and release the store
    /// handle. Blocked reads notice on their next bounded wait.
    pub async fn disconnect(&self) -> Result<(), SubscriberError> {
        self.cancel.store(true, Ordering::Release);
        self.store.close().await?;
        info!("Subscriber disconnected");
        Ok(())
    }

    async fn read_snapshot(
        &self,
        scope: &ScopeKey,
        keys: &ScopeKeys,
    ) -> Result<Snapshot, SubscriberError> {
        let raw = self.store.read_snapshot(keys).await?;
        let seqno = raw
            .seqno
            .ok_or_else(|| SubscriberError::MissingSnapshotSequence(scope.hex()))?;

        let entries = raw
            .fields
            .into_iter()
            .map(|(name, bytes)| {
                decode_envelope(&bytes)
                    .map(|envelope| (name, envelope))
                    .map_err(SubscriberError::Decode)
            })
            .collect::<Result<BTreeMap<String, Envelope>, _>>()?;

        Ok(Snapshot { seqno, entries })
    }
}

async fn tail_deltas(
    tail: Box<dyn DeltaTail>,
    keys: ScopeKeys,
    mut after: SequenceId,
    queue: Arc<MessageQueue>,
    cancel: Arc<AtomicBool>,
    options: SubscriberOptions,
) -> Result<(), SubscriberError> {
    let result = run_tail(&*tail, &keys, &mut after, &queue, &cancel, &options).await;
    queue.close();

    match result {
        Ok(()) => {
            debug!(key = keys.deltas.as_str(), after = %after, "Tail stopped");
            Ok(())
        }
        Err(e) if e.is_connection_closed() => {
            debug!(key = keys.deltas.as_str(), "Tail connection closed");
            Ok(())
        }
        Err(CacheError::Core(e)) => {
            error!(key = keys.deltas.as_str(), error = %e, "Undecodable delta, tail stopped");
            Err(SubscriberError::Decode(e))
        }
        Err(e) => {
            error!(key = keys.deltas.as_str(), error = %e, "Tail failed");
            Err(SubscriberError::StoreUnavailable(e))
        }
    }
}

async fn run_tail(
    tail: &dyn DeltaTail,
    keys: &ScopeKeys,
    after: &mut SequenceId,
    queue: &MessageQueue,
    cancel: &AtomicBool,
    options: &SubscriberOptions,
) -> Result<(), CacheError> {
    while !cancel.load(Ordering::Acquire) {
        let records = tail
            .read_deltas(keys, *after, options.delta_batch, options.tail_block)
            .await?;

        for record in records {
            let value = decode_value(&record.value)?;
            if let Some(identifier) = value.identifier.as_ref() {
                options
                    .instrumentation
                    .record(identifier, Phase::DeltaDelivered);
            }
            *after = record.id;
            if !queue.put(Message::Delta(Envelope::new(value, record.id))) {
                return Ok(());
            }
        }
    }
    Ok(())
}
