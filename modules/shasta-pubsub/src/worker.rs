//! Ingest side: log partitions in, atomic cache commits out.
//!
//! A supervisor task follows the group assignment and runs one consumer task
//! per owned partition. Within a partition records are committed strictly in
//! offset order; partitions proceed independently.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use shasta_cache::SnapshotStore;
use shasta_core::wire::{decode_identifier, decode_value, encode_value};
use shasta_core::{
    Config, Instrumentation, ObjectIdentifier, Phase, ScopeKeys, SequenceId, TuningConfig, Value,
};
use shasta_log::{Assignment, LogError, LogRecord, Membership, PartitionedLog, StartPosition};
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::error::WorkerError;
use crate::retry::RetryPolicy;

#[derive(Debug, Clone)]
pub struct WorkerOptions {
    pub topic: String,
    pub group_id: String,
    /// Used only when the topic has to be created.
    pub partitions: u32,
    pub fetch_wait: Duration,
    pub fetch_batch: usize,
    pub start_position: StartPosition,
    pub retry: RetryPolicy,
    pub instrumentation: Instrumentation,
}

impl WorkerOptions {
    pub fn new(topic: impl Into<String>, group_id: impl Into<String>) -> Self {
        Self::from_tuning(topic, group_id, &TuningConfig::default())
    }

    pub fn from_config(config: &Config, tuning: &TuningConfig) -> Self {
        Self::from_tuning(config.topic.clone(), config.group_id.clone(), tuning)
    }

    fn from_tuning(
        topic: impl Into<String>,
        group_id: impl Into<String>,
        tuning: &TuningConfig,
    ) -> Self {
        Self {
            topic: topic.into(),
            group_id: group_id.into(),
            partitions: tuning.partitions,
            fetch_wait: tuning.fetch_wait(),
            fetch_batch: tuning.fetch_batch,
            start_position: StartPosition::Earliest,
            retry: RetryPolicy::from(&tuning.retry),
            instrumentation: if tuning.instrumentation {
                Instrumentation::enabled()
            } else {
                Instrumentation::disabled()
            },
        }
    }
}

struct Running {
    member_id: String,
    supervisor: JoinHandle<()>,
}

pub struct Worker<S, L>
where
    S: SnapshotStore + 'static,
    L: PartitionedLog + 'static,
{
    inner: Arc<Inner<S, L>>,
    running: Mutex<Option<Running>>,
}

struct Inner<S, L> {
    store: Arc<S>,
    log: Arc<L>,
    options: WorkerOptions,
    stop: AtomicBool,
    joined: watch::Sender<bool>,
}

impl<S, L> Worker<S, L>
where
    S: SnapshotStore + 'static,
    L: PartitionedLog + 'static,
{
    pub fn new(store: Arc<S>, log: Arc<L>, options: WorkerOptions) -> Self {
        let (joined, _) = watch::channel(false);
        Self {
            inner: Arc::new(Inner {
                store,
                log,
                options,
                stop: AtomicBool::new(false),
                joined,
            }),
            running: Mutex::new(None),
        }
    }

    pub fn options(&self) -> &WorkerOptions {
        &self.inner.options
    }

    /// Apply one event to the cache. See [`SnapshotStore::commit`] for the
    /// atomic unit this performs.
    pub async fn commit(
        &self,
        identifier: &ObjectIdentifier,
        value: &Value,
    ) -> Result<SequenceId, WorkerError> {
        self.inner.commit(identifier, value).await
    }

    /// Join the consumer group and start consuming. Returns once the
    /// membership exists; use [`Worker::await_joined`] to wait for the
    /// partition tasks.
    pub async fn start(&self) -> Result<(), WorkerError> {
        let mut running = self.running.lock().await;
        if running.is_some() {
            warn!("Worker already started");
            return Ok(());
        }
        let opts = &self.inner.options;
        self.inner.stop.store(false, Ordering::Release);
        self.inner
            .log
            .create_topic(&opts.topic, opts.partitions)
            .await?;
        let membership = self.inner.log.join(&opts.group_id, &opts.topic).await?;
        info!(
            group = opts.group_id.as_str(),
            topic = opts.topic.as_str(),
            member = membership.member_id.as_str(),
            "Worker joined consumer group"
        );

        let member_id = membership.member_id.clone();
        let supervisor = tokio::spawn(supervise(self.inner.clone(), membership));
        *running = Some(Running {
            member_id,
            supervisor,
        });
        Ok(())
    }

    /// Whether the worker is a group member with its partition tasks running.
    pub fn is_joined(&self) -> bool {
        *self.inner.joined.borrow()
    }

    /// Resolves once [`Worker::is_joined`] turns true.
    pub async fn await_joined(&self) {
        let mut rx = self.inner.joined.subscribe();
        // The sender lives in `inner`, which outlives this call.
        let _ = rx.wait_for(|joined| *joined).await;
    }

    /// Stop consuming, leave the group and close the store handle. Safe to
    /// call more than once, and after a failed `start`.
    pub async fn shutdown(&self) -> Result<(), WorkerError> {
        self.inner.stop.store(true, Ordering::Release);
        let running = self.running.lock().await.take();

        if let Some(Running {
            member_id,
            supervisor,
        }) = running
        {
            if let Err(e) = supervisor.await {
                error!(error = %e, "Worker supervisor panicked");
            }
            let opts = &self.inner.options;
            match self
                .inner
                .log
                .leave(&opts.group_id, &opts.topic, &member_id)
                .await
            {
                Ok(()) | Err(LogError::NotMember { .. }) | Err(LogError::Closed) => {}
                Err(e) => warn!(error = %e, "Failed to leave consumer group"),
            }
        }
        self.inner.joined.send_replace(false);

        if let Err(e) = self.inner.store.close().await {
            warn!(error = %e, "Failed to close store");
        }
        info!("Worker shut down");
        Ok(())
    }
}

impl<S, L> Inner<S, L>
where
    S: SnapshotStore + 'static,
    L: PartitionedLog + 'static,
{
    fn stopped(&self) -> bool {
        self.stop.load(Ordering::Acquire)
    }

    async fn commit(
        &self,
        identifier: &ObjectIdentifier,
        value: &Value,
    ) -> Result<SequenceId, WorkerError> {
        if let Err(e) = identifier.validate_name() {
            error!(error = %e, "Dropping event with malformed identifier");
            return Err(WorkerError::MalformedIdentifier(e.to_string()));
        }
        let keys = ScopeKeys::for_identifier(identifier);
        let instrumentation = &self.options.instrumentation;

        instrumentation.record(identifier, Phase::CommitStarted);
        let seqno = self
            .store
            .commit(&keys, &identifier.name, &encode_value(value))
            .await
            .map_err(|e| {
                error!(
                    key = keys.deltas.as_str(),
                    name = identifier.name.as_str(),
                    error = %e,
                    "Commit failed"
                );
                WorkerError::CommitFailure(e)
            })?;
        instrumentation.record(identifier, Phase::Committed);

        debug!(
            key = keys.deltas.as_str(),
            name = identifier.name.as_str(),
            seqno = %seqno,
            "Committed"
        );
        Ok(seqno)
    }

    /// Decode and commit one record, retrying commit failures per policy.
    /// Shutdown cuts the schedule short and returns the last failure.
    async fn handle(&self, record: &LogRecord) -> Result<SequenceId, WorkerError> {
        let identifier = decode_identifier(&record.key).map_err(WorkerError::Decode)?;
        let value = decode_value(&record.value).map_err(WorkerError::Decode)?;
        self.options
            .instrumentation
            .record(&identifier, Phase::Consumed);

        let mut attempt = 1;
        loop {
            match self.commit(&identifier, &value).await {
                Ok(seqno) => return Ok(seqno),
                Err(e) if e.is_retryable() => match self.options.retry.backoff(attempt) {
                    Some(delay) if !self.stopped() => {
                        warn!(
                            attempt,
                            delay_ms = delay.as_millis() as u64,
                            error = %e,
                            "Retrying commit"
                        );
                        tokio::time::sleep(delay).await;
                        attempt += 1;
                    }
                    _ => return Err(e),
                },
                Err(e) => return Err(e),
            }
        }
    }

    async fn start_offset(&self, partition: u32) -> Result<u64, LogError> {
        let opts = &self.options;
        if let Some(next) = self
            .log
            .committed_offset(&opts.group_id, &opts.topic, partition)
            .await?
        {
            return Ok(next);
        }
        match opts.start_position {
            StartPosition::Earliest => Ok(0),
            StartPosition::Latest => self.log.end_offset(&opts.topic, partition).await,
        }
    }
}

struct PartitionTask {
    revoked: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

/// Follow the assignment watch until shutdown, starting and stopping
/// partition tasks to match.
async fn supervise<S, L>(inner: Arc<Inner<S, L>>, mut membership: Membership)
where
    S: SnapshotStore + 'static,
    L: PartitionedLog + 'static,
{
    let mut tasks: HashMap<u32, PartitionTask> = HashMap::new();

    while !inner.stopped() {
        let assignment = membership.assignments.borrow_and_update().clone();
        reconcile(&inner, &mut tasks, &assignment).await;
        inner.joined.send_replace(true);

        // Wake up on a rebalance, or on the fetch cadence to notice shutdown.
        loop {
            if inner.stopped() {
                break;
            }
            match tokio::time::timeout(inner.options.fetch_wait, membership.assignments.changed())
                .await
            {
                Ok(Ok(())) => break,
                Ok(Err(_)) => {
                    warn!(member = membership.member_id.as_str(), "Assignment channel closed");
                    inner.stop.store(true, Ordering::Release);
                    break;
                }
                Err(_) => continue,
            }
        }
    }

    for (_, task) in tasks.drain() {
        task.revoked.store(true, Ordering::Release);
        let _ = task.handle.await;
    }
    inner.joined.send_replace(false);
}

async fn reconcile<S, L>(
    inner: &Arc<Inner<S, L>>,
    tasks: &mut HashMap<u32, PartitionTask>,
    assignment: &Assignment,
) where
    S: SnapshotStore + 'static,
    L: PartitionedLog + 'static,
{
    let revoked: Vec<u32> = tasks
        .keys()
        .filter(|p| !assignment.partitions.contains(p))
        .copied()
        .collect();
    for partition in revoked {
        if let Some(task) = tasks.remove(&partition) {
            task.revoked.store(true, Ordering::Release);
            let _ = task.handle.await;
            info!(partition, generation = assignment.generation, "Partition revoked");
        }
    }

    for &partition in &assignment.partitions {
        if tasks.contains_key(&partition) {
            continue;
        }
        let revoked = Arc::new(AtomicBool::new(false));
        let handle = tokio::spawn(consume_partition(inner.clone(), partition, revoked.clone()));
        tasks.insert(partition, PartitionTask { revoked, handle });
        info!(partition, generation = assignment.generation, "Partition assigned");
    }
}

async fn consume_partition<S, L>(inner: Arc<Inner<S, L>>, partition: u32, revoked: Arc<AtomicBool>)
where
    S: SnapshotStore + 'static,
    L: PartitionedLog + 'static,
{
    let opts = &inner.options;
    let should_stop = || inner.stopped() || revoked.load(Ordering::Acquire);

    let mut offset = match inner.start_offset(partition).await {
        Ok(offset) => offset,
        Err(e) => {
            error!(partition, error = %e, "Failed to resolve start offset");
            return;
        }
    };
    debug!(partition, offset, "Consuming partition");

    while !should_stop() {
        let batch = match inner
            .log
            .fetch(&opts.topic, partition, offset, opts.fetch_batch, opts.fetch_wait)
            .await
        {
            Ok(batch) => batch,
            Err(LogError::Closed) => {
                info!(partition, "Log closed, partition consumer exiting");
                return;
            }
            Err(e) => {
                warn!(partition, error = %e, "Fetch failed");
                tokio::time::sleep(opts.fetch_wait).await;
                continue;
            }
        };

        for record in batch {
            match inner.handle(&record).await {
                Ok(_) => {}
                // Leave the offset where it is so the next owner retries it.
                Err(WorkerError::CommitFailure(e)) if inner.stopped() => {
                    warn!(
                        partition,
                        offset = record.offset,
                        error = %e,
                        "Commit interrupted by shutdown"
                    );
                    break;
                }
                Err(WorkerError::CommitFailure(e)) => {
                    error!(
                        partition,
                        offset = record.offset,
                        error = %e,
                        "Commit retries exhausted, skipping record"
                    );
                }
                Err(e) => {
                    warn!(partition, offset = record.offset, error = %e, "Dropping record");
                }
            }

            offset = record.offset + 1;
            if let Err(e) = inner
                .log
                .commit_offset(&opts.group_id, &opts.topic, partition, offset)
                .await
            {
                warn!(partition, offset, error = %e, "Failed to commit offset");
            }
            if should_stop() {
                break;
            }
        }
    }
    debug!(partition, offset, "Partition consumer stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use shasta_cache::MemoryStore;
    use shasta_log::MemoryLog;

    fn worker() -> Worker<MemoryStore, MemoryLog> {
        let options = WorkerOptions {
            fetch_wait: Duration::from_millis(20),
            ..WorkerOptions::new("t", "g")
        };
        Worker::new(
            Arc::new(MemoryStore::new()),
            Arc::new(MemoryLog::new()),
            options,
        )
    }

    #[tokio::test]
    async fn test_commit_rejects_reserved_names() {
        let w = worker();
        for name in ["", "seqno"] {
            let id = ObjectIdentifier::new("A", "T", "S", name);
            let err = w.commit(&id, &Value::new(id.clone(), b"x".to_vec())).await.unwrap_err();
            assert!(matches!(err, WorkerError::MalformedIdentifier(_)));
            assert!(!err.is_retryable());
        }
    }

    #[tokio::test]
    async fn test_commit_returns_increasing_ids() {
        let w = worker();
        let id = ObjectIdentifier::new("A", "T", "S", "N");
        let v = Value::new(id.clone(), b"x".to_vec());
        let a = w.commit(&id, &v).await.unwrap();
        let b = w.commit(&id, &v).await.unwrap();
        assert!(b > a);
    }

    #[tokio::test]
    async fn test_start_join_shutdown() {
        let w = worker();
        assert!(!w.is_joined());
        w.start().await.unwrap();
        w.start().await.unwrap();
        tokio::time::timeout(Duration::from_secs(5), w.await_joined())
            .await
            .unwrap();
        assert!(w.is_joined());

        w.shutdown().await.unwrap();
        w.shutdown().await.unwrap();
        assert!(!w.is_joined());
    }

    #[tokio::test]
    async fn test_shutdown_without_start() {
        let w = worker();
        w.shutdown().await.unwrap();
        assert!(!w.is_joined());
    }
}
