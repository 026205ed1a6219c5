//! End-to-end self check.
//!
//! Publishes into an in-process log, lets a worker commit into the chosen
//! store, then verifies a subscriber sees one snapshot with every initial
//! value followed by every update, in order.

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use serde::Serialize;
use shasta_cache::SnapshotStore;
use shasta_core::{
    Config, Instrumentation, Message, ObjectIdentifier, ScopeKey, TuningConfig, Value,
};
use shasta_log::{MemoryLog, PartitionedLog};
use shasta_pubsub::{Publisher, Subscriber, SubscriberOptions, Subscription, Worker, WorkerOptions};
use tracing::info;
use uuid::Uuid;

use crate::backend::Backend;

const TAG: &str = "roundtrip";

#[derive(Debug, Clone)]
pub struct RoundtripOptions {
    /// Distinct names committed before the subscriber bootstraps.
    pub values: usize,
    /// Updates published after the bootstrap.
    pub deltas: usize,
    /// Upper bound on any single wait.
    pub timeout: Duration,
    /// Leave the generated scope in the store afterwards.
    pub keep: bool,
}

impl Default for RoundtripOptions {
    fn default() -> Self {
        Self {
            values: 3,
            deltas: 10,
            timeout: Duration::from_secs(10),
            keep: false,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RoundtripReport {
    pub backend: &'static str,
    pub scope: String,
    pub snapshot_key: String,
    pub deltas_key: String,
    pub snapshot_entries: usize,
    pub snapshot_seqno: String,
    pub deltas: usize,
    pub last_seqno: String,
    /// Whether the scope and the topic were removed afterwards.
    pub cleaned_up: bool,
    pub elapsed_ms: u64,
}

pub async fn run(
    backend: &Backend,
    config: &Config,
    tuning: &TuningConfig,
    options: &RoundtripOptions,
    instrumentation: Instrumentation,
) -> Result<RoundtripReport> {
    if options.values == 0 {
        bail!("roundtrip needs at least one initial value");
    }
    let started = Instant::now();
    let scope = Uuid::new_v4().to_string();
    let id = |name: &str| ObjectIdentifier::new(config.app_id.clone(), TAG, scope.clone(), name);
    let scope_key = ScopeKey::of(&id(""));
    let keys = scope_key.keys();
    info!(
        backend = backend.name(),
        scope = scope.as_str(),
        key = keys.snapshot.as_str(),
        "Starting roundtrip"
    );

    let log = Arc::new(MemoryLog::new());
    let publisher = Publisher::new(log.clone(), config.topic.clone(), tuning.partitions)
        .with_instrumentation(instrumentation.clone());
    publisher.connect().await?;

    let worker = Worker::new(
        Arc::new(backend.open().await?),
        log.clone(),
        WorkerOptions {
            instrumentation: instrumentation.clone(),
            ..WorkerOptions::from_config(config, tuning)
        },
    );
    worker.start().await?;
    tokio::time::timeout(options.timeout, worker.await_joined())
        .await
        .context("Worker did not join its consumer group in time")?;

    let initial: Vec<Value> = (0..options.values)
        .map(|i| {
            let name = format!("obj-{i}");
            Value::new(id(&name), format!("initial-{i}").into_bytes())
        })
        .collect();
    publisher.send_batch(&initial).await?;

    let reader = backend.open().await?;
    wait_for_entries(&*reader, &keys, options.values, options.timeout).await?;

    let subscriber = Subscriber::new(
        Arc::new(backend.open().await?),
        SubscriberOptions {
            instrumentation: instrumentation.clone(),
            ..SubscriberOptions::from_tuning(tuning)
        },
    );
    let target = id("obj-0");
    let sub = subscriber.stream(&target).await?;

    let snapshot = match next(&sub, options.timeout).await? {
        Message::Snapshot(snapshot) => snapshot,
        Message::Delta(_) => bail!("first message was a delta, expected the snapshot"),
    };
    if snapshot.len() != options.values {
        bail!(
            "snapshot has {} entries, expected {}",
            snapshot.len(),
            options.values
        );
    }
    for (i, value) in initial.iter().enumerate() {
        let name = format!("obj-{i}");
        let entry = snapshot
            .get(&name)
            .with_context(|| format!("snapshot is missing '{name}'"))?;
        if entry.data() != value.data.as_slice() {
            bail!("snapshot entry '{name}' has the wrong payload");
        }
    }

    for i in 0..options.deltas {
        publisher
            .send(&Value::new(target.clone(), format!("update-{i}").into_bytes()))
            .await?;
    }

    let mut last = snapshot.seqno;
    for i in 0..options.deltas {
        let delta = match next(&sub, options.timeout).await? {
            Message::Delta(delta) => delta,
            Message::Snapshot(_) => bail!("received a second snapshot"),
        };
        let seqno = delta.sequence()?;
        if seqno <= last {
            bail!("delta {seqno} does not follow {last}");
        }
        let expected = format!("update-{i}");
        if delta.data() != expected.as_bytes() {
            bail!("delta {i} carries the wrong payload");
        }
        last = seqno;
    }

    subscriber.disconnect().await?;
    sub.closed().await?;
    worker.shutdown().await?;
    publisher.disconnect().await?;

    if !options.keep {
        reader.delete_scope(&keys).await?;
        log.delete_topic(publisher.topic()).await?;
    }
    reader.close().await?;

    let report = RoundtripReport {
        backend: backend.name(),
        scope: scope_key.hex(),
        snapshot_key: keys.snapshot.clone(),
        deltas_key: keys.deltas.clone(),
        snapshot_entries: snapshot.len(),
        snapshot_seqno: snapshot.seqno.to_string(),
        deltas: options.deltas,
        last_seqno: last.to_string(),
        cleaned_up: !options.keep,
        elapsed_ms: started.elapsed().as_millis() as u64,
    };
    info!(
        deltas = report.deltas,
        last_seqno = report.last_seqno.as_str(),
        elapsed_ms = report.elapsed_ms,
        "Roundtrip complete"
    );
    Ok(report)
}

async fn next(sub: &Subscription, timeout: Duration) -> Result<Message> {
    tokio::time::timeout(timeout, sub.get())
        .await
        .context("Timed out waiting for the subscriber")?
        .context("Subscription ended early")
}

async fn wait_for_entries(
    store: &dyn SnapshotStore,
    keys: &shasta_core::ScopeKeys,
    count: usize,
    timeout: Duration,
) -> Result<()> {
    let deadline = Instant::now() + timeout;
    loop {
        let raw = store.read_snapshot(keys).await?;
        if raw.fields.len() >= count {
            return Ok(());
        }
        if Instant::now() >= deadline {
            bail!(
                "worker committed {} of {count} values before the timeout",
                raw.fields.len()
            );
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}
