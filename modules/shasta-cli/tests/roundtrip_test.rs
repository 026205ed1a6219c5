//! Roundtrip and inspect against the in-process store.

use std::time::Duration;

use shasta_cache::SnapshotStore;
use shasta_cli::roundtrip::{self, RoundtripOptions};
use shasta_cli::{cleanup, inspect, Backend};
use shasta_core::{Config, Instrumentation, ObjectIdentifier, ScopeKeys, TuningConfig, Value};
use shasta_pubsub::{Worker, WorkerOptions};

fn config() -> Config {
    Config {
        redis_uri: "redis://127.0.0.1:6379".to_string(),
        redis_cluster: false,
        app_id: "test-app".to_string(),
        topic: "tag-data".to_string(),
        group_id: "tag-data-group-id".to_string(),
    }
}

fn tuning() -> TuningConfig {
    TuningConfig {
        tail_block_ms: 50,
        fetch_wait_ms: 20,
        partitions: 2,
        ..TuningConfig::default()
    }
}

#[tokio::test]
async fn roundtrip_over_memory_store() {
    let backend = Backend::from_config(&config(), true);
    let instrumentation = Instrumentation::enabled();
    let options = RoundtripOptions {
        values: 4,
        deltas: 6,
        timeout: Duration::from_secs(5),
        keep: false,
    };

    let report = roundtrip::run(&backend, &config(), &tuning(), &options, instrumentation.clone())
        .await
        .unwrap();

    assert_eq!(report.backend, "memory");
    assert_eq!(report.snapshot_entries, 4);
    assert_eq!(report.deltas, 6);
    assert_ne!(report.snapshot_seqno, report.last_seqno);

    let dump = instrumentation.dump();
    assert!(!dump["timestamps"].as_object().unwrap().is_empty());
}

#[tokio::test]
async fn roundtrip_rejects_zero_values() {
    let backend = Backend::from_config(&config(), true);
    let options = RoundtripOptions {
        values: 0,
        ..RoundtripOptions::default()
    };
    let result = roundtrip::run(
        &backend,
        &config(),
        &tuning(),
        &options,
        Instrumentation::disabled(),
    )
    .await;
    assert!(result.is_err());
}

#[tokio::test]
async fn inspect_lists_committed_entries() {
    let backend = Backend::from_config(&config(), true);
    let worker = Worker::new(
        std::sync::Arc::new(backend.open().await.unwrap()),
        std::sync::Arc::new(shasta_log::MemoryLog::new()),
        WorkerOptions::new("t", "g"),
    );
    let id = |name: &str| ObjectIdentifier::new("test-app", "tag", "scope", name);
    worker
        .commit(&id("b"), &Value::new(id("b"), b"two".to_vec()))
        .await
        .unwrap();
    let last = worker
        .commit(&id("a"), &Value::new(id("a"), b"one".to_vec()))
        .await
        .unwrap();

    let store = backend.open().await.unwrap();
    let view = inspect::run(&*store, &id("")).await.unwrap();
    assert_eq!(view.seqno, Some(last.to_string()));
    let names: Vec<_> = view.entries.iter().map(|e| e.name.as_str()).collect();
    assert_eq!(names, vec!["a", "b"]);
    assert_eq!(view.entries[0].data, "one");
    assert_eq!(view.entries[0].seqno, last.to_string());
    assert!(view.snapshot_key.ends_with(":snapshot"));

    let empty = inspect::run(&*store, &ObjectIdentifier::new("x", "y", "z", ""))
        .await
        .unwrap();
    assert!(empty.seqno.is_none());
    assert!(empty.entries.is_empty());
    store.close().await.unwrap();
}

#[tokio::test]
async fn roundtrip_removes_its_scope_unless_kept() {
    let backend = Backend::from_config(&config(), true);
    let store = backend.open().await.unwrap();

    for keep in [false, true] {
        let options = RoundtripOptions {
            values: 1,
            deltas: 1,
            timeout: Duration::from_secs(5),
            keep,
        };
        let report = roundtrip::run(
            &backend,
            &config(),
            &tuning(),
            &options,
            Instrumentation::disabled(),
        )
        .await
        .unwrap();
        assert_eq!(report.cleaned_up, !keep);

        let keys = ScopeKeys {
            snapshot: report.snapshot_key,
            deltas: report.deltas_key,
        };
        let raw = store.read_snapshot(&keys).await.unwrap();
        assert_eq!(raw.seqno.is_some(), keep);
    }
}

#[tokio::test]
async fn cleanup_removes_only_the_named_scopes() {
    let backend = Backend::from_config(&config(), true);
    let worker = Worker::new(
        std::sync::Arc::new(backend.open().await.unwrap()),
        std::sync::Arc::new(shasta_log::MemoryLog::new()),
        WorkerOptions::new("t", "g"),
    );
    let id = |scope: &str| ObjectIdentifier::new("test-app", "tag", scope, "n");
    for scope in ["gone", "kept"] {
        worker
            .commit(&id(scope), &Value::new(id(scope), b"v".to_vec()))
            .await
            .unwrap();
    }

    let store = backend.open().await.unwrap();
    let reports = cleanup::run(&*store, &[id("gone"), id("never")])
        .await
        .unwrap();
    assert_eq!(reports.len(), 2);
    assert_eq!(reports[0].keys_removed, 2);
    assert_eq!(reports[1].keys_removed, 0);

    assert!(inspect::run(&*store, &id("gone")).await.unwrap().seqno.is_none());
    assert!(inspect::run(&*store, &id("kept")).await.unwrap().seqno.is_some());
    store.close().await.unwrap();
}
