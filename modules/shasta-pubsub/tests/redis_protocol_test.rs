//! Commit and bootstrap+tail protocols against a real Redis.
//! Run with: cargo test -p shasta-pubsub --features test-utils --test redis_protocol_test

#![cfg(feature = "test-utils")]

use std::sync::Arc;
use std::time::Duration;

use shasta_cache::testutil::redis_container;
use shasta_cache::RedisStore;
use shasta_core::{Message, ObjectIdentifier, Value};
use shasta_log::MemoryLog;
use shasta_pubsub::{Subscriber, SubscriberError, SubscriberOptions, Worker, WorkerOptions};

fn id(name: &str) -> ObjectIdentifier {
    ObjectIdentifier::new("app", "tag", "scope", name)
}

#[tokio::test]
async fn snapshot_then_delta_over_redis() {
    let (_container, uri, store) = redis_container().await;
    let worker = Worker::new(
        Arc::new(store),
        Arc::new(MemoryLog::new()),
        WorkerOptions::new("t", "g"),
    );
    let subscriber = Subscriber::new(
        Arc::new(RedisStore::connect(&uri).await.unwrap()),
        SubscriberOptions {
            tail_block: Duration::from_millis(100),
            ..SubscriberOptions::default()
        },
    );

    assert!(matches!(
        subscriber.stream(&id("N1")).await,
        Err(SubscriberError::MissingSnapshotSequence(_))
    ));

    worker
        .commit(&id("N1"), &Value::new(id("N1"), b"v1".to_vec()))
        .await
        .unwrap();
    let s2 = worker
        .commit(&id("N2"), &Value::new(id("N2"), b"v2".to_vec()))
        .await
        .unwrap();

    let sub = subscriber.stream(&id("N1")).await.unwrap();
    let first = tokio::time::timeout(Duration::from_secs(5), sub.get())
        .await
        .unwrap()
        .unwrap();
    let Message::Snapshot(snapshot) = first else {
        panic!("expected snapshot");
    };
    assert_eq!(snapshot.seqno, s2);
    assert_eq!(snapshot.get("N1").unwrap().data(), b"v1");
    assert_eq!(snapshot.get("N2").unwrap().data(), b"v2");

    let s3 = worker
        .commit(&id("N1"), &Value::new(id("N1"), b"v3".to_vec()))
        .await
        .unwrap();
    let second = tokio::time::timeout(Duration::from_secs(5), sub.get())
        .await
        .unwrap()
        .unwrap();
    let delta = second.as_delta().unwrap();
    assert_eq!(delta.data(), b"v3");
    assert_eq!(delta.sequence().unwrap(), s3);

    subscriber.disconnect().await.unwrap();
    sub.closed().await.unwrap();
    worker.shutdown().await.unwrap();
}
