//! MemoryStore behaviour under concurrency.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use shasta_cache::{DeltaTail, MemoryStore, SnapshotStore};
use shasta_core::wire::{decode_envelope, encode_value};
use shasta_core::{ObjectIdentifier, ScopeKeys, SequenceId, Value};

fn id(scope: &str, name: &str) -> ObjectIdentifier {
    ObjectIdentifier::new("app", "tag", scope, name)
}

// =========================================================================
// Ordering
// =========================================================================

#[tokio::test]
async fn concurrent_commits_get_distinct_increasing_ids() {
    let store = Arc::new(MemoryStore::new());
    let keys = ScopeKeys::for_identifier(&id("S", ""));

    let tasks: Vec<_> = (0..8)
        .map(|w| {
            let store = store.clone();
            let keys = keys.clone();
            tokio::spawn(async move {
                let mut ids = Vec::new();
                for i in 0..25 {
                    let name = format!("N{w}-{i}");
                    ids.push(store.commit(&keys, &name, name.as_bytes()).await.unwrap());
                }
                ids
            })
        })
        .collect();

    let mut all = Vec::new();
    for joined in futures::future::join_all(tasks).await {
        let ids = joined.unwrap();
        // Each writer observes its own commits in increasing order.
        assert!(ids.windows(2).all(|w| w[0] < w[1]));
        all.extend(ids);
    }

    let unique: HashSet<SequenceId> = all.iter().copied().collect();
    assert_eq!(unique.len(), 200);
    assert_eq!(store.delta_len(&keys), 200);

    // The log is in id order and the snapshot seqno is the last one.
    let log = store
        .read_deltas(&keys, SequenceId::ZERO, 1000, Duration::ZERO)
        .await
        .unwrap();
    assert!(log.windows(2).all(|w| w[0].id < w[1].id));
    let snapshot = store.read_snapshot(&keys).await.unwrap();
    assert_eq!(snapshot.seqno, log.last().map(|r| r.id));
    assert_eq!(snapshot.fields.len(), 200);
}

#[tokio::test]
async fn snapshot_entry_carries_its_commit_id() {
    let store = MemoryStore::new();
    let ident = id("S", "N1");
    let keys = ScopeKeys::for_identifier(&ident);
    let encoded = encode_value(&Value::new(ident.clone(), b"payload".to_vec()));

    let first = store.commit(&keys, "N1", &encoded).await.unwrap();
    let second = store.commit(&keys, "N1", &encoded).await.unwrap();

    let snapshot = store.read_snapshot(&keys).await.unwrap();
    let envelope = decode_envelope(&snapshot.fields["N1"]).unwrap();
    assert_eq!(envelope.sequence().unwrap(), second);
    assert_ne!(envelope.sequence().unwrap(), first);
    assert_eq!(envelope.data(), b"payload");
    assert_eq!(snapshot.seqno, Some(second));
}

// =========================================================================
// Isolation
// =========================================================================

#[tokio::test]
async fn scopes_do_not_see_each_other() {
    let store = MemoryStore::new();
    let a = ScopeKeys::for_identifier(&id("A", ""));
    let b = ScopeKeys::for_identifier(&id("B", ""));

    store.commit(&a, "N", b"a").await.unwrap();

    assert_eq!(store.delta_len(&b), 0);
    assert!(store.read_snapshot(&b).await.unwrap().seqno.is_none());
    let tail = store
        .read_deltas(&b, SequenceId::ZERO, 10, Duration::from_millis(20))
        .await
        .unwrap();
    assert!(tail.is_empty());
}

#[tokio::test]
async fn tail_from_open_tail_sees_later_commits() {
    let store = MemoryStore::new();
    let keys = ScopeKeys::for_identifier(&id("S", ""));
    let before = store.commit(&keys, "N", b"1").await.unwrap();

    let tail = store.open_tail().await.unwrap();
    let after = store.commit(&keys, "N", b"2").await.unwrap();

    let batch = tail
        .read_deltas(&keys, before, 10, Duration::from_millis(100))
        .await
        .unwrap();
    assert_eq!(batch.len(), 1);
    assert_eq!(batch[0].id, after);
}
