//! Consumer-group behaviour of the in-memory broker.

use std::collections::BTreeSet;
use std::time::Duration;

use shasta_log::{MemoryLog, PartitionedLog};

async fn log_with_topic(partitions: u32) -> MemoryLog {
    let log = MemoryLog::new();
    log.create_topic("events", partitions).await.unwrap();
    log
}

#[tokio::test]
async fn single_member_owns_every_partition() {
    let log = log_with_topic(4).await;
    let membership = log.join("g", "events").await.unwrap();

    let assignment = membership.assignments.borrow().clone();
    assert_eq!(assignment.partitions, vec![0, 1, 2, 3]);
    assert_eq!(assignment.generation, 1);
}

#[tokio::test]
async fn join_and_leave_rebalance_round_robin() {
    let log = log_with_topic(4).await;
    let first = log.join("g", "events").await.unwrap();
    let mut first_rx = first.assignments.clone();
    let second = log.join("g", "events").await.unwrap();

    first_rx.changed().await.unwrap();
    let a = first_rx.borrow().clone();
    let b = second.assignments.borrow().clone();
    assert_eq!(a.generation, b.generation);
    assert_eq!(a.partitions, vec![0, 2]);
    assert_eq!(b.partitions, vec![1, 3]);

    // Together they cover every partition exactly once.
    let all: BTreeSet<u32> = a.partitions.iter().chain(&b.partitions).copied().collect();
    assert_eq!(all.len(), 4);

    log.leave("g", "events", &second.member_id).await.unwrap();
    first_rx.changed().await.unwrap();
    assert_eq!(first_rx.borrow().partitions, vec![0, 1, 2, 3]);
    assert_eq!(log.members("g", "events"), vec![first.member_id.clone()]);
}

#[tokio::test]
async fn groups_are_independent() {
    let log = log_with_topic(2).await;
    let a = log.join("ga", "events").await.unwrap();
    let b = log.join("gb", "events").await.unwrap();

    assert_eq!(a.assignments.borrow().partitions, vec![0, 1]);
    assert_eq!(b.assignments.borrow().partitions, vec![0, 1]);

    log.commit_offset("ga", "events", 0, 7).await.unwrap();
    assert_eq!(log.committed_offset("ga", "events", 0).await.unwrap(), Some(7));
    assert_eq!(log.committed_offset("gb", "events", 0).await.unwrap(), None);
}

#[tokio::test]
async fn fetch_waits_for_a_produce() {
    let log = log_with_topic(1).await;
    let fetcher = log.clone();
    let pending = tokio::spawn(async move {
        fetcher
            .fetch("events", 0, 0, 10, Duration::from_secs(5))
            .await
    });

    tokio::time::sleep(Duration::from_millis(20)).await;
    log.produce("events", 0, b"k".to_vec(), b"v".to_vec())
        .await
        .unwrap();

    let batch = pending.await.unwrap().unwrap();
    assert_eq!(batch.len(), 1);
    assert_eq!(batch[0].key, b"k");
}

#[tokio::test]
async fn fetch_times_out_empty() {
    let log = log_with_topic(1).await;
    let batch = log
        .fetch("events", 0, 0, 10, Duration::from_millis(30))
        .await
        .unwrap();
    assert!(batch.is_empty());
}

#[tokio::test]
async fn deleting_a_topic_drops_its_groups() {
    let log = log_with_topic(2).await;
    log.create_topic("other", 1).await.unwrap();
    assert_eq!(log.list_topics().await.unwrap(), vec!["events", "other"]);

    let mut membership = log.join("g", "events").await.unwrap();
    log.produce("events", 0, vec![], b"x".to_vec()).await.unwrap();
    log.commit_offset("g", "events", 0, 1).await.unwrap();

    log.delete_topic("events").await.unwrap();
    assert_eq!(log.list_topics().await.unwrap(), vec!["other"]);
    assert!(membership.assignments.changed().await.is_err());
    assert!(log.members("g", "events").is_empty());
    assert!(log.delete_topic("events").await.is_err());

    // Recreated topics start empty with no group state.
    log.create_topic("events", 2).await.unwrap();
    assert_eq!(log.end_offset("events", 0).await.unwrap(), 0);
    assert_eq!(log.committed_offset("g", "events", 0).await.unwrap(), None);
}
