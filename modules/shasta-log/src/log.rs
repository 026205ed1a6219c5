use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::watch;

use crate::error::Result;

/// One record as stored in a partition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord {
    pub partition: u32,
    pub offset: u64,
    pub key: Vec<u8>,
    pub value: Vec<u8>,
    pub timestamp: DateTime<Utc>,
}

/// The partitions a group member currently owns.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Assignment {
    /// Bumped on every rebalance of the group.
    pub generation: u64,
    pub partitions: Vec<u32>,
}

/// A live group membership. Assignment changes are pushed through the watch
/// channel; the first value is the assignment at join time.
#[derive(Debug)]
pub struct Membership {
    pub member_id: String,
    pub assignments: watch::Receiver<Assignment>,
}

/// Where a member starts in a partition the group has never committed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum StartPosition {
    #[default]
    Earliest,
    Latest,
}

#[async_trait]
pub trait PartitionedLog: Send + Sync {
    /// Create `topic` with `partitions` partitions. Existing topics are left
    /// as they are.
    async fn create_topic(&self, topic: &str, partitions: u32) -> Result<()>;

    async fn partition_count(&self, topic: &str) -> Result<u32>;

    /// Names of every topic, sorted.
    async fn list_topics(&self) -> Result<Vec<String>>;

    /// Delete `topic` with its records, groups and committed offsets. Members
    /// of its groups see their assignment channel close.
    async fn delete_topic(&self, topic: &str) -> Result<()>;

    /// Append one record, returning its offset.
    async fn produce(&self, topic: &str, partition: u32, key: Vec<u8>, value: Vec<u8>)
        -> Result<u64>;

    /// Join `group` as a new member. Triggers a rebalance.
    async fn join(&self, group: &str, topic: &str) -> Result<Membership>;

    /// Up to `max` records from `offset` on, in offset order. Waits up to
    /// `wait` for the first one; an empty batch means the wait elapsed.
    async fn fetch(
        &self,
        topic: &str,
        partition: u32,
        offset: u64,
        max: usize,
        wait: Duration,
    ) -> Result<Vec<LogRecord>>;

    /// Offset the next produced record will get.
    async fn end_offset(&self, topic: &str, partition: u32) -> Result<u64>;

    /// Record that the group has consumed everything before `next`.
    async fn commit_offset(&self, group: &str, topic: &str, partition: u32, next: u64)
        -> Result<()>;

    async fn committed_offset(&self, group: &str, topic: &str, partition: u32)
        -> Result<Option<u64>>;

    /// Leave the group. Triggers a rebalance for the remaining members.
    async fn leave(&self, group: &str, topic: &str, member_id: &str) -> Result<()>;
}

#[async_trait]
impl<L: PartitionedLog + ?Sized> PartitionedLog for Arc<L> {
    async fn create_topic(&self, topic: &str, partitions: u32) -> Result<()> {
        (**self).create_topic(topic, partitions).await
    }

    async fn partition_count(&self, topic: &str) -> Result<u32> {
        (**self).partition_count(topic).await
    }

    async fn list_topics(&self) -> Result<Vec<String>> {
        (**self).list_topics().await
    }

    async fn delete_topic(&self, topic: &str) -> Result<()> {
        (**self).delete_topic(topic).await
    }

    async fn produce(
        &self,
        topic: &str,
        partition: u32,
        key: Vec<u8>,
        value: Vec<u8>,
    ) -> Result<u64> {
        (**self).produce(topic, partition, key, value).await
    }

    async fn join(&self, group: &str, topic: &str) -> Result<Membership> {
        (**self).join(group, topic).await
    }

    async fn fetch(
        &self,
        topic: &str,
        partition: u32,
        offset: u64,
        max: usize,
        wait: Duration,
    ) -> Result<Vec<LogRecord>> {
        (**self).fetch(topic, partition, offset, max, wait).await
    }

    async fn end_offset(&self, topic: &str, partition: u32) -> Result<u64> {
        (**self).end_offset(topic, partition).await
    }

    async fn commit_offset(
        &self,
        group: &str,
        topic: &str,
        partition: u32,
        next: u64,
    ) -> Result<()> {
        (**self).commit_offset(group, topic, partition, next).await
    }

    async fn committed_offset(
        &self,
        group: &str,
        topic: &str,
        partition: u32,
    ) -> Result<Option<u64>> {
        (**self).committed_offset(group, topic, partition).await
    }

    async fn leave(&self, group: &str, topic: &str, member_id: &str) -> Result<()> {
        (**self).leave(group, topic, member_id).await
    }
}
