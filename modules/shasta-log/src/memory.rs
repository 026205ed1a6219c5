//! In-process broker.
//!
//! Topics hold a fixed set of partitions. Each `(group, topic)` pair tracks
//! its members in join order and hands out partitions round-robin; every
//! join or leave bumps the generation and pushes a fresh assignment to every
//! remaining member.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::{watch, Notify};
use tokio::time::Instant;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{LogError, Result};
use crate::log::{Assignment, LogRecord, Membership, PartitionedLog};

struct Partition {
    records: Mutex<Vec<LogRecord>>,
    appended: Notify,
}

struct Member {
    id: String,
    assignments: watch::Sender<Assignment>,
}

#[derive(Default)]
struct Group {
    generation: u64,
    members: Vec<Member>,
    offsets: HashMap<u32, u64>,
}

impl Group {
    fn rebalance(&mut self, partitions: u32) {
        self.generation += 1;
        let n = self.members.len() as u32;
        for (slot, member) in self.members.iter().enumerate() {
            let owned = (0..partitions).filter(|p| p % n == slot as u32).collect();
            // Receivers may already be gone; the assignment is still current.
            member.assignments.send_replace(Assignment {
                generation: self.generation,
                partitions: owned,
            });
        }
    }
}

#[derive(Default)]
struct Broker {
    topics: HashMap<String, Arc<Vec<Partition>>>,
    groups: HashMap<(String, String), Group>,
}

#[derive(Clone, Default)]
pub struct MemoryLog {
    broker: Arc<Mutex<Broker>>,
    closed: Arc<AtomicBool>,
}

impl MemoryLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stop the broker. Blocked fetches return `LogError::Closed`.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        let topics: Vec<_> = self.lock().topics.values().cloned().collect();
        for partitions in topics {
            for p in partitions.iter() {
                p.appended.notify_waiters();
            }
        }
    }

    /// Member ids of a group, in join order.
    pub fn members(&self, group: &str, topic: &str) -> Vec<String> {
        self.lock()
            .groups
            .get(&(group.to_string(), topic.to_string()))
            .map(|g| g.members.iter().map(|m| m.id.clone()).collect())
            .unwrap_or_default()
    }

    fn lock(&self) -> MutexGuard<'_, Broker> {
        self.broker.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(LogError::Closed);
        }
        Ok(())
    }

    fn topic(&self, topic: &str) -> Result<Arc<Vec<Partition>>> {
        self.lock()
            .topics
            .get(topic)
            .cloned()
            .ok_or_else(|| LogError::UnknownTopic(topic.to_string()))
    }
}

fn partition_of<'a>(
    partitions: &'a [Partition],
    topic: &str,
    partition: u32,
) -> Result<&'a Partition> {
    partitions
        .get(partition as usize)
        .ok_or_else(|| LogError::UnknownPartition {
            topic: topic.to_string(),
            partition,
        })
}

fn records(p: &Partition) -> MutexGuard<'_, Vec<LogRecord>> {
    p.records.lock().unwrap_or_else(|e| e.into_inner())
}

#[async_trait]
impl PartitionedLog for MemoryLog {
    async fn create_topic(&self, topic: &str, partitions: u32) -> Result<()> {
        self.ensure_open()?;
        let mut broker = self.lock();
        if broker.topics.contains_key(topic) {
            return Ok(());
        }
        let partitions: Vec<Partition> = (0..partitions.max(1))
            .map(|_| Partition {
                records: Mutex::new(Vec::new()),
                appended: Notify::new(),
            })
            .collect();
        info!(topic, partitions = partitions.len(), "Created topic");
        broker.topics.insert(topic.to_string(), Arc::new(partitions));
        Ok(())
    }

    async fn partition_count(&self, topic: &str) -> Result<u32> {
        Ok(self.topic(topic)?.len() as u32)
    }

    async fn list_topics(&self) -> Result<Vec<String>> {
        let mut topics: Vec<String> = self.lock().topics.keys().cloned().collect();
        topics.sort();
        Ok(topics)
    }

    async fn delete_topic(&self, topic: &str) -> Result<()> {
        self.ensure_open()?;
        let partitions = {
            let mut broker = self.lock();
            let partitions = broker
                .topics
                .remove(topic)
                .ok_or_else(|| LogError::UnknownTopic(topic.to_string()))?;
            broker.groups.retain(|(_, t), _| t != topic);
            partitions
        };
        for p in partitions.iter() {
            p.appended.notify_waiters();
        }
        info!(topic, "Deleted topic");
        Ok(())
    }

    async fn produce(
        &self,
        topic: &str,
        partition: u32,
        key: Vec<u8>,
        value: Vec<u8>,
    ) -> Result<u64> {
        self.ensure_open()?;
        let partitions = self.topic(topic)?;
        let p = partition_of(&partitions, topic, partition)?;
        let offset = {
            let mut log = records(p);
            let offset = log.len() as u64;
            log.push(LogRecord {
                partition,
                offset,
                key,
                value,
                timestamp: Utc::now(),
            });
            offset
        };
        p.appended.notify_waiters();
        Ok(offset)
    }

    async fn join(&self, group: &str, topic: &str) -> Result<Membership> {
        self.ensure_open()?;
        let partitions = self.topic(topic)?.len() as u32;
        let member_id = format!("{group}-{}", Uuid::new_v4());
        let (tx, rx) = watch::channel(Assignment::default());

        let mut broker = self.lock();
        let g = broker
            .groups
            .entry((group.to_string(), topic.to_string()))
            .or_default();
        g.members.push(Member {
            id: member_id.clone(),
            assignments: tx,
        });
        g.rebalance(partitions);
        info!(
            group,
            topic,
            member = member_id.as_str(),
            generation = g.generation,
            "Member joined"
        );

        Ok(Membership {
            member_id,
            assignments: rx,
        })
    }

    async fn fetch(
        &self,
        topic: &str,
        partition: u32,
        offset: u64,
        max: usize,
        wait: Duration,
    ) -> Result<Vec<LogRecord>> {
        let partitions = self.topic(topic)?;
        let p = partition_of(&partitions, topic, partition)?;
        let deadline = Instant::now() + wait;

        loop {
            let notified = p.appended.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            self.ensure_open()?;
            if !Arc::ptr_eq(&self.topic(topic)?, &partitions) {
                return Err(LogError::UnknownTopic(topic.to_string()));
            }
            let batch: Vec<LogRecord> = records(p)
                .iter()
                .skip(offset as usize)
                .take(max.max(1))
                .cloned()
                .collect();
            if !batch.is_empty() {
                return Ok(batch);
            }

            let now = Instant::now();
            if wait.is_zero() || now >= deadline {
                return Ok(Vec::new());
            }
            if tokio::time::timeout(deadline - now, notified).await.is_err() {
                return Ok(Vec::new());
            }
        }
    }

    async fn end_offset(&self, topic: &str, partition: u32) -> Result<u64> {
        let partitions = self.topic(topic)?;
        let p = partition_of(&partitions, topic, partition)?;
        let end = records(p).len() as u64;
        Ok(end)
    }

    async fn commit_offset(
        &self,
        group: &str,
        topic: &str,
        partition: u32,
        next: u64,
    ) -> Result<()> {
        self.ensure_open()?;
        let mut broker = self.lock();
        let g = broker
            .groups
            .entry((group.to_string(), topic.to_string()))
            .or_default();
        g.offsets.insert(partition, next);
        Ok(())
    }

    async fn committed_offset(
        &self,
        group: &str,
        topic: &str,
        partition: u32,
    ) -> Result<Option<u64>> {
        Ok(self
            .lock()
            .groups
            .get(&(group.to_string(), topic.to_string()))
            .and_then(|g| g.offsets.get(&partition).copied()))
    }

    async fn leave(&self, group: &str, topic: &str, member_id: &str) -> Result<()> {
        let partitions = self.topic(topic)?.len() as u32;
        let mut broker = self.lock();
        let g = broker
            .groups
            .get_mut(&(group.to_string(), topic.to_string()))
            .ok_or_else(|| LogError::NotMember {
                group: group.to_string(),
                member: member_id.to_string(),
            })?;
        let before = g.members.len();
        g.members.retain(|m| m.id != member_id);
        if g.members.len() == before {
            return Err(LogError::NotMember {
                group: group.to_string(),
                member: member_id.to_string(),
            });
        }
        if !g.members.is_empty() {
            g.rebalance(partitions);
        }
        debug!(group, topic, member = member_id, "Member left");
        Ok(())
    }
}
