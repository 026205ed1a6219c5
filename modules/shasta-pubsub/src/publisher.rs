//! Keys and partitions values for the ingest side.
//!
//! Every record is keyed by its encoded identifier, and every value of one
//! scope goes to the same partition, so the worker owning that partition sees
//! the scope's values in publish order.

use std::hash::Hasher;

use shasta_core::wire::{encode_identifier, encode_value};
use shasta_core::{Instrumentation, ObjectIdentifier, Phase, ScopeKey, Value};
use shasta_log::PartitionedLog;
use siphasher::sip::SipHasher;
use tracing::{debug, info};

use crate::error::PublishError;

pub struct Publisher<L: PartitionedLog> {
    log: L,
    topic: String,
    partitions: u32,
    instrumentation: Instrumentation,
}

impl<L: PartitionedLog> Publisher<L> {
    /// `partitions` is only used if the topic does not exist yet.
    pub fn new(log: L, topic: impl Into<String>, partitions: u32) -> Self {
        Self {
            log,
            topic: topic.into(),
            partitions,
            instrumentation: Instrumentation::disabled(),
        }
    }

    pub fn with_instrumentation(mut self, instrumentation: Instrumentation) -> Self {
        self.instrumentation = instrumentation;
        self
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Make sure the topic exists.
    pub async fn connect(&self) -> Result<(), PublishError> {
        self.log.create_topic(&self.topic, self.partitions).await?;
        info!(topic = self.topic.as_str(), "Publisher connected");
        Ok(())
    }

    pub async fn disconnect(&self) -> Result<(), PublishError> {
        info!(topic = self.topic.as_str(), "Publisher disconnected");
        Ok(())
    }

    /// Publish one value, returning its log offset.
    pub async fn send(&self, value: &Value) -> Result<u64, PublishError> {
        let identifier = value
            .identifier
            .as_ref()
            .ok_or(PublishError::MissingIdentifier(0))?;
        let partitions = self.log.partition_count(&self.topic).await?;
        self.produce(identifier, value, partitions).await
    }

    /// Publish values in order. Rejected as a whole if any value has no
    /// identifier; nothing is produced in that case.
    pub async fn send_batch(&self, values: &[Value]) -> Result<Vec<u64>, PublishError> {
        let identifiers = values
            .iter()
            .enumerate()
            .map(|(i, v)| v.identifier.as_ref().ok_or(PublishError::MissingIdentifier(i)))
            .collect::<Result<Vec<_>, _>>()?;
        let partitions = self.log.partition_count(&self.topic).await?;

        let mut offsets = Vec::with_capacity(values.len());
        for (identifier, value) in identifiers.into_iter().zip(values) {
            offsets.push(self.produce(identifier, value, partitions).await?);
        }
        Ok(offsets)
    }

    async fn produce(
        &self,
        identifier: &ObjectIdentifier,
        value: &Value,
        partitions: u32,
    ) -> Result<u64, PublishError> {
        let scope = ScopeKey::of(identifier);
        let partition = partition_for(scope.encoded(), partitions);
        let offset = self
            .log
            .produce(
                &self.topic,
                partition,
                encode_identifier(identifier),
                encode_value(value),
            )
            .await?;
        self.instrumentation.record(identifier, Phase::Published);
        debug!(scope = %scope.hex(), partition, offset, "Published value");
        Ok(offset)
    }
}

/// Partition owning a scope: SipHash (zero key) of the encoded scope, modulo
/// the count. The fixed key keeps the choice stable across processes.
pub fn partition_for(scope_key_bytes: &[u8], partitions: u32) -> u32 {
    let mut hasher = SipHasher::new();
    hasher.write(scope_key_bytes);
    (hasher.finish() % u64::from(partitions.max(1))) as u32
}

#[cfg(test)]
mod tests {
    use super::*;
    use shasta_log::MemoryLog;
    use std::time::Duration;

    #[test]
    fn test_partition_is_stable_and_in_range() {
        let a = ScopeKey::of(&ObjectIdentifier::new("A", "T", "S", "N1"));
        let b = ScopeKey::of(&ObjectIdentifier::new("A", "T", "S", "N2"));
        for count in [1, 2, 7, 64] {
            let p = partition_for(a.encoded(), count);
            assert!(p < count);
            assert_eq!(p, partition_for(b.encoded(), count));
        }
        assert_eq!(partition_for(b"", 0), 0);
    }

    #[test]
    fn test_scopes_spread_across_partitions() {
        let used: std::collections::HashSet<u32> = (0..32)
            .map(|i| {
                let scope = ScopeKey::of(&ObjectIdentifier::new("A", "T", format!("S{i}"), "N"));
                partition_for(scope.encoded(), 8)
            })
            .collect();
        assert!(used.len() > 1);
    }

    #[tokio::test]
    async fn test_batch_without_identifier_is_rejected_whole() {
        let log = MemoryLog::new();
        let publisher = Publisher::new(log.clone(), "t", 1);
        publisher.connect().await.unwrap();

        let good = Value::new(ObjectIdentifier::new("A", "T", "S", "N"), b"x".to_vec());
        let bad = Value {
            identifier: None,
            data: b"y".to_vec(),
        };
        let err = publisher.send_batch(&[good, bad]).await.unwrap_err();
        assert!(matches!(err, PublishError::MissingIdentifier(1)));
        assert_eq!(log.end_offset("t", 0).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_record_key_is_encoded_identifier() {
        let log = MemoryLog::new();
        let publisher = Publisher::new(log.clone(), "t", 1);
        publisher.connect().await.unwrap();

        let id = ObjectIdentifier::new("A", "T", "S", "N");
        let offset = publisher
            .send(&Value::new(id.clone(), b"x".to_vec()))
            .await
            .unwrap();
        let records = log.fetch("t", 0, offset, 1, Duration::ZERO).await.unwrap();
        assert_eq!(records[0].key, encode_identifier(&id));
    }
}
