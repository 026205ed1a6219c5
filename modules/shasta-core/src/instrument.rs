//! Per-object phase timing.
//!
//! An `Instrumentation` handle is passed explicitly to the publisher, worker
//! and subscriber that should share one timeline. A disabled handle records
//! nothing and costs one branch per call.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::ident::ObjectIdentifier;
use crate::wire::encode_identifier;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Published,
    Consumed,
    CommitStarted,
    Committed,
    SnapshotFetchStarted,
    SnapshotFetched,
    DeltaDelivered,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct PhaseTimings {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub published: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub consumed: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub commit_started: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub committed: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub snapshot_fetch_started: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub snapshot_fetched: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delta_delivered: Option<DateTime<Utc>>,
}

impl PhaseTimings {
    fn set(&mut self, phase: Phase, at: DateTime<Utc>) {
        let slot = match phase {
            Phase::Published => &mut self.published,
            Phase::Consumed => &mut self.consumed,
            Phase::CommitStarted => &mut self.commit_started,
            Phase::Committed => &mut self.committed,
            Phase::SnapshotFetchStarted => &mut self.snapshot_fetch_started,
            Phase::SnapshotFetched => &mut self.snapshot_fetched,
            Phase::DeltaDelivered => &mut self.delta_delivered,
        };
        *slot = Some(at);
    }
}

#[derive(Debug, Clone, Default)]
pub struct Instrumentation {
    timings: Option<Arc<Mutex<HashMap<String, PhaseTimings>>>>,
}

impl Instrumentation {
    pub fn disabled() -> Self {
        Self { timings: None }
    }

    pub fn enabled() -> Self {
        Self {
            timings: Some(Arc::new(Mutex::new(HashMap::new()))),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.timings.is_some()
    }

    /// Stamp `phase` for `id` with the current time. Later stamps overwrite.
    pub fn record(&self, id: &ObjectIdentifier, phase: Phase) {
        let Some(timings) = &self.timings else {
            return;
        };
        let key = hex::encode(encode_identifier(id));
        let mut map = timings.lock().unwrap_or_else(|p| p.into_inner());
        map.entry(key).or_default().set(phase, Utc::now());
    }

    pub fn timings(&self, id: &ObjectIdentifier) -> Option<PhaseTimings> {
        let timings = self.timings.as_ref()?;
        let key = hex::encode(encode_identifier(id));
        let map = timings.lock().unwrap_or_else(|p| p.into_inner());
        map.get(&key).cloned()
    }

    /// All recorded timings keyed by hex-encoded identifier.
    pub fn dump(&self) -> serde_json::Value {
        let Some(timings) = &self.timings else {
            return serde_json::json!({ "timestamps": {} });
        };
        let map = timings.lock().unwrap_or_else(|p| p.into_inner());
        let stamps = serde_json::to_value(&*map).unwrap_or_default();
        serde_json::json!({ "timestamps": stamps })
    }

    pub fn write_json(&self, path: &Path) -> Result<()> {
        let body = serde_json::to_vec_pretty(&self.dump())?;
        std::fs::write(path, body)
            .with_context(|| format!("Failed to write instrumentation dump: {}", path.display()))
    }
}
