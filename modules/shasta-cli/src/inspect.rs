//! Dump the snapshot table of one scope.

use anyhow::Result;
use serde::Serialize;
use shasta_cache::SnapshotStore;
use shasta_core::wire::decode_envelope;
use shasta_core::{ObjectIdentifier, ScopeKey};

#[derive(Debug, Serialize)]
pub struct SnapshotView {
    pub scope: String,
    pub snapshot_key: String,
    pub deltas_key: String,
    /// `None` when nothing was ever committed to the scope.
    pub seqno: Option<String>,
    pub entries: Vec<EntryView>,
}

#[derive(Debug, Serialize)]
pub struct EntryView {
    pub name: String,
    pub seqno: String,
    pub bytes: usize,
    /// Payload as UTF-8, lossily.
    pub data: String,
}

pub async fn run(store: &dyn SnapshotStore, identifier: &ObjectIdentifier) -> Result<SnapshotView> {
    let scope = ScopeKey::of(identifier);
    let keys = scope.keys();
    let raw = store.read_snapshot(&keys).await?;

    let mut entries = Vec::with_capacity(raw.fields.len());
    for (name, bytes) in raw.fields {
        let envelope = decode_envelope(&bytes)?;
        entries.push(EntryView {
            name,
            seqno: envelope.seqno.clone(),
            bytes: envelope.data().len(),
            data: String::from_utf8_lossy(envelope.data()).into_owned(),
        });
    }
    entries.sort_by(|a, b| a.name.cmp(&b.name));

    Ok(SnapshotView {
        scope: scope.hex(),
        snapshot_key: keys.snapshot,
        deltas_key: keys.deltas,
        seqno: raw.seqno.map(|s| s.to_string()),
        entries,
    })
}
