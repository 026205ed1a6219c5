//! Remove scopes from the store.

use anyhow::Result;
use serde::Serialize;
use shasta_cache::SnapshotStore;
use shasta_core::{ObjectIdentifier, ScopeKey};
use tracing::info;

#[derive(Debug, Serialize)]
pub struct CleanupReport {
    pub scope: String,
    pub snapshot_key: String,
    pub deltas_key: String,
    /// How many of the two keys existed.
    pub keys_removed: usize,
}

/// Delete the snapshot table and delta log of each identifier's scope.
pub async fn run(
    store: &dyn SnapshotStore,
    identifiers: &[ObjectIdentifier],
) -> Result<Vec<CleanupReport>> {
    let mut reports = Vec::with_capacity(identifiers.len());
    for identifier in identifiers {
        let scope = ScopeKey::of(identifier);
        let keys = scope.keys();
        let keys_removed = store.delete_scope(&keys).await?;
        info!(scope = %scope.hex(), keys_removed, "Cleaned up scope");
        reports.push(CleanupReport {
            scope: scope.hex(),
            snapshot_key: keys.snapshot,
            deltas_key: keys.deltas,
            keys_removed,
        });
    }
    Ok(reports)
}
