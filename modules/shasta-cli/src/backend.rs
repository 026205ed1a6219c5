use std::sync::Arc;

use anyhow::{Context, Result};
use shasta_cache::{MemoryStore, RedisStore, SnapshotStore};
use shasta_core::Config;

/// Where snapshot tables and delta logs live.
#[derive(Clone)]
pub enum Backend {
    /// In-process store; every `open` is a new handle onto the same data.
    Memory(MemoryStore),
    Redis { uri: String, cluster: bool },
}

impl Backend {
    pub fn from_config(config: &Config, memory: bool) -> Self {
        if memory {
            Backend::Memory(MemoryStore::new())
        } else {
            Backend::Redis {
                uri: config.redis_uri.clone(),
                cluster: config.redis_cluster,
            }
        }
    }

    /// Open an independent store handle. Each component gets its own, since
    /// shutting a component down closes its handle.
    pub async fn open(&self) -> Result<Arc<dyn SnapshotStore>> {
        match self {
            Backend::Memory(store) => Ok(Arc::new(store.handle())),
            Backend::Redis { uri, cluster } => {
                let store = RedisStore::connect_with(uri, *cluster)
                    .await
                    .context("Failed to connect to Redis")?;
                Ok(Arc::new(store))
            }
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Backend::Memory(_) => "memory",
            Backend::Redis { .. } => "redis",
        }
    }
}
