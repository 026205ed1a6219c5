//! Redis-backed store (single node or cluster).
//!
//! Layout per scope:
//! - `{shasta:<hex>}:snapshot`: hash of `name -> encoded Envelope`, plus `seqno`
//! - `{shasta:<hex>}:deltas`: stream of `{ value: encoded Value }`
//!
//! A commit is one Lua script, so the stream append and both hash writes run
//! as an indivisible unit on the shard that owns the shared hash tag.

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::{ConnectionLike, MultiplexedConnection};
use redis::cluster::ClusterClient;
use redis::cluster_async::ClusterConnection;
use redis::streams::StreamReadReply;
use redis::Script;
use tracing::{debug, info};

use shasta_core::keys::SEQNO_FIELD;
use shasta_core::wire::envelope_prefix;
use shasta_core::{ScopeKeys, SequenceId};

use crate::error::{CacheError, Result};
use crate::store::{DeltaRecord, DeltaTail, RawSnapshot, SnapshotStore};

/// Stream entry field carrying the encoded value.
const DELTA_FIELD: &str = "value";

/// KEYS[1] snapshot hash, KEYS[2] delta stream.
/// ARGV[1] object name, ARGV[2] encoded value, ARGV[3] envelope prefix.
///
/// The envelope is sealed by appending protobuf field 2 (`seqno`, key 0x12)
/// with a one-byte length; stream ids are at most 41 bytes.
const COMMIT_SCRIPT: &str = r#"
local id = redis.call('XADD', KEYS[2], '*', 'value', ARGV[2])
redis.call('HSET', KEYS[1], ARGV[1], ARGV[3] .. string.char(18, #id) .. id)
redis.call('HSET', KEYS[1], 'seqno', id)
return id
"#;

#[derive(Clone)]
enum Client {
    Single(redis::Client),
    Cluster(ClusterClient),
}

#[derive(Clone)]
enum Connection {
    Single(MultiplexedConnection),
    Cluster(ClusterConnection),
}

impl Client {
    async fn connect(&self) -> Result<Connection> {
        Ok(match self {
            Client::Single(c) => Connection::Single(c.get_multiplexed_async_connection().await?),
            Client::Cluster(c) => Connection::Cluster(c.get_async_connection().await?),
        })
    }
}

pub struct RedisStore {
    client: Client,
    conn: RwLock<Option<Connection>>,
    commit_script: Script,
}

impl RedisStore {
    /// Connect to a single Redis node.
    pub async fn connect(uri: &str) -> Result<Self> {
        let client = Client::Single(redis::Client::open(uri)?);
        Self::open(client).await
    }

    /// Connect to a Redis cluster through one or more seed nodes.
    pub async fn connect_cluster(seeds: &[&str]) -> Result<Self> {
        let client = Client::Cluster(ClusterClient::new(seeds.to_vec())?);
        Self::open(client).await
    }

    /// Single node or cluster, per `cluster`. A cluster URI may list several
    /// comma-separated seed nodes.
    pub async fn connect_with(uri: &str, cluster: bool) -> Result<Self> {
        if cluster {
            let seeds: Vec<&str> = uri.split(',').map(str::trim).collect();
            Self::connect_cluster(&seeds).await
        } else {
            Self::connect(uri).await
        }
    }

    async fn open(client: Client) -> Result<Self> {
        let conn = client.connect().await?;
        info!(
            cluster = matches!(client, Client::Cluster(_)),
            "Connected to Redis"
        );
        Ok(Self {
            client,
            conn: RwLock::new(Some(conn)),
            commit_script: Script::new(COMMIT_SCRIPT),
        })
    }

    fn conn(&self) -> Result<Connection> {
        self.conn
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
            .ok_or(CacheError::ConnectionClosed)
    }
}

#[async_trait]
impl SnapshotStore for RedisStore {
    async fn commit(
        &self,
        keys: &ScopeKeys,
        name: &str,
        encoded_value: &[u8],
    ) -> Result<SequenceId> {
        if name == SEQNO_FIELD {
            return Err(CacheError::ReservedField(name.to_string()));
        }
        let prefix = envelope_prefix(encoded_value);
        let id = match self.conn()? {
            Connection::Single(mut c) => {
                commit_on(&mut c, &self.commit_script, keys, name, encoded_value, &prefix).await?
            }
            Connection::Cluster(mut c) => {
                commit_on(&mut c, &self.commit_script, keys, name, encoded_value, &prefix).await?
            }
        };
        debug!(key = keys.deltas.as_str(), seqno = %id, "Committed to Redis");
        Ok(id)
    }

    async fn read_snapshot(&self, keys: &ScopeKeys) -> Result<RawSnapshot> {
        let mut fields = match self.conn()? {
            Connection::Single(mut c) => hgetall_on(&mut c, &keys.snapshot).await?,
            Connection::Cluster(mut c) => hgetall_on(&mut c, &keys.snapshot).await?,
        };
        let seqno = match fields.remove(SEQNO_FIELD) {
            Some(raw) => Some(String::from_utf8_lossy(&raw).parse::<SequenceId>()?),
            None => None,
        };
        Ok(RawSnapshot { seqno, fields })
    }

    async fn open_tail(&self) -> Result<Box<dyn DeltaTail>> {
        // Blocking reads get their own connection; on a shared multiplexed
        // connection they would hold up every command queued behind them.
        self.conn()?;
        let conn = self.client.connect().await?;
        Ok(Box::new(RedisTail { conn }))
    }

    async fn delete_scope(&self, keys: &ScopeKeys) -> Result<usize> {
        // Both keys share a hash tag, so one DEL is valid on a cluster too.
        let removed = match self.conn()? {
            Connection::Single(mut c) => del_on(&mut c, keys).await?,
            Connection::Cluster(mut c) => del_on(&mut c, keys).await?,
        };
        info!(key = keys.snapshot.as_str(), removed, "Deleted scope from Redis");
        Ok(removed)
    }

    async fn close(&self) -> Result<()> {
        let dropped = self
            .conn
            .write()
            .unwrap_or_else(|p| p.into_inner())
            .take();
        if dropped.is_some() {
            info!("Closed Redis connection");
        }
        Ok(())
    }
}

struct RedisTail {
    conn: Connection,
}

#[async_trait]
impl DeltaTail for RedisTail {
    async fn read_deltas(
        &self,
        keys: &ScopeKeys,
        after: SequenceId,
        count: usize,
        block: Duration,
    ) -> Result<Vec<DeltaRecord>> {
        match self.conn.clone() {
            Connection::Single(mut c) => xread_on(&mut c, keys, after, count, block).await,
            Connection::Cluster(mut c) => xread_on(&mut c, keys, after, count, block).await,
        }
    }
}

async fn commit_on<C: ConnectionLike + Send>(
    conn: &mut C,
    script: &Script,
    keys: &ScopeKeys,
    name: &str,
    encoded_value: &[u8],
    prefix: &[u8],
) -> Result<SequenceId> {
    let id: String = script
        .key(&keys.snapshot)
        .key(&keys.deltas)
        .arg(name)
        .arg(encoded_value)
        .arg(prefix)
        .invoke_async(conn)
        .await?;
    Ok(id.parse()?)
}

async fn hgetall_on<C: ConnectionLike + Send>(
    conn: &mut C,
    key: &str,
) -> Result<HashMap<String, Vec<u8>>> {
    let fields: HashMap<String, Vec<u8>> = redis::cmd("HGETALL").arg(key).query_async(conn).await?;
    Ok(fields)
}

async fn del_on<C: ConnectionLike + Send>(conn: &mut C, keys: &ScopeKeys) -> Result<usize> {
    let removed: usize = redis::cmd("DEL")
        .arg(&keys.snapshot)
        .arg(&keys.deltas)
        .query_async(conn)
        .await?;
    Ok(removed)
}

async fn xread_on<C: ConnectionLike + Send>(
    conn: &mut C,
    keys: &ScopeKeys,
    after: SequenceId,
    count: usize,
    block: Duration,
) -> Result<Vec<DeltaRecord>> {
    let mut cmd = redis::cmd("XREAD");
    cmd.arg("COUNT").arg(count.max(1));
    // BLOCK 0 means "forever" to Redis; a zero wait here means "don't block".
    if !block.is_zero() {
        cmd.arg("BLOCK").arg(block.as_millis().max(1) as u64);
    }
    cmd.arg("STREAMS").arg(&keys.deltas).arg(after.to_string());

    let reply: Option<StreamReadReply> = cmd.query_async(conn).await?;
    let Some(reply) = reply else {
        return Ok(Vec::new());
    };

    let mut records = Vec::new();
    for stream in reply.keys {
        for entry in stream.ids {
            let id: SequenceId = entry.id.parse()?;
            let value: Vec<u8> = entry.get(DELTA_FIELD).ok_or_else(|| {
                CacheError::UnexpectedReply(format!(
                    "stream entry {} has no '{DELTA_FIELD}' field",
                    entry.id
                ))
            })?;
            records.push(DeltaRecord { id, value });
        }
    }
    Ok(records)
}
