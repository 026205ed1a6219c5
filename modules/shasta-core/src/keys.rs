//! Scope keys and shard-routing cache keys.
//!
//! Both structures of one scope (the latest-value table and the ordered delta
//! log) are addressed as `{shasta:<hex of encoded scope>}:<suffix>`. The fixed
//! prefix keeps the tag non-empty even for an all-empty scope. Cluster routing
//! hashes only the text between the braces, so the two keys always land on the
//! same shard and can be touched by one atomic script.

use prost::Message as _;

use crate::error::{CoreError, Result};
use crate::ident::ObjectIdentifier;

/// Suffix of the latest-value table key.
pub const SNAPSHOT_SUFFIX: &str = "snapshot";
/// Suffix of the ordered delta log key.
pub const DELTAS_SUFFIX: &str = "deltas";
/// Reserved snapshot-table field holding the last committed sequence id.
pub const SEQNO_FIELD: &str = "seqno";

/// `id` with `name` cleared.
pub fn scope_key_of(id: &ObjectIdentifier) -> ObjectIdentifier {
    id.with_name(String::new())
}

/// Prefix inside every routing tag.
const TAG_PREFIX: &str = "shasta:";

/// Wrap encoded scope bytes in a routing tag shared by every suffix.
pub fn shard_key(scope_key_bytes: &[u8], suffix: &str) -> String {
    format!("{{{}{}}}:{}", TAG_PREFIX, hex::encode(scope_key_bytes), suffix)
}

/// The part of `key` that decides its shard.
///
/// Follows cluster hash-tag rules: the text between the first `{` and the next
/// `}` if it is non-empty, otherwise the whole key.
pub fn hash_tag(key: &str) -> &str {
    if let Some(open) = key.find('{') {
        if let Some(len) = key[open + 1..].find('}') {
            if len > 0 {
                return &key[open + 1..open + 1 + len];
            }
        }
    }
    key
}

/// The colocation unit: an identifier with `name` cleared, plus its encoding.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ScopeKey {
    identifier: ObjectIdentifier,
    encoded: Vec<u8>,
}

impl ScopeKey {
    pub fn of(id: &ObjectIdentifier) -> Self {
        let identifier = scope_key_of(id);
        let encoded = identifier.encode_to_vec();
        Self {
            identifier,
            encoded,
        }
    }

    /// Derive the scope from an already-encoded identifier (a log record key).
    pub fn from_encoded(bytes: &[u8]) -> Result<Self> {
        let id = ObjectIdentifier::decode(bytes)
            .map_err(|e| CoreError::decode("object identifier", e))?;
        Ok(Self::of(&id))
    }

    pub fn identifier(&self) -> &ObjectIdentifier {
        &self.identifier
    }

    pub fn encoded(&self) -> &[u8] {
        &self.encoded
    }

    /// Hex form of the encoded scope, as it appears inside the routing tag.
    pub fn hex(&self) -> String {
        hex::encode(&self.encoded)
    }

    pub fn keys(&self) -> ScopeKeys {
        ScopeKeys {
            snapshot: shard_key(&self.encoded, SNAPSHOT_SUFFIX),
            deltas: shard_key(&self.encoded, DELTAS_SUFFIX),
        }
    }
}

/// The pair of colocated cache keys for one scope.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ScopeKeys {
    pub snapshot: String,
    pub deltas: String,
}

impl ScopeKeys {
    pub fn for_identifier(id: &ObjectIdentifier) -> Self {
        ScopeKey::of(id).keys()
    }

    /// Routing tag shared by both keys.
    pub fn tag(&self) -> &str {
        hash_tag(&self.snapshot)
    }
}
