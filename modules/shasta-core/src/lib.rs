//! Identifier model and key derivation shared by every shasta component.
//!
//! Workers and subscribers must derive cache keys with the exact same pure
//! functions, otherwise colocation and lookup both fail silently. Everything
//! that crosses a process boundary (log keys, log values, cache entries) is
//! defined here.

pub mod config;
pub mod error;
pub mod ident;
pub mod instrument;
pub mod keys;
pub mod message;
pub mod sequence;
pub mod wire;

pub use config::{Config, RetrySettings, TuningConfig};
pub use error::{CoreError, Result};
pub use ident::{Envelope, ObjectIdentifier, Value};
pub use instrument::{Instrumentation, Phase, PhaseTimings};
pub use keys::{hash_tag, scope_key_of, shard_key, ScopeKey, ScopeKeys};
pub use message::{Message, Snapshot};
pub use sequence::SequenceId;
