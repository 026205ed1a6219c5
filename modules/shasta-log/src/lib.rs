//! Partitioned append-only log with consumer groups.
//!
//! `PartitionedLog` is the seam the ingest side is written against. A real
//! broker sits behind it in production; `MemoryLog` is the in-process broker
//! used by tests and the developer CLI.

pub mod error;
pub mod log;
pub mod memory;

pub use error::{LogError, Result};
pub use log::{Assignment, LogRecord, Membership, PartitionedLog, StartPosition};
pub use memory::MemoryLog;
