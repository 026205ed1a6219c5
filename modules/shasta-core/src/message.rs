//! What a subscriber's queue yields: one snapshot, then deltas.

use std::collections::BTreeMap;

use crate::ident::Envelope;
use crate::sequence::SequenceId;

/// Last known value per name for one scope, as of `seqno`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Snapshot {
    pub seqno: SequenceId,
    pub entries: BTreeMap<String, Envelope>,
}

impl Snapshot {
    pub fn get(&self, name: &str) -> Option<&Envelope> {
        self.entries.get(name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    Snapshot(Snapshot),
    /// One delta log record, tagged with its sequence id.
    Delta(Envelope),
}

impl Message {
    pub fn is_snapshot(&self) -> bool {
        matches!(self, Message::Snapshot(_))
    }

    pub fn as_snapshot(&self) -> Option<&Snapshot> {
        match self {
            Message::Snapshot(s) => Some(s),
            Message::Delta(_) => None,
        }
    }

    pub fn as_delta(&self) -> Option<&Envelope> {
        match self {
            Message::Delta(d) => Some(d),
            Message::Snapshot(_) => None,
        }
    }
}
