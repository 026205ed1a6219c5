//! Canonical encodings.
//!
//! Snapshot-table entries are encoded `Envelope`s. The sequence id is only
//! known inside the atomic commit, after the delta append, so an envelope is
//! built in two halves: the client encodes the `value` field up front
//! ([`envelope_prefix`]) and the commit appends the `seqno` field
//! ([`seal_envelope`]). Protobuf decoders accept fields in any order, and the
//! server-side commit script performs the same byte concatenation.

use prost::Message as _;

use crate::error::{CoreError, Result};
use crate::ident::{Envelope, ObjectIdentifier, Value};
use crate::sequence::SequenceId;

/// Field 2 (`seqno`), length-delimited wire type.
const SEQNO_FIELD_KEY: u8 = 0x12;

pub fn encode_identifier(id: &ObjectIdentifier) -> Vec<u8> {
    id.encode_to_vec()
}

pub fn decode_identifier(bytes: &[u8]) -> Result<ObjectIdentifier> {
    ObjectIdentifier::decode(bytes).map_err(|e| CoreError::decode("object identifier", e))
}

pub fn encode_value(value: &Value) -> Vec<u8> {
    value.encode_to_vec()
}

pub fn decode_value(bytes: &[u8]) -> Result<Value> {
    Value::decode(bytes).map_err(|e| CoreError::decode("value", e))
}

pub fn decode_envelope(bytes: &[u8]) -> Result<Envelope> {
    Envelope::decode(bytes).map_err(|e| CoreError::decode("envelope", e))
}

/// Encoding of an envelope whose `seqno` is not yet known.
///
/// Takes the already-encoded value so the commit path encodes it once.
pub fn envelope_prefix(encoded_value: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(encoded_value.len() + 6);
    prost::encoding::encode_key(1, prost::encoding::WireType::LengthDelimited, &mut buf);
    prost::encoding::encode_varint(encoded_value.len() as u64, &mut buf);
    buf.extend_from_slice(encoded_value);
    buf
}

/// Complete an envelope prefix with the sequence id assigned at commit.
pub fn seal_envelope(prefix: &[u8], seqno: &SequenceId) -> Vec<u8> {
    let seqno = seqno.to_string();
    let mut buf = Vec::with_capacity(prefix.len() + seqno.len() + 2);
    buf.extend_from_slice(prefix);
    buf.push(SEQNO_FIELD_KEY);
    prost::encoding::encode_varint(seqno.len() as u64, &mut buf);
    buf.extend_from_slice(seqno.as_bytes());
    buf
}
