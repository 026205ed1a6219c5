//! Wire types carried on the log and stored in the cache.
//!
//! These are protobuf messages. Proto3 omits default (empty) fields, so an
//! identifier with `name` cleared encodes to exactly the bytes of its scope.

use crate::error::{CoreError, Result};
use crate::keys::SEQNO_FIELD;
use crate::sequence::SequenceId;

/// Addresses one object: `(app_id, tag, scope)` is the colocation unit,
/// `name` picks the object within it.
#[derive(Clone, PartialEq, Eq, Hash, prost::Message)]
pub struct ObjectIdentifier {
    #[prost(string, tag = "1")]
    pub app_id: String,
    #[prost(string, tag = "2")]
    pub tag: String,
    #[prost(string, tag = "3")]
    pub scope: String,
    #[prost(string, tag = "4")]
    pub name: String,
}

impl ObjectIdentifier {
    pub fn new(
        app_id: impl Into<String>,
        tag: impl Into<String>,
        scope: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            app_id: app_id.into(),
            tag: tag.into(),
            scope: scope.into(),
            name: name.into(),
        }
    }

    /// Same scope, different object.
    pub fn with_name(&self, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..self.clone()
        }
    }

    /// Reject names that collide with the protocol's reserved slots.
    pub fn validate_name(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(CoreError::MalformedIdentifier(
                "object name must not be empty".to_string(),
            ));
        }
        if self.name == SEQNO_FIELD {
            return Err(CoreError::MalformedIdentifier(format!(
                "object name '{SEQNO_FIELD}' is reserved"
            )));
        }
        Ok(())
    }
}

/// An opaque payload plus a back-reference to the object it belongs to.
#[derive(Clone, PartialEq, Eq, prost::Message)]
pub struct Value {
    #[prost(message, optional, tag = "1")]
    pub identifier: Option<ObjectIdentifier>,
    #[prost(bytes = "vec", tag = "2")]
    pub data: Vec<u8>,
}

impl Value {
    pub fn new(identifier: ObjectIdentifier, data: impl Into<Vec<u8>>) -> Self {
        Self {
            identifier: Some(identifier),
            data: data.into(),
        }
    }
}

/// A value tagged with the sequence id it was committed at.
#[derive(Clone, PartialEq, Eq, prost::Message)]
pub struct Envelope {
    #[prost(message, optional, tag = "1")]
    pub value: Option<Value>,
    #[prost(string, tag = "2")]
    pub seqno: String,
}

impl Envelope {
    pub fn new(value: Value, seqno: SequenceId) -> Self {
        Self {
            value: Some(value),
            seqno: seqno.to_string(),
        }
    }

    pub fn sequence(&self) -> Result<SequenceId> {
        self.seqno.parse()
    }

    /// Payload bytes, empty when the envelope carries no value.
    pub fn data(&self) -> &[u8] {
        self.value.as_ref().map(|v| v.data.as_slice()).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_empty_name() {
        let id = ObjectIdentifier::new("app", "tag", "scope", "");
        assert!(id.validate_name().is_err());
    }

    #[test]
    fn test_rejects_reserved_name() {
        let id = ObjectIdentifier::new("app", "tag", "scope", "seqno");
        let err = id.validate_name().unwrap_err();
        assert!(err.to_string().contains("reserved"));
    }

    #[test]
    fn test_accepts_regular_name() {
        let id = ObjectIdentifier::new("app", "tag", "scope", "seqno-2");
        assert!(id.validate_name().is_ok());
    }

    #[test]
    fn test_envelope_exposes_payload_and_sequence() {
        let id = ObjectIdentifier::new("app", "tag", "scope", "n1");
        let env = Envelope::new(Value::new(id, "v1"), SequenceId::new(17, 3));
        assert_eq!(env.data(), b"v1");
        assert_eq!(env.sequence().unwrap(), SequenceId::new(17, 3));
    }
}
