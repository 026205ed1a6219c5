/// Result type alias for identifier and wire operations.
pub type Result<T> = std::result::Result<T, CoreError>;

#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("Malformed identifier: {0}")]
    MalformedIdentifier(String),

    #[error("Failed to decode {what}: {source}")]
    Decode {
        what: &'static str,
        #[source]
        source: prost::DecodeError,
    },

    #[error("Invalid sequence id: {0}")]
    InvalidSequence(String),
}

impl CoreError {
    pub(crate) fn decode(what: &'static str, source: prost::DecodeError) -> Self {
        CoreError::Decode { what, source }
    }
}
