use shasta_core::CoreError;

/// Result type alias for cache operations.
pub type Result<T> = std::result::Result<T, CacheError>;

#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("Cache connection closed")]
    ConnectionClosed,

    #[error("Cache unavailable: {0}")]
    Unavailable(String),

    #[error("Keys '{0}' and '{1}' do not route to the same shard")]
    CrossSlot(String, String),

    #[error("Field '{0}' is reserved")]
    ReservedField(String),

    #[error("Unexpected reply: {0}")]
    UnexpectedReply(String),

    #[error(transparent)]
    Core(#[from] CoreError),

    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),
}

impl CacheError {
    /// The transport is gone, either closed locally or dropped by the server.
    /// Tail loops treat this as a graceful end.
    pub fn is_connection_closed(&self) -> bool {
        match self {
            CacheError::ConnectionClosed => true,
            CacheError::Redis(e) => e.is_connection_dropped() || e.is_io_error(),
            _ => false,
        }
    }
}
