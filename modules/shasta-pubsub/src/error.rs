use shasta_cache::CacheError;
use shasta_core::CoreError;
use shasta_log::LogError;

#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    #[error("Malformed identifier: {0}")]
    MalformedIdentifier(String),

    #[error("Failed to decode record: {0}")]
    Decode(#[source] CoreError),

    #[error("Commit failed: {0}")]
    CommitFailure(#[source] CacheError),

    #[error("Log error: {0}")]
    Log(#[from] LogError),
}

impl WorkerError {
    /// Only commit failures are worth another attempt; everything else would
    /// fail the same way again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, WorkerError::CommitFailure(_))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SubscriberError {
    #[error("Snapshot for scope {0} has no sequence id; nothing was ever committed to it")]
    MissingSnapshotSequence(String),

    #[error("Store unavailable: {0}")]
    StoreUnavailable(#[source] CacheError),

    #[error("Failed to decode: {0}")]
    Decode(#[source] CoreError),

    #[error("Subscriber disconnected")]
    Disconnected,

    #[error("Tail task panicked: {0}")]
    TailPanicked(String),
}

impl From<CacheError> for SubscriberError {
    fn from(err: CacheError) -> Self {
        match err {
            CacheError::Core(e) => SubscriberError::Decode(e),
            other => SubscriberError::StoreUnavailable(other),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    #[error("Value at index {0} has no identifier")]
    MissingIdentifier(usize),

    #[error("Log error: {0}")]
    Log(#[from] LogError),
}
