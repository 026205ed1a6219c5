/// Result type alias for log operations.
pub type Result<T> = std::result::Result<T, LogError>;

#[derive(Debug, thiserror::Error)]
pub enum LogError {
    #[error("Unknown topic: {0}")]
    UnknownTopic(String),

    #[error("Unknown partition {partition} of topic {topic}")]
    UnknownPartition { topic: String, partition: u32 },

    #[error("Member {member} is not part of group {group}")]
    NotMember { group: String, member: String },

    #[error("Log closed")]
    Closed,
}
