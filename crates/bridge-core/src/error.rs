/// The closed error taxonomy from spec section 7.
///
/// Config-time variants abort start-up. Per-record variants go through the
/// connector's `errors.tolerance` policy. Batch-level variants drive the
/// execution engine's retry/dead-letter state machine.
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("invalid pattern `{pattern}`: {reason}")]
    InvalidPattern { pattern: String, reason: String },

    #[error("pattern `{pattern}` is not homogeneous: mixed include/exclude property tokens")]
    NotHomogeneous { pattern: String },

    #[error("pattern `{pattern}` must contain at least one key (a `!`-prefixed token)")]
    MissingKey { pattern: String },

    #[error("topic `{0}` has no configured handler")]
    UnmappedTopic(String),

    #[error("malformed record on {topic}[{partition}]@{offset}: {reason}")]
    MalformedRecord { topic: String, partition: i32, offset: i64, reason: String },

    #[error("no qualifying unique constraint for event on {topic}[{partition}]@{offset}")]
    MissingConstraint { topic: String, partition: i32, offset: i64 },

    #[error("transient driver error: {0}")]
    TransientDriver(String),

    #[error("permanent driver error: {0}")]
    PermanentDriver(String),

    #[error("failed to publish to dead-letter topic: {0}")]
    DeadLetterPublishFailed(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl BridgeError {
    /// Whether this error kind should drive the execution engine's retry
    /// path (spec section 4.5) rather than the permanent-failure path.
    pub fn is_retryable(&self) -> bool {
        matches!(self, BridgeError::TransientDriver(_))
    }
}
