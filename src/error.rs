//! Error types
//!
//! `QueueError` covers failures of a queue backend itself. `ThrottleError` is
//! what a drain call or a rate construction can fail with.

/// Failures raised by a queue backend (I/O, payload encoding, backend state).
#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("queue i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("payload serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("queue backend error: {0}")]
    Backend(String),
}

/// Errors surfaced to callers of the throttling core.
#[derive(Debug, thiserror::Error)]
pub enum ThrottleError {
    /// Non-positive token count or unknown time unit.
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// The worker declared the whole queue unprocessable for this pass.
    #[error("queue {queue} suspended after {processed} processed items: {reason}")]
    QueueSuspended {
        queue: String,
        reason: String,
        processed: u64,
    },

    #[error("queue not found: {0}")]
    QueueNotFound(String),

    #[error(transparent)]
    Queue(#[from] QueueError),
}

impl ThrottleError {
    /// Whether this error is a worker-issued suspension.
    pub fn is_suspended(&self) -> bool {
        matches!(self, ThrottleError::QueueSuspended { .. })
    }
}

pub type QueueResult<T> = std::result::Result<T, QueueError>;
pub type Result<T> = std::result::Result<T, ThrottleError>;
