//! Error types for presence tracking.

use thiserror::Error;

/// Failures reported by a [`PresenceStore`](crate::PresenceStore).
#[derive(Debug, Error)]
pub enum StoreError {
    /// The store could not be reached.
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// The store rejected a command.
    #[error("Store command failed: {0}")]
    Command(String),

    /// The store answered with something the batch did not ask for.
    #[error("Unexpected store reply: {0}")]
    UnexpectedReply(String),

    /// The store cannot perform the requested operation.
    #[error("Unsupported store operation: {0}")]
    Unsupported(&'static str),
}

/// Tracker errors.
#[derive(Debug, Error)]
pub enum TrackerError {
    /// Rejected at construction time.
    #[error("Invalid tracker configuration: {0}")]
    InvalidConfig(&'static str),

    /// An identifier was empty where one is required.
    #[error("Identifier cannot be empty")]
    InvalidIdentifier,

    /// The backing store failed.
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[cfg(feature = "redis")]
impl From<redis::RedisError> for StoreError {
    fn from(e: redis::RedisError) -> Self {
        if e.is_io_error()
            || e.is_connection_refusal()
            || e.is_connection_dropped()
            || e.is_timeout()
        {
            Self::Unavailable(e.to_string())
        } else if e.kind() == redis::ErrorKind::TypeError {
            Self::UnexpectedReply(e.to_string())
        } else {
            Self::Command(e.to_string())
        }
    }
}
