// Error handling framework

use thiserror::Error;

/// Timer registration and release errors
#[derive(Error, Debug)]
pub enum TimerError {
    #[error("Message '{0}' carries no delivery time")]
    InvalidPayload(String),

    #[error("Store error: {0}")]
    Storage(#[from] StorageError),
}

/// Message store errors
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Query failed: {0}")]
    QueryFailed(String),

    #[error("Corrupted entry: {0}")]
    Corrupted(String),
}

/// Lock provider errors
#[derive(Error, Debug)]
pub enum LockError {
    #[error("Timed out acquiring lock '{resource}' after {waited_ms}ms")]
    Timeout { resource: String, waited_ms: u64 },

    #[error("Lock backend unavailable: {0}")]
    Unavailable(String),

    #[error("Lock '{0}' is no longer owned by this guard")]
    NotOwned(String),
}

/// Downstream sink errors
#[derive(Error, Debug)]
pub enum SinkError {
    #[error("Failed to publish message: {0}")]
    PublishFailed(String),

    #[error("Message serialization failed: {0}")]
    SerializationFailed(String),

    #[error("Publish acknowledgment timeout: {0}")]
    Timeout(String),
}

/// Errors surfaced by a full release pass
///
/// Lock timeouts are handled inside the pass (the partition is skipped until
/// the next tick), so the `Lock` variant only carries hard backend failures.
#[derive(Error, Debug)]
pub enum ReleaseError {
    #[error(transparent)]
    Timer(#[from] TimerError),

    #[error(transparent)]
    Lock(#[from] LockError),
}

impl From<sqlx::Error> for StorageError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
                StorageError::Unavailable(err.to_string())
            }
            _ => StorageError::QueryFailed(err.to_string()),
        }
    }
}

impl From<redis::RedisError> for LockError {
    fn from(err: redis::RedisError) -> Self {
        LockError::Unavailable(err.to_string())
    }
}

impl From<serde_json::Error> for SinkError {
    fn from(err: serde_json::Error) -> Self {
        SinkError::SerializationFailed(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_payload_names_the_subject() {
        let err = TimerError::InvalidPayload("orders.created".to_string());
        assert!(err.to_string().contains("orders.created"));
    }

    #[test]
    fn test_lock_timeout_display() {
        let err = LockError::Timeout {
            resource: "timer:release:0".to_string(),
            waited_ms: 500,
        };
        assert!(err.to_string().contains("timer:release:0"));
        assert!(err.to_string().contains("500"));
    }

    #[test]
    fn test_storage_error_wraps_into_timer_error() {
        let err: TimerError = StorageError::Unavailable("connection refused".to_string()).into();
        assert!(matches!(err, TimerError::Storage(_)));
    }

    #[test]
    fn test_release_error_is_transparent() {
        let err: ReleaseError = LockError::Unavailable("redis down".to_string()).into();
        assert!(err.to_string().contains("redis down"));
    }
}
