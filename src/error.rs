//! Error types for session storage, persistence and validation.

use thiserror::Error;

/// Errors raised by guarded writes against [`crate::storage::Storage`].
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Cannot write key \"{key}\": key is locked")]
    LockedKey { key: String },

    #[error("Storage is marked immutable")]
    Immutable,

    #[error("Key \"{key}\" is reserved for session metadata")]
    ReservedKey { key: String },
}

/// Errors surfaced by save handler I/O.
#[derive(Debug, Error)]
pub enum SaveHandlerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Save handler used before open()")]
    NotOpen,

    #[error("Invalid session id: {0}")]
    InvalidId(String),
}

/// Top-level error for session operations.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Session validation failed: {}", failed.join(", "))]
    ValidationFailed { failed: Vec<String> },

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Save handler error: {0}")]
    SaveHandler(#[from] SaveHandlerError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Session has not been started")]
    NotStarted,

    #[error("Configuration error: {0}")]
    Config(String),
}

pub type Result<T, E = SessionError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_failed_lists_names() {
        let err = SessionError::ValidationFailed {
            failed: vec!["remote_addr".to_string(), "csrf".to_string()],
        };
        assert_eq!(
            err.to_string(),
            "Session validation failed: remote_addr, csrf"
        );
    }

    #[test]
    fn test_storage_error_converts() {
        let err: SessionError = StorageError::LockedKey {
            key: "foo".to_string(),
        }
        .into();
        assert!(matches!(
            err,
            SessionError::Storage(StorageError::LockedKey { .. })
        ));
    }
}
