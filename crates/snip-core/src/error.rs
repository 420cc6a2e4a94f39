use thiserror::Error;

/// Result type for storage operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Errors produced while building or parsing an [`Id`](crate::Id).
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum IdError {
    #[error("malformed identifier: {0}")]
    Malformed(String),
    #[error("timestamp {second}s is outside the identifier range")]
    OutOfRange { second: i64 },
}

#[derive(Debug, Clone, Error)]
pub enum StoreError {
    #[error("record serialization failed: {0}")]
    Serialization(String),
    #[error("storage backend unavailable: {0}")]
    Unavailable(String),
    #[error("store is already closed")]
    Closed,
    #[error("storage operation failed: {0}")]
    Operation(String),
    #[error("iteration aborted: {0}")]
    Aborted(String),
    #[error("identifier generation failed: {0}")]
    Id(#[from] IdError),
}

impl From<serde_json::Error> for StoreError {
    fn from(value: serde_json::Error) -> Self {
        Self::Serialization(value.to_string())
    }
}
