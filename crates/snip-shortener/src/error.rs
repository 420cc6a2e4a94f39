use snip_core::{IdError, StoreError};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, ShortenerError>;

#[derive(Debug, Clone, Error)]
pub enum ShortenerError {
    #[error("invalid target url: {0}")]
    InvalidTarget(String),
    #[error("malformed identifier: {0}")]
    MalformedIdentifier(String),
    #[error("storage error: {0}")]
    Storage(#[from] StoreError),
}

impl From<IdError> for ShortenerError {
    fn from(value: IdError) -> Self {
        match value {
            IdError::Malformed(message) => Self::MalformedIdentifier(message),
            other => Self::Storage(StoreError::Id(other)),
        }
    }
}
