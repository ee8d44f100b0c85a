//! Error types shared by every storage backend.

use thiserror::Error;

pub type StorageResult<T> = Result<T, StorageError>;

#[derive(Debug, Error)]
pub enum StorageError {
    /// The key does not exist in the backend
    #[error("object not found: {0}")]
    NotFound(String),

    /// Remote credentials are missing or were rejected by the provider
    #[error("{backend} rejected credentials: {message}")]
    Credentials { backend: String, message: String },

    #[error("invalid storage key {key:?}: {reason}")]
    InvalidKey { key: String, reason: &'static str },

    #[error("i/o error on {key}: {source}")]
    Io {
        key: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{backend} request for {key} failed: {message}")]
    Remote {
        backend: String,
        key: String,
        message: String,
    },
}

impl StorageError {
    pub(crate) fn io(key: impl Into<String>, source: std::io::Error) -> Self {
        StorageError::Io {
            key: key.into(),
            source,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StorageError::NotFound(_))
    }

    pub fn is_credentials(&self) -> bool {
        matches!(self, StorageError::Credentials { .. })
    }
}
