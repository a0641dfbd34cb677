//! Backend-neutral storage errors shared by every tournament store.

use std::error::Error;

use thiserror::Error;
use uuid::Uuid;

/// Result alias for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Error raised by a tournament store, whatever the database behind it.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The backend could not serve the call.
    #[error("storage unavailable: {message}")]
    Unavailable {
        message: String,
        #[source]
        source: Box<dyn Error + Send + Sync>,
    },
    /// An update targeted a row that is no longer stored.
    #[error("{kind} {id} is not stored")]
    Missing { kind: &'static str, id: Uuid },
}

impl StorageError {
    /// Wrap a backend failure.
    pub fn unavailable(message: String, source: impl Error + Send + Sync + 'static) -> Self {
        StorageError::Unavailable {
            message,
            source: Box::new(source),
        }
    }

    /// Row `id` of `kind` was expected but not found.
    pub fn missing(kind: &'static str, id: Uuid) -> Self {
        StorageError::Missing { kind, id }
    }
}
