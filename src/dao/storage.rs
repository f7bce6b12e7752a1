use std::error::Error;
use thiserror::Error;

/// Result alias for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Error raised by storage backends regardless of the underlying database.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Backend could not be reached or rejected the operation.
    #[error("storage unavailable: {message}")]
    Unavailable {
        /// Description of the failed operation.
        message: String,
        /// Backend error.
        #[source]
        source: Box<dyn Error + Send + Sync>,
    },
    /// A persisted record cannot be turned back into a valid domain value.
    #[error("corrupt record `{id}`: {reason}")]
    Corrupt {
        /// Identifier of the offending record.
        id: String,
        /// What is wrong with it.
        reason: String,
    },
}

impl StorageError {
    /// Construct an unavailable error from any backend failure.
    pub fn unavailable(message: String, source: impl Error + Send + Sync + 'static) -> Self {
        StorageError::Unavailable {
            message,
            source: Box::new(source),
        }
    }

    /// Construct a corruption error for the record `id`.
    pub fn corrupt(id: impl ToString, reason: impl Into<String>) -> Self {
        StorageError::Corrupt {
            id: id.to_string(),
            reason: reason.into(),
        }
    }
}
