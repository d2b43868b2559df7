//! Error types for the storage adapter

use thiserror::Error;

/// Crate-wide result type
pub type Result<T> = std::result::Result<T, StorageError>;

/// Storage-level errors
///
/// `ObjectNotFound` is an internal signal: backends raise it when a key
/// does not exist, and the facade converts it into `None`, an
/// [`Existence`](crate::storage::Existence) variant, or a dedicated stream
/// outcome. Callers of the facade never receive it as a plain error from
/// read/exists/metadata operations.
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("object not found: {0}")]
    ObjectNotFound(String),

    #[error("access denied: {0}")]
    AccessDenied(String),

    #[error("storage backend error: {0}")]
    Backend(String),
}

impl StorageError {
    /// Whether this error is the backend's not-found signal.
    pub fn is_not_found(&self) -> bool {
        matches!(self, StorageError::ObjectNotFound(_))
    }
}
