//! Error taxonomy for backing stores.

/// Errors surfaced by a backing store.
///
/// The variants deliberately mirror what the filesystem layer can act
/// on: missing object, conflicting object, denied access, a retryable
/// infrastructure failure, or a failure that should stop the daemon
/// (credential validation at startup).
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("object not found: {0}")]
    NotFound(String),

    #[error("object already exists: {0}")]
    AlreadyExists(String),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("transient store failure: {0}")]
    Transient(#[source] Box<dyn std::error::Error + Send + Sync>),

    #[error("fatal store failure: {0}")]
    Fatal(String),
}

impl StoreError {
    /// Translate an OS-level error for `name` into the taxonomy.
    pub(crate) fn from_io(err: std::io::Error, name: &str) -> Self {
        use std::io::ErrorKind;
        match err.kind() {
            ErrorKind::NotFound => StoreError::NotFound(name.to_string()),
            ErrorKind::AlreadyExists => StoreError::AlreadyExists(name.to_string()),
            ErrorKind::PermissionDenied => StoreError::PermissionDenied(name.to_string()),
            _ => StoreError::Transient(Box::new(err)),
        }
    }
}

impl From<object_store::Error> for StoreError {
    fn from(err: object_store::Error) -> Self {
        match err {
            object_store::Error::NotFound { path, .. } => StoreError::NotFound(path),
            object_store::Error::AlreadyExists { path, .. } => StoreError::AlreadyExists(path),
            object_store::Error::PermissionDenied { path, .. } => {
                StoreError::PermissionDenied(path)
            }
            object_store::Error::Unauthenticated { path, .. } => StoreError::PermissionDenied(path),
            other => StoreError::Transient(Box::new(other)),
        }
    }
}

/// Result type alias for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
