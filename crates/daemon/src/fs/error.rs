//! Dispatcher error taxonomy and errno mapping.

use caskfs_store::StoreError;

/// Errors a filesystem operation can reply with. Each variant maps to
/// exactly one errno on the wire.
#[derive(Debug, thiserror::Error)]
pub enum FsError {
    /// Name absent from the directory cache, or the store reported a
    /// missing object.
    #[error("not found")]
    NotFound,

    /// Create or Mkdir of a name that is already present.
    #[error("already exists")]
    AlreadyExists,

    #[error("permission denied")]
    PermissionDenied,

    /// Operation applied to a node of the wrong kind.
    #[error("not supported")]
    NotSupported,

    /// A store write or delete failed, or a directory slated for
    /// removal still has children.
    #[error("no data")]
    NoData,

    #[error("i/o failure: {0}")]
    Io(#[source] StoreError),
}

impl FsError {
    pub fn errno(&self) -> libc::c_int {
        match self {
            FsError::NotFound => libc::ENOENT,
            FsError::AlreadyExists => libc::EEXIST,
            FsError::PermissionDenied => libc::EPERM,
            FsError::NotSupported => libc::ENOTSUP,
            FsError::NoData => libc::ENODATA,
            FsError::Io(_) => libc::EIO,
        }
    }
}

impl From<StoreError> for FsError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(_) => FsError::NotFound,
            StoreError::AlreadyExists(_) => FsError::AlreadyExists,
            StoreError::PermissionDenied(_) => FsError::PermissionDenied,
            other => FsError::Io(other),
        }
    }
}

pub type Result<T> = std::result::Result<T, FsError>;
