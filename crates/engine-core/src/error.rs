use std::{io, path::PathBuf};
use thiserror::Error;

/// `ENOSPC` on unix-like systems.
const ENOSPC: i32 = 28;

/// Failures of the scratch file storage.
#[derive(Error, Debug)]
pub enum StorageError {
    /// The device holding the scratch directory ran out of space.
    #[error("Disk full while writing {path}: {source}")]
    DiskFull { path: PathBuf, source: io::Error },

    #[error("I/O error on {path}: {source}")]
    Io { path: PathBuf, source: io::Error },

    #[error("File not found: {0}")]
    NotFound(PathBuf),
}

impl StorageError {
    /// Classifies an I/O error raised while touching `path`.
    pub fn from_io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        let path = path.into();
        if is_disk_full(&source) {
            StorageError::DiskFull { path, source }
        } else if source.kind() == io::ErrorKind::NotFound {
            StorageError::NotFound(path)
        } else {
            StorageError::Io { path, source }
        }
    }

    pub fn is_disk_full(&self) -> bool {
        matches!(self, StorageError::DiskFull { .. })
    }
}

pub fn is_disk_full(err: &io::Error) -> bool {
    err.kind() == io::ErrorKind::StorageFull || err.raw_os_error() == Some(ENOSPC)
}

#[derive(Error, Debug)]
pub enum StateStoreError {
    #[error("State database error: {0}")]
    Sled(#[from] sled::Error),

    #[error("Failed to encode or decode state: {0}")]
    Codec(#[from] bincode::Error),

    #[error("Upload session '{0}' does not exist")]
    MissingSession(String),

    #[error("State transaction failed: {0}")]
    Transaction(String),
}
