use engine_core::error::{StateStoreError, StorageError};
use model::core::identifiers::SessionId;
use serde::Serialize;
use std::path::PathBuf;
use thiserror::Error;

/// How a caller should react to an upload error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Repeat the same call unmodified.
    Retryable,
    /// Storage ran out; retrying will not help until space is freed.
    ResourceExhausted,
    /// The session cannot continue.
    Fatal,
}

#[derive(Debug, Error)]
pub enum UploadError {
    #[error("Invalid chunk for session '{session_id}': {reason}")]
    InvalidChunk { session_id: SessionId, reason: String },

    #[error("Upload session '{0}' was cancelled")]
    SessionCancelled(SessionId),

    #[error("Upload session '{0}' does not exist")]
    UnknownSession(SessionId),

    #[error("Cannot resume session '{session_id}': {reason}")]
    ResumeMismatch { session_id: SessionId, reason: String },

    /// Wrong content type or an assembled file that fails verification.
    #[error("Package for session '{session_id}' is corrupt: {reason}")]
    Corrupt { session_id: SessionId, reason: String },

    #[error("Disk full while storing session '{session_id}': {source}")]
    DiskFull {
        session_id: SessionId,
        source: StorageError,
    },

    #[error("Storage error in session '{session_id}': {source}")]
    Storage {
        session_id: SessionId,
        source: StorageError,
    },

    #[error("Upload state error: {0}")]
    State(#[from] StateStoreError),
}

impl UploadError {
    pub fn storage(session_id: &SessionId, source: StorageError) -> Self {
        if source.is_disk_full() {
            UploadError::DiskFull {
                session_id: session_id.clone(),
                source,
            }
        } else {
            UploadError::Storage {
                session_id: session_id.clone(),
                source,
            }
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            UploadError::Storage { .. } | UploadError::State(_) => ErrorCategory::Retryable,
            UploadError::DiskFull { .. } => ErrorCategory::ResourceExhausted,
            UploadError::InvalidChunk { .. }
            | UploadError::SessionCancelled(_)
            | UploadError::UnknownSession(_)
            | UploadError::ResumeMismatch { .. }
            | UploadError::Corrupt { .. } => ErrorCategory::Fatal,
        }
    }
}

/// The `{error}` shape of the chunk upload response.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub category: ErrorCategory,
}

impl From<&UploadError> for ErrorResponse {
    fn from(err: &UploadError) -> Self {
        Self {
            error: err.to_string(),
            category: err.category(),
        }
    }
}

#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("File not found: {0}")]
    NotFound(PathBuf),

    #[error("Not a regular file: {0}")]
    NotAFile(PathBuf),

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

impl DownloadError {
    pub fn from_io(path: &std::path::Path, source: std::io::Error) -> Self {
        if source.kind() == std::io::ErrorKind::NotFound {
            DownloadError::NotFound(path.to_path_buf())
        } else {
            DownloadError::Io {
                path: path.to_path_buf(),
                source,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    fn sid() -> SessionId {
        SessionId::parse("s1").unwrap()
    }

    #[test]
    fn disk_full_is_its_own_category() {
        let full = StorageError::from_io("/x", io::Error::from(io::ErrorKind::StorageFull));
        assert_eq!(
            UploadError::storage(&sid(), full).category(),
            ErrorCategory::ResourceExhausted
        );

        let denied = StorageError::from_io("/x", io::Error::from(io::ErrorKind::PermissionDenied));
        assert_eq!(
            UploadError::storage(&sid(), denied).category(),
            ErrorCategory::Retryable
        );
    }

    #[test]
    fn error_response_carries_message_and_category() {
        let err = UploadError::Corrupt {
            session_id: sid(),
            reason: "bad type".into(),
        };
        let json = serde_json::to_value(ErrorResponse::from(&err)).unwrap();
        assert_eq!(json["category"], "fatal");
        assert!(json["error"].as_str().unwrap().contains("s1"));
    }
}
