use connectors::error::StoreError;
use engine_config::error::ConfigError;
use engine_core::error::{StateStoreError, StorageError};
use engine_processing::error::PipelineError;
use engine_transfer::error::{DownloadError, UploadError};
use model::{
    core::identifiers::{ProcessId, TargetId},
    errors::ModelError,
    execution::checkpoint::Checkpoint,
};
use thiserror::Error;

/// Top-level errors of the transfer engine.
#[derive(Debug, Error)]
pub enum MigrationError {
    /// Another unfinished migration holds the target.
    #[error("Target '{target}' is already being migrated by process '{holder}'")]
    ProcessConflict { target: TargetId, holder: ProcessId },

    #[error("Migration process '{0}' was cancelled")]
    ProcessCancelled(ProcessId),

    #[error("Checkpoint belongs to target '{found}', not '{expected}'")]
    TargetMismatch { expected: TargetId, found: TargetId },

    #[error("Pipeline error: {0}")]
    Pipeline(#[from] PipelineError),

    #[error("State store error: {0}")]
    State(#[from] StateStoreError),

    #[error("Settings error: {0}")]
    Config(#[from] ConfigError),

    #[error("Upload error: {0}")]
    Upload(#[from] UploadError),

    #[error("Download error: {0}")]
    Download(#[from] DownloadError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Checkpoint error: {0}")]
    Checkpoint(#[from] ModelError),

    /// The upload loop gave up without the file being assembled.
    #[error("Upload of session '{session_id}' did not complete: {reason}")]
    Incomplete { session_id: String, reason: String },
}

/// A failed invocation together with the checkpoint as it stood when the
/// error surfaced. Rows committed before the failure are already recorded in
/// it, so the caller persists it like any other invocation result.
#[derive(Debug, Error)]
#[error("{error}")]
pub struct InvokeError {
    pub checkpoint: Box<Checkpoint>,
    #[source]
    pub error: MigrationError,
}

impl InvokeError {
    pub fn new(checkpoint: Checkpoint, error: MigrationError) -> Self {
        Self {
            checkpoint: Box::new(checkpoint),
            error,
        }
    }

    pub fn into_parts(self) -> (Checkpoint, MigrationError) {
        (*self.checkpoint, self.error)
    }
}
