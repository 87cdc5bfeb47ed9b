use connectors::error::StoreError;
use engine_config::error::ConfigError;
use engine_core::error::StorageError;
use engine_runtime::error::MigrationError;
use engine_transfer::error::{DownloadError, UploadError};
use model::errors::ModelError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CliError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid settings: {0}")]
    Settings(#[from] ConfigError),

    #[error("Migration failed: {0}")]
    Runner(#[from] MigrationError),

    #[error("Upload failed: {0}")]
    Upload(#[from] UploadError),

    #[error("Download failed: {0}")]
    Download(#[from] DownloadError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Invalid identifier or checkpoint: {0}")]
    Model(#[from] ModelError),

    #[error("Fixture error: {0}")]
    Fixture(String),

    #[error("Shutdown requested")]
    ShutdownRequested,
}
