use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while loading engine settings or a pipeline definition.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid value '{value}' for {key}: {reason}")]
    InvalidValue {
        key: String,
        value: String,
        reason: String,
    },

    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Malformed pipeline definition: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid pipeline: {0}")]
    InvalidPipeline(String),
}
