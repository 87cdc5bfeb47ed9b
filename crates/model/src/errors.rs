use thiserror::Error;

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("invalid identifier '{value}': {reason}")]
    InvalidIdentifier { value: String, reason: &'static str },

    #[error("failed to decode checkpoint: {0}")]
    CheckpointDecode(#[from] serde_json::Error),

    #[error("unsupported checkpoint format version {found} (expected {expected})")]
    CheckpointVersion { found: u16, expected: u16 },
}
