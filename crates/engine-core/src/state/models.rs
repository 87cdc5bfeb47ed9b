use chrono::{DateTime, Utc};
use model::{
    core::identifiers::{ProcessId, SessionId, TargetId},
    transfer::ByteSpan,
};
use serde::{Deserialize, Serialize};
use std::{collections::BTreeSet, path::PathBuf};

/// Persisted state of one in-flight upload.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct UploadSession {
    pub session_id: SessionId,
    pub total_chunks: u32,
    pub chunk_size: u64,
    /// 1-based indices confirmed written to `partial_path`.
    pub received: BTreeSet<u32>,
    pub partial_path: PathBuf,
    pub final_path: PathBuf,
    /// Known once the last chunk has been written.
    pub total_size: Option<u64>,
    pub content_type: Option<String>,
    pub expected_checksum: Option<String>,
    pub assembled: bool,
    /// blake3 digest of the assembled file.
    pub checksum: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl UploadSession {
    pub fn new(
        session_id: SessionId,
        total_chunks: u32,
        chunk_size: u64,
        partial_path: PathBuf,
        final_path: PathBuf,
    ) -> Self {
        let now = Utc::now();
        Self {
            session_id,
            total_chunks,
            chunk_size,
            received: BTreeSet::new(),
            partial_path,
            final_path,
            total_size: None,
            content_type: None,
            expected_checksum: None,
            assembled: false,
            checksum: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Byte offset chunk `index` is written at.
    pub fn offset_of(&self, index: u32) -> u64 {
        u64::from(index.saturating_sub(1)) * self.chunk_size
    }

    /// Byte slice chunk `index` covers, clamped to the file size when known.
    pub fn span_of(&self, index: u32) -> ByteSpan {
        let start = self.offset_of(index);
        let mut end = start + self.chunk_size;
        if let Some(size) = self.total_size {
            end = end.min(size);
        }
        ByteSpan::new(start, end)
    }

    /// Lowest chunk index not yet written.
    pub fn first_missing(&self) -> Option<u32> {
        (1..=self.total_chunks).find(|i| !self.received.contains(i))
    }

    pub fn is_complete(&self) -> bool {
        self.received.len() == self.total_chunks as usize && self.first_missing().is_none()
    }

    pub fn has_same_geometry(&self, total_chunks: u32, chunk_size: u64) -> bool {
        self.total_chunks == total_chunks && self.chunk_size == chunk_size
    }
}

/// Claim of a target by one migration process.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ProcessLease {
    pub target: TargetId,
    pub process_id: ProcessId,
    pub acquired_at: DateTime<Utc>,
    pub renewed_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum LeaseOutcome {
    /// The target was free and is now held by the caller.
    Acquired,
    /// The caller already held the target.
    Renewed,
    /// Another, unfinished process holds the target.
    Conflict { holder: ProcessId },
}
