//! Wire types of the chunked upload call.

use crate::core::identifiers::SessionId;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Half-open byte interval `[start, end)` within an uploaded file.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteSpan {
    pub start: u64,
    pub end: u64,
}

impl ByteSpan {
    pub fn new(start: u64, end: u64) -> Self {
        Self { start, end }
    }

    pub fn len(&self) -> u64 {
        self.end.saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Re-attach information handed out to a caller that reconnects mid-session.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ResumeToken {
    /// Next chunk index the receiver expects.
    #[serde(rename = "resumePartsIndex")]
    pub parts_index: u32,
    #[serde(rename = "resumeFilepath")]
    pub filepath: PathBuf,
    #[serde(rename = "resumeChunks")]
    pub chunks: u32,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ChunkRequest {
    #[serde(rename = "sessionID")]
    pub session_id: SessionId,
    /// 1-based index of this chunk.
    pub chunk_index: u32,
    pub total_chunks: u32,
    pub chunk_size: u64,
    pub byte_start: u64,
    /// Exclusive end offset of this chunk.
    pub byte_end: u64,
    #[serde(default)]
    pub chunk_data: Vec<u8>,
    #[serde(default)]
    pub content_type: Option<String>,
    /// Hex blake3 digest the assembled file must match.
    #[serde(default)]
    pub expected_checksum: Option<String>,
    #[serde(default)]
    pub missing_chunk_to_fix: Option<u32>,
    #[serde(flatten)]
    pub resume: Option<ResumeToken>,
}

impl ChunkRequest {
    /// Builds the request carrying chunk `index` of a file split into
    /// `chunk_size`-byte pieces.
    pub fn for_chunk(
        session_id: SessionId,
        index: u32,
        total_chunks: u32,
        chunk_size: u64,
        data: Vec<u8>,
    ) -> Self {
        let byte_start = u64::from(index.saturating_sub(1)) * chunk_size;
        let byte_end = byte_start + data.len() as u64;
        Self {
            session_id,
            chunk_index: index,
            total_chunks,
            chunk_size,
            byte_start,
            byte_end,
            chunk_data: data,
            content_type: None,
            expected_checksum: None,
            missing_chunk_to_fix: None,
            resume: None,
        }
    }

    pub fn span(&self) -> ByteSpan {
        ByteSpan::new(self.byte_start, self.byte_end)
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    pub fn with_expected_checksum(mut self, checksum: impl Into<String>) -> Self {
        self.expected_checksum = Some(checksum.into());
        self
    }

    pub fn fixing(mut self, missing: u32) -> Self {
        self.missing_chunk_to_fix = Some(missing);
        self
    }

    pub fn with_resume(mut self, token: ResumeToken) -> Self {
        self.resume = Some(token);
        self
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(untagged, rename_all_fields = "camelCase")]
pub enum ChunkResponse {
    /// Every chunk arrived and the file was moved to its final path.
    Assembled {
        assembled: bool,
        done: bool,
        filepath: PathBuf,
        size: u64,
        checksum: String,
    },
    /// A gap was found; resend exactly this slice.
    MissingChunk {
        missing_chunk: u32,
        byte_start: u64,
        byte_end: u64,
    },
    /// The caller re-attached to an in-flight session.
    Resumed {
        resume_parts_index: u32,
        resume_filepath: PathBuf,
        resume_chunks: u32,
    },
    /// An intermediate chunk was written.
    Received { received: u32 },
}

impl ChunkResponse {
    pub fn assembled(filepath: PathBuf, size: u64, checksum: String) -> Self {
        ChunkResponse::Assembled {
            assembled: true,
            done: true,
            filepath,
            size,
            checksum,
        }
    }

    pub fn missing(index: u32, span: ByteSpan) -> Self {
        ChunkResponse::MissingChunk {
            missing_chunk: index,
            byte_start: span.start,
            byte_end: span.end,
        }
    }

    pub fn resumed(token: ResumeToken) -> Self {
        ChunkResponse::Resumed {
            resume_parts_index: token.parts_index,
            resume_filepath: token.filepath,
            resume_chunks: token.chunks,
        }
    }

    pub fn is_assembled(&self) -> bool {
        matches!(self, ChunkResponse::Assembled { assembled: true, .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_uses_documented_field_names() {
        let request = ChunkRequest::for_chunk(SessionId::parse("s1").unwrap(), 2, 3, 4, vec![1, 2])
            .with_resume(ResumeToken {
                parts_index: 2,
                filepath: PathBuf::from("/tmp/s1.part"),
                chunks: 3,
            });
        let json = serde_json::to_value(&request).unwrap();

        assert_eq!(json["sessionID"], "s1");
        assert_eq!(json["chunkIndex"], 2);
        assert_eq!(json["byteStart"], 4);
        assert_eq!(json["byteEnd"], 6);
        assert_eq!(json["resumePartsIndex"], 2);
        assert_eq!(json["resumeChunks"], 3);

        let back: ChunkRequest = serde_json::from_value(json).unwrap();
        assert_eq!(back, request);
    }

    #[test]
    fn request_without_resume_fields_decodes() {
        let json = serde_json::json!({
            "sessionID": "s1",
            "chunkIndex": 1,
            "totalChunks": 1,
            "chunkSize": 8,
            "byteStart": 0,
            "byteEnd": 2,
            "chunkData": [1, 2]
        });
        let request: ChunkRequest = serde_json::from_value(json).unwrap();
        assert!(request.resume.is_none());
        assert_eq!(request.span(), ByteSpan::new(0, 2));
    }

    #[test]
    fn missing_chunk_response_shape() {
        let json = serde_json::to_value(ChunkResponse::missing(4, ByteSpan::new(3, 4))).unwrap();
        assert_eq!(json, serde_json::json!({"missingChunk": 4, "byteStart": 3, "byteEnd": 4}));
    }

    #[test]
    fn assembled_response_shape() {
        let response = ChunkResponse::assembled(PathBuf::from("/x.pkg"), 10, "ab".into());
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["assembled"], true);
        assert_eq!(json["done"], true);
        assert_eq!(json["filepath"], "/x.pkg");
        assert!(response.is_assembled());
    }
}
