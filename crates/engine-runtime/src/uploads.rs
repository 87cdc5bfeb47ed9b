use crate::error::MigrationError;
use engine_core::{
    chunk_store::{file_checksum, file_size},
    error::StorageError,
};
use engine_transfer::{error::UploadError, receiver::ChunkReceiver};
use model::{
    core::identifiers::SessionId,
    transfer::{ChunkRequest, ChunkResponse},
};
use std::{collections::VecDeque, io::SeekFrom, path::Path};
use tokio::{
    fs::File,
    io::{AsyncReadExt, AsyncSeekExt},
};
use tracing::{info, warn};

#[derive(Debug, Clone, Default)]
pub struct UploadOptions {
    pub content_type: Option<String>,
    /// Send the blake3 digest of the source so the receiver verifies it.
    pub verify: bool,
    /// Chunks left out of the first pass; they are sent when the receiver
    /// asks for them.
    pub withhold: Vec<u32>,
}

#[derive(Debug, Clone)]
pub struct UploadReport {
    pub response: ChunkResponse,
    pub total_chunks: u32,
    pub chunks_sent: u32,
    pub resends: u32,
}

/// Client-side driver of the chunk receiver: splits a local file and follows
/// the receiver's missing-chunk replies until the file is assembled.
#[derive(Clone)]
pub struct UploadService {
    receiver: ChunkReceiver,
    chunk_size: u64,
}

impl UploadService {
    pub fn new(receiver: ChunkReceiver, chunk_size: u64) -> Self {
        Self {
            receiver,
            chunk_size: chunk_size.max(1),
        }
    }

    pub fn receiver(&self) -> &ChunkReceiver {
        &self.receiver
    }

    pub async fn receive(&self, request: ChunkRequest) -> Result<ChunkResponse, UploadError> {
        let session_id = request.session_id.clone();
        let index = request.chunk_index;
        self.receiver.receive_chunk(request).await.inspect_err(|err| {
            warn!(
                session_id = %session_id,
                index,
                category = ?err.category(),
                error = %err,
                "Chunk rejected"
            );
        })
    }

    pub async fn cancel(&self, session_id: &SessionId) -> Result<(), UploadError> {
        self.receiver.cancel(session_id).await
    }

    pub async fn upload_file(
        &self,
        path: &Path,
        session_id: &SessionId,
        options: &UploadOptions,
    ) -> Result<UploadReport, MigrationError> {
        let size = file_size(path).await?;
        let total_chunks = u32::try_from(size.div_ceil(self.chunk_size).max(1)).map_err(|_| {
            MigrationError::Incomplete {
                session_id: session_id.to_string(),
                reason: format!("{size} bytes need more than {} chunks", u32::MAX),
            }
        })?;
        let checksum = if options.verify {
            Some(file_checksum(path).await?)
        } else {
            None
        };

        info!(
            session_id = %session_id,
            path = %path.display(),
            size,
            total_chunks,
            "Uploading file"
        );

        let mut file = File::open(path)
            .await
            .map_err(|e| StorageError::from_io(path, e))?;
        let mut report = UploadReport {
            response: ChunkResponse::Received { received: 0 },
            total_chunks,
            chunks_sent: 0,
            resends: 0,
        };

        for index in 1..=total_chunks {
            if options.withhold.contains(&index) {
                continue;
            }
            let request = self
                .request(&mut file, path, session_id, index, total_chunks, size, options, &checksum)
                .await?;
            report.response = self.receive(request).await?;
            report.chunks_sent += 1;
        }

        let mut withheld: VecDeque<u32> = options
            .withhold
            .iter()
            .copied()
            .filter(|i| (1..=total_chunks).contains(i))
            .collect();

        while !report.response.is_assembled() {
            let next = match report.response {
                ChunkResponse::MissingChunk { missing_chunk, .. } => missing_chunk,
                _ => withheld.pop_front().ok_or_else(|| MigrationError::Incomplete {
                    session_id: session_id.to_string(),
                    reason: format!("receiver answered {:?} with nothing left to send", report.response),
                })?,
            };
            withheld.retain(|i| *i != next);

            if report.resends >= total_chunks {
                return Err(MigrationError::Incomplete {
                    session_id: session_id.to_string(),
                    reason: format!("gave up after {} resends", report.resends),
                });
            }

            let request = self
                .request(&mut file, path, session_id, next, total_chunks, size, options, &checksum)
                .await?
                .fixing(next);
            report.response = self.receive(request).await?;
            report.chunks_sent += 1;
            report.resends += 1;
        }

        Ok(report)
    }

    #[allow(clippy::too_many_arguments)]
    async fn request(
        &self,
        file: &mut File,
        path: &Path,
        session_id: &SessionId,
        index: u32,
        total_chunks: u32,
        size: u64,
        options: &UploadOptions,
        checksum: &Option<String>,
    ) -> Result<ChunkRequest, MigrationError> {
        let offset = u64::from(index - 1) * self.chunk_size;
        let len = self.chunk_size.min(size.saturating_sub(offset));
        let io = |e| StorageError::from_io(path, e);

        let mut data = vec![0u8; len as usize];
        file.seek(SeekFrom::Start(offset)).await.map_err(io)?;
        file.read_exact(&mut data).await.map_err(io)?;

        let mut request =
            ChunkRequest::for_chunk(session_id.clone(), index, total_chunks, self.chunk_size, data);
        if let Some(ct) = &options.content_type {
            request = request.with_content_type(ct.clone());
        }
        if let Some(sum) = checksum {
            request = request.with_expected_checksum(sum.clone());
        }
        Ok(request)
    }
}
