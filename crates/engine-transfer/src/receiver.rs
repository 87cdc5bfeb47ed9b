use crate::error::UploadError;
use engine_config::settings::content_type_accepted;
use engine_core::{
    chunk_store::{ChunkStore, file_size},
    metrics::Metrics,
    state::{StateStore, models::UploadSession},
};
use model::{
    core::identifiers::SessionId,
    transfer::{ChunkRequest, ChunkResponse, ResumeToken},
};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Accepts upload chunks one at a time and assembles the file once every
/// chunk has arrived.
///
/// Nothing is held in memory between calls: the bitmap of received chunks
/// lives in the [`StateStore`], the bytes in the [`ChunkStore`].
#[derive(Clone)]
pub struct ChunkReceiver {
    store: ChunkStore,
    state: Arc<dyn StateStore>,
    accepted_content_types: Option<Vec<String>>,
    metrics: Metrics,
}

impl ChunkReceiver {
    pub fn new(store: ChunkStore, state: Arc<dyn StateStore>) -> Self {
        Self {
            store,
            state,
            accepted_content_types: None,
            metrics: Metrics::new(),
        }
    }

    /// Restricts uploads to the given media types.
    pub fn with_accepted_content_types(mut self, types: Vec<String>) -> Self {
        self.accepted_content_types = Some(types);
        self
    }

    pub fn with_metrics(mut self, metrics: Metrics) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn chunk_store(&self) -> &ChunkStore {
        &self.store
    }

    pub async fn session(&self, id: &SessionId) -> Result<Option<UploadSession>, UploadError> {
        Ok(self.state.load_session(id).await?)
    }

    pub async fn receive_chunk(&self, request: ChunkRequest) -> Result<ChunkResponse, UploadError> {
        let id = request.session_id.clone();
        let is_resume_query = request.resume.is_some() && request.chunk_data.is_empty();

        if !is_resume_query {
            validate_geometry(&request)?;
        }

        if let (Some(accepted), Some(ct)) = (&self.accepted_content_types, &request.content_type)
            && !content_type_accepted(accepted, Some(ct))
        {
            let reason = format!("content type '{ct}' is not accepted");
            self.terminate(&id, &reason).await?;
            return Err(UploadError::Corrupt {
                session_id: id,
                reason,
            });
        }

        if self.state.is_session_cancelled(&id).await? {
            let fresh_start = request.chunk_index == 1
                && request.resume.is_none()
                && request.missing_chunk_to_fix.is_none();
            if !fresh_start {
                return Err(UploadError::SessionCancelled(id));
            }
            info!(session_id = %id, "Restarting cancelled upload session");
            self.state.clear_session_tombstone(&id).await?;
        }

        let session = match &request.resume {
            Some(token) => self.reattach(&request, token).await?,
            None => self.open_session(&request).await?,
        };

        if session.assembled {
            return Ok(assembled_response(&session));
        }

        if is_resume_query {
            return match session.first_missing() {
                Some(next) => Ok(ChunkResponse::resumed(ResumeToken {
                    parts_index: next,
                    filepath: session.partial_path.clone(),
                    chunks: session.total_chunks,
                })),
                None => self.finalize(session).await,
            };
        }

        self.write_chunk(&request).await
    }

    /// Removes the session's files and state and fails later chunks closed.
    pub async fn cancel(&self, id: &SessionId) -> Result<(), UploadError> {
        self.store
            .discard(id)
            .await
            .map_err(|e| UploadError::storage(id, e))?;
        self.state.remove_session(id).await?;
        self.state.tombstone_session(id).await?;
        info!(session_id = %id, "Upload session cancelled");
        Ok(())
    }

    async fn open_session(&self, request: &ChunkRequest) -> Result<UploadSession, UploadError> {
        let id = &request.session_id;

        let mut fresh = UploadSession::new(
            id.clone(),
            request.total_chunks,
            request.chunk_size,
            self.store.partial_path(id),
            self.store.final_path(id),
        );
        fresh.content_type = request.content_type.clone();
        fresh.expected_checksum = request.expected_checksum.clone();

        let (session, created) = self.state.create_session(&fresh).await?;
        if created {
            info!(
                session_id = %id,
                total_chunks = session.total_chunks,
                chunk_size = session.chunk_size,
                "Upload session opened"
            );
            return Ok(session);
        }

        if !session.assembled && !session.has_same_geometry(request.total_chunks, request.chunk_size) {
            return Err(UploadError::ResumeMismatch {
                session_id: id.clone(),
                reason: format!(
                    "session expects {} chunks of {} bytes, request declares {} of {}",
                    session.total_chunks,
                    session.chunk_size,
                    request.total_chunks,
                    request.chunk_size
                ),
            });
        }
        self.merge_request_metadata(session, request).await
    }

    async fn reattach(
        &self,
        request: &ChunkRequest,
        token: &ResumeToken,
    ) -> Result<UploadSession, UploadError> {
        let id = &request.session_id;
        let session = self
            .state
            .load_session(id)
            .await?
            .ok_or_else(|| UploadError::UnknownSession(id.clone()))?;

        let mismatch = |reason: String| UploadError::ResumeMismatch {
            session_id: id.clone(),
            reason,
        };

        if token.filepath != session.partial_path && token.filepath != session.final_path {
            return Err(mismatch(format!(
                "resume path {} does not belong to the session",
                token.filepath.display()
            )));
        }
        if token.chunks != session.total_chunks {
            return Err(mismatch(format!(
                "resume declares {} chunks, session has {}",
                token.chunks, session.total_chunks
            )));
        }
        if !request.chunk_data.is_empty()
            && !session.has_same_geometry(request.total_chunks, request.chunk_size)
        {
            return Err(mismatch("chunk geometry differs from the session".into()));
        }

        debug!(session_id = %id, parts_index = token.parts_index, "Re-attached to upload session");
        self.merge_request_metadata(session, request).await
    }

    async fn merge_request_metadata(
        &self,
        session: UploadSession,
        request: &ChunkRequest,
    ) -> Result<UploadSession, UploadError> {
        let Some(expected) = &request.expected_checksum else {
            return Ok(session);
        };

        let session = if session.expected_checksum.is_some() {
            session
        } else {
            self.state
                .set_expected_checksum(&session.session_id, expected)
                .await?
        };

        match &session.expected_checksum {
            Some(known) if !known.eq_ignore_ascii_case(expected) => Err(UploadError::ResumeMismatch {
                session_id: session.session_id.clone(),
                reason: format!("expected checksum changed from {known} to {expected}"),
            }),
            _ => Ok(session),
        }
    }

    async fn write_chunk(&self, request: &ChunkRequest) -> Result<ChunkResponse, UploadError> {
        let id = &request.session_id;
        let index = request.chunk_index;

        // A failed write leaves the partial file in place for a retry.
        self.store
            .write_at(id, request.byte_start, &request.chunk_data)
            .await
            .map_err(|e| {
                let err = UploadError::storage(id, e);
                warn!(session_id = %id, index, error = %err, "Chunk write failed");
                err
            })?;

        let total_size = (index == request.total_chunks).then_some(request.byte_end);
        let session = self.state.record_chunk(id, index, total_size).await?;
        self.metrics.record_chunk(request.chunk_data.len() as u64);

        debug!(
            session_id = %id,
            index,
            total = session.total_chunks,
            fixing = ?request.missing_chunk_to_fix,
            "Chunk received"
        );

        // Gaps are only meaningful once the last chunk has told us the file size.
        if session.total_size.is_none() {
            return Ok(ChunkResponse::Received { received: index });
        }

        match session.first_missing() {
            Some(missing) => {
                let span = session.span_of(missing);
                info!(session_id = %id, missing, start = span.start, end = span.end, "Chunk missing");
                Ok(ChunkResponse::missing(missing, span))
            }
            None => self.finalize(session).await,
        }
    }

    async fn finalize(&self, session: UploadSession) -> Result<ChunkResponse, UploadError> {
        let id = session.session_id.clone();
        let storage = |e| UploadError::storage(&id, e);

        // A previous call may have renamed the file before recording it.
        let path = if self.store.partial_exists(&id).await {
            session.partial_path.clone()
        } else {
            session.final_path.clone()
        };

        let size = file_size(&path).await.map_err(storage)?;
        if let Some(expected) = session.total_size
            && expected != size
        {
            let reason = format!("assembled size {size} differs from declared size {expected}");
            self.terminate(&id, &reason).await?;
            return Err(UploadError::Corrupt {
                session_id: id,
                reason,
            });
        }

        let checksum = self.store.content_checksum(&path).await.map_err(storage)?;
        if let Some(expected) = &session.expected_checksum
            && !expected.eq_ignore_ascii_case(&checksum)
        {
            let reason = format!("checksum {checksum} does not match expected {expected}");
            self.terminate(&id, &reason).await?;
            return Err(UploadError::Corrupt {
                session_id: id,
                reason,
            });
        }

        if path == session.partial_path {
            self.store.assemble(&id).await.map_err(storage)?;
        }

        let session = self.state.mark_assembled(&id, size, &checksum).await?;

        info!(
            session_id = %id,
            size,
            path = %session.final_path.display(),
            "Upload assembled"
        );
        Ok(assembled_response(&session))
    }

    async fn terminate(&self, id: &SessionId, reason: &str) -> Result<(), UploadError> {
        warn!(session_id = %id, reason, "Terminating corrupt upload session");
        self.cancel(id).await
    }
}

fn assembled_response(session: &UploadSession) -> ChunkResponse {
    ChunkResponse::assembled(
        session.final_path.clone(),
        session.total_size.unwrap_or_default(),
        session.checksum.clone().unwrap_or_default(),
    )
}

fn validate_geometry(request: &ChunkRequest) -> Result<(), UploadError> {
    let invalid = |reason: String| UploadError::InvalidChunk {
        session_id: request.session_id.clone(),
        reason,
    };

    let index = request.chunk_index;
    let total = request.total_chunks;
    let len = request.chunk_data.len() as u64;

    if total == 0 || request.chunk_size == 0 {
        return Err(invalid("total chunks and chunk size must be positive".into()));
    }
    if index == 0 || index > total {
        return Err(invalid(format!("index {index} is outside 1..={total}")));
    }
    if let Some(missing) = request.missing_chunk_to_fix
        && missing != index
    {
        return Err(invalid(format!(
            "chunk {index} sent as fix for missing chunk {missing}"
        )));
    }

    let expected_start = u64::from(index - 1) * request.chunk_size;
    if request.byte_start != expected_start {
        return Err(invalid(format!(
            "chunk {index} must start at byte {expected_start}, not {}",
            request.byte_start
        )));
    }
    if request.byte_end < request.byte_start || request.byte_end - request.byte_start != len {
        return Err(invalid(format!(
            "byte range {}..{} does not match {len} bytes of data",
            request.byte_start, request.byte_end
        )));
    }
    if index < total && len != request.chunk_size {
        return Err(invalid(format!(
            "chunk {index} carries {len} bytes, expected {}",
            request.chunk_size
        )));
    }
    if index == total && (len > request.chunk_size || (len == 0 && total > 1)) {
        return Err(invalid(format!("last chunk carries {len} bytes")));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ErrorCategory, ErrorResponse};
    use engine_core::{chunk_store::file_checksum, state::sled_store::SledStateStore};
    use std::collections::BTreeSet;
    use tempfile::{TempDir, tempdir};
    use tracing_test::traced_test;

    const CHUNK: u64 = 8;

    struct Fixture {
        _dir: TempDir,
        receiver: ChunkReceiver,
    }

    fn fixture() -> Fixture {
        let dir = tempdir().unwrap();
        let state = Arc::new(SledStateStore::open(dir.path().join("state")).unwrap());
        let store = ChunkStore::new(dir.path().join("scratch"));
        Fixture {
            receiver: ChunkReceiver::new(store, state),
            _dir: dir,
        }
    }

    fn sid() -> SessionId {
        SessionId::parse("site-1").unwrap()
    }

    fn payload() -> Vec<u8> {
        (0..30u8).collect()
    }

    fn chunk(index: u32) -> ChunkRequest {
        let data = payload();
        let start = (index as usize - 1) * CHUNK as usize;
        let end = (start + CHUNK as usize).min(data.len());
        ChunkRequest::for_chunk(sid(), index, 4, CHUNK, data[start..end].to_vec())
    }

    #[tokio::test]
    async fn assembles_after_all_chunks() {
        let f = fixture();
        for i in 1..=3 {
            let resp = f.receiver.receive_chunk(chunk(i)).await.unwrap();
            assert_eq!(resp, ChunkResponse::Received { received: i });
        }
        let resp = f.receiver.receive_chunk(chunk(4)).await.unwrap();
        assert!(resp.is_assembled());

        let ChunkResponse::Assembled { filepath, size, .. } = resp else {
            unreachable!()
        };
        assert_eq!(size, 30);
        assert_eq!(tokio::fs::read(filepath).await.unwrap(), payload());
    }

    #[tokio::test]
    async fn reports_gap_then_assembles_after_fix() {
        let f = fixture();
        for i in [1, 2, 4] {
            f.receiver.receive_chunk(chunk(i)).await.unwrap();
        }
        let session = f.receiver.session(&sid()).await.unwrap().unwrap();
        assert_eq!(session.total_size, Some(30));

        // Re-sending the last chunk scans again.
        let resp = f.receiver.receive_chunk(chunk(4)).await.unwrap();
        assert_eq!(resp, ChunkResponse::missing(3, model::transfer::ByteSpan::new(16, 24)));

        let resp = f.receiver.receive_chunk(chunk(3).fixing(3)).await.unwrap();
        assert!(resp.is_assembled());
    }

    #[tokio::test]
    async fn rejects_misaligned_chunks() {
        let f = fixture();
        let mut request = chunk(2);
        request.byte_start += 1;
        request.byte_end += 1;
        let err = f.receiver.receive_chunk(request).await.unwrap_err();
        assert!(matches!(err, UploadError::InvalidChunk { .. }));
        assert_eq!(err.category(), ErrorCategory::Fatal);

        let err = f.receiver.receive_chunk(chunk(2).fixing(3)).await.unwrap_err();
        assert!(matches!(err, UploadError::InvalidChunk { .. }));
    }

    #[tokio::test]
    async fn resume_query_returns_next_missing_chunk() {
        let f = fixture();
        f.receiver.receive_chunk(chunk(1)).await.unwrap();
        f.receiver.receive_chunk(chunk(2)).await.unwrap();

        let partial = f.receiver.chunk_store().partial_path(&sid());
        let query = ChunkRequest::for_chunk(sid(), 1, 4, CHUNK, Vec::new()).with_resume(ResumeToken {
            parts_index: 2,
            filepath: partial.clone(),
            chunks: 4,
        });

        let resp = f.receiver.receive_chunk(query).await.unwrap();
        assert_eq!(
            resp,
            ChunkResponse::resumed(ResumeToken {
                parts_index: 3,
                filepath: partial,
                chunks: 4,
            })
        );
    }

    #[tokio::test]
    async fn resume_with_foreign_path_is_rejected() {
        let f = fixture();
        f.receiver.receive_chunk(chunk(1)).await.unwrap();

        let query = ChunkRequest::for_chunk(sid(), 1, 4, CHUNK, Vec::new()).with_resume(ResumeToken {
            parts_index: 2,
            filepath: "/tmp/elsewhere.part".into(),
            chunks: 4,
        });
        let err = f.receiver.receive_chunk(query).await.unwrap_err();
        assert!(matches!(err, UploadError::ResumeMismatch { .. }));
    }

    #[tokio::test]
    async fn cancelled_session_fails_closed_until_fresh_start() {
        let f = fixture();
        f.receiver.receive_chunk(chunk(1)).await.unwrap();
        f.receiver.cancel(&sid()).await.unwrap();
        assert!(!f.receiver.chunk_store().partial_exists(&sid()).await);

        let err = f.receiver.receive_chunk(chunk(2)).await.unwrap_err();
        assert!(matches!(err, UploadError::SessionCancelled(_)));

        let resp = f.receiver.receive_chunk(chunk(1)).await.unwrap();
        assert_eq!(resp, ChunkResponse::Received { received: 1 });
    }

    #[tokio::test]
    async fn checksum_mismatch_terminates_session() {
        let f = fixture();
        for i in 1..=3 {
            f.receiver.receive_chunk(chunk(i)).await.unwrap();
        }
        let err = f
            .receiver
            .receive_chunk(chunk(4).with_expected_checksum("00"))
            .await
            .unwrap_err();
        assert!(matches!(err, UploadError::Corrupt { .. }));
        assert!(f.receiver.session(&sid()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn unaccepted_content_type_is_corrupt() {
        let f = fixture();
        let receiver = f
            .receiver
            .clone()
            .with_accepted_content_types(vec!["application/zip".into()]);
        let err = receiver
            .receive_chunk(chunk(1).with_content_type("text/html"))
            .await
            .unwrap_err();
        assert!(matches!(err, UploadError::Corrupt { .. }));
    }

    #[tokio::test]
    async fn geometry_change_is_rejected() {
        let f = fixture();
        f.receiver.receive_chunk(chunk(1)).await.unwrap();
        let other = ChunkRequest::for_chunk(sid(), 1, 2, 16, vec![0; 16]);
        let err = f.receiver.receive_chunk(other).await.unwrap_err();
        assert!(matches!(err, UploadError::ResumeMismatch { .. }));
    }

    // Writes into /dev/full fail with ENOSPC.
    #[cfg(target_os = "linux")]
    #[traced_test]
    #[tokio::test]
    async fn full_disk_is_reported_as_resource_exhausted() {
        let full = std::path::Path::new("/dev/full");
        if !full.exists() {
            return;
        }
        let f = fixture();
        let store = f.receiver.chunk_store();
        tokio::fs::create_dir_all(store.root()).await.unwrap();
        tokio::fs::symlink(full, store.partial_path(&sid())).await.unwrap();

        let err = f.receiver.receive_chunk(chunk(1)).await.unwrap_err();
        assert!(matches!(err, UploadError::DiskFull { .. }), "got {err:?}");
        assert_eq!(err.category(), ErrorCategory::ResourceExhausted);
        assert_eq!(ErrorResponse::from(&err).category, ErrorCategory::ResourceExhausted);
        assert!(logs_contain("Chunk write failed"));

        // The chunk was not recorded, so it is still the one to send.
        let session = f.receiver.session(&sid()).await.unwrap().unwrap();
        assert_eq!(session.first_missing(), Some(1));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_first_chunks_keep_every_index() {
        let f = fixture();
        let source = f._dir.path().join("source");
        tokio::fs::write(&source, payload()).await.unwrap();
        let checksum = file_checksum(&source).await.unwrap();

        let sends = (1..=3).map(|i| {
            let receiver = f.receiver.clone();
            let request = chunk(i).with_expected_checksum(&checksum);
            tokio::spawn(async move { receiver.receive_chunk(request).await })
        });
        for handle in sends.collect::<Vec<_>>() {
            handle.await.unwrap().unwrap();
        }

        let session = f.receiver.session(&sid()).await.unwrap().unwrap();
        assert_eq!(session.received, BTreeSet::from([1, 2, 3]));
        assert_eq!(session.expected_checksum.as_deref(), Some(checksum.as_str()));

        let resp = f.receiver.receive_chunk(chunk(4)).await.unwrap();
        assert!(resp.is_assembled());
    }
}
