use super::{
    multipart::{MultipartLayout, boundary_for},
    pacer::{NoPacing, Pacer},
    range::{ByteRange, RangeRequest, parse_range_header},
};
use crate::error::DownloadError;
use bytes::Bytes;
use engine_core::metrics::Metrics;
use futures::{
    Stream, StreamExt, TryStreamExt,
    stream::{self, BoxStream},
};
use std::{
    io::{self, SeekFrom},
    path::{Path, PathBuf},
    sync::Arc,
};
use tokio::{
    fs::{self, File},
    io::{AsyncReadExt, AsyncSeekExt},
};
use tokio_util::io::ReaderStream;
use tracing::{debug, info};

pub const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

pub type BodyStream = BoxStream<'static, io::Result<Bytes>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadStatus {
    Ok,
    PartialContent,
    RangeNotSatisfiable,
}

impl DownloadStatus {
    pub fn code(&self) -> u16 {
        match self {
            DownloadStatus::Ok => 200,
            DownloadStatus::PartialContent => 206,
            DownloadStatus::RangeNotSatisfiable => 416,
        }
    }
}

/// Status, headers and a lazily read body.
pub struct DownloadResponse {
    pub status: DownloadStatus,
    pub headers: Vec<(&'static str, String)>,
    pub body: Option<BodyStream>,
}

impl DownloadResponse {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn content_length(&self) -> Option<u64> {
        self.header("Content-Length").and_then(|v| v.parse().ok())
    }

    /// Drains the body into memory.
    pub async fn into_bytes(self) -> io::Result<Vec<u8>> {
        let mut out = Vec::new();
        if let Some(mut body) = self.body {
            while let Some(chunk) = body.try_next().await? {
                out.extend_from_slice(&chunk);
            }
        }
        Ok(out)
    }
}

/// Serves files whole or by byte ranges.
#[derive(Clone)]
pub struct DownloadServer {
    buffer_size: usize,
    content_type: String,
    pacer: Arc<dyn Pacer>,
    metrics: Metrics,
}

impl DownloadServer {
    pub fn new(buffer_size: usize) -> Self {
        Self {
            buffer_size: buffer_size.max(1),
            content_type: DEFAULT_CONTENT_TYPE.to_string(),
            pacer: Arc::new(NoPacing),
            metrics: Metrics::new(),
        }
    }

    pub fn with_pacer(mut self, pacer: Arc<dyn Pacer>) -> Self {
        self.pacer = pacer;
        self
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = content_type.into();
        self
    }

    pub fn with_metrics(mut self, metrics: Metrics) -> Self {
        self.metrics = metrics;
        self
    }

    pub async fn serve(
        &self,
        path: &Path,
        range_header: Option<&str>,
    ) -> Result<DownloadResponse, DownloadError> {
        let meta = fs::metadata(path)
            .await
            .map_err(|e| DownloadError::from_io(path, e))?;
        if !meta.is_file() {
            return Err(DownloadError::NotAFile(path.to_path_buf()));
        }
        let size = meta.len();

        let response = match parse_range_header(range_header, size) {
            RangeRequest::Full => self.full(path, size),
            RangeRequest::Ranges(ranges) if ranges.len() == 1 => {
                self.single(path, size, ranges[0])
            }
            RangeRequest::Ranges(ranges) => self.multi(path, size, &ranges),
            RangeRequest::Unsatisfiable => DownloadResponse {
                status: DownloadStatus::RangeNotSatisfiable,
                headers: vec![
                    ("Accept-Ranges", "bytes".into()),
                    ("Content-Range", format!("bytes */{size}")),
                ],
                body: None,
            },
        };

        info!(
            path = %path.display(),
            range = range_header.unwrap_or("-"),
            status = response.status.code(),
            "Serving download"
        );
        Ok(response)
    }

    fn full(&self, path: &Path, size: u64) -> DownloadResponse {
        DownloadResponse {
            status: DownloadStatus::Ok,
            headers: vec![
                ("Accept-Ranges", "bytes".into()),
                ("Content-Type", self.content_type.clone()),
                ("Content-Length", size.to_string()),
            ],
            body: Some(self.paced(self.file_range(path, 0, size))),
        }
    }

    fn single(&self, path: &Path, size: u64, range: ByteRange) -> DownloadResponse {
        DownloadResponse {
            status: DownloadStatus::PartialContent,
            headers: vec![
                ("Accept-Ranges", "bytes".into()),
                ("Content-Type", self.content_type.clone()),
                ("Content-Range", range.content_range(size)),
                ("Content-Length", range.len().to_string()),
            ],
            body: Some(self.paced(self.file_range(path, range.start, range.len()))),
        }
    }

    fn multi(&self, path: &Path, size: u64, ranges: &[ByteRange]) -> DownloadResponse {
        let layout = MultipartLayout::new(boundary_for(path), &self.content_type, ranges, size);
        debug!(parts = ranges.len(), content_length = layout.content_length, "Multipart layout");

        let mut pieces: Vec<BodyStream> = Vec::with_capacity(layout.parts.len() * 2 + 1);
        for (header, range) in &layout.parts {
            pieces.push(stream::once(futures::future::ready(Ok(header.clone()))).boxed());
            pieces.push(self.file_range(path, range.start, range.len()));
        }
        pieces.push(stream::once(futures::future::ready(Ok(layout.closing.clone()))).boxed());

        DownloadResponse {
            status: DownloadStatus::PartialContent,
            headers: vec![
                ("Accept-Ranges", "bytes".into()),
                ("Content-Type", layout.content_type()),
                ("Content-Length", layout.content_length.to_string()),
            ],
            body: Some(self.paced(stream::iter(pieces).flatten().boxed())),
        }
    }

    /// `len` bytes of `path` starting at `start`, opened on first poll.
    fn file_range(&self, path: &Path, start: u64, len: u64) -> BodyStream {
        let path: PathBuf = path.to_path_buf();
        let capacity = self.buffer_size;

        stream::once(async move {
            let mut file = File::open(&path).await?;
            file.seek(SeekFrom::Start(start)).await?;
            Ok::<_, io::Error>(ReaderStream::with_capacity(file.take(len), capacity))
        })
        .try_flatten()
        .boxed()
    }

    fn paced(&self, body: impl Stream<Item = io::Result<Bytes>> + Send + 'static) -> BodyStream {
        let pacer = self.pacer.clone();
        let metrics = self.metrics.clone();

        body.then(move |item| {
            let delay = item
                .as_ref()
                .ok()
                .and_then(|chunk| pacer.delay_for(chunk.len()));
            async move {
                if let Some(delay) = delay {
                    tokio::time::sleep(delay).await;
                }
                item
            }
        })
        .inspect_ok(move |chunk| metrics.increment_served(chunk.len() as u64))
        .boxed()
    }
}
