use crate::{
    error::StorageError,
    transform_writer::{ChunkTransform, Identity, TransformWriter},
};
use model::core::identifiers::SessionId;
use std::{
    io::SeekFrom,
    path::{Path, PathBuf},
    sync::Arc,
};
use tokio::{
    fs::{self, File, OpenOptions},
    io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt},
};
use tracing::debug;

const PARTIAL_EXT: &str = "part";
const FINAL_EXT: &str = "pkg";
const HASH_BUF_SIZE: usize = 64 * 1024;

/// Durable scratch storage for in-flight uploads.
///
/// Each session owns `<root>/<session>.part` until assembly renames it to
/// `<root>/<session>.pkg`. Chunks are written at absolute offsets, so
/// re-sending a chunk overwrites the same bytes.
#[derive(Clone)]
pub struct ChunkStore {
    root: PathBuf,
    transform: Arc<dyn ChunkTransform>,
}

impl ChunkStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            transform: Arc::new(Identity),
        }
    }

    /// Applies `transform` to every byte before it is written. Checksums from
    /// [`ChunkStore::content_checksum`] still cover the bytes as received.
    pub fn with_transform(mut self, transform: Arc<dyn ChunkTransform>) -> Self {
        self.transform = transform;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn partial_path(&self, session: &SessionId) -> PathBuf {
        self.root.join(format!("{}.{PARTIAL_EXT}", session.as_str()))
    }

    pub fn final_path(&self, session: &SessionId) -> PathBuf {
        self.root.join(format!("{}.{FINAL_EXT}", session.as_str()))
    }

    /// Writes `data` at `offset` in the session's partial file, creating it on
    /// first use. Never truncates or removes the file.
    pub async fn write_at(
        &self,
        session: &SessionId,
        offset: u64,
        data: &[u8],
    ) -> Result<(), StorageError> {
        let path = self.partial_path(session);
        let io_err = |e| StorageError::from_io(&path, e);

        fs::create_dir_all(&self.root)
            .await
            .map_err(|e| StorageError::from_io(&self.root, e))?;

        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .await
            .map_err(io_err)?;
        file.seek(SeekFrom::Start(offset)).await.map_err(io_err)?;

        let mut writer = TransformWriter::new(file, self.transform.clone(), offset);
        writer.write_all(data).await.map_err(io_err)?;
        writer.flush().await.map_err(io_err)?;
        writer.into_inner().sync_data().await.map_err(io_err)?;

        debug!(session_id = %session, offset, len = data.len(), "Chunk bytes written");
        Ok(())
    }

    /// Moves the partial file to its final path and returns that path.
    pub async fn assemble(&self, session: &SessionId) -> Result<PathBuf, StorageError> {
        let from = self.partial_path(session);
        let to = self.final_path(session);
        fs::rename(&from, &to)
            .await
            .map_err(|e| StorageError::from_io(&from, e))?;
        Ok(to)
    }

    pub async fn partial_exists(&self, session: &SessionId) -> bool {
        fs::try_exists(self.partial_path(session))
            .await
            .unwrap_or(false)
    }

    /// Hex-encoded blake3 digest of the file at `path` with the store's
    /// transform undone.
    pub async fn content_checksum(&self, path: &Path) -> Result<String, StorageError> {
        checksum_with(path, self.transform.as_ref()).await
    }

    /// Removes both the partial and the assembled file, if present.
    pub async fn discard(&self, session: &SessionId) -> Result<(), StorageError> {
        for path in [self.partial_path(session), self.final_path(session)] {
            match fs::remove_file(&path).await {
                Ok(()) => debug!(path = %path.display(), "Removed scratch file"),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(StorageError::from_io(&path, e)),
            }
        }
        Ok(())
    }
}

pub async fn file_size(path: &Path) -> Result<u64, StorageError> {
    fs::metadata(path)
        .await
        .map(|m| m.len())
        .map_err(|e| StorageError::from_io(path, e))
}

/// Hex-encoded blake3 digest of the file at `path`.
pub async fn file_checksum(path: &Path) -> Result<String, StorageError> {
    checksum_with(path, &Identity).await
}

async fn checksum_with(path: &Path, transform: &dyn ChunkTransform) -> Result<String, StorageError> {
    let io_err = |e| StorageError::from_io(path, e);
    let mut file = File::open(path).await.map_err(io_err)?;
    let mut hasher = blake3::Hasher::new();
    let mut buf = vec![0u8; HASH_BUF_SIZE];
    let mut offset = 0u64;

    loop {
        let n = file.read(&mut buf).await.map_err(io_err)?;
        if n == 0 {
            break;
        }
        hasher.update(&transform.reverse(offset, &buf[..n]));
        offset += n as u64;
    }

    Ok(hasher.finalize().to_hex().to_string())
}
