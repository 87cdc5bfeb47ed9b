use crate::error::StorageError;
use std::{
    cmp::Ordering,
    collections::BinaryHeap,
    path::{Path, PathBuf},
};
use tokio::fs;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedFile {
    pub path: PathBuf,
    pub size: u64,
    /// Discovery order; earlier files win ties on size.
    pub seq: u64,
}

impl Ord for StagedFile {
    fn cmp(&self, other: &Self) -> Ordering {
        self.size
            .cmp(&other.size)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for StagedFile {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Files queued for packaging, largest first.
#[derive(Debug, Default)]
pub struct StagingQueue {
    heap: BinaryHeap<StagedFile>,
    next_seq: u64,
}

impl StagingQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Walks `root` recursively and queues every regular file. Entries of a
    /// directory are visited in name order.
    pub async fn from_dir(root: &Path) -> Result<Self, StorageError> {
        let mut queue = Self::new();
        let mut dirs = vec![root.to_path_buf()];

        while let Some(dir) = dirs.pop() {
            let mut reader = fs::read_dir(&dir)
                .await
                .map_err(|e| StorageError::from_io(&dir, e))?;

            let mut entries = Vec::new();
            while let Some(entry) = reader
                .next_entry()
                .await
                .map_err(|e| StorageError::from_io(&dir, e))?
            {
                entries.push(entry);
            }
            entries.sort_by_key(|e| e.file_name());

            let mut subdirs = Vec::new();
            for entry in entries {
                let path = entry.path();
                let file_type = entry
                    .file_type()
                    .await
                    .map_err(|e| StorageError::from_io(&path, e))?;

                if file_type.is_dir() {
                    subdirs.push(path);
                } else if file_type.is_file() {
                    let size = entry
                        .metadata()
                        .await
                        .map_err(|e| StorageError::from_io(&path, e))?
                        .len();
                    queue.push(path, size);
                }
            }
            // Reverse so the stack pops subdirectories in name order.
            dirs.extend(subdirs.into_iter().rev());
        }

        debug!(root = %root.display(), files = queue.len(), "Staged directory");
        Ok(queue)
    }

    pub fn push(&mut self, path: impl Into<PathBuf>, size: u64) {
        self.heap.push(StagedFile {
            path: path.into(),
            size,
            seq: self.next_seq,
        });
        self.next_seq += 1;
    }

    pub fn pop(&mut self) -> Option<StagedFile> {
        self.heap.pop()
    }

    pub fn peek(&self) -> Option<&StagedFile> {
        self.heap.peek()
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    pub fn total_bytes(&self) -> u64 {
        self.heap.iter().map(|f| f.size).sum()
    }
}

impl Iterator for StagingQueue {
    type Item = StagedFile;

    fn next(&mut self) -> Option<Self::Item> {
        self.pop()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn pops_largest_first_with_stable_ties() {
        let mut queue = StagingQueue::new();
        queue.push("a", 10);
        queue.push("b", 30);
        queue.push("c", 10);
        queue.push("d", 20);

        let order: Vec<_> = queue.map(|f| f.path).collect();
        assert_eq!(
            order,
            ["b", "d", "a", "c"].map(PathBuf::from).to_vec()
        );
    }

    #[tokio::test]
    async fn walks_nested_directories() {
        let dir = tempdir().unwrap();
        fs::create_dir_all(dir.path().join("nested")).await.unwrap();
        fs::write(dir.path().join("small.txt"), b"1").await.unwrap();
        fs::write(dir.path().join("nested/big.bin"), vec![0u8; 64]).await.unwrap();

        let mut queue = StagingQueue::from_dir(dir.path()).await.unwrap();
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.total_bytes(), 65);
        assert_eq!(queue.pop().unwrap().path, dir.path().join("nested/big.bin"));
        assert_eq!(queue.pop().unwrap().size, 1);
    }
}
