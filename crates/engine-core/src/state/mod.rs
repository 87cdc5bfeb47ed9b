use crate::{
    error::StateStoreError,
    state::models::{LeaseOutcome, ProcessLease, UploadSession},
};
use async_trait::async_trait;
use model::core::identifiers::{ProcessId, SessionId, TargetId};

pub mod models;
pub mod sled_store;

/// Engine state that must survive between invocations: upload sessions,
/// migration leases and cancellation tombstones.
#[async_trait]
pub trait StateStore: Send + Sync {
    async fn load_session(&self, id: &SessionId) -> Result<Option<UploadSession>, StateStoreError>;

    /// Stores `session` unless one with the same id already exists. Returns
    /// the stored session and whether this call created it.
    async fn create_session(
        &self,
        session: &UploadSession,
    ) -> Result<(UploadSession, bool), StateStoreError>;

    /// Records the checksum the client expects unless one is already set.
    async fn set_expected_checksum(
        &self,
        id: &SessionId,
        checksum: &str,
    ) -> Result<UploadSession, StateStoreError>;

    /// Marks the session assembled with its final size and checksum.
    async fn mark_assembled(
        &self,
        id: &SessionId,
        size: u64,
        checksum: &str,
    ) -> Result<UploadSession, StateStoreError>;

    /// Atomically marks chunk `index` as written, recording the total file
    /// size when it becomes known.
    async fn record_chunk(
        &self,
        id: &SessionId,
        index: u32,
        total_size: Option<u64>,
    ) -> Result<UploadSession, StateStoreError>;

    async fn remove_session(&self, id: &SessionId) -> Result<(), StateStoreError>;

    async fn tombstone_session(&self, id: &SessionId) -> Result<(), StateStoreError>;

    async fn is_session_cancelled(&self, id: &SessionId) -> Result<bool, StateStoreError>;

    async fn clear_session_tombstone(&self, id: &SessionId) -> Result<(), StateStoreError>;

    /// Claims `target` for `process` unless another process holds it.
    async fn acquire_lease(
        &self,
        target: &TargetId,
        process: &ProcessId,
    ) -> Result<LeaseOutcome, StateStoreError>;

    async fn load_lease(&self, target: &TargetId) -> Result<Option<ProcessLease>, StateStoreError>;

    /// Drops the lease on `target` if `process` holds it. Returns whether a
    /// lease was removed.
    async fn release_lease(
        &self,
        target: &TargetId,
        process: &ProcessId,
    ) -> Result<bool, StateStoreError>;

    async fn cancel_process(&self, process: &ProcessId) -> Result<(), StateStoreError>;

    async fn is_process_cancelled(&self, process: &ProcessId) -> Result<bool, StateStoreError>;
}
