use crate::{
    error::StateStoreError,
    state::{
        StateStore,
        models::{LeaseOutcome, ProcessLease, UploadSession},
    },
};
use async_trait::async_trait;
use chrono::Utc;
use model::core::identifiers::{ProcessId, SessionId, TargetId};
use serde::{Serialize, de::DeserializeOwned};
use sled::transaction::{ConflictableTransactionError, TransactionError};
use std::path::Path;
use tracing::debug;

pub struct SledStateStore {
    db: sled::Db,
}

impl SledStateStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StateStoreError> {
        let db = sled::open(path)?;
        Ok(Self { db })
    }

    #[inline]
    fn session_key(id: &SessionId) -> String {
        format!("session:{}", id.as_str())
    }

    #[inline]
    fn session_tombstone_key(id: &SessionId) -> String {
        format!("session-cancelled:{}", id.as_str())
    }

    #[inline]
    fn lease_key(target: &TargetId) -> String {
        format!("lease:{}", target.as_str())
    }

    #[inline]
    fn process_tombstone_key(process: &ProcessId) -> String {
        format!("process-cancelled:{}", process.as_str())
    }

    fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, StateStoreError> {
        match self.db.get(key)? {
            Some(bytes) => Ok(Some(bincode::deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    async fn put<T: Serialize>(&self, key: &str, value: &T) -> Result<(), StateStoreError> {
        let bytes = bincode::serialize(value)?;
        self.db.insert(key, bytes)?;
        self.db.flush_async().await?;
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<bool, StateStoreError> {
        let existed = self.db.remove(key)?.is_some();
        self.db.flush_async().await?;
        Ok(existed)
    }

    /// Read-modify-write of one session inside a transaction, so concurrent
    /// updates of the same session never drop each other's changes.
    async fn modify_session<F>(&self, id: &SessionId, modify: F) -> Result<UploadSession, StateStoreError>
    where
        F: Fn(&mut UploadSession) + Send,
    {
        let key = Self::session_key(id);

        let result = self.db.transaction::<_, _, StateStoreError>(|tx| {
            let bytes = tx
                .get(key.as_str())?
                .ok_or_else(|| Self::abort(StateStoreError::MissingSession(id.to_string())))?;
            let mut session: UploadSession =
                bincode::deserialize(&bytes).map_err(Self::abort)?;

            modify(&mut session);
            session.updated_at = Utc::now();

            let encoded = bincode::serialize(&session).map_err(Self::abort)?;
            tx.insert(key.as_str(), encoded)?;
            Ok(session)
        });

        let session = Self::unwrap_tx(result)?;
        self.db.flush_async().await?;
        Ok(session)
    }

    fn abort(err: impl Into<StateStoreError>) -> ConflictableTransactionError<StateStoreError> {
        ConflictableTransactionError::Abort(err.into())
    }

    fn unwrap_tx<T>(result: Result<T, TransactionError<StateStoreError>>) -> Result<T, StateStoreError> {
        match result {
            Ok(value) => Ok(value),
            Err(TransactionError::Abort(e)) => Err(e),
            Err(TransactionError::Storage(e)) => Err(StateStoreError::Sled(e)),
        }
    }
}

#[async_trait]
impl StateStore for SledStateStore {
    async fn load_session(&self, id: &SessionId) -> Result<Option<UploadSession>, StateStoreError> {
        self.get(&Self::session_key(id))
    }

    async fn create_session(
        &self,
        session: &UploadSession,
    ) -> Result<(UploadSession, bool), StateStoreError> {
        let key = Self::session_key(&session.session_id);
        let encoded = bincode::serialize(session)?;

        let result = self.db.transaction::<_, _, StateStoreError>(|tx| {
            if let Some(bytes) = tx.get(key.as_str())? {
                let existing: UploadSession = bincode::deserialize(&bytes).map_err(Self::abort)?;
                return Ok((existing, false));
            }
            tx.insert(key.as_str(), encoded.as_slice())?;
            Ok((session.clone(), true))
        });

        let (stored, created) = Self::unwrap_tx(result)?;
        if created {
            self.db.flush_async().await?;
        }
        Ok((stored, created))
    }

    async fn set_expected_checksum(
        &self,
        id: &SessionId,
        checksum: &str,
    ) -> Result<UploadSession, StateStoreError> {
        self.modify_session(id, |session| {
            if session.expected_checksum.is_none() {
                session.expected_checksum = Some(checksum.to_string());
            }
        })
        .await
    }

    async fn mark_assembled(
        &self,
        id: &SessionId,
        size: u64,
        checksum: &str,
    ) -> Result<UploadSession, StateStoreError> {
        self.modify_session(id, |session| {
            session.assembled = true;
            session.total_size = Some(size);
            session.checksum = Some(checksum.to_string());
        })
        .await
    }

    async fn record_chunk(
        &self,
        id: &SessionId,
        index: u32,
        total_size: Option<u64>,
    ) -> Result<UploadSession, StateStoreError> {
        let session = self
            .modify_session(id, |session| {
                session.received.insert(index);
                if total_size.is_some() {
                    session.total_size = total_size;
                }
            })
            .await?;
        debug!(session_id = %id, index, received = session.received.len(), "Chunk recorded");
        Ok(session)
    }

    async fn remove_session(&self, id: &SessionId) -> Result<(), StateStoreError> {
        self.remove(&Self::session_key(id)).await?;
        Ok(())
    }

    async fn tombstone_session(&self, id: &SessionId) -> Result<(), StateStoreError> {
        self.put(&Self::session_tombstone_key(id), &Utc::now()).await
    }

    async fn is_session_cancelled(&self, id: &SessionId) -> Result<bool, StateStoreError> {
        Ok(self.db.contains_key(Self::session_tombstone_key(id))?)
    }

    async fn clear_session_tombstone(&self, id: &SessionId) -> Result<(), StateStoreError> {
        self.remove(&Self::session_tombstone_key(id)).await?;
        Ok(())
    }

    async fn acquire_lease(
        &self,
        target: &TargetId,
        process: &ProcessId,
    ) -> Result<LeaseOutcome, StateStoreError> {
        let key = Self::lease_key(target);

        let result = self.db.transaction::<_, _, StateStoreError>(|tx| {
            let now = Utc::now();
            let existing: Option<ProcessLease> = match tx.get(key.as_str())? {
                Some(bytes) => Some(bincode::deserialize(&bytes).map_err(Self::abort)?),
                None => None,
            };

            let (lease, outcome) = match existing {
                Some(lease) if &lease.process_id != process => {
                    return Ok(LeaseOutcome::Conflict {
                        holder: lease.process_id,
                    });
                }
                Some(mut lease) => {
                    lease.renewed_at = now;
                    (lease, LeaseOutcome::Renewed)
                }
                None => (
                    ProcessLease {
                        target: target.clone(),
                        process_id: process.clone(),
                        acquired_at: now,
                        renewed_at: now,
                    },
                    LeaseOutcome::Acquired,
                ),
            };

            let encoded = bincode::serialize(&lease).map_err(Self::abort)?;
            tx.insert(key.as_str(), encoded)?;
            Ok(outcome)
        });

        let outcome = Self::unwrap_tx(result)?;
        self.db.flush_async().await?;
        Ok(outcome)
    }

    async fn load_lease(&self, target: &TargetId) -> Result<Option<ProcessLease>, StateStoreError> {
        self.get(&Self::lease_key(target))
    }

    async fn release_lease(
        &self,
        target: &TargetId,
        process: &ProcessId,
    ) -> Result<bool, StateStoreError> {
        let key = Self::lease_key(target);

        let result = self.db.transaction::<_, _, StateStoreError>(|tx| {
            let Some(bytes) = tx.get(key.as_str())? else {
                return Ok(false);
            };
            let lease: ProcessLease = bincode::deserialize(&bytes).map_err(Self::abort)?;
            if &lease.process_id != process {
                return Ok(false);
            }
            tx.remove(key.as_str())?;
            Ok(true)
        });

        let released = Self::unwrap_tx(result)?;
        self.db.flush_async().await?;
        Ok(released)
    }

    async fn cancel_process(&self, process: &ProcessId) -> Result<(), StateStoreError> {
        self.put(&Self::process_tombstone_key(process), &Utc::now())
            .await
    }

    async fn is_process_cancelled(&self, process: &ProcessId) -> Result<bool, StateStoreError> {
        Ok(self.db.contains_key(Self::process_tombstone_key(process))?)
    }
}
