use connectors::error::StoreError;
use engine_core::retry::RetryDisposition;
use tokio_postgres::{Error as PgError, error::SqlState};

pub fn classify_store_error(err: &StoreError) -> RetryDisposition {
    match err {
        StoreError::Transient(_) | StoreError::Connection(_) => RetryDisposition::Retry,
        StoreError::Postgres(pg_err) => classify_pg_error(pg_err),
        StoreError::Tls(_) => RetryDisposition::Retry,
        StoreError::UniqueViolation { .. } => RetryDisposition::Stop,
        StoreError::UnknownTable(_) => RetryDisposition::Stop,
        StoreError::UnknownColumn { .. } => RetryDisposition::Stop,
        StoreError::InvalidKey { .. } | StoreError::Unbindable(_) => RetryDisposition::Stop,
    }
}

fn classify_pg_error(err: &PgError) -> RetryDisposition {
    if err.is_closed() {
        return RetryDisposition::Retry;
    }

    if let Some(code) = err.code()
        && is_retryable_pg_code(code)
    {
        return RetryDisposition::Retry;
    }

    RetryDisposition::Stop
}

fn is_retryable_pg_code(code: &SqlState) -> bool {
    matches!(
        *code,
        SqlState::T_R_SERIALIZATION_FAILURE
            | SqlState::T_R_DEADLOCK_DETECTED
            | SqlState::LOCK_NOT_AVAILABLE
            | SqlState::TOO_MANY_CONNECTIONS
            | SqlState::ADMIN_SHUTDOWN
            | SqlState::CRASH_SHUTDOWN
            | SqlState::CANNOT_CONNECT_NOW
            | SqlState::CONNECTION_EXCEPTION
            | SqlState::CONNECTION_FAILURE
    )
}
