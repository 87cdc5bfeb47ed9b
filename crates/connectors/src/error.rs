use thiserror::Error;

/// Errors raised by a [`RowStore`](crate::store::RowStore).
#[derive(Debug, Error)]
pub enum StoreError {
    /// A write would have produced a duplicate in a uniquely constrained column.
    #[error(
        "Unique constraint violated on table '{table}' (column: {}) for key {key}: {detail}",
        column.as_deref().unwrap_or("unknown")
    )]
    UniqueViolation {
        table: String,
        column: Option<String>,
        key: u64,
        detail: String,
    },

    #[error("Unknown table: {0}")]
    UnknownTable(String),

    #[error("Unknown column '{column}' on table '{table}'")]
    UnknownColumn { table: String, column: String },

    /// A scanned row carries no usable unsigned integer primary key.
    #[error("Row in table '{table}' has no valid primary key in column '{pk_col}'")]
    InvalidKey { table: String, pk_col: String },

    /// A momentary failure; the same call may succeed when repeated.
    #[error("Transient store failure: {0}")]
    Transient(String),

    /// A value the driver cannot carry, such as an unsigned key above BIGINT.
    #[error("Value {0} cannot be bound as a statement parameter")]
    Unbindable(String),

    #[error("Connection error: {0}")]
    Connection(String),

    /// PostgreSQL driver error.
    #[error("PostgreSQL error: {0}")]
    Postgres(#[from] tokio_postgres::Error),

    #[error("TLS error: {0}")]
    Tls(#[from] native_tls::Error),
}

impl StoreError {
    pub fn is_unique_violation(&self) -> bool {
        matches!(self, StoreError::UniqueViolation { .. })
    }

    /// Column reported by a unique violation, when the store knows it.
    pub fn violated_column(&self) -> Option<&str> {
        match self {
            StoreError::UniqueViolation { column, .. } => column.as_deref(),
            _ => None,
        }
    }
}
