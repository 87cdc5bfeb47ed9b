use crate::{error::StoreError, filter::Filter};
use async_trait::async_trait;
use model::{
    core::value::FieldValue, pagination::cursor::ScanOrder, records::row::RowData,
};

/// Where a primary-key ordered scan begins.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanBound {
    /// Top of the key range for the scan order.
    Start,
    /// At `key`, inclusive.
    From(u64),
    /// Strictly past `key` in the scan order.
    After(u64),
}

/// One page of a primary-key ordered scan.
#[derive(Debug, Clone)]
pub struct ScanRequest {
    pub table: String,
    pub pk_col: String,
    /// Columns to return; always contains `pk_col`.
    pub columns: Vec<String>,
    pub filter: Option<Filter>,
    pub order: ScanOrder,
    pub bound: ScanBound,
    pub limit: usize,
}

impl ScanRequest {
    pub fn new(table: impl Into<String>, pk_col: impl Into<String>) -> Self {
        let pk_col = pk_col.into();
        Self {
            table: table.into(),
            columns: vec![pk_col.clone()],
            pk_col,
            filter: None,
            order: ScanOrder::default(),
            bound: ScanBound::Start,
            limit: 100,
        }
    }

    pub fn columns<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for column in columns {
            let column = column.into();
            if !self.columns.iter().any(|c| c.eq_ignore_ascii_case(&column)) {
                self.columns.push(column);
            }
        }
        self
    }

    pub fn filter(mut self, filter: Option<Filter>) -> Self {
        self.filter = filter;
        self
    }

    pub fn order(mut self, order: ScanOrder) -> Self {
        self.order = order;
        self
    }

    pub fn bound(mut self, bound: ScanBound) -> Self {
        self.bound = bound;
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = limit.max(1);
        self
    }

    /// Whether `key` lies inside the scan window described by the bound.
    pub fn admits(&self, key: u64) -> bool {
        match (self.bound, self.order) {
            (ScanBound::Start, _) => true,
            (ScanBound::From(b), ScanOrder::Descending) => key <= b,
            (ScanBound::From(b), ScanOrder::Ascending) => key >= b,
            (ScanBound::After(b), ScanOrder::Descending) => key < b,
            (ScanBound::After(b), ScanOrder::Ascending) => key > b,
        }
    }
}

/// A single-row write keyed by primary key.
#[derive(Debug, Clone, PartialEq)]
pub struct RowUpdate {
    pub table: String,
    pub pk_col: String,
    pub key: u64,
    pub assignments: Vec<FieldValue>,
}

/// Table access used by batch tasks: ordered, limited scans and keyed updates.
#[async_trait]
pub trait RowStore: Send + Sync {
    async fn fetch_rows(&self, request: &ScanRequest) -> Result<Vec<RowData>, StoreError>;

    /// Applies `update`, returning the number of rows affected.
    async fn update_row(&self, update: &RowUpdate) -> Result<u64, StoreError>;
}

/// Extracts the primary key of a scanned row.
pub fn row_key(row: &RowData, table: &str, pk_col: &str) -> Result<u64, StoreError> {
    row.get_value(pk_col)
        .as_u64()
        .ok_or_else(|| StoreError::InvalidKey {
            table: table.to_string(),
            pk_col: pk_col.to_string(),
        })
}
