use crate::{
    error::StoreError,
    store::{RowStore, RowUpdate, ScanRequest, row_key},
};
use async_trait::async_trait;
use model::{pagination::cursor::ScanOrder, records::row::RowData};
use std::{
    collections::{BTreeMap, HashMap},
    sync::atomic::{AtomicUsize, Ordering},
};
use tokio::sync::RwLock;
use tracing::debug;

#[derive(Debug)]
struct MemoryTable {
    pk_col: String,
    unique_columns: Vec<String>,
    rows: BTreeMap<u64, RowData>,
    /// Keys of every applied update, in application order.
    writes: Vec<u64>,
}

/// In-process [`RowStore`] holding tables as ordered maps keyed by primary key.
///
/// Enforces per-column unique constraints on updates and can inject transient
/// fetch failures, which makes it the store of choice for tests and dry runs.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: RwLock<HashMap<String, MemoryTable>>,
    failing_fetches: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn create_table(&self, name: &str, pk_col: &str, unique_columns: &[&str]) {
        self.tables.write().await.insert(
            name.to_string(),
            MemoryTable {
                pk_col: pk_col.to_string(),
                unique_columns: unique_columns.iter().map(|c| c.to_string()).collect(),
                rows: BTreeMap::new(),
                writes: Vec::new(),
            },
        );
    }

    pub async fn insert(&self, table: &str, row: RowData) -> Result<(), StoreError> {
        let mut tables = self.tables.write().await;
        let t = tables
            .get_mut(table)
            .ok_or_else(|| StoreError::UnknownTable(table.to_string()))?;
        let key = row_key(&row, table, &t.pk_col)?;
        t.rows.insert(key, row);
        Ok(())
    }

    pub async fn rows(&self, table: &str) -> Vec<RowData> {
        self.tables
            .read()
            .await
            .get(table)
            .map(|t| t.rows.values().cloned().collect())
            .unwrap_or_default()
    }

    pub async fn row(&self, table: &str, key: u64) -> Option<RowData> {
        self.tables
            .read()
            .await
            .get(table)
            .and_then(|t| t.rows.get(&key).cloned())
    }

    /// Keys of applied updates for `table`, in order.
    pub async fn write_log(&self, table: &str) -> Vec<u64> {
        self.tables
            .read()
            .await
            .get(table)
            .map(|t| t.writes.clone())
            .unwrap_or_default()
    }

    /// Makes the next `count` fetches fail with [`StoreError::Transient`].
    pub fn fail_next_fetches(&self, count: usize) {
        self.failing_fetches.store(count, Ordering::SeqCst);
    }

    fn take_injected_failure(&self) -> bool {
        self.failing_fetches
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl RowStore for MemoryStore {
    async fn fetch_rows(&self, request: &ScanRequest) -> Result<Vec<RowData>, StoreError> {
        if self.take_injected_failure() {
            return Err(StoreError::Transient("injected fetch failure".into()));
        }

        let tables = self.tables.read().await;
        let table = tables
            .get(&request.table)
            .ok_or_else(|| StoreError::UnknownTable(request.table.clone()))?;

        if !table.pk_col.eq_ignore_ascii_case(&request.pk_col) {
            return Err(StoreError::UnknownColumn {
                table: request.table.clone(),
                column: request.pk_col.clone(),
            });
        }

        let candidates: Box<dyn Iterator<Item = (&u64, &RowData)>> = match request.order {
            ScanOrder::Descending => Box::new(table.rows.iter().rev()),
            ScanOrder::Ascending => Box::new(table.rows.iter()),
        };

        let rows: Vec<RowData> = candidates
            .filter(|(key, _)| request.admits(**key))
            .filter(|(_, row)| request.filter.as_ref().is_none_or(|f| f.matches(row)))
            .take(request.limit)
            .map(|(_, row)| row.project(&request.columns))
            .collect();

        debug!(
            table = %request.table,
            bound = ?request.bound,
            rows = rows.len(),
            "Fetched rows from memory store"
        );

        Ok(rows)
    }

    async fn update_row(&self, update: &RowUpdate) -> Result<u64, StoreError> {
        let mut tables = self.tables.write().await;
        let table = tables
            .get_mut(&update.table)
            .ok_or_else(|| StoreError::UnknownTable(update.table.clone()))?;

        if !table.rows.contains_key(&update.key) {
            return Ok(0);
        }

        for assignment in &update.assignments {
            let constrained = table
                .unique_columns
                .iter()
                .any(|c| c.eq_ignore_ascii_case(&assignment.name));
            if !constrained || assignment.value.is_null() {
                continue;
            }

            let conflict = table.rows.iter().find(|(key, row)| {
                **key != update.key && row.get_value(&assignment.name).equal(&assignment.value)
            });

            if let Some((conflicting_key, _)) = conflict {
                return Err(StoreError::UniqueViolation {
                    table: update.table.clone(),
                    column: Some(assignment.name.clone()),
                    key: update.key,
                    detail: format!(
                        "value {} already used by row {conflicting_key}",
                        assignment.value
                    ),
                });
            }
        }

        if let Some(row) = table.rows.get_mut(&update.key) {
            for assignment in &update.assignments {
                row.set_value(&assignment.name, assignment.value.clone());
            }
        }
        table.writes.push(update.key);

        Ok(1)
    }
}
