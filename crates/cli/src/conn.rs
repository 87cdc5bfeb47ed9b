use crate::error::CliError;
use connectors::{memory::MemoryStore, sql::postgres::adapter::PgRowStore, store::RowStore};
use model::{
    core::value::{FieldValue, Value},
    records::row::RowData,
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value as Json};
use std::{path::PathBuf, sync::Arc};
use tracing::info;

/// Where `migrate` reads and writes rows.
#[derive(Debug, Clone)]
pub enum StoreSource {
    Postgres(String),
    /// JSON file of tables, loaded into memory and written back after the run.
    Fixture(PathBuf),
}

impl StoreSource {
    pub fn from_args(
        database_url: Option<String>,
        fixture: Option<PathBuf>,
    ) -> Result<Self, CliError> {
        match (database_url, fixture) {
            (Some(url), None) => Ok(StoreSource::Postgres(url)),
            (None, Some(path)) => Ok(StoreSource::Fixture(path)),
            (None, None) => Err(CliError::Config(
                "either --database-url or --fixture is required".into(),
            )),
            (Some(_), Some(_)) => Err(CliError::Config(
                "--database-url and --fixture are mutually exclusive".into(),
            )),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct Fixture {
    tables: Vec<TableFixture>,
}

#[derive(Debug, Serialize, Deserialize)]
struct TableFixture {
    name: String,
    pk_col: String,
    #[serde(default)]
    unique_columns: Vec<String>,
    rows: Vec<Map<String, Json>>,
}

pub enum OpenedStore {
    Postgres(Arc<PgRowStore>),
    Fixture {
        path: PathBuf,
        store: Arc<MemoryStore>,
        layout: Vec<(String, String, Vec<String>)>,
    },
}

impl OpenedStore {
    pub async fn open(source: StoreSource) -> Result<Self, CliError> {
        match source {
            StoreSource::Postgres(url) => {
                let store = PgRowStore::connect(&url).await?;
                info!("Connected to PostgreSQL");
                Ok(OpenedStore::Postgres(Arc::new(store)))
            }
            StoreSource::Fixture(path) => {
                let json = tokio::fs::read_to_string(&path).await?;
                let fixture: Fixture = serde_json::from_str(&json)?;
                let store = MemoryStore::new();
                let mut layout = Vec::with_capacity(fixture.tables.len());

                for table in fixture.tables {
                    let unique: Vec<&str> = table.unique_columns.iter().map(String::as_str).collect();
                    store.create_table(&table.name, &table.pk_col, &unique).await;
                    for row in &table.rows {
                        store.insert(&table.name, row_from_json(&table.name, row)?).await?;
                    }
                    info!(table = %table.name, rows = table.rows.len(), "Loaded fixture table");
                    layout.push((table.name, table.pk_col, table.unique_columns));
                }

                Ok(OpenedStore::Fixture {
                    path,
                    store: Arc::new(store),
                    layout,
                })
            }
        }
    }

    pub fn row_store(&self) -> Arc<dyn RowStore> {
        match self {
            OpenedStore::Postgres(store) => store.clone(),
            OpenedStore::Fixture { store, .. } => store.clone(),
        }
    }

    /// Writes fixture tables back to their file. Postgres writes are already durable.
    pub async fn persist(&self) -> Result<(), CliError> {
        let OpenedStore::Fixture {
            path,
            store,
            layout,
        } = self
        else {
            return Ok(());
        };

        let mut tables = Vec::with_capacity(layout.len());
        for (name, pk_col, unique_columns) in layout {
            let rows = store.rows(name).await.iter().map(row_to_json).collect();
            tables.push(TableFixture {
                name: name.clone(),
                pk_col: pk_col.clone(),
                unique_columns: unique_columns.clone(),
                rows,
            });
        }

        let json = serde_json::to_string_pretty(&Fixture { tables })?;
        tokio::fs::write(path, json).await?;
        Ok(())
    }
}

fn row_from_json(table: &str, row: &Map<String, Json>) -> Result<RowData, CliError> {
    let fields = row
        .iter()
        .map(|(name, value)| Ok(FieldValue::new(name.clone(), value_from_json(name, value)?)))
        .collect::<Result<Vec<_>, CliError>>()?;
    Ok(RowData::new(table, fields))
}

fn value_from_json(column: &str, value: &Json) -> Result<Value, CliError> {
    Ok(match value {
        Json::Null => Value::Null,
        Json::Bool(b) => Value::Boolean(*b),
        Json::String(s) => Value::String(s.clone()),
        Json::Number(n) => {
            if let Some(u) = n.as_u64() {
                Value::Uint(u)
            } else if let Some(i) = n.as_i64() {
                Value::Int(i)
            } else {
                Value::Float(n.as_f64().unwrap_or_default())
            }
        }
        Json::Array(_) | Json::Object(_) => {
            return Err(CliError::Fixture(format!(
                "column '{column}' holds a nested value"
            )));
        }
    })
}

fn row_to_json(row: &RowData) -> Map<String, Json> {
    row.field_values
        .iter()
        .map(|f| (f.name.clone(), value_to_json(&f.value)))
        .collect()
}

fn value_to_json(value: &Value) -> Json {
    match value {
        Value::Int(i) => Json::from(*i),
        Value::Uint(u) => Json::from(*u),
        Value::Float(f) => Number::from_f64(*f).map(Json::Number).unwrap_or(Json::Null),
        Value::String(s) => Json::String(s.clone()),
        Value::Boolean(b) => Json::Bool(*b),
        Value::Bytes(b) => Json::from(b.clone()),
        Value::Null => Json::Null,
    }
}
