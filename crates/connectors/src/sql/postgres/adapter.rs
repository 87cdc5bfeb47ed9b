use crate::{
    error::StoreError,
    sql::{
        postgres::{
            params::Bindings,
            row::to_row_data,
            utils::{connect_client, violated_column_from_detail},
        },
        query::QueryGenerator,
    },
    store::{RowStore, RowUpdate, ScanRequest},
};
use async_trait::async_trait;
use model::records::row::RowData;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio_postgres::{Client, error::SqlState};
use tracing::debug;

/// [`RowStore`] backed by a PostgreSQL connection.
#[derive(Clone)]
pub struct PgRowStore {
    client: Arc<RwLock<Client>>,
}

impl PgRowStore {
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let client = connect_client(url).await?;
        Ok(Self::from_client(client))
    }

    pub fn from_client(client: Client) -> Self {
        Self {
            client: Arc::new(RwLock::new(client)),
        }
    }
}

#[async_trait]
impl RowStore for PgRowStore {
    async fn fetch_rows(&self, request: &ScanRequest) -> Result<Vec<RowData>, StoreError> {
        let (sql, params) = QueryGenerator::new().select(request);
        debug!(%sql, "Fetching rows");

        let client = self.client.read().await;
        let statement = client
            .prepare(&sql)
            .await
            .map_err(|e| map_pg_error(e, &request.table, 0))?;
        let bindings = Bindings::for_types(params, statement.params())?;
        let rows = client
            .query(&statement, &bindings.refs())
            .await
            .map_err(|e| map_pg_error(e, &request.table, 0))?;

        Ok(rows
            .iter()
            .map(|row| to_row_data(row, &request.table))
            .collect())
    }

    async fn update_row(&self, update: &RowUpdate) -> Result<u64, StoreError> {
        let (sql, params) = QueryGenerator::new().update(update);
        debug!(%sql, key = update.key, "Updating row");

        let client = self.client.read().await;
        let statement = client
            .prepare(&sql)
            .await
            .map_err(|e| map_pg_error(e, &update.table, update.key))?;
        let bindings = Bindings::for_types(params, statement.params())?;
        client
            .execute(&statement, &bindings.refs())
            .await
            .map_err(|e| map_pg_error(e, &update.table, update.key))
    }
}

fn map_pg_error(err: tokio_postgres::Error, table: &str, key: u64) -> StoreError {
    if err.code() == Some(&SqlState::UNIQUE_VIOLATION) {
        let detail = err
            .as_db_error()
            .and_then(|db| db.detail())
            .unwrap_or_default()
            .to_string();
        let column = err
            .as_db_error()
            .and_then(|db| db.column())
            .map(str::to_string)
            .or_else(|| violated_column_from_detail(&detail));

        return StoreError::UniqueViolation {
            table: table.to_string(),
            column,
            key,
            detail,
        };
    }
    StoreError::Postgres(err)
}
