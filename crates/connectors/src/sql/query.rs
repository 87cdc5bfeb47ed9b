use crate::{
    filter::Filter,
    store::{RowUpdate, ScanBound, ScanRequest},
};
use model::{core::value::Value, pagination::cursor::ScanOrder};

/// Renders scans and keyed updates as PostgreSQL statements with `$n` placeholders.
#[derive(Debug, Default)]
pub struct QueryGenerator {
    params: Vec<Value>,
}

impl QueryGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Generates a SQL SELECT statement and its parameters.
    pub fn select(mut self, request: &ScanRequest) -> (String, Vec<Value>) {
        let columns = request
            .columns
            .iter()
            .map(|c| ident(c))
            .collect::<Vec<_>>()
            .join(", ");
        let pk = ident(&request.pk_col);

        let mut predicates = Vec::new();
        match (request.bound, request.order) {
            (ScanBound::Start, _) => {}
            (ScanBound::From(key), ScanOrder::Descending) => {
                predicates.push(format!("{pk} <= {}", self.bind(key_value(key))))
            }
            (ScanBound::From(key), ScanOrder::Ascending) => {
                predicates.push(format!("{pk} >= {}", self.bind(key_value(key))))
            }
            (ScanBound::After(key), ScanOrder::Descending) => {
                predicates.push(format!("{pk} < {}", self.bind(key_value(key))))
            }
            (ScanBound::After(key), ScanOrder::Ascending) => {
                predicates.push(format!("{pk} > {}", self.bind(key_value(key))))
            }
        }

        if let Some(filter) = &request.filter {
            predicates.push(self.filter(filter));
        }

        let mut sql = format!("SELECT {columns} FROM {}", ident(&request.table));
        if !predicates.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&predicates.join(" AND "));
        }

        let direction = match request.order {
            ScanOrder::Descending => "DESC",
            ScanOrder::Ascending => "ASC",
        };
        sql.push_str(&format!(
            " ORDER BY {pk} {direction} LIMIT {}",
            request.limit
        ));

        (sql, self.params)
    }

    /// Generates a single-row UPDATE keyed by primary key.
    pub fn update(mut self, update: &RowUpdate) -> (String, Vec<Value>) {
        let assignments = update
            .assignments
            .iter()
            .map(|a| format!("{} = {}", ident(&a.name), self.bind(a.value.clone())))
            .collect::<Vec<_>>()
            .join(", ");
        let key = self.bind(key_value(update.key));

        let sql = format!(
            "UPDATE {} SET {assignments} WHERE {} = {key}",
            ident(&update.table),
            ident(&update.pk_col)
        );

        (sql, self.params)
    }

    fn filter(&mut self, filter: &Filter) -> String {
        match filter {
            Filter::Eq { column, value } if value.is_null() => {
                format!("{} IS NULL", ident(column))
            }
            Filter::Eq { column, value } => {
                format!("{} = {}", ident(column), self.bind(value.clone()))
            }
            Filter::NotEq { column, value } if value.is_null() => {
                format!("{} IS NOT NULL", ident(column))
            }
            Filter::NotEq { column, value } => {
                format!("{} <> {}", ident(column), self.bind(value.clone()))
            }
            Filter::In { values, .. } if values.is_empty() => "FALSE".to_string(),
            Filter::In { column, values } => {
                let placeholders = values
                    .iter()
                    .map(|v| self.bind(v.clone()))
                    .collect::<Vec<_>>()
                    .join(", ");
                format!("{} IN ({placeholders})", ident(column))
            }
            Filter::IsNull { column } => format!("{} IS NULL", ident(column)),
            Filter::IsNotNull { column } => format!("{} IS NOT NULL", ident(column)),
            Filter::And { filters } if filters.is_empty() => "TRUE".to_string(),
            Filter::And { filters } => {
                let parts = filters
                    .iter()
                    .map(|f| self.filter(f))
                    .collect::<Vec<_>>()
                    .join(" AND ");
                format!("({parts})")
            }
        }
    }

    fn bind(&mut self, value: Value) -> String {
        self.params.push(value);
        format!("${}", self.params.len())
    }
}

/// The driver narrows keys to the key column's width when binding.
fn key_value(key: u64) -> Value {
    Value::Uint(key)
}

fn ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}
