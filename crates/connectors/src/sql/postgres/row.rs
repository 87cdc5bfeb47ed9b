use model::{
    core::value::{FieldValue, Value},
    records::row::RowData,
};
use tokio_postgres::Row as PgRow;
use tracing::warn;

/// Decodes a driver row into [`RowData`], mapping column types by name.
pub fn to_row_data(row: &PgRow, table: &str) -> RowData {
    let field_values = row
        .columns()
        .iter()
        .enumerate()
        .map(|(idx, column)| {
            let type_name = column.type_().name();
            let value = decode(row, idx, type_name).unwrap_or_else(|| {
                warn!(column = column.name(), type_name, "Unsupported column type, reading as NULL");
                Value::Null
            });
            FieldValue::new(column.name(), value)
        })
        .collect();

    RowData::new(table, field_values)
}

fn decode(row: &PgRow, idx: usize, type_name: &str) -> Option<Value> {
    let value = match type_name {
        "int2" => opt(row.try_get::<_, Option<i16>>(idx).ok()?, |v| Value::Int(v as i64)),
        "int4" => opt(row.try_get::<_, Option<i32>>(idx).ok()?, |v| Value::Int(v as i64)),
        "int8" => opt(row.try_get::<_, Option<i64>>(idx).ok()?, Value::Int),
        "oid" => opt(row.try_get::<_, Option<u32>>(idx).ok()?, |v| Value::Uint(v as u64)),
        "float4" => opt(row.try_get::<_, Option<f32>>(idx).ok()?, |v| Value::Float(v as f64)),
        "float8" => opt(row.try_get::<_, Option<f64>>(idx).ok()?, Value::Float),
        "bool" => opt(row.try_get::<_, Option<bool>>(idx).ok()?, Value::Boolean),
        "bytea" => opt(row.try_get::<_, Option<Vec<u8>>>(idx).ok()?, Value::Bytes),
        "text" | "varchar" | "bpchar" | "name" | "citext" => {
            opt(row.try_get::<_, Option<String>>(idx).ok()?, Value::String)
        }
        _ => return None,
    };
    Some(value)
}

fn opt<T>(value: Option<T>, f: impl FnOnce(T) -> Value) -> Value {
    value.map(f).unwrap_or(Value::Null)
}
