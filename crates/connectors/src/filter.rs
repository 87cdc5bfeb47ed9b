use model::{core::value::Value, records::row::RowData};
use serde::{Deserialize, Serialize};

/// Structured row filter restricting which rows a task visits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Filter {
    Eq { column: String, value: Value },
    NotEq { column: String, value: Value },
    In { column: String, values: Vec<Value> },
    IsNull { column: String },
    IsNotNull { column: String },
    And { filters: Vec<Filter> },
}

impl Filter {
    pub fn matches(&self, row: &RowData) -> bool {
        match self {
            Filter::Eq { column, value } => row.get_value(column).equal(value),
            Filter::NotEq { column, value } => {
                let current = row.get_value(column);
                // SQL semantics: NULL <> x is not true
                !current.is_null() && !current.equal(value)
            }
            Filter::In { column, values } => {
                let current = row.get_value(column);
                values.iter().any(|v| current.equal(v))
            }
            Filter::IsNull { column } => row.get_value(column).is_null(),
            Filter::IsNotNull { column } => !row.get_value(column).is_null(),
            Filter::And { filters } => filters.iter().all(|f| f.matches(row)),
        }
    }

    /// Every column the filter reads.
    pub fn columns(&self) -> Vec<&str> {
        match self {
            Filter::Eq { column, .. }
            | Filter::NotEq { column, .. }
            | Filter::In { column, .. }
            | Filter::IsNull { column }
            | Filter::IsNotNull { column } => vec![column.as_str()],
            Filter::And { filters } => filters.iter().flat_map(|f| f.columns()).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use model::core::value::FieldValue;

    fn row(status: Value) -> RowData {
        RowData::new(
            "posts",
            vec![
                FieldValue::new("id", Value::Uint(1)),
                FieldValue::new("status", status),
            ],
        )
    }

    #[test]
    fn not_eq_excludes_nulls() {
        let filter = Filter::NotEq {
            column: "status".into(),
            value: Value::String("draft".into()),
        };
        assert!(filter.matches(&row(Value::String("publish".into()))));
        assert!(!filter.matches(&row(Value::String("draft".into()))));
        assert!(!filter.matches(&row(Value::Null)));
    }

    #[test]
    fn and_requires_all() {
        let filter = Filter::And {
            filters: vec![
                Filter::IsNotNull {
                    column: "status".into(),
                },
                Filter::In {
                    column: "id".into(),
                    values: vec![Value::Int(1), Value::Int(2)],
                },
            ],
        };
        assert!(filter.matches(&row(Value::String("x".into()))));
        assert!(!filter.matches(&row(Value::Null)));
        assert_eq!(filter.columns(), vec!["status", "id"]);
    }

    #[test]
    fn deserializes_from_tagged_json() {
        let filter: Filter = serde_json::from_str(
            r#"{"op": "eq", "column": "post_type", "value": {"String": "attachment"}}"#,
        )
        .unwrap();
        assert_eq!(
            filter,
            Filter::Eq {
                column: "post_type".into(),
                value: Value::String("attachment".into())
            }
        );
    }
}
