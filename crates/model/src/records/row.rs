use crate::core::value::{FieldValue, Value};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RowData {
    pub entity: String,
    pub field_values: Vec<FieldValue>,
}

impl RowData {
    pub fn new(entity: &str, field_values: Vec<FieldValue>) -> Self {
        RowData {
            entity: entity.to_string(),
            field_values,
        }
    }

    pub fn get(&self, field: &str) -> Option<&FieldValue> {
        self.field_values
            .iter()
            .find(|f| f.name.eq_ignore_ascii_case(field))
    }

    pub fn get_value(&self, field: &str) -> Value {
        self.get(field)
            .map(|f| f.value.clone())
            .unwrap_or(Value::Null)
    }

    /// Sets `field` to `value`, appending the field when the row lacks it.
    pub fn set_value(&mut self, field: &str, value: Value) {
        match self
            .field_values
            .iter_mut()
            .find(|f| f.name.eq_ignore_ascii_case(field))
        {
            Some(existing) => existing.value = value,
            None => self.field_values.push(FieldValue::new(field, value)),
        }
    }

    /// Keeps only the requested columns, in the requested order.
    pub fn project(&self, columns: &[String]) -> RowData {
        let field_values = columns
            .iter()
            .map(|c| FieldValue::new(c.clone(), self.get_value(c)))
            .collect();
        RowData::new(&self.entity, field_values)
    }

    pub fn size_bytes(&self) -> usize {
        self.field_values.iter().map(|f| f.value.size_bytes()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_is_case_insensitive() {
        let row = RowData::new("users", vec![FieldValue::new("ID", Value::Uint(3))]);
        assert_eq!(row.get_value("id"), Value::Uint(3));
        assert_eq!(row.get_value("missing"), Value::Null);
    }

    #[test]
    fn set_value_overwrites_or_appends() {
        let mut row = RowData::new("users", vec![FieldValue::new("id", Value::Uint(3))]);
        row.set_value("id", Value::Uint(4));
        row.set_value("name", Value::String("a".into()));
        assert_eq!(row.get_value("id"), Value::Uint(4));
        assert_eq!(row.field_values.len(), 2);
    }
}
