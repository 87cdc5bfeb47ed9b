use super::RowTransform;
use model::{
    core::value::{FieldValue, Value},
    records::row::RowData,
};
use std::collections::BTreeMap;
use tracing::warn;

fn assign(column: &str, value: Value) -> Option<Vec<FieldValue>> {
    Some(vec![FieldValue::new(column, value)])
}

/// Lookup-table rewrite of an identifier column. Identifiers without an
/// entry are left untouched.
pub struct Remap {
    column: String,
    mapping: BTreeMap<u64, u64>,
}

impl Remap {
    pub fn new(column: impl Into<String>, mapping: BTreeMap<u64, u64>) -> Self {
        Self {
            column: column.into(),
            mapping,
        }
    }
}

impl RowTransform for Remap {
    fn apply(&self, row: &RowData) -> Option<Vec<FieldValue>> {
        let current = row.get_value(&self.column);
        let old = current.as_u64()?;
        let new = *self.mapping.get(&old)?;
        if new == old {
            return None;
        }

        // Keep the column's representation.
        let value = match current {
            Value::Int(_) => Value::Int(i64::try_from(new).ok()?),
            Value::String(_) => Value::String(new.to_string()),
            _ => Value::Uint(new),
        };
        assign(&self.column, value)
    }

    fn columns(&self) -> Vec<String> {
        vec![self.column.clone()]
    }
}

/// Shifts an integer column by a fixed delta.
pub struct Offset {
    column: String,
    delta: i64,
}

impl Offset {
    pub fn new(column: impl Into<String>, delta: i64) -> Self {
        Self {
            column: column.into(),
            delta,
        }
    }
}

impl RowTransform for Offset {
    fn apply(&self, row: &RowData) -> Option<Vec<FieldValue>> {
        if self.delta == 0 {
            return None;
        }
        let current = row.get_value(&self.column);
        let shifted = match current {
            Value::Int(v) => v.checked_add(self.delta).map(Value::Int),
            Value::Uint(v) => v.checked_add_signed(self.delta).map(Value::Uint),
            _ => return None,
        };
        let Some(value) = shifted else {
            warn!(
                table = %row.entity,
                column = %self.column,
                value = %current,
                delta = self.delta,
                "Offset leaves the column's range, row left unchanged"
            );
            return None;
        };
        assign(&self.column, value)
    }

    fn columns(&self) -> Vec<String> {
        vec![self.column.clone()]
    }
}

pub struct Replace {
    column: String,
    search: String,
    replace: String,
}

impl Replace {
    pub fn new(
        column: impl Into<String>,
        search: impl Into<String>,
        replace: impl Into<String>,
    ) -> Self {
        Self {
            column: column.into(),
            search: search.into(),
            replace: replace.into(),
        }
    }
}

impl RowTransform for Replace {
    fn apply(&self, row: &RowData) -> Option<Vec<FieldValue>> {
        if self.search.is_empty() || self.search == self.replace {
            return None;
        }
        match row.get_value(&self.column) {
            Value::String(s) if s.contains(&self.search) => assign(
                &self.column,
                Value::String(s.replace(&self.search, &self.replace)),
            ),
            _ => None,
        }
    }

    fn columns(&self) -> Vec<String> {
        vec![self.column.clone()]
    }
}

/// Forces a column to a constant, typically a safe default for data that
/// cannot be trusted.
pub struct SetDefault {
    column: String,
    value: Value,
}

impl SetDefault {
    pub fn new(column: impl Into<String>, value: Value) -> Self {
        Self {
            column: column.into(),
            value,
        }
    }
}

impl RowTransform for SetDefault {
    fn apply(&self, row: &RowData) -> Option<Vec<FieldValue>> {
        let current = row.get_value(&self.column);
        if current.equal(&self.value) || (current.is_null() && self.value.is_null()) {
            return None;
        }
        assign(&self.column, self.value.clone())
    }

    fn columns(&self) -> Vec<String> {
        vec![self.column.clone()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_test::traced_test;

    fn row(values: Vec<(&str, Value)>) -> RowData {
        RowData::new(
            "posts",
            values
                .into_iter()
                .map(|(n, v)| FieldValue::new(n, v))
                .collect(),
        )
    }

    #[test]
    fn remap_rewrites_known_ids_and_keeps_representation() {
        let remap = Remap::new("author_id", BTreeMap::from([(1, 101), (2, 2)]));

        let out = remap.apply(&row(vec![("author_id", Value::Int(1))])).unwrap();
        assert_eq!(out, vec![FieldValue::new("author_id", Value::Int(101))]);

        assert!(remap.apply(&row(vec![("author_id", Value::Int(2))])).is_none());
        assert!(remap.apply(&row(vec![("author_id", Value::Int(3))])).is_none());
        assert!(remap.apply(&row(vec![("author_id", Value::Null)])).is_none());
    }

    #[traced_test]
    #[test]
    fn offset_shifts_and_guards_overflow() {
        let offset = Offset::new("parent", -5);
        let out = offset.apply(&row(vec![("parent", Value::Uint(10))])).unwrap();
        assert_eq!(out[0].value, Value::Uint(5));
        assert!(offset.apply(&row(vec![("parent", Value::Uint(3))])).is_none());
        assert!(logs_contain("Offset leaves the column's range"));
        assert!(Offset::new("parent", 0).apply(&row(vec![("parent", Value::Int(1))])).is_none());
    }

    #[test]
    fn replace_only_touches_matching_text() {
        let replace = Replace::new("guid", "old.example", "new.example");
        let out = replace
            .apply(&row(vec![("guid", Value::String("https://old.example/?p=1".into()))]))
            .unwrap();
        assert_eq!(out[0].value, Value::String("https://new.example/?p=1".into()));
        assert!(replace
            .apply(&row(vec![("guid", Value::String("https://other/".into()))]))
            .is_none());
    }

    #[test]
    fn set_default_skips_rows_already_at_default() {
        let set = SetDefault::new("status", Value::String("draft".into()));
        assert!(set.apply(&row(vec![("status", Value::String("draft".into()))])).is_none());
        assert_eq!(
            set.apply(&row(vec![("status", Value::String("publish".into()))])),
            Some(vec![FieldValue::new("status", Value::String("draft".into()))])
        );
    }
}
