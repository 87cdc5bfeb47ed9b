pub mod builtin;

use engine_config::pipeline::TransformSpec;
use model::{core::value::FieldValue, records::row::RowData};
use std::sync::Arc;

/// Row rewrite applied by a batch task.
///
/// Returns the assignments to write, or `None` when the row already holds the
/// desired values. Rows answered with `None` are visited but not written.
pub trait RowTransform: Send + Sync {
    fn apply(&self, row: &RowData) -> Option<Vec<FieldValue>>;

    /// Columns the transform reads.
    fn columns(&self) -> Vec<String>;
}

impl<T: RowTransform + ?Sized> RowTransform for Arc<T> {
    fn apply(&self, row: &RowData) -> Option<Vec<FieldValue>> {
        (**self).apply(row)
    }

    fn columns(&self) -> Vec<String> {
        (**self).columns()
    }
}

pub fn from_spec(spec: &TransformSpec) -> Arc<dyn RowTransform> {
    match spec.clone() {
        TransformSpec::Remap { column, mapping } => Arc::new(builtin::Remap::new(column, mapping)),
        TransformSpec::Offset { column, delta } => Arc::new(builtin::Offset::new(column, delta)),
        TransformSpec::Replace {
            column,
            search,
            replace,
        } => Arc::new(builtin::Replace::new(column, search, replace)),
        TransformSpec::SetDefault { column, value } => {
            Arc::new(builtin::SetDefault::new(column, value))
        }
    }
}
