use crate::transform::{self, RowTransform};
use connectors::{error::StoreError, filter::Filter};
use engine_config::pipeline::TaskDefinition;
use model::{
    core::identifiers::{DependencyKey, TaskId},
    pagination::cursor::ScanOrder,
};
use std::{fmt, sync::Arc};

/// One registered row-transformation unit.
#[derive(Clone)]
pub struct BatchTask {
    pub id: TaskId,
    pub priority: i32,
    pub table: String,
    pub pk_col: String,
    /// Columns fetched per row, always including the key and every column the
    /// transform reads.
    pub columns: Vec<String>,
    pub progress_label: Option<String>,
    pub order: ScanOrder,
    pub filter: Option<Filter>,
    pub dependency: Option<DependencyKey>,
    pub forced: bool,
    pub unique_column: Option<String>,
    pub pipeline_fatal: bool,
    pub transform: Arc<dyn RowTransform>,
}

impl BatchTask {
    pub fn from_definition(def: &TaskDefinition) -> Self {
        let transform = transform::from_spec(&def.transform);
        Self::with_transform(def, transform)
    }

    /// Builds the task around a caller-supplied transform instead of the
    /// declared one.
    pub fn with_transform(def: &TaskDefinition, transform: Arc<dyn RowTransform>) -> Self {
        let mut columns = vec![def.pk_col.clone()];
        for column in def.select_columns.iter().cloned().chain(transform.columns()) {
            if !columns.iter().any(|c| c.eq_ignore_ascii_case(&column)) {
                columns.push(column);
            }
        }

        Self {
            id: def.id.clone(),
            priority: def.priority,
            table: def.table.clone(),
            pk_col: def.pk_col.clone(),
            columns,
            progress_label: def.progress_label.clone(),
            order: def.order,
            filter: def.filter.clone(),
            dependency: def.dependency.clone(),
            forced: def.forced,
            unique_column: def.unique_column.clone(),
            pipeline_fatal: def.pipeline_fatal,
            transform,
        }
    }

    /// Whether a failed write may be dropped instead of failing the task.
    ///
    /// Only unique violations on the declared column qualify. A violation whose
    /// column the store could not identify is tolerated as well.
    pub fn tolerates(&self, err: &StoreError) -> bool {
        let Some(unique) = &self.unique_column else {
            return false;
        };
        if !err.is_unique_violation() {
            return false;
        }
        err.violated_column()
            .is_none_or(|column| column.eq_ignore_ascii_case(unique))
    }

    pub fn label(&self) -> &str {
        self.progress_label.as_deref().unwrap_or(self.id.as_str())
    }
}

impl fmt::Debug for BatchTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BatchTask")
            .field("id", &self.id)
            .field("priority", &self.priority)
            .field("table", &self.table)
            .field("pk_col", &self.pk_col)
            .field("order", &self.order)
            .field("dependency", &self.dependency)
            .field("forced", &self.forced)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use engine_config::pipeline::TransformSpec;

    fn definition(unique_column: Option<&str>) -> TaskDefinition {
        TaskDefinition {
            id: TaskId::new("remap"),
            priority: 10,
            table: "posts".into(),
            pk_col: "id".into(),
            select_columns: vec!["slug".into(), "ID".into()],
            progress_label: None,
            order: ScanOrder::Descending,
            filter: None,
            dependency: None,
            forced: false,
            unique_column: unique_column.map(str::to_string),
            pipeline_fatal: false,
            transform: TransformSpec::Offset {
                column: "parent".into(),
                delta: 1,
            },
        }
    }

    fn violation(column: Option<&str>) -> StoreError {
        StoreError::UniqueViolation {
            table: "posts".into(),
            column: column.map(str::to_string),
            key: 1,
            detail: "dup".into(),
        }
    }

    #[test]
    fn columns_include_key_select_and_transform_once() {
        let task = BatchTask::from_definition(&definition(None));
        assert_eq!(task.columns, vec!["id", "slug", "parent"]);
        assert_eq!(task.label(), "remap");
    }

    #[test]
    fn only_matching_unique_violations_are_tolerated() {
        let task = BatchTask::from_definition(&definition(Some("slug")));
        assert!(task.tolerates(&violation(Some("slug"))));
        assert!(task.tolerates(&violation(None)));
        assert!(!task.tolerates(&violation(Some("email"))));
        assert!(!task.tolerates(&StoreError::Transient("x".into())));

        let strict = BatchTask::from_definition(&definition(None));
        assert!(!strict.tolerates(&violation(Some("slug"))));
    }
}
