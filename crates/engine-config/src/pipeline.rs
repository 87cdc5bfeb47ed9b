use crate::error::ConfigError;
use connectors::filter::Filter;
use model::{
    core::{
        identifiers::{DependencyKey, TaskId},
        value::Value,
    },
    pagination::cursor::ScanOrder,
};
use serde::{Deserialize, Serialize};
use std::{
    collections::{BTreeMap, HashSet},
    fs,
    path::Path,
};

/// The row rewrite a task performs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TransformSpec {
    /// Replaces identifiers found in `mapping`; other values are left alone.
    Remap {
        column: String,
        mapping: BTreeMap<u64, u64>,
    },
    /// Shifts a numeric identifier by `delta`.
    Offset { column: String, delta: i64 },
    /// Substring search and replace in a text column.
    Replace {
        column: String,
        search: String,
        replace: String,
    },
    /// Forces a column to a constant.
    SetDefault { column: String, value: Value },
}

impl TransformSpec {
    pub fn column(&self) -> &str {
        match self {
            TransformSpec::Remap { column, .. }
            | TransformSpec::Offset { column, .. }
            | TransformSpec::Replace { column, .. }
            | TransformSpec::SetDefault { column, .. } => column,
        }
    }
}

fn default_priority() -> i32 {
    10
}

/// Declaration of one batch task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskDefinition {
    pub id: TaskId,
    #[serde(default = "default_priority")]
    pub priority: i32,
    pub table: String,
    pub pk_col: String,
    /// Extra columns to read; the transform column and the key are always read.
    #[serde(default)]
    pub select_columns: Vec<String>,
    #[serde(default)]
    pub progress_label: Option<String>,
    #[serde(default)]
    pub order: ScanOrder,
    #[serde(default)]
    pub filter: Option<Filter>,
    #[serde(default)]
    pub dependency: Option<DependencyKey>,
    /// Runs even when the pre-migration validation failed.
    #[serde(default)]
    pub forced: bool,
    /// Unique violations on this column skip the row instead of failing the task.
    #[serde(default)]
    pub unique_column: Option<String>,
    /// A failure of this task aborts the whole invocation.
    #[serde(default)]
    pub pipeline_fatal: bool,
    pub transform: TransformSpec,
}

/// Declarative pipeline: tasks plus the environment they run against.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineDefinition {
    pub tasks: Vec<TaskDefinition>,
    /// Dependencies known to be satisfied.
    #[serde(default)]
    pub satisfied_dependencies: Vec<DependencyKey>,
    /// Outcome of the pre-migration validation step.
    #[serde(default = "default_validation_passed")]
    pub validation_passed: bool,
}

fn default_validation_passed() -> bool {
    true
}

impl PipelineDefinition {
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let definition: PipelineDefinition = serde_json::from_str(json)?;
        definition.validate()?;
        Ok(definition)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let json = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&json)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tasks.is_empty() {
            return Err(ConfigError::InvalidPipeline(
                "pipeline declares no tasks".into(),
            ));
        }

        let mut seen = HashSet::new();
        for task in &self.tasks {
            if !seen.insert(&task.id) {
                return Err(ConfigError::InvalidPipeline(format!(
                    "duplicate task id '{}'",
                    task.id
                )));
            }
            if task.table.trim().is_empty() || task.pk_col.trim().is_empty() {
                return Err(ConfigError::InvalidPipeline(format!(
                    "task '{}' needs a table and a primary key column",
                    task.id
                )));
            }
            if task.transform.column().trim().is_empty() {
                return Err(ConfigError::InvalidPipeline(format!(
                    "task '{}' transforms an unnamed column",
                    task.id
                )));
            }
            if task.transform.column().eq_ignore_ascii_case(&task.pk_col) {
                return Err(ConfigError::InvalidPipeline(format!(
                    "task '{}' may not rewrite its primary key column",
                    task.id
                )));
            }
            if let Some(filter) = &task.filter
                && filter.columns().iter().any(|c| c.trim().is_empty())
            {
                return Err(ConfigError::InvalidPipeline(format!(
                    "task '{}' filters on an unnamed column",
                    task.id
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PIPELINE: &str = r#"{
        "tasks": [
            {
                "id": "remap_authors",
                "priority": 5,
                "table": "posts",
                "pk_col": "id",
                "progress_label": "Remapping post authors",
                "filter": {"op": "eq", "column": "post_type", "value": {"String": "post"}},
                "unique_column": "slug",
                "transform": {"kind": "remap", "column": "author_id", "mapping": {"1": 101, "2": 102}}
            },
            {
                "id": "reset_status",
                "table": "posts",
                "pk_col": "id",
                "order": "ascending",
                "dependency": "woocommerce",
                "forced": true,
                "transform": {"kind": "set_default", "column": "status", "value": {"String": "draft"}}
            }
        ],
        "satisfied_dependencies": ["woocommerce"]
    }"#;

    #[test]
    fn parses_pipeline_with_defaults() {
        let pipeline = PipelineDefinition::from_json(PIPELINE).unwrap();
        assert!(pipeline.validation_passed);
        assert_eq!(pipeline.tasks.len(), 2);

        let first = &pipeline.tasks[0];
        assert_eq!(first.priority, 5);
        assert_eq!(first.order, ScanOrder::Descending);
        assert_eq!(
            first.transform,
            TransformSpec::Remap {
                column: "author_id".into(),
                mapping: BTreeMap::from([(1, 101), (2, 102)]),
            }
        );

        let second = &pipeline.tasks[1];
        assert_eq!(second.priority, 10);
        assert_eq!(second.order, ScanOrder::Ascending);
        assert!(second.forced);
        assert_eq!(second.dependency, Some(DependencyKey::new("woocommerce")));
    }

    #[test]
    fn rejects_duplicate_ids_and_pk_rewrites() {
        let mut pipeline = PipelineDefinition::from_json(PIPELINE).unwrap();
        pipeline.tasks[1].id = pipeline.tasks[0].id.clone();
        assert!(pipeline.validate().is_err());

        let mut pipeline = PipelineDefinition::from_json(PIPELINE).unwrap();
        pipeline.tasks[0].transform = TransformSpec::Offset {
            column: "ID".into(),
            delta: 1,
        };
        assert!(pipeline.validate().is_err());
    }

    #[test]
    fn rejects_filter_on_unnamed_column() {
        let mut pipeline = PipelineDefinition::from_json(PIPELINE).unwrap();
        pipeline.tasks[0].filter = Some(Filter::And {
            filters: vec![
                Filter::IsNotNull {
                    column: "guid".into(),
                },
                Filter::IsNull { column: " ".into() },
            ],
        });
        let err = pipeline.validate().unwrap_err();
        assert!(err.to_string().contains("unnamed column"));
    }

    #[test]
    fn empty_pipeline_is_invalid() {
        assert!(PipelineDefinition::from_json(r#"{"tasks": []}"#).is_err());
    }
}
