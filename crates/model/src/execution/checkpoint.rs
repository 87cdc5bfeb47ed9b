use crate::{
    core::identifiers::{ProcessId, TargetId, TaskId},
    errors::ModelError,
    pagination::cursor::Cursor,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const CHECKPOINT_FORMAT_VERSION: u16 = 1;

/// Continuation state of one logical migration.
///
/// The caller owns this value and hands it back on every invocation; the
/// engine validates and mutates it but never keeps a copy between calls.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Checkpoint {
    pub format_version: u16,
    pub process_id: ProcessId,
    pub target: TargetId,
    /// Task currently being worked on. Cleared whenever a task completes.
    pub current_task: Option<TaskId>,
    /// Per-task leftoff cursor and counters. A task without an entry has
    /// either never started or already completed.
    #[serde(default)]
    pub progress: BTreeMap<TaskId, TaskProgress>,
    /// Set when the last invocation yielded because its time budget ran out.
    #[serde(default)]
    pub retry_needed: bool,
    /// Set once any task wrote at least one changed row.
    #[serde(default)]
    pub diff_detected: bool,
    #[serde(default)]
    pub done: bool,
    /// Task-scoped failures that did not abort the pipeline.
    #[serde(default)]
    pub failures: Vec<TaskFailure>,
    /// Progress label of the task being worked on, for display.
    #[serde(default)]
    pub status_label: Option<String>,
    #[serde(default)]
    pub invocations: u64,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Default)]
pub struct TaskProgress {
    pub leftoff: Cursor,
    /// Rows visited so far, cumulative across resumptions.
    pub updated_count: u64,
    /// Rows whose write was dropped because of a tolerated unique violation.
    #[serde(default)]
    pub skipped_count: u64,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct TaskFailure {
    pub task_id: TaskId,
    pub cursor: Cursor,
    pub message: String,
}

impl Checkpoint {
    pub fn new(target: TargetId, process_id: ProcessId) -> Self {
        Self {
            format_version: CHECKPOINT_FORMAT_VERSION,
            process_id,
            target,
            current_task: None,
            progress: BTreeMap::new(),
            retry_needed: false,
            diff_detected: false,
            done: false,
            failures: Vec::new(),
            status_label: None,
            invocations: 0,
        }
    }

    pub fn progress(&self, task: &TaskId) -> Option<&TaskProgress> {
        self.progress.get(task)
    }

    pub fn progress_mut(&mut self, task: &TaskId) -> &mut TaskProgress {
        self.progress.entry(task.clone()).or_default()
    }

    /// Strips every key scoped to `task`, returning it to the never-started state.
    pub fn clear_task(&mut self, task: &TaskId) {
        self.progress.remove(task);
        if self.current_task.as_ref() == Some(task) {
            self.current_task = None;
        }
    }

    pub fn record_failure(&mut self, task_id: TaskId, cursor: Cursor, message: String) {
        self.failures.push(TaskFailure {
            task_id,
            cursor,
            message,
        });
    }

    /// Marks the migration as finished and discards all task-scoped state.
    pub fn finish(&mut self) {
        self.progress.clear();
        self.current_task = None;
        self.retry_needed = false;
        self.status_label = None;
        self.done = true;
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, ModelError> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ModelError> {
        let checkpoint: Checkpoint = serde_json::from_slice(bytes)?;
        if checkpoint.format_version != CHECKPOINT_FORMAT_VERSION {
            return Err(ModelError::CheckpointVersion {
                found: checkpoint.format_version,
                expected: CHECKPOINT_FORMAT_VERSION,
            });
        }
        Ok(checkpoint)
    }
}
