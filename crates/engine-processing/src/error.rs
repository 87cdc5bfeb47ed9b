use connectors::error::StoreError;
use model::{core::identifiers::TaskId, pagination::cursor::Cursor};
use thiserror::Error;

/// Failure of a single batch task. Always carries the task and the cursor of
/// the row being worked on so the caller can report where it stopped.
#[derive(Error, Debug)]
pub enum ProcessingError {
    #[error("Task '{task_id}' failed at {cursor}: {source}")]
    Store {
        task_id: TaskId,
        cursor: Cursor,
        #[source]
        source: StoreError,
    },

    #[error("Task '{task_id}' gave up at {cursor} after {attempts} attempts: {source}")]
    RetriesExhausted {
        task_id: TaskId,
        cursor: Cursor,
        attempts: usize,
        #[source]
        source: StoreError,
    },

    #[error("Task '{task_id}' scan moved backwards from {previous} to {next}")]
    CursorRegression {
        task_id: TaskId,
        previous: Cursor,
        next: Cursor,
    },

    #[error("Task '{task_id}' was handed cursor {cursor} for a different key column than '{pk_col}'")]
    ForeignCursor {
        task_id: TaskId,
        cursor: Cursor,
        pk_col: String,
    },
}

impl ProcessingError {
    pub fn task_id(&self) -> &TaskId {
        match self {
            ProcessingError::Store { task_id, .. }
            | ProcessingError::RetriesExhausted { task_id, .. }
            | ProcessingError::CursorRegression { task_id, .. }
            | ProcessingError::ForeignCursor { task_id, .. } => task_id,
        }
    }

    pub fn cursor(&self) -> &Cursor {
        match self {
            ProcessingError::Store { cursor, .. }
            | ProcessingError::RetriesExhausted { cursor, .. }
            | ProcessingError::ForeignCursor { cursor, .. } => cursor,
            ProcessingError::CursorRegression { next, .. } => next,
        }
    }
}

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Pipeline aborted: {0}")]
    TaskFatal(#[source] ProcessingError),

    #[error("Checkpoint references unknown task '{0}'")]
    UnknownTask(TaskId),

    #[error("Pipeline has no tasks")]
    Empty,
}
