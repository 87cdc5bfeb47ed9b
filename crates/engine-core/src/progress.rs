use model::{
    core::identifiers::TaskId, execution::checkpoint::Checkpoint, pagination::cursor::Cursor,
};
use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ProgressStage {
    /// No invocation has run yet.
    Idle,
    /// The last invocation yielded on its time budget.
    Paused,
    /// Between tasks; the next invocation picks up the current task.
    Running,
    Done,
    /// Finished, but at least one task failed along the way.
    DoneWithFailures,
}

impl ProgressStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProgressStage::Idle => "Idle",
            ProgressStage::Paused => "Paused",
            ProgressStage::Running => "Running",
            ProgressStage::Done => "Done",
            ProgressStage::DoneWithFailures => "DoneWithFailures",
        }
    }
}

impl fmt::Display for ProgressStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TaskStatus {
    pub task_id: TaskId,
    pub leftoff: Cursor,
    pub updated_count: u64,
    pub skipped_count: u64,
}

/// Human-facing summary of a checkpoint.
#[derive(Debug, Clone, Serialize)]
pub struct ProgressReport {
    pub stage: ProgressStage,
    pub process_id: String,
    pub target: String,
    pub current_task: Option<TaskId>,
    pub label: Option<String>,
    pub invocations: u64,
    pub diff_detected: bool,
    pub failures: usize,
    pub tasks: Vec<TaskStatus>,
}

impl ProgressReport {
    pub fn from_checkpoint(checkpoint: &Checkpoint) -> Self {
        let stage = if checkpoint.done && !checkpoint.failures.is_empty() {
            ProgressStage::DoneWithFailures
        } else if checkpoint.done {
            ProgressStage::Done
        } else if checkpoint.retry_needed {
            ProgressStage::Paused
        } else if checkpoint.invocations == 0 {
            ProgressStage::Idle
        } else {
            ProgressStage::Running
        };

        let tasks = checkpoint
            .progress
            .iter()
            .map(|(task_id, p)| TaskStatus {
                task_id: task_id.clone(),
                leftoff: p.leftoff.clone(),
                updated_count: p.updated_count,
                skipped_count: p.skipped_count,
            })
            .collect();

        Self {
            stage,
            process_id: checkpoint.process_id.to_string(),
            target: checkpoint.target.to_string(),
            current_task: checkpoint.current_task.clone(),
            label: checkpoint.status_label.clone(),
            invocations: checkpoint.invocations,
            diff_detected: checkpoint.diff_detected,
            failures: checkpoint.failures.len(),
            tasks,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use model::core::identifiers::{ProcessId, TargetId};

    fn checkpoint() -> Checkpoint {
        Checkpoint::new(TargetId::new("site"), ProcessId::new("p"))
    }

    #[test]
    fn fresh_checkpoint_is_idle() {
        let report = ProgressReport::from_checkpoint(&checkpoint());
        assert_eq!(report.stage, ProgressStage::Idle);
        assert!(report.tasks.is_empty());
    }

    #[test]
    fn paused_checkpoint_lists_task_progress() {
        let mut cp = checkpoint();
        cp.invocations = 2;
        cp.retry_needed = true;
        let task = TaskId::new("remap_posts");
        let progress = cp.progress_mut(&task);
        progress.leftoff = Cursor::pk("id", 40);
        progress.updated_count = 60;

        let report = ProgressReport::from_checkpoint(&cp);
        assert_eq!(report.stage, ProgressStage::Paused);
        assert_eq!(report.tasks[0].updated_count, 60);
        assert_eq!(report.tasks[0].leftoff, Cursor::pk("id", 40));
    }

    #[test]
    fn finished_with_failures_is_distinguished() {
        let mut cp = checkpoint();
        cp.record_failure(TaskId::new("t"), Cursor::None, "boom".into());
        cp.finish();
        assert_eq!(
            ProgressReport::from_checkpoint(&cp).stage,
            ProgressStage::DoneWithFailures
        );
    }
}
