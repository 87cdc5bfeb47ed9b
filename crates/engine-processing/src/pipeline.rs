use crate::{
    dependency::{DependencyResolver, StaticDependencies},
    error::PipelineError,
    processor::{BatchProcessor, Invocation, StepOutcome},
    task::BatchTask,
};
use engine_config::pipeline::PipelineDefinition;
use model::{core::identifiers::TaskId, execution::checkpoint::Checkpoint};
use std::sync::Arc;
use tracing::{error, info, warn};

/// Result of one pipeline invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineOutcome {
    /// Work remains; call again with the returned checkpoint.
    Yielded,
    /// Every eligible task completed.
    Finished,
}

/// Priority-ordered list of batch tasks driven one invocation at a time.
pub struct TaskPipeline {
    tasks: Vec<BatchTask>,
    processor: BatchProcessor,
    dependencies: Arc<dyn DependencyResolver>,
    validation_passed: bool,
}

impl TaskPipeline {
    /// Orders `tasks` by ascending priority. Ties keep their declared order.
    pub fn new(
        mut tasks: Vec<BatchTask>,
        processor: BatchProcessor,
        dependencies: Arc<dyn DependencyResolver>,
    ) -> Result<Self, PipelineError> {
        if tasks.is_empty() {
            return Err(PipelineError::Empty);
        }
        tasks.sort_by_key(|t| t.priority);

        Ok(Self {
            tasks,
            processor,
            dependencies,
            validation_passed: true,
        })
    }

    pub fn from_definition(
        definition: &PipelineDefinition,
        processor: BatchProcessor,
    ) -> Result<Self, PipelineError> {
        let tasks = definition
            .tasks
            .iter()
            .map(BatchTask::from_definition)
            .collect();
        let dependencies = StaticDependencies::new(definition.satisfied_dependencies.clone());

        Ok(Self::new(tasks, processor, Arc::new(dependencies))?
            .with_validation(definition.validation_passed))
    }

    /// Outcome of the pre-migration validation. When it failed only forced
    /// tasks run.
    pub fn with_validation(mut self, passed: bool) -> Self {
        self.validation_passed = passed;
        self
    }

    pub fn tasks(&self) -> &[BatchTask] {
        &self.tasks
    }

    pub fn processor(&self) -> &BatchProcessor {
        &self.processor
    }

    fn is_eligible(&self, task: &BatchTask) -> bool {
        let dependency_met = task
            .dependency
            .as_ref()
            .is_none_or(|key| self.dependencies.is_satisfied(key));
        dependency_met && (self.validation_passed || task.forced)
    }

    fn next_eligible(&self, after: usize) -> Option<usize> {
        (after + 1..self.tasks.len()).find(|&i| self.is_eligible(&self.tasks[i]))
    }

    /// Rejects checkpoints that mention tasks this pipeline does not declare.
    pub fn validate_checkpoint(&self, checkpoint: &Checkpoint) -> Result<(), PipelineError> {
        let known = |id: &TaskId| self.tasks.iter().any(|t| &t.id == id);
        if let Some(current) = &checkpoint.current_task
            && !known(current)
        {
            return Err(PipelineError::UnknownTask(current.clone()));
        }
        if let Some(unknown) = checkpoint.progress.keys().find(|id| !known(*id)) {
            return Err(PipelineError::UnknownTask(unknown.clone()));
        }
        Ok(())
    }

    /// Runs the pipeline forward within the invocation's budget.
    ///
    /// Starts at the checkpoint's current task (or the first task), skips
    /// tasks whose dependency is unmet, and moves on to the next task after a
    /// completion only while budget remains.
    pub async fn advance(
        &self,
        checkpoint: &mut Checkpoint,
        invocation: &Invocation,
    ) -> Result<PipelineOutcome, PipelineError> {
        if checkpoint.done {
            return Ok(PipelineOutcome::Finished);
        }
        self.validate_checkpoint(checkpoint)?;
        checkpoint.invocations += 1;

        let start = match &checkpoint.current_task {
            Some(id) => self.tasks.iter().position(|t| &t.id == id).unwrap_or(0),
            None => 0,
        };
        let last_processor = (0..self.tasks.len())
            .rev()
            .find(|&i| self.is_eligible(&self.tasks[i]));

        let mut index = start;
        while index < self.tasks.len() {
            let task = &self.tasks[index];

            if !self.is_eligible(task) {
                warn!(
                    task_id = %task.id,
                    dependency = ?task.dependency,
                    forced = task.forced,
                    "Skipping task with unmet preconditions"
                );
                checkpoint.clear_task(&task.id);
                index += 1;
                continue;
            }

            match self.processor.step(task, checkpoint, invocation).await {
                Ok(StepOutcome::Paused) => return Ok(PipelineOutcome::Yielded),
                Ok(StepOutcome::Completed) => {}
                Err(err) if task.pipeline_fatal => {
                    error!(task_id = %task.id, cursor = %err.cursor(), error = %err, "Pipeline-fatal task failed");
                    self.processor.metrics().increment_failures(1);
                    return Err(PipelineError::TaskFatal(err));
                }
                Err(err) => {
                    error!(task_id = %task.id, cursor = %err.cursor(), error = %err, "Task failed");
                    self.processor.metrics().increment_failures(1);
                    checkpoint.record_failure(task.id.clone(), err.cursor().clone(), err.to_string());
                    checkpoint.clear_task(&task.id);
                }
            }

            if Some(index) == last_processor {
                break;
            }
            let Some(next) = self.next_eligible(index) else {
                break;
            };

            let elapsed = self.processor.clock().elapsed_since(invocation.started_at);
            if elapsed >= invocation.budget {
                info!(
                    next_task = %self.tasks[next].id,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "No budget left to start the next task"
                );
                checkpoint.current_task = Some(self.tasks[next].id.clone());
                checkpoint.status_label = Some(self.tasks[next].label().to_string());
                checkpoint.retry_needed = true;
                return Ok(PipelineOutcome::Yielded);
            }
            index = next;
        }

        info!(
            process_id = %checkpoint.process_id,
            target = %checkpoint.target,
            invocations = checkpoint.invocations,
            failures = checkpoint.failures.len(),
            "Pipeline finished"
        );
        checkpoint.finish();
        Ok(PipelineOutcome::Finished)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use connectors::memory::MemoryStore;
    use engine_config::pipeline::{TaskDefinition, TransformSpec};
    use engine_core::clock::{Clock, ManualClock};
    use model::{
        core::{
            identifiers::{DependencyKey, ProcessId, TargetId},
            value::{FieldValue, Value},
        },
        pagination::cursor::ScanOrder,
        records::row::RowData,
    };
    use std::time::Duration;

    fn task(id: &str, priority: i32, table: &str) -> TaskDefinition {
        TaskDefinition {
            id: TaskId::new(id),
            priority,
            table: table.into(),
            pk_col: "id".into(),
            select_columns: vec![],
            progress_label: None,
            order: ScanOrder::Descending,
            filter: None,
            dependency: None,
            forced: false,
            unique_column: None,
            pipeline_fatal: false,
            transform: TransformSpec::Offset {
                column: "n".into(),
                delta: 1,
            },
        }
    }

    async fn store(tables: &[(&str, u64)]) -> Arc<MemoryStore> {
        let store = MemoryStore::new();
        for (table, rows) in tables {
            store.create_table(table, "id", &["n"]).await;
            for id in 1..=*rows {
                store
                    .insert(
                        table,
                        RowData::new(
                            table,
                            vec![
                                FieldValue::new("id", Value::Uint(id)),
                                FieldValue::new("n", Value::Int(id as i64 * 10)),
                            ],
                        ),
                    )
                    .await
                    .unwrap();
            }
        }
        Arc::new(store)
    }

    fn clock() -> Arc<ManualClock> {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        Arc::new(ManualClock::new(start).with_auto_advance(Duration::from_secs(1)))
    }

    fn checkpoint() -> Checkpoint {
        Checkpoint::new(TargetId::new("site-1"), ProcessId::new("p-1"))
    }

    fn pipeline(
        defs: Vec<TaskDefinition>,
        store: Arc<MemoryStore>,
        clock: Arc<ManualClock>,
        satisfied: &[&str],
    ) -> TaskPipeline {
        let definition = PipelineDefinition {
            tasks: defs,
            satisfied_dependencies: satisfied.iter().map(|d| DependencyKey::new(*d)).collect(),
            validation_passed: true,
        };
        TaskPipeline::from_definition(&definition, BatchProcessor::new(store, clock)).unwrap()
    }

    #[tokio::test]
    async fn tasks_run_in_priority_order_with_stable_ties() {
        let store = store(&[("a", 1), ("b", 1), ("c", 1)]).await;
        let clock = clock();
        let pipeline = pipeline(
            vec![task("c", 20, "c"), task("a", 5, "a"), task("b", 20, "b")],
            store,
            clock,
            &[],
        );
        let order: Vec<_> = pipeline.tasks().iter().map(|t| t.id.as_str()).collect();
        assert_eq!(order, vec!["a", "c", "b"]);
    }

    #[tokio::test]
    async fn unmet_dependency_leaves_no_task_keys() {
        let store = store(&[("a", 3), ("b", 3)]).await;
        let clock = clock();
        let mut gated = task("b", 20, "b");
        gated.dependency = Some(DependencyKey::new("woocommerce"));
        let pipeline = pipeline(vec![task("a", 10, "a"), gated], store.clone(), clock.clone(), &[]);

        let mut cp = checkpoint();
        let invocation = Invocation::new(clock.now(), Duration::from_secs(3600));
        let outcome = pipeline.advance(&mut cp, &invocation).await.unwrap();

        assert_eq!(outcome, PipelineOutcome::Finished);
        assert!(cp.done);
        assert!(cp.progress(&TaskId::new("b")).is_none());
        assert!(store.write_log("b").await.is_empty());
        assert_eq!(store.write_log("a").await.len(), 3);
    }

    #[tokio::test]
    async fn yields_between_tasks_when_budget_is_spent() {
        let store = store(&[("a", 3), ("b", 3)]).await;
        let clock = clock();
        let pipeline = pipeline(
            vec![task("a", 10, "a"), task("b", 20, "b")],
            store.clone(),
            clock.clone(),
            &[],
        );

        let mut cp = checkpoint();
        let invocation = Invocation::new(clock.now(), Duration::from_secs(4));
        let outcome = pipeline.advance(&mut cp, &invocation).await.unwrap();

        // Three rows cost three seconds; the between-task check observes the fourth.
        assert_eq!(outcome, PipelineOutcome::Yielded);
        assert_eq!(cp.current_task, Some(TaskId::new("b")));
        assert!(cp.retry_needed);
        assert!(store.write_log("b").await.is_empty());

        let invocation = Invocation::new(clock.now(), Duration::from_secs(4));
        let outcome = pipeline.advance(&mut cp, &invocation).await.unwrap();
        assert_eq!(outcome, PipelineOutcome::Finished);
        assert_eq!(store.write_log("a").await.len(), 3);
        assert_eq!(store.write_log("b").await.len(), 3);
        assert_eq!(cp.invocations, 2);
    }

    #[tokio::test]
    async fn failed_validation_only_runs_forced_tasks() {
        let store = store(&[("a", 2), ("b", 2)]).await;
        let clock = clock();
        let mut forced = task("b", 20, "b");
        forced.forced = true;
        let pipeline = pipeline(vec![task("a", 10, "a"), forced], store.clone(), clock.clone(), &[])
            .with_validation(false);

        let mut cp = checkpoint();
        let invocation = Invocation::new(clock.now(), Duration::from_secs(3600));
        pipeline.advance(&mut cp, &invocation).await.unwrap();

        assert!(store.write_log("a").await.is_empty());
        assert_eq!(store.write_log("b").await.len(), 2);
    }

    #[tokio::test]
    async fn task_failure_is_recorded_and_pipeline_continues() {
        let store = store(&[("b", 2)]).await;
        let clock = clock();
        let pipeline = pipeline(
            vec![task("a", 10, "missing_table"), task("b", 20, "b")],
            store.clone(),
            clock.clone(),
            &[],
        );

        let mut cp = checkpoint();
        let invocation = Invocation::new(clock.now(), Duration::from_secs(3600));
        let outcome = pipeline.advance(&mut cp, &invocation).await.unwrap();

        assert_eq!(outcome, PipelineOutcome::Finished);
        assert_eq!(cp.failures.len(), 1);
        assert_eq!(cp.failures[0].task_id, TaskId::new("a"));
        assert_eq!(store.write_log("b").await.len(), 2);
    }

    #[tokio::test]
    async fn pipeline_fatal_task_aborts_invocation() {
        let store = store(&[("b", 2)]).await;
        let clock = clock();
        let mut fatal = task("a", 10, "missing_table");
        fatal.pipeline_fatal = true;
        let pipeline = pipeline(vec![fatal, task("b", 20, "b")], store.clone(), clock.clone(), &[]);

        let mut cp = checkpoint();
        let invocation = Invocation::new(clock.now(), Duration::from_secs(3600));
        let err = pipeline.advance(&mut cp, &invocation).await.unwrap_err();

        assert!(matches!(err, PipelineError::TaskFatal(_)));
        assert!(!cp.done);
        assert!(store.write_log("b").await.is_empty());
    }

    #[tokio::test]
    async fn checkpoint_with_unknown_task_is_rejected() {
        let store = store(&[("a", 1)]).await;
        let clock = clock();
        let pipeline = pipeline(vec![task("a", 10, "a")], store, clock.clone(), &[]);

        let mut cp = checkpoint();
        cp.current_task = Some(TaskId::new("ghost"));
        let invocation = Invocation::new(clock.now(), Duration::from_secs(1));
        assert!(matches!(
            pipeline.advance(&mut cp, &invocation).await,
            Err(PipelineError::UnknownTask(_))
        ));
    }
}
