use crate::error::{InvokeError, MigrationError};
use engine_core::{
    clock::Clock,
    progress::ProgressReport,
    state::{StateStore, models::LeaseOutcome},
};
use engine_processing::{
    pipeline::{PipelineOutcome, TaskPipeline},
    processor::Invocation,
};
use model::{
    core::identifiers::{ProcessId, TargetId},
    execution::checkpoint::Checkpoint,
};
use std::{sync::Arc, time::Duration};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Drives one target's migration forward one bounded invocation at a time.
///
/// Guards the target with a process lease so that two processes never scan
/// the same rows concurrently.
pub struct MigrationRunner {
    pipeline: TaskPipeline,
    state: Arc<dyn StateStore>,
    budget: Duration,
}

impl MigrationRunner {
    pub fn new(pipeline: TaskPipeline, state: Arc<dyn StateStore>, budget: Duration) -> Self {
        Self {
            pipeline,
            state,
            budget,
        }
    }

    pub fn pipeline(&self) -> &TaskPipeline {
        &self.pipeline
    }

    fn clock(&self) -> &Arc<dyn Clock> {
        self.pipeline.processor().clock()
    }

    /// Fresh checkpoint for a new migration of `target`.
    pub fn begin(&self, target: TargetId) -> Checkpoint {
        let checkpoint = Checkpoint::new(target, ProcessId::generate());
        info!(
            target = %checkpoint.target,
            process_id = %checkpoint.process_id,
            "Starting migration"
        );
        checkpoint
    }

    /// Continues `checkpoint`, or starts a new migration when none is given.
    ///
    /// The checkpoint is handed back on failure as well; a pipeline-fatal
    /// error leaves its cursor on the failing row.
    pub async fn invoke(
        &self,
        target: &TargetId,
        checkpoint: Option<Checkpoint>,
    ) -> Result<Checkpoint, InvokeError> {
        let mut checkpoint = match checkpoint {
            Some(cp) if &cp.target != target => {
                let found = cp.target.clone();
                let error = MigrationError::TargetMismatch {
                    expected: target.clone(),
                    found,
                };
                return Err(InvokeError::new(cp, error));
            }
            Some(cp) => cp,
            None => self.begin(target.clone()),
        };
        match self.step(&mut checkpoint).await {
            Ok(_) => Ok(checkpoint),
            Err(error) => Err(InvokeError::new(checkpoint, error)),
        }
    }

    /// Runs a single invocation against `checkpoint`.
    pub async fn step(&self, checkpoint: &mut Checkpoint) -> Result<PipelineOutcome, MigrationError> {
        let process = checkpoint.process_id.clone();
        let target = checkpoint.target.clone();

        if self.state.is_process_cancelled(&process).await? {
            return Err(MigrationError::ProcessCancelled(process));
        }
        if checkpoint.done {
            self.state.release_lease(&target, &process).await?;
            return Ok(PipelineOutcome::Finished);
        }

        if let LeaseOutcome::Conflict { holder } = self.state.acquire_lease(&target, &process).await? {
            warn!(
                target = %target,
                process_id = %process,
                holder = %holder,
                "Rejecting invocation for a target held by another process"
            );
            return Err(MigrationError::ProcessConflict { target, holder });
        }

        let invocation = Invocation::new(self.clock().now(), self.budget);
        let outcome = self.pipeline.advance(checkpoint, &invocation).await?;

        if outcome == PipelineOutcome::Finished {
            self.state.release_lease(&target, &process).await?;
            info!(
                target = %target,
                process_id = %process,
                diff_detected = checkpoint.diff_detected,
                "Migration finished"
            );
        }
        Ok(outcome)
    }

    /// Repeats invocations until the migration finishes or `cancel` fires.
    /// Returns the number of invocations made.
    pub async fn run_until_done(
        &self,
        checkpoint: &mut Checkpoint,
        cancel: &CancellationToken,
    ) -> Result<u64, MigrationError> {
        let mut invocations = 0;
        while !checkpoint.done {
            if cancel.is_cancelled() {
                info!(
                    process_id = %checkpoint.process_id,
                    "Stopping between invocations on cancellation"
                );
                break;
            }
            self.step(checkpoint).await?;
            invocations += 1;
        }
        Ok(invocations)
    }

    /// Releases the target and fails every later invocation of `process`.
    pub async fn cancel_migration(
        &self,
        target: &TargetId,
        process: &ProcessId,
    ) -> Result<(), MigrationError> {
        cancel_migration(self.state.as_ref(), target, process).await
    }

    pub fn status(&self, checkpoint: &Checkpoint) -> ProgressReport {
        ProgressReport::from_checkpoint(checkpoint)
    }
}

pub async fn cancel_migration(
    state: &dyn StateStore,
    target: &TargetId,
    process: &ProcessId,
) -> Result<(), MigrationError> {
    let released = state.release_lease(target, process).await?;
    state.cancel_process(process).await?;
    info!(target = %target, process_id = %process, released, "Migration cancelled");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use connectors::memory::MemoryStore;
    use engine_config::pipeline::{PipelineDefinition, TaskDefinition, TransformSpec};
    use engine_core::{clock::ManualClock, state::sled_store::SledStateStore};
    use engine_processing::processor::BatchProcessor;
    use model::{
        core::{
            identifiers::TaskId,
            value::{FieldValue, Value},
        },
        pagination::cursor::ScanOrder,
        records::row::RowData,
    };
    use tempfile::TempDir;
    use tracing_test::traced_test;

    async fn runner(rows: u64, budget: Duration) -> (TempDir, Arc<MemoryStore>, MigrationRunner) {
        let dir = tempfile::tempdir().unwrap();
        let state = Arc::new(SledStateStore::open(dir.path().join("state")).unwrap());

        let store = MemoryStore::new();
        store.create_table("posts", "id", &[]).await;
        for id in 1..=rows {
            store
                .insert(
                    "posts",
                    RowData::new(
                        "posts",
                        vec![
                            FieldValue::new("id", Value::Uint(id)),
                            FieldValue::new("author", Value::Int(1)),
                        ],
                    ),
                )
                .await
                .unwrap();
        }
        let store = Arc::new(store);

        let definition = PipelineDefinition {
            tasks: vec![TaskDefinition {
                id: TaskId::new("remap_authors"),
                priority: 10,
                table: "posts".into(),
                pk_col: "id".into(),
                select_columns: vec![],
                progress_label: None,
                order: ScanOrder::Descending,
                filter: None,
                dependency: None,
                forced: false,
                unique_column: None,
                pipeline_fatal: false,
                transform: TransformSpec::Remap {
                    column: "author".into(),
                    mapping: [(1, 7)].into_iter().collect(),
                },
            }],
            satisfied_dependencies: vec![],
            validation_passed: true,
        };

        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let clock = Arc::new(ManualClock::new(start).with_auto_advance(Duration::from_secs(1)));
        let processor = BatchProcessor::new(store.clone(), clock);
        let pipeline = TaskPipeline::from_definition(&definition, processor).unwrap();

        (dir, store, MigrationRunner::new(pipeline, state, budget))
    }

    #[traced_test]
    #[tokio::test]
    async fn second_process_is_rejected_while_first_is_incomplete() {
        let (_dir, _store, runner) = runner(10, Duration::from_secs(3)).await;
        let target = TargetId::new("site-1");

        let first = runner.invoke(&target, None).await.unwrap();
        assert!(first.retry_needed);

        let err = runner.invoke(&target, None).await.unwrap_err();
        assert!(matches!(
            err.error,
            MigrationError::ProcessConflict { holder, .. } if holder == first.process_id
        ));
        assert!(logs_contain("Rejecting invocation for a target held by another process"));
    }

    #[tokio::test]
    async fn finished_migration_frees_the_target() {
        let (_dir, store, runner) = runner(5, Duration::from_secs(3600)).await;
        let target = TargetId::new("site-1");

        let done = runner.invoke(&target, None).await.unwrap();
        assert!(done.done);
        assert_eq!(store.write_log("posts").await.len(), 5);

        let next = runner.invoke(&target, None).await.unwrap();
        assert_ne!(next.process_id, done.process_id);
    }

    #[tokio::test]
    async fn run_until_done_drives_all_invocations() {
        let (_dir, store, runner) = runner(10, Duration::from_secs(3)).await;
        let mut checkpoint = runner.begin(TargetId::new("site-1"));

        let invocations = runner
            .run_until_done(&mut checkpoint, &CancellationToken::new())
            .await
            .unwrap();

        assert!(checkpoint.done);
        assert_eq!(invocations, 4);
        assert_eq!(store.write_log("posts").await.len(), 10);
        assert_eq!(runner.status(&checkpoint).stage.as_str(), "Done");
    }

    #[tokio::test]
    async fn cancelled_process_fails_closed() {
        let (_dir, _store, runner) = runner(10, Duration::from_secs(3)).await;
        let target = TargetId::new("site-1");

        let checkpoint = runner.invoke(&target, None).await.unwrap();
        runner
            .cancel_migration(&target, &checkpoint.process_id)
            .await
            .unwrap();

        let err = runner.invoke(&target, Some(checkpoint)).await.unwrap_err();
        assert!(matches!(err.error, MigrationError::ProcessCancelled(_)));

        // The target itself is free again for a new process.
        assert!(runner.invoke(&target, None).await.is_ok());
    }

    #[tokio::test]
    async fn checkpoint_of_another_target_is_rejected() {
        let (_dir, _store, runner) = runner(1, Duration::from_secs(3)).await;
        let checkpoint = runner.begin(TargetId::new("site-2"));
        let err = runner
            .invoke(&TargetId::new("site-1"), Some(checkpoint))
            .await
            .unwrap_err();
        assert!(matches!(err.error, MigrationError::TargetMismatch { .. }));
        assert_eq!(err.checkpoint.target, TargetId::new("site-2"));
    }
}
