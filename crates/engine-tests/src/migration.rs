#[cfg(test)]
mod tests {
    use crate::utils::{
        NEW_AUTHOR, POSTS_TABLE, TestEngine, authors, remap_authors_task, seeded_posts,
        single_task_pipeline,
    };
    use connectors::{memory::MemoryStore, store::RowStore};
    use engine_config::pipeline::{PipelineDefinition, TransformSpec};
    use engine_processing::{error::PipelineError, pipeline::PipelineOutcome};
    use engine_runtime::{error::MigrationError, migration::MigrationRunner};
    use model::{
        core::{
            identifiers::{DependencyKey, TargetId, TaskId},
            value::{FieldValue, Value},
        },
        pagination::cursor::{Cursor, ScanOrder},
        records::row::RowData,
    };
    use std::{collections::HashSet, sync::Arc, time::Duration};
    use tokio_util::sync::CancellationToken;
    use tracing_test::traced_test;

    const TASK: &str = "remap_post_authors";

    fn runner_for(
        engine: &TestEngine,
        definition: &PipelineDefinition,
        store: Arc<MemoryStore>,
    ) -> MigrationRunner {
        let store: Arc<dyn RowStore> = store;
        engine.engine.runner(definition, store).unwrap()
    }

    fn budgeted(budget: Duration) -> TestEngine {
        TestEngine::with_ticking_clock(|s| {
            s.time_budget = budget;
            s.scan_page_size = 16;
        })
    }

    // Scenario: 250 rows, a 40 s budget and a clock that moves 1 s per reading.
    // Expected Outcome:
    // - Exactly 7 invocations, each resuming where the previous one paused.
    // - Every row is written once and the final table matches an unbounded run.
    #[traced_test]
    #[tokio::test]
    async fn budgeted_run_resumes_to_the_same_result_as_an_unbounded_run() {
        let engine = budgeted(Duration::from_secs(40));
        let store = seeded_posts(250).await;
        let runner = runner_for(&engine, &single_task_pipeline(remap_authors_task(TASK)), store.clone());
        let target = TargetId::new("site-1");
        let task = TaskId::new(TASK);

        let mut checkpoint = None;
        let mut counts = Vec::new();
        let mut invocations = 0;
        loop {
            let cp = runner.invoke(&target, checkpoint.take()).await.unwrap();
            invocations += 1;
            if cp.done {
                checkpoint = Some(cp);
                break;
            }
            assert!(cp.retry_needed);
            assert_eq!(cp.current_task.as_ref(), Some(&task));
            counts.push(cp.progress(&task).map(|p| p.updated_count).unwrap_or_default());
            checkpoint = Some(cp);
            assert!(invocations < 20, "migration does not converge");
        }

        assert_eq!(invocations, 7);
        assert_eq!(counts, vec![40, 80, 120, 160, 200, 240]);

        let checkpoint = checkpoint.unwrap();
        assert!(checkpoint.progress.is_empty());
        assert!(checkpoint.diff_detected);
        assert_eq!(checkpoint.invocations, 7);

        let writes = store.write_log(POSTS_TABLE).await;
        let distinct: HashSet<u64> = writes.iter().copied().collect();
        assert_eq!(writes.len(), 250);
        assert_eq!(distinct.len(), 250, "a row was written twice");

        let snapshot = engine.engine.metrics().snapshot();
        assert_eq!(snapshot.rows_processed, 250);
        assert_eq!(snapshot.rows_written, 250);

        let unbounded_engine = budgeted(Duration::from_secs(3600));
        let unbounded_store = seeded_posts(250).await;
        let unbounded = runner_for(
            &unbounded_engine,
            &single_task_pipeline(remap_authors_task(TASK)),
            unbounded_store.clone(),
        );
        let cp = unbounded.invoke(&target, None).await.unwrap();
        assert!(cp.done);
        assert_eq!(cp.invocations, 1);

        assert_eq!(authors(&store).await, authors(&unbounded_store).await);
        assert!(
            authors(&store)
                .await
                .iter()
                .all(|(_, author)| *author == Value::Uint(NEW_AUTHOR))
        );
    }

    // Scenario: the same budgeted remap, scanning in ascending key order.
    // Expected Outcome: each invocation resumes on the next unvisited key and every row
    // is written exactly once, lowest key first.
    #[tokio::test]
    async fn ascending_budgeted_run_writes_each_row_once() {
        let engine = budgeted(Duration::from_secs(40));
        let store = seeded_posts(100).await;
        let mut task = remap_authors_task(TASK);
        task.order = ScanOrder::Ascending;
        let runner = runner_for(&engine, &single_task_pipeline(task), store.clone());
        let mut checkpoint = runner.begin(TargetId::new("site-7"));

        let invocations = runner
            .run_until_done(&mut checkpoint, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(invocations, 3);
        assert!(checkpoint.done);
        assert_eq!(store.write_log(POSTS_TABLE).await, (1..=100).collect::<Vec<u64>>());
    }

    // Scenario: a paused migration is continued with a checkpoint from a different process.
    // Expected Outcome: the second process is rejected while the first holds the target,
    // and may start once the first one finishes.
    #[tokio::test]
    async fn second_migration_of_a_target_is_rejected() {
        let engine = budgeted(Duration::from_secs(5));
        let store = seeded_posts(12).await;
        let runner = runner_for(&engine, &single_task_pipeline(remap_authors_task(TASK)), store);
        let target = TargetId::new("site-2");

        let mut first = runner.invoke(&target, None).await.unwrap();
        assert!(first.retry_needed);

        let err = runner.invoke(&target, None).await.unwrap_err();
        match err.error {
            MigrationError::ProcessConflict { holder, .. } => {
                assert_eq!(holder, first.process_id)
            }
            other => panic!("expected a process conflict, got {other:?}"),
        }

        let made = runner
            .run_until_done(&mut first, &CancellationToken::new())
            .await
            .unwrap();
        assert!(made >= 1);
        assert!(first.done);

        let second = runner.invoke(&target, None).await.unwrap();
        assert_ne!(second.process_id, first.process_id);
    }

    // Scenario: a running migration is cancelled between invocations.
    // Expected Outcome: its checkpoint is refused afterwards and the target is free again.
    #[tokio::test]
    async fn cancelled_migration_frees_the_target() {
        let engine = budgeted(Duration::from_secs(5));
        let store = seeded_posts(12).await;
        let runner = runner_for(&engine, &single_task_pipeline(remap_authors_task(TASK)), store);
        let target = TargetId::new("site-3");

        let mut paused = runner.invoke(&target, None).await.unwrap();
        runner
            .cancel_migration(&target, &paused.process_id)
            .await
            .unwrap();

        let err = runner.step(&mut paused).await.unwrap_err();
        assert!(matches!(err, MigrationError::ProcessCancelled(_)));

        let fresh = runner.invoke(&target, None).await.unwrap();
        assert!(fresh.retry_needed || fresh.done);
    }

    // Scenario: the first task depends on a plugin that is not installed.
    // Expected Outcome: the gated task never gets progress keys and its table is untouched;
    // the next task runs normally.
    #[tokio::test]
    async fn unmet_dependency_leaves_no_leftoff() {
        let engine = budgeted(Duration::from_secs(5));
        let store = seeded_posts(20).await;

        let mut gated = remap_authors_task("remap_forum_authors");
        gated.priority = 1;
        gated.dependency = Some(DependencyKey::new("plugin:forum"));
        gated.transform = TransformSpec::SetDefault {
            column: "title".into(),
            value: Value::String("gated".into()),
        };
        let definition = PipelineDefinition {
            tasks: vec![gated, remap_authors_task(TASK)],
            satisfied_dependencies: vec![DependencyKey::new("plugin:gallery")],
            validation_passed: true,
        };
        let runner = runner_for(&engine, &definition, store.clone());
        let target = TargetId::new("site-4");

        let mut checkpoint = runner.invoke(&target, None).await.unwrap();
        loop {
            assert!(checkpoint.progress(&TaskId::new("remap_forum_authors")).is_none());
            if checkpoint.done {
                break;
            }
            assert!(matches!(
                checkpoint.progress(&TaskId::new(TASK)).map(|p| &p.leftoff),
                Some(Cursor::Pk { .. })
            ));
            let outcome = runner.step(&mut checkpoint).await.unwrap();
            if outcome == PipelineOutcome::Finished {
                break;
            }
        }

        for row in store.rows(POSTS_TABLE).await {
            assert_ne!(row.get_value("title"), Value::String("gated".into()));
            assert_eq!(row.get_value("author"), Value::Uint(NEW_AUTHOR));
        }
    }

    // Scenario: the store drops the first two scans.
    // Expected Outcome: the fetch is retried and the task completes.
    #[tokio::test]
    async fn transient_scan_failures_are_retried() {
        let engine = budgeted(Duration::from_secs(3600));
        let store = seeded_posts(5).await;
        store.fail_next_fetches(2);
        let runner = runner_for(&engine, &single_task_pipeline(remap_authors_task(TASK)), store.clone());

        let checkpoint = runner.invoke(&TargetId::new("site-5"), None).await.unwrap();

        assert!(checkpoint.done);
        assert!(checkpoint.failures.is_empty());
        assert_eq!(engine.engine.metrics().snapshot().retry_count, 2);
        assert_eq!(store.write_log(POSTS_TABLE).await.len(), 5);
    }

    // Scenario: a pipeline-fatal remap collides with a unique code on the third row
    // it visits, after two rows were already committed.
    // Expected Outcome:
    // - The failed invocation hands back a checkpoint parked on the failing row.
    // - Resuming with it retries that row only; committed rows are not rewritten.
    // - Without it the target stays held by the failed process until cancelled.
    #[tokio::test]
    async fn fatal_invocation_returns_its_checkpoint() {
        let engine = budgeted(Duration::from_secs(3600));
        let store = MemoryStore::new();
        store.create_table("codes", "id", &["code"]).await;
        for id in 1..=5u64 {
            let row = RowData::new(
                "codes",
                vec![
                    FieldValue::new("id", Value::Uint(id)),
                    FieldValue::new("code", Value::Uint(id)),
                ],
            );
            store.insert("codes", row).await.unwrap();
        }
        let store = Arc::new(store);

        let mut task = remap_authors_task("renumber_codes");
        task.table = "codes".into();
        task.order = ScanOrder::Descending;
        task.pipeline_fatal = true;
        task.transform = TransformSpec::Remap {
            column: "code".into(),
            mapping: [(5, 50), (4, 40), (3, 1)].into_iter().collect(),
        };
        let runner = runner_for(&engine, &single_task_pipeline(task), store.clone());
        let target = TargetId::new("site-6");
        let task_id = TaskId::new("renumber_codes");

        let err = runner.invoke(&target, None).await.unwrap_err();
        assert!(matches!(
            err.error,
            MigrationError::Pipeline(PipelineError::TaskFatal(_))
        ));
        let (checkpoint, _) = err.into_parts();
        assert!(!checkpoint.done);
        assert_eq!(
            checkpoint.progress(&task_id).map(|p| &p.leftoff),
            Some(&Cursor::pk("id", 3))
        );
        assert_eq!(store.write_log("codes").await, vec![5, 4]);

        let conflict = runner.invoke(&target, None).await.unwrap_err();
        assert!(matches!(
            conflict.error,
            MigrationError::ProcessConflict { ref holder, .. } if *holder == checkpoint.process_id
        ));

        let retried = runner
            .invoke(&target, Some(checkpoint))
            .await
            .unwrap_err();
        assert_eq!(store.write_log("codes").await, vec![5, 4]);
        assert_eq!(
            store.row("codes", 5).await.unwrap().get_value("code"),
            Value::Uint(50)
        );

        let process = retried.checkpoint.process_id.clone();
        runner.cancel_migration(&target, &process).await.unwrap();
        assert!(runner.invoke(&target, None).await.is_err_and(|e| matches!(
            e.error,
            MigrationError::Pipeline(PipelineError::TaskFatal(_))
        )));
    }
}
