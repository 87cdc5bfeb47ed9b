use crate::{error::ProcessingError, retry::classify_store_error, task::BatchTask};
use chrono::{DateTime, Utc};
use connectors::{
    error::StoreError,
    store::{RowStore, RowUpdate, ScanBound, ScanRequest, row_key},
};
use engine_core::{
    clock::Clock,
    metrics::Metrics,
    retry::{RetryError, RetryPolicy},
};
use model::{
    core::value::FieldValue, execution::checkpoint::Checkpoint, pagination::cursor::Cursor,
    records::row::RowData,
};
use std::{sync::Arc, time::Duration};
use tracing::{debug, info, warn};

pub const DEFAULT_PAGE_SIZE: usize = 100;

/// Time window of one engine invocation.
#[derive(Debug, Clone, Copy)]
pub struct Invocation {
    pub started_at: DateTime<Utc>,
    pub budget: Duration,
}

impl Invocation {
    pub fn new(started_at: DateTime<Utc>, budget: Duration) -> Self {
        Self { started_at, budget }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    /// Every row was visited and the task's checkpoint keys were cleared.
    Completed,
    /// The budget ran out; the checkpoint holds the key of the next row.
    Paused,
}

#[derive(Debug, Default, Clone, Copy)]
struct Tally {
    visited: u64,
    skipped: u64,
}

/// Walks a task's table in primary key order, rewriting one row at a time
/// until the rows or the time budget run out.
#[derive(Clone)]
pub struct BatchProcessor {
    store: Arc<dyn RowStore>,
    clock: Arc<dyn Clock>,
    page_size: usize,
    retry: RetryPolicy,
    metrics: Metrics,
}

impl BatchProcessor {
    pub fn new(store: Arc<dyn RowStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            clock,
            page_size: DEFAULT_PAGE_SIZE,
            retry: RetryPolicy::for_database(),
            metrics: Metrics::new(),
        }
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_metrics(mut self, metrics: Metrics) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    pub async fn step(
        &self,
        task: &BatchTask,
        checkpoint: &mut Checkpoint,
        invocation: &Invocation,
    ) -> Result<StepOutcome, ProcessingError> {
        let progress = checkpoint.progress(&task.id).cloned().unwrap_or_default();
        let leftoff = progress.leftoff.clone();
        let mut bound = match &leftoff {
            Cursor::None => ScanBound::Start,
            Cursor::Pk { pk_col, id } => {
                if !pk_col.eq_ignore_ascii_case(&task.pk_col) {
                    return Err(ProcessingError::ForeignCursor {
                        task_id: task.id.clone(),
                        cursor: leftoff.clone(),
                        pk_col: task.pk_col.clone(),
                    });
                }
                ScanBound::From(*id)
            }
        };

        checkpoint.current_task = Some(task.id.clone());
        checkpoint.status_label = Some(task.label().to_string());

        let mut tally = Tally {
            visited: progress.updated_count,
            skipped: progress.skipped_count,
        };
        let mut previous: Option<u64> = None;

        info!(
            task_id = %task.id,
            table = %task.table,
            cursor = %leftoff,
            "{}",
            task.label()
        );

        loop {
            let request = self.scan_request(task, bound, self.page_size);
            let page = self.fetch(task, &request, &leftoff).await?;
            debug!(task_id = %task.id, bound = ?bound, rows = page.len(), "Fetched page");

            for (i, row) in page.iter().enumerate() {
                let key = self.key_of(task, row, &leftoff)?;
                self.ensure_advances(task, &request, &leftoff, previous, key)?;
                previous = Some(key);

                if let Err(err) = self.process_row(task, checkpoint, row, key, &mut tally).await {
                    save_progress(checkpoint, task, Cursor::pk(&task.pk_col, key), tally);
                    return Err(err);
                }

                if self.clock.elapsed_since(invocation.started_at) >= invocation.budget {
                    let next = match page.get(i + 1) {
                        Some(next_row) => Some(self.key_of(task, next_row, &leftoff)?),
                        None => self.peek_after(task, key, &leftoff).await?,
                    };

                    return Ok(match next {
                        Some(next_key) => {
                            let cursor = Cursor::pk(&task.pk_col, next_key);
                            info!(
                                task_id = %task.id,
                                cursor = %cursor,
                                updated = tally.visited,
                                "Time budget exhausted, pausing task"
                            );
                            save_progress(checkpoint, task, cursor, tally);
                            checkpoint.retry_needed = true;
                            StepOutcome::Paused
                        }
                        None => self.complete(task, checkpoint, tally),
                    });
                }
            }

            match previous {
                Some(last) if page.len() >= self.page_size => bound = ScanBound::After(last),
                _ => return Ok(self.complete(task, checkpoint, tally)),
            }
        }
    }

    fn scan_request(&self, task: &BatchTask, bound: ScanBound, limit: usize) -> ScanRequest {
        ScanRequest::new(&task.table, &task.pk_col)
            .columns(task.columns.iter().cloned())
            .filter(task.filter.clone())
            .order(task.order)
            .bound(bound)
            .limit(limit)
    }

    async fn fetch(
        &self,
        task: &BatchTask,
        request: &ScanRequest,
        cursor: &Cursor,
    ) -> Result<Vec<RowData>, ProcessingError> {
        self.retry
            .run(
                "fetch_rows",
                || self.store.fetch_rows(request),
                classify_store_error,
                |_| self.metrics.increment_retries(1),
            )
            .await
            .map_err(|e| task_error(task, cursor.clone(), e))
    }

    async fn peek_after(
        &self,
        task: &BatchTask,
        key: u64,
        leftoff: &Cursor,
    ) -> Result<Option<u64>, ProcessingError> {
        let request = self.scan_request(task, ScanBound::After(key), 1);
        let rows = self.fetch(task, &request, &Cursor::pk(&task.pk_col, key)).await?;
        rows.first()
            .map(|row| self.key_of(task, row, leftoff))
            .transpose()
    }

    async fn process_row(
        &self,
        task: &BatchTask,
        checkpoint: &mut Checkpoint,
        row: &RowData,
        key: u64,
        tally: &mut Tally,
    ) -> Result<(), ProcessingError> {
        tally.visited += 1;
        self.metrics.increment_rows(1);

        let Some(assignments) = task.transform.apply(row) else {
            return Ok(());
        };

        match self.write(task, key, assignments).await {
            Ok(affected) => {
                if affected > 0 {
                    checkpoint.diff_detected = true;
                    self.metrics.increment_written(affected);
                }
                Ok(())
            }
            Err(RetryError::Fatal(err)) if task.tolerates(&err) => {
                warn!(
                    task_id = %task.id,
                    key,
                    error = %err,
                    "Skipping row that would violate a unique constraint"
                );
                tally.skipped += 1;
                self.metrics.increment_skipped(1);
                Ok(())
            }
            Err(err) => Err(task_error(task, Cursor::pk(&task.pk_col, key), err)),
        }
    }

    async fn write(
        &self,
        task: &BatchTask,
        key: u64,
        assignments: Vec<FieldValue>,
    ) -> Result<u64, RetryError<StoreError>> {
        let update = RowUpdate {
            table: task.table.clone(),
            pk_col: task.pk_col.clone(),
            key,
            assignments,
        };
        self.retry
            .run(
                "update_row",
                || self.store.update_row(&update),
                classify_store_error,
                |_| self.metrics.increment_retries(1),
            )
            .await
    }

    fn complete(&self, task: &BatchTask, checkpoint: &mut Checkpoint, tally: Tally) -> StepOutcome {
        info!(
            task_id = %task.id,
            updated = tally.visited,
            skipped = tally.skipped,
            "Task completed"
        );
        checkpoint.clear_task(&task.id);
        checkpoint.retry_needed = false;
        StepOutcome::Completed
    }

    fn key_of(&self, task: &BatchTask, row: &RowData, cursor: &Cursor) -> Result<u64, ProcessingError> {
        row_key(row, &task.table, &task.pk_col).map_err(|source| ProcessingError::Store {
            task_id: task.id.clone(),
            cursor: cursor.clone(),
            source,
        })
    }

    fn ensure_advances(
        &self,
        task: &BatchTask,
        request: &ScanRequest,
        leftoff: &Cursor,
        previous: Option<u64>,
        key: u64,
    ) -> Result<(), ProcessingError> {
        let next = Cursor::pk(&task.pk_col, key);
        let (previous, advanced) = match previous {
            Some(prev) => {
                let prev = Cursor::pk(&task.pk_col, prev);
                let advanced = prev.is_advanced_by(&next, task.order);
                (prev, advanced)
            }
            None => (leftoff.clone(), request.admits(key)),
        };

        if advanced {
            Ok(())
        } else {
            Err(ProcessingError::CursorRegression {
                task_id: task.id.clone(),
                previous,
                next,
            })
        }
    }
}

fn save_progress(checkpoint: &mut Checkpoint, task: &BatchTask, leftoff: Cursor, tally: Tally) {
    let progress = checkpoint.progress_mut(&task.id);
    progress.leftoff = leftoff;
    progress.updated_count = tally.visited;
    progress.skipped_count = tally.skipped;
}

fn task_error(task: &BatchTask, cursor: Cursor, err: RetryError<StoreError>) -> ProcessingError {
    match err {
        RetryError::Fatal(source) => ProcessingError::Store {
            task_id: task.id.clone(),
            cursor,
            source,
        },
        RetryError::AttemptsExceeded { error, attempts } => ProcessingError::RetriesExhausted {
            task_id: task.id.clone(),
            cursor,
            attempts,
            source: error,
        },
    }
}
