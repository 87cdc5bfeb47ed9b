use chrono::{DateTime, TimeZone, Utc};
use connectors::memory::MemoryStore;
use engine_config::{
    pipeline::{PipelineDefinition, TaskDefinition, TransformSpec},
    settings::EngineSettings,
};
use engine_core::clock::ManualClock;
use engine_runtime::engine::Engine;
use model::{
    core::{
        identifiers::TaskId,
        value::{FieldValue, Value},
    },
    pagination::cursor::ScanOrder,
    records::row::RowData,
};
use std::{path::PathBuf, sync::Arc, time::Duration};
use tempfile::TempDir;

pub const MIB: usize = 1024 * 1024;

/// Table every batch scenario runs against.
pub const POSTS_TABLE: &str = "posts";

/// Author id every seeded post starts with, and the id it is remapped to.
pub const OLD_AUTHOR: u64 = 1;
pub const NEW_AUTHOR: u64 = 42;

/// Engine opened on a scratch directory that lives as long as the value.
pub struct TestEngine {
    pub dir: TempDir,
    pub engine: Engine,
}

impl TestEngine {
    pub fn open(configure: impl FnOnce(&mut EngineSettings)) -> Self {
        let dir = tempfile::tempdir().expect("create temp dir");
        let mut settings = EngineSettings {
            scratch_dir: dir.path().join("scratch"),
            state_dir: dir.path().join("state"),
            ..EngineSettings::default()
        };
        configure(&mut settings);
        let engine = Engine::open(settings).expect("open engine");
        Self { dir, engine }
    }

    /// Same as [`TestEngine::open`], with a manual clock that moves one
    /// second per reading.
    pub fn with_ticking_clock(configure: impl FnOnce(&mut EngineSettings)) -> Self {
        let TestEngine { dir, engine } = Self::open(configure);
        let engine = engine.with_clock(ticking_clock());
        Self { dir, engine }
    }

    pub fn path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }
}

pub fn epoch() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
}

pub fn ticking_clock() -> Arc<ManualClock> {
    Arc::new(ManualClock::new(epoch()).with_auto_advance(Duration::from_secs(1)))
}

/// Deterministic, non-repeating-per-chunk payload.
pub fn payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| ((i * 31 + i / 4096) % 251) as u8).collect()
}

pub fn blake3_hex(data: &[u8]) -> String {
    blake3::hash(data).to_hex().to_string()
}

/// `posts` table with ids `1..=rows`, every post written by [`OLD_AUTHOR`].
pub async fn seeded_posts(rows: u64) -> Arc<MemoryStore> {
    let store = MemoryStore::new();
    store.create_table(POSTS_TABLE, "id", &[]).await;
    for id in 1..=rows {
        store
            .insert(
                POSTS_TABLE,
                RowData::new(
                    POSTS_TABLE,
                    vec![
                        FieldValue::new("id", Value::Uint(id)),
                        FieldValue::new("author", Value::Uint(OLD_AUTHOR)),
                        FieldValue::new("title", Value::String(format!("post {id}"))),
                    ],
                ),
            )
            .await
            .expect("seed post");
    }
    Arc::new(store)
}

pub fn remap_authors_task(id: &str) -> TaskDefinition {
    TaskDefinition {
        id: TaskId::new(id),
        priority: 10,
        table: POSTS_TABLE.into(),
        pk_col: "id".into(),
        select_columns: vec![],
        progress_label: Some("Remapping post authors".into()),
        order: ScanOrder::Descending,
        filter: None,
        dependency: None,
        forced: false,
        unique_column: None,
        pipeline_fatal: false,
        transform: TransformSpec::Remap {
            column: "author".into(),
            mapping: [(OLD_AUTHOR, NEW_AUTHOR)].into_iter().collect(),
        },
    }
}

pub fn single_task_pipeline(task: TaskDefinition) -> PipelineDefinition {
    PipelineDefinition {
        tasks: vec![task],
        satisfied_dependencies: vec![],
        validation_passed: true,
    }
}

pub async fn authors(store: &MemoryStore) -> Vec<(u64, Value)> {
    store
        .rows(POSTS_TABLE)
        .await
        .into_iter()
        .map(|row| {
            let id = row.get_value("id").as_u64().unwrap_or_default();
            (id, row.get_value("author"))
        })
        .collect()
}
