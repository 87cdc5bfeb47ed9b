use crate::{error::MigrationError, migration::MigrationRunner, uploads::UploadService};
use connectors::store::RowStore;
use engine_config::{pipeline::PipelineDefinition, settings::EngineSettings};
use engine_core::{
    chunk_store::ChunkStore,
    clock::{Clock, SystemClock},
    metrics::Metrics,
    state::{StateStore, sled_store::SledStateStore},
    transform_writer::XorKeystream,
};
use engine_processing::{pipeline::TaskPipeline, processor::BatchProcessor};
use engine_transfer::{
    download::{pacer::FixedDelay, server::DownloadServer},
    receiver::ChunkReceiver,
};
use std::sync::Arc;
use tracing::info;

/// Wires settings, persistent state and metrics into the engine's services.
#[derive(Clone)]
pub struct Engine {
    settings: EngineSettings,
    state: Arc<dyn StateStore>,
    clock: Arc<dyn Clock>,
    metrics: Metrics,
}

impl Engine {
    /// Opens the sled state database under the configured state directory.
    pub fn open(settings: EngineSettings) -> Result<Self, MigrationError> {
        settings.validate()?;
        let state = SledStateStore::open(&settings.state_dir)?;
        info!(
            state_dir = %settings.state_dir.display(),
            scratch_dir = %settings.scratch_dir.display(),
            "Engine state opened"
        );
        Ok(Self::with_state(settings, Arc::new(state)))
    }

    pub fn with_state(settings: EngineSettings, state: Arc<dyn StateStore>) -> Self {
        Self {
            settings,
            state,
            clock: Arc::new(SystemClock),
            metrics: Metrics::new(),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    pub fn state(&self) -> &Arc<dyn StateStore> {
        &self.state
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    pub fn uploads(&self) -> UploadService {
        let mut store = ChunkStore::new(&self.settings.scratch_dir);
        if let Some(key) = self
            .settings
            .scratch_key
            .as_ref()
            .and_then(|k| XorKeystream::new(k.as_bytes()))
        {
            store = store.with_transform(Arc::new(key));
        }

        let receiver = ChunkReceiver::new(store, self.state.clone())
            .with_accepted_content_types(self.settings.accepted_content_types.clone())
            .with_metrics(self.metrics.clone());
        UploadService::new(receiver, self.settings.chunk_size)
    }

    pub fn download_server(&self) -> DownloadServer {
        let server = DownloadServer::new(self.settings.download_buffer_size)
            .with_metrics(self.metrics.clone());
        match self.settings.download_chunk_delay {
            Some(delay) => server.with_pacer(Arc::new(FixedDelay(delay))),
            None => server,
        }
    }

    pub fn processor(&self, store: Arc<dyn RowStore>) -> BatchProcessor {
        BatchProcessor::new(store, self.clock.clone())
            .with_page_size(self.settings.scan_page_size)
            .with_retry(self.settings.retry_policy())
            .with_metrics(self.metrics.clone())
    }

    pub fn runner(
        &self,
        definition: &PipelineDefinition,
        store: Arc<dyn RowStore>,
    ) -> Result<MigrationRunner, MigrationError> {
        let pipeline = TaskPipeline::from_definition(definition, self.processor(store))?;
        Ok(MigrationRunner::new(
            pipeline,
            self.state.clone(),
            self.settings.time_budget,
        ))
    }
}
