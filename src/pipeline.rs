use bytes::Bytes;
use std::sync::Arc;
use tokio::sync::{broadcast, watch};

use crate::batch::BatchEncoder;
use crate::client::GenerationClient;
use crate::config::PipelineConfig;
use crate::error::{BatchError, Result};
use crate::events::JobEvent;
use crate::registry::PhotoRegistry;
use crate::service::ImageService;
use crate::styles::StyleCatalog;
use crate::submitter::JobSubmitter;
use crate::types::{BatchArtifact, JobId, PipelineState};

/// High-level handle wiring the registry, generation client, submitter and
/// batch encoder together.
///
/// # Example
///
/// ```ignore
/// let service = GeminiService::new(GeminiConfig::from_env()?);
/// let pipeline = RestylePipeline::new(service, PipelineConfig::default(), StyleCatalog::default());
///
/// pipeline.set_style("popart")?;
/// let id = pipeline.submit(capture_bytes)?;
///
/// let mut state = pipeline.subscribe();
/// state.wait_for(|s| s.job(&id).map_or(true, |j| !j.busy)).await?;
///
/// let gif = pipeline.build_batch().await?;
/// ```
pub struct RestylePipeline<S> {
    registry: Arc<PhotoRegistry>,
    submitter: JobSubmitter<S>,
    encoder: BatchEncoder,
    config: PipelineConfig,
}

impl<S: ImageService + 'static> RestylePipeline<S> {
    pub fn new(service: S, config: PipelineConfig, catalog: StyleCatalog) -> Self {
        let registry = Arc::new(PhotoRegistry::new(catalog.first_key()));
        let client = Arc::new(GenerationClient::new(service, &config));
        let submitter = JobSubmitter::new(
            Arc::clone(&registry),
            client,
            Arc::new(catalog),
            config.error_ttl,
        );
        let encoder = BatchEncoder::new(Arc::clone(&registry), &config);
        Self {
            registry,
            submitter,
            encoder,
            config,
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<PhotoRegistry> {
        &self.registry
    }

    pub fn submitter(&self) -> &JobSubmitter<S> {
        &self.submitter
    }

    pub fn catalog(&self) -> &StyleCatalog {
        self.submitter.catalog()
    }

    /// See [`JobSubmitter::submit`].
    pub fn submit(&self, capture: Bytes) -> Result<JobId> {
        self.submitter.submit(capture)
    }

    /// See [`JobSubmitter::delete`].
    pub fn delete(&self, id: &str) -> bool {
        self.submitter.delete(id)
    }

    pub fn set_style(&self, key: &str) -> Result<()> {
        self.submitter.set_style(key)
    }

    pub fn set_custom_prompt(&self, prompt: impl Into<String>) {
        self.submitter.set_custom_prompt(prompt)
    }

    pub fn dismiss_error(&self) {
        self.submitter.dismiss_error()
    }

    /// See [`BatchEncoder::build_batch`].
    pub async fn build_batch(&self) -> std::result::Result<Arc<BatchArtifact>, BatchError> {
        self.encoder.build_batch().await
    }

    /// Drop the current batch artifact.
    pub fn clear_artifact(&self) {
        self.registry.clear_artifact()
    }

    pub fn read(&self) -> PipelineState {
        self.registry.read()
    }

    pub fn subscribe(&self) -> watch::Receiver<PipelineState> {
        self.registry.subscribe()
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<JobEvent> {
        self.submitter.subscribe_events()
    }

    /// Original capture of job `id`.
    pub fn input_image(&self, id: &str) -> Option<Bytes> {
        self.registry.input(id)
    }

    /// Restyled image of job `id`, once it has completed.
    pub fn output_image(&self, id: &str) -> Option<Bytes> {
        self.registry.output(id)
    }
}
