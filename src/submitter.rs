use bytes::Bytes;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::client::GenerationClient;
use crate::error::{FailureKind, GenerationError, PipelineError, Result};
use crate::events::JobEvent;
use crate::registry::PhotoRegistry;
use crate::service::ImageService;
use crate::styles::StyleCatalog;
use crate::types::{EncodedImage, GenerationOutcome, JobId, JobRecord};

pub const QUOTA_MESSAGE: &str = "The service is overloaded, try again in a minute.";
pub const SAFETY_MESSAGE: &str = "Content blocked by safety filters.";
pub const FAILURE_MESSAGE: &str = "Image generation failed.";

const EVENT_CAPACITY: usize = 64;

/// User-facing text for a terminal generation failure.
pub fn user_message(kind: FailureKind) -> &'static str {
    match kind {
        FailureKind::Quota => QUOTA_MESSAGE,
        FailureKind::Safety => SAFETY_MESSAGE,
        FailureKind::Technical => FAILURE_MESSAGE,
    }
}

/// Show `message` as the pipeline error and clear it after `ttl`, unless a
/// newer error replaced it or it was dismissed first.
pub(crate) fn raise_expiring_error(registry: &Arc<PhotoRegistry>, message: &str, ttl: Duration) {
    let generation = registry.raise_error(message);
    let registry = Arc::clone(registry);
    tokio::spawn(async move {
        tokio::time::sleep(ttl).await;
        registry.clear_error_if(generation);
    });
}

/// A registered job waiting for a concurrency slot.
struct QueuedJob {
    id: JobId,
    instruction: String,
    capture: Bytes,
    cancel: CancellationToken,
}

/// Runs admitted jobs and reduces their outcomes into the registry.
struct JobRunner<S> {
    registry: Arc<PhotoRegistry>,
    client: Arc<GenerationClient<S>>,
    error_ttl: Duration,
    in_flight: Arc<Mutex<HashMap<JobId, CancellationToken>>>,
    events: broadcast::Sender<JobEvent>,
}

impl<S> Clone for JobRunner<S> {
    fn clone(&self) -> Self {
        Self {
            registry: Arc::clone(&self.registry),
            client: Arc::clone(&self.client),
            error_ttl: self.error_ttl,
            in_flight: Arc::clone(&self.in_flight),
            events: self.events.clone(),
        }
    }
}

impl<S: ImageService + 'static> JobRunner<S> {
    fn in_flight(&self) -> MutexGuard<'_, HashMap<JobId, CancellationToken>> {
        self.in_flight.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Admit queued jobs one at a time, in submission order. A job leaves
    /// the queue once it holds a slot (or was cancelled while waiting).
    async fn dispatch(self, mut queue: mpsc::UnboundedReceiver<QueuedJob>) {
        while let Some(job) = queue.recv().await {
            match self.client.acquire_slot(&job.cancel).await {
                Ok(Some(permit)) => {
                    let runner = self.clone();
                    tokio::spawn(async move {
                        let input = EncodedImage::sniff(job.capture);
                        let outcome = runner
                            .client
                            .transform_in_slot(permit, &job.instruction, input, &job.cancel)
                            .await;
                        runner.finish(job.id, outcome);
                    });
                }
                Ok(None) => self.finish(job.id, Ok(GenerationOutcome::Cancelled)),
                Err(err) => self.finish(job.id, Err(err)),
            }
        }
        debug!("Job queue closed");
    }

    fn finish(&self, id: JobId, outcome: std::result::Result<GenerationOutcome, GenerationError>) {
        self.in_flight().remove(&id);

        let event = match outcome {
            Ok(GenerationOutcome::Completed(image)) => {
                if self.registry.resolve_job(&id, image.data) {
                    info!(job_id = %id, "Job completed");
                    JobEvent::Completed { job_id: id }
                } else {
                    debug!(job_id = %id, "Discarding result for deleted job");
                    JobEvent::Discarded { job_id: id }
                }
            }
            Ok(GenerationOutcome::Cancelled) => {
                debug!(job_id = %id, "Job cancelled");
                JobEvent::Cancelled { job_id: id }
            }
            Err(err) => {
                if self.registry.remove(&id) {
                    warn!(job_id = %id, error = %err, "Job failed");
                    let message = user_message(err.kind());
                    raise_expiring_error(&self.registry, message, self.error_ttl);
                    JobEvent::Failed {
                        job_id: id,
                        kind: err.kind().into(),
                        message: message.to_string(),
                    }
                } else {
                    debug!(job_id = %id, error = %err, "Discarding failure for deleted job");
                    JobEvent::Discarded { job_id: id }
                }
            }
        };

        let _ = self.events.send(event);
    }
}

/// Turns captures into jobs and reduces generation results back into the
/// [`PhotoRegistry`].
///
/// `submit` returns as soon as the job is registered and queued. Jobs are
/// admitted to the service in submission order by a single dispatcher
/// task; their outcomes are observed through the registry (or
/// [`subscribe_events`](Self::subscribe_events)).
pub struct JobSubmitter<S> {
    runner: JobRunner<S>,
    catalog: Arc<StyleCatalog>,
    // Started by the first submit, so construction needs no runtime.
    queue: Arc<OnceLock<mpsc::UnboundedSender<QueuedJob>>>,
}

impl<S> Clone for JobSubmitter<S> {
    fn clone(&self) -> Self {
        Self {
            runner: self.runner.clone(),
            catalog: Arc::clone(&self.catalog),
            queue: Arc::clone(&self.queue),
        }
    }
}

impl<S: ImageService + 'static> JobSubmitter<S> {
    pub fn new(
        registry: Arc<PhotoRegistry>,
        client: Arc<GenerationClient<S>>,
        catalog: Arc<StyleCatalog>,
        error_ttl: Duration,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            runner: JobRunner {
                registry,
                client,
                error_ttl,
                in_flight: Arc::new(Mutex::new(HashMap::new())),
                events,
            },
            catalog,
            queue: Arc::new(OnceLock::new()),
        }
    }

    pub fn registry(&self) -> &Arc<PhotoRegistry> {
        &self.runner.registry
    }

    pub fn catalog(&self) -> &StyleCatalog {
        &self.catalog
    }

    /// Receive lifecycle events for every job submitted after this call.
    pub fn subscribe_events(&self) -> broadcast::Receiver<JobEvent> {
        self.runner.events.subscribe()
    }

    /// Number of jobs whose generation has not resolved yet.
    pub fn pending_count(&self) -> usize {
        self.runner.in_flight().len()
    }

    fn queue(&self) -> &mpsc::UnboundedSender<QueuedJob> {
        self.queue.get_or_init(|| {
            let (tx, rx) = mpsc::unbounded_channel();
            tokio::spawn(self.runner.clone().dispatch(rx));
            tx
        })
    }

    /// Register a capture with the current style and queue it for
    /// restyling.
    ///
    /// Fails without touching the registry when the capture is empty, the
    /// selected style is unknown, or the custom prompt is blank. Must be
    /// called from within a tokio runtime.
    pub fn submit(&self, capture: Bytes) -> Result<JobId> {
        if capture.is_empty() {
            return Err(PipelineError::EmptyCapture);
        }

        let registry = &self.runner.registry;
        let state = registry.read();
        let instruction = self
            .catalog
            .instruction(&state.active_style, &state.custom_prompt)?;

        let record = JobRecord::new(state.active_style);
        let id = record.id.clone();
        let style_key = record.style_key.clone();

        registry.put_input(&id, capture.clone());
        registry.append(record);
        registry.clear_error();

        let cancel = CancellationToken::new();
        self.runner.in_flight().insert(id.clone(), cancel.clone());

        info!(job_id = %id, style = %style_key, "Job submitted");
        let _ = self.runner.events.send(JobEvent::Started {
            job_id: id.clone(),
            style_key,
        });

        let job = QueuedJob {
            id: id.clone(),
            instruction,
            capture,
            cancel,
        };
        if let Err(mpsc::error::SendError(job)) = self.queue().send(job) {
            self.runner.finish(
                job.id,
                Err(GenerationError {
                    kind: FailureKind::Technical,
                    attempts: 0,
                    detail: "job queue closed".into(),
                }),
            );
        }

        Ok(id)
    }

    /// Delete a job and its payloads. An unresolved generation is cancelled
    /// and its eventual result is dropped. Unknown ids are ignored.
    pub fn delete(&self, id: &str) -> bool {
        let removed = self.runner.registry.remove(id);
        if let Some(token) = self.runner.in_flight().remove(id) {
            token.cancel();
        }
        if removed {
            info!(job_id = %id, "Job deleted");
        }
        removed
    }

    /// Select the style used by subsequent submissions.
    pub fn set_style(&self, key: &str) -> Result<()> {
        if !self.catalog.contains(key) {
            return Err(PipelineError::UnknownStyle(key.to_string()));
        }
        self.runner.registry.set_style(key);
        Ok(())
    }

    pub fn set_custom_prompt(&self, prompt: impl Into<String>) {
        self.runner.registry.set_custom_prompt(prompt);
    }

    /// Hide the current pipeline error.
    pub fn dismiss_error(&self) {
        self.runner.registry.clear_error();
    }
}
