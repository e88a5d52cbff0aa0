use bytes::Bytes;
use chrono::Utc;
use image::codecs::gif::{GifEncoder, Repeat};
use image::imageops::FilterType;
use image::{Delay, Frame, RgbaImage};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::config::PipelineConfig;
use crate::error::BatchError;
use crate::registry::PhotoRegistry;
use crate::submitter::raise_expiring_error;
use crate::types::{BatchArtifact, CompletedJob};

pub const BATCH_FAILURE_MESSAGE: &str = "Could not build the animation.";

/// NeuQuant speed used when reducing frames to a palette: 1 is best
/// quality, 30 fastest.
const QUANTIZE_SPEED: i32 = 10;

/// Frame geometry and timing for the animated artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncodeSettings {
    pub canvas_size: u32,
    pub input_delay: Duration,
    pub output_delay: Duration,
}

impl EncodeSettings {
    pub fn from_config(config: &PipelineConfig) -> Self {
        Self {
            canvas_size: config.canvas_size.max(1),
            input_delay: config.input_frame_delay,
            output_delay: config.output_frame_delay,
        }
    }
}

/// Assembles completed jobs into one looping GIF: for each job the original
/// capture, then its restyled version.
///
/// Only one build runs at a time; a concurrent call is rejected with
/// [`BatchError::InProgress`] rather than queued.
pub struct BatchEncoder {
    registry: Arc<PhotoRegistry>,
    settings: EncodeSettings,
    min_jobs: usize,
    error_ttl: Duration,
}

impl BatchEncoder {
    pub fn new(registry: Arc<PhotoRegistry>, config: &PipelineConfig) -> Self {
        Self {
            registry,
            settings: EncodeSettings::from_config(config),
            min_jobs: config.min_batch_jobs.max(1),
            error_ttl: config.error_ttl,
        }
    }

    pub fn settings(&self) -> EncodeSettings {
        self.settings
    }

    /// Build a GIF from every completed job, store it as the current
    /// artifact and return it.
    ///
    /// On encode failure the previous artifact stays in place and a
    /// pipeline error is shown.
    pub async fn build_batch(&self) -> Result<Arc<BatchArtifact>, BatchError> {
        // Reject before raising the flag so observers see no change.
        let state = self.registry.read();
        if state.batch_in_progress {
            return Err(BatchError::InProgress);
        }
        if state.completed_count() < self.min_jobs {
            return Err(BatchError::NotEnoughJobs {
                required: self.min_jobs,
                found: state.completed_count(),
            });
        }

        let Some(_guard) = self.registry.try_begin_batch() else {
            return Err(BatchError::InProgress);
        };

        // Jobs may have been deleted since the check above.
        let jobs = self.registry.completed_snapshot();
        if jobs.len() < self.min_jobs {
            return Err(BatchError::NotEnoughJobs {
                required: self.min_jobs,
                found: jobs.len(),
            });
        }

        info!(jobs = jobs.len(), "Building batch animation");

        let settings = self.settings;
        let job_ids: Vec<String> = jobs.iter().map(|j| j.id.clone()).collect();
        let encoded = tokio::task::spawn_blocking(move || encode_gif(&jobs, settings))
            .await
            .map_err(|e| BatchError::Worker(e.to_string()))
            .and_then(|r| r);

        match encoded {
            Ok(bytes) => {
                let artifact = Arc::new(BatchArtifact {
                    id: uuid::Uuid::new_v4().to_string(),
                    frame_count: job_ids.len() * 2,
                    job_ids,
                    bytes: Bytes::from(bytes),
                    created_at: Utc::now(),
                });
                info!(
                    frames = artifact.frame_count,
                    bytes = artifact.bytes.len(),
                    "Batch animation ready"
                );
                self.registry.set_artifact(Arc::clone(&artifact));
                Ok(artifact)
            }
            Err(e) => {
                warn!(error = %e, "Batch animation failed");
                raise_expiring_error(&self.registry, BATCH_FAILURE_MESSAGE, self.error_ttl);
                Err(e)
            }
        }
    }
}

/// Decode, center-crop to a square and scale to `size × size`.
pub fn rasterize(bytes: &[u8], size: u32) -> Result<RgbaImage, image::ImageError> {
    let img = image::load_from_memory(bytes)?;
    let (w, h) = (img.width(), img.height());
    let side = w.min(h);
    let square = img.crop_imm((w - side) / 2, (h - side) / 2, side, side);
    Ok(square.resize_exact(size, size, FilterType::Triangle).to_rgba8())
}

/// Encode the job pairs into an infinitely looping GIF.
///
/// Every frame is quantized to a 256-colour palette by the encoder.
pub fn encode_gif(jobs: &[CompletedJob], settings: EncodeSettings) -> Result<Vec<u8>, BatchError> {
    let mut out = Vec::new();
    {
        let mut encoder = GifEncoder::new_with_speed(&mut out, QUANTIZE_SPEED);
        encoder.set_repeat(Repeat::Infinite).map_err(BatchError::Encode)?;

        for job in jobs {
            for (payload, delay) in [
                (&job.input, settings.input_delay),
                (&job.output, settings.output_delay),
            ] {
                let rgba = rasterize(payload, settings.canvas_size).map_err(|source| {
                    BatchError::Decode {
                        job_id: job.id.clone(),
                        source,
                    }
                })?;
                let frame = Frame::from_parts(rgba, 0, 0, Delay::from_saturating_duration(delay));
                encoder.encode_frame(frame).map_err(BatchError::Encode)?;
            }
        }
        // Dropping the encoder writes the trailer.
    }
    Ok(out)
}
