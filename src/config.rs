use std::time::Duration;

/// Default image model used for restyling.
pub const DEFAULT_MODEL: &str = "gemini-2.5-flash-image";

/// Configuration for the restyle pipeline.
///
/// Use [`PipelineConfig::builder()`] for ergonomic construction, or
/// [`PipelineConfig::default()`] for the defaults (2 concurrent requests,
/// 5 attempts, 1.5s base backoff, 512px GIF canvas).
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Image model identifier sent with every request.
    pub model: String,

    /// Maximum simultaneous requests to the generative service.
    pub concurrency: usize,

    /// Maximum attempts per job, including the first one.
    pub max_attempts: u32,

    /// Base delay between a transient failure and its retry.
    pub base_backoff: Duration,

    /// Factor applied to the base delay after a quota rejection.
    pub quota_backoff_multiplier: u32,

    /// Upper bound of the random jitter, as a fraction of the computed delay.
    pub backoff_jitter: f64,

    /// How long a pipeline error stays visible before clearing itself.
    pub error_ttl: Duration,

    /// Side of the square GIF canvas, in pixels.
    pub canvas_size: u32,

    /// Completed jobs required before a batch may be built.
    pub min_batch_jobs: usize,

    /// Display time of each original capture frame.
    pub input_frame_delay: Duration,

    /// Display time of each restyled frame.
    pub output_frame_delay: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            concurrency: 2,
            max_attempts: 5,
            base_backoff: Duration::from_millis(1500),
            quota_backoff_multiplier: 3,
            backoff_jitter: 0.5,
            error_ttl: Duration::from_secs(8),
            canvas_size: 512,
            min_batch_jobs: 1,
            input_frame_delay: Duration::from_millis(330),
            output_frame_delay: Duration::from_millis(1000),
        }
    }
}

impl PipelineConfig {
    /// Start building a config with the builder pattern.
    pub fn builder() -> PipelineConfigBuilder {
        PipelineConfigBuilder::default()
    }
}

/// Builder for [`PipelineConfig`].
#[derive(Default)]
pub struct PipelineConfigBuilder {
    config: PipelineConfig,
}

impl PipelineConfigBuilder {
    /// Set the image model identifier.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.config.model = model.into();
        self
    }

    /// Set the concurrency ceiling. Values below 1 are raised to 1.
    pub fn with_concurrency(mut self, n: usize) -> Self {
        self.config.concurrency = n.max(1);
        self
    }

    /// Set the maximum attempts per job. Values below 1 are raised to 1.
    pub fn with_max_attempts(mut self, n: u32) -> Self {
        self.config.max_attempts = n.max(1);
        self
    }

    /// Set the base backoff interval.
    pub fn with_base_backoff(mut self, delay: Duration) -> Self {
        self.config.base_backoff = delay;
        self
    }

    /// Set the multiplier applied to quota backoffs.
    pub fn with_quota_backoff_multiplier(mut self, factor: u32) -> Self {
        self.config.quota_backoff_multiplier = factor.max(1);
        self
    }

    /// Set the jitter fraction, clamped to `0.0..=1.0`.
    pub fn with_backoff_jitter(mut self, jitter: f64) -> Self {
        self.config.backoff_jitter = jitter.clamp(0.0, 1.0);
        self
    }

    /// Set how long pipeline errors remain visible.
    pub fn with_error_ttl(mut self, ttl: Duration) -> Self {
        self.config.error_ttl = ttl;
        self
    }

    /// Set the GIF canvas side length in pixels.
    pub fn with_canvas_size(mut self, px: u32) -> Self {
        self.config.canvas_size = px.clamp(1, u16::MAX as u32);
        self
    }

    /// Set the minimum completed jobs needed for a batch.
    pub fn with_min_batch_jobs(mut self, n: usize) -> Self {
        self.config.min_batch_jobs = n.max(1);
        self
    }

    /// Set the per-frame display times for original and restyled frames.
    pub fn with_frame_delays(mut self, input: Duration, output: Duration) -> Self {
        self.config.input_frame_delay = input;
        self.config.output_frame_delay = output;
        self
    }

    /// Build the final [`PipelineConfig`].
    pub fn build(self) -> PipelineConfig {
        self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = PipelineConfig::default();
        assert_eq!(config.model, DEFAULT_MODEL);
        assert_eq!(config.concurrency, 2);
        assert_eq!(config.max_attempts, 5);
        assert_eq!(config.base_backoff, Duration::from_millis(1500));
        assert_eq!(config.min_batch_jobs, 1);
        assert_eq!(config.canvas_size, 512);
    }

    #[test]
    fn test_builder_clamps() {
        let config = PipelineConfig::builder()
            .with_concurrency(0)
            .with_max_attempts(0)
            .with_backoff_jitter(4.0)
            .with_canvas_size(100_000)
            .with_min_batch_jobs(0)
            .build();
        assert_eq!(config.concurrency, 1);
        assert_eq!(config.max_attempts, 1);
        assert_eq!(config.backoff_jitter, 1.0);
        assert_eq!(config.canvas_size, u16::MAX as u32);
        assert_eq!(config.min_batch_jobs, 1);
    }
}
