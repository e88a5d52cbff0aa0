use thiserror::Error;

/// Reason code attached to a rejection from the generative service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectionReason {
    /// Explicit rate or quota signal (HTTP 429, `RESOURCE_EXHAUSTED`).
    Quota,
    /// Content-policy rejection.
    Safety,
    /// Anything else: interrupted generation, timeouts, malformed responses.
    Interrupted,
}

/// A structured rejection returned by an [`ImageService`](crate::service::ImageService).
#[derive(Error, Debug, Clone)]
#[error("{reason:?}: {detail}")]
pub struct ServiceRejection {
    pub reason: RejectionReason,
    pub detail: String,
}

impl ServiceRejection {
    pub fn quota(detail: impl Into<String>) -> Self {
        Self {
            reason: RejectionReason::Quota,
            detail: detail.into(),
        }
    }

    pub fn safety(detail: impl Into<String>) -> Self {
        Self {
            reason: RejectionReason::Safety,
            detail: detail.into(),
        }
    }

    pub fn interrupted(detail: impl Into<String>) -> Self {
        Self {
            reason: RejectionReason::Interrupted,
            detail: detail.into(),
        }
    }
}

/// Terminal failure kinds surfaced to callers of the generation client.
///
/// Quota and safety stay distinguishable; every other cause collapses into
/// `Technical`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    Quota,
    Safety,
    Technical,
}

/// A generation that failed after exhausting its retry policy.
#[derive(Error, Debug, Clone)]
#[error("generation failed after {attempts} attempt(s) ({kind:?}): {detail}")]
pub struct GenerationError {
    pub kind: FailureKind,
    pub attempts: u32,
    pub detail: String,
}

impl GenerationError {
    pub fn kind(&self) -> FailureKind {
        self.kind
    }
}

/// Errors from building the animated batch artifact.
#[derive(Error, Debug)]
pub enum BatchError {
    #[error("A batch encode is already in progress")]
    InProgress,

    #[error("Need at least {required} completed photo(s), found {found}")]
    NotEnoughJobs { required: usize, found: usize },

    #[error("Failed to decode image for job {job_id}: {source}")]
    Decode {
        job_id: String,
        source: image::ImageError,
    },

    #[error("GIF encoding failed: {0}")]
    Encode(#[source] image::ImageError),

    #[error("Encoder task failed: {0}")]
    Worker(String),
}

/// Errors that can occur when driving the pipeline.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Unknown style: {0}")]
    UnknownStyle(String),

    #[error("Custom prompt is empty")]
    EmptyPrompt,

    #[error("Capture is empty")]
    EmptyCapture,

    #[error("Missing API key (set GEMINI_API_KEY or API_KEY)")]
    MissingApiKey,

    #[error(transparent)]
    Generation(#[from] GenerationError),

    #[error(transparent)]
    Batch(#[from] BatchError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

impl From<anyhow::Error> for PipelineError {
    fn from(err: anyhow::Error) -> Self {
        PipelineError::Other(err.to_string())
    }
}

/// Convenience alias.
pub type Result<T> = std::result::Result<T, PipelineError>;
