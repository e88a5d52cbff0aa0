use base64::Engine;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Opaque job identifier (UUID v4). Never reused within a process.
pub type JobId = String;

/// One capture-to-restyled-image unit of work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobRecord {
    pub id: JobId,
    /// Catalogue key, or [`CUSTOM_STYLE`](crate::styles::CUSTOM_STYLE).
    pub style_key: String,
    /// `true` while the generation request has not resolved.
    pub busy: bool,
    pub created_at: DateTime<Utc>,
}

impl JobRecord {
    /// Create a busy record with a fresh id.
    pub fn new(style_key: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            style_key: style_key.into(),
            busy: true,
            created_at: Utc::now(),
        }
    }
}

/// The pipeline-level error currently shown to the user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorNotice {
    pub message: String,
    /// Increases with every raised error; used to expire only the notice
    /// that scheduled the expiry.
    pub generation: u64,
}

/// An encoded image with its content type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedImage {
    pub mime_type: String,
    pub data: Bytes,
}

impl EncodedImage {
    pub fn new(mime_type: impl Into<String>, data: impl Into<Bytes>) -> Self {
        Self {
            mime_type: mime_type.into(),
            data: data.into(),
        }
    }

    /// Wrap raw bytes, sniffing the content type from the magic number.
    /// Unrecognised data is tagged as JPEG.
    pub fn sniff(data: Bytes) -> Self {
        let mime_type = image::guess_format(&data)
            .map(|f| f.to_mime_type())
            .unwrap_or("image/jpeg");
        Self::new(mime_type, data)
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Outcome of one logical transformation.
#[derive(Debug, Clone)]
pub enum GenerationOutcome {
    /// The service returned an image.
    Completed(EncodedImage),
    /// The job's cancellation token fired; nothing else happened.
    Cancelled,
}

/// A completed job together with both of its payloads, captured at
/// snapshot time.
#[derive(Debug, Clone)]
pub struct CompletedJob {
    pub id: JobId,
    pub input: Bytes,
    pub output: Bytes,
}

/// The animated GIF assembled from completed job pairs.
#[derive(Debug, Clone)]
pub struct BatchArtifact {
    pub id: String,
    pub bytes: Bytes,
    /// Two frames per job: original, then restyled.
    pub frame_count: usize,
    /// Jobs included, in display order.
    pub job_ids: Vec<JobId>,
    pub created_at: DateTime<Utc>,
}

impl BatchArtifact {
    pub fn mime_type(&self) -> &'static str {
        "image/gif"
    }

    /// A self-contained `data:` URL for the artifact.
    pub fn content_url(&self) -> String {
        format!(
            "data:{};base64,{}",
            self.mime_type(),
            base64::engine::general_purpose::STANDARD.encode(&self.bytes)
        )
    }
}

/// Observable pipeline state. Cloning is cheap apart from the job list;
/// image payloads are deliberately not part of it.
#[derive(Debug, Clone, Default)]
pub struct PipelineState {
    /// Most recent first.
    pub jobs: Vec<JobRecord>,
    pub active_style: String,
    pub custom_prompt: String,
    pub batch_in_progress: bool,
    pub artifact: Option<Arc<BatchArtifact>>,
    pub error: Option<ErrorNotice>,
}

impl PipelineState {
    pub fn job(&self, id: &str) -> Option<&JobRecord> {
        self.jobs.iter().find(|j| j.id == id)
    }

    pub fn completed_count(&self) -> usize {
        self.jobs.iter().filter(|j| !j.busy).count()
    }

    pub fn error_message(&self) -> Option<&str> {
        self.error.as_ref().map(|e| e.message.as_str())
    }
}
