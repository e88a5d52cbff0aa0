//! # restyle-pipeline
//!
//! Async photo restyling pipeline for a generative image service.
//!
//! ## Features
//!
//! - In-memory job registry with watch-based change notification
//! - Concurrency-bounded dispatch (FIFO admission) to the image service
//! - Classified failures (quota, safety, transient) with linear backoff,
//!   jitter and prompt reframing on retries
//! - Cancellation of in-flight jobs on delete; late results are dropped
//! - Animated GIF assembly of original/restyled pairs, one build at a time
//! - Gemini `generateContent` backend over `reqwest`
//!
//! ## Quick Start
//!
//! 1. Create an [`ImageService`] (e.g. [`GeminiService`])
//! 2. Create a [`RestylePipeline`] with a [`PipelineConfig`] and [`StyleCatalog`]
//! 3. Call [`RestylePipeline::submit()`] for each capture
//! 4. Observe progress via [`RestylePipeline::subscribe()`]
//! 5. Call [`RestylePipeline::build_batch()`] to produce a GIF
//!
//! See `demos/` for a complete program.

pub mod batch;
pub mod client;
pub mod config;
pub mod error;
pub mod events;
pub mod gemini;
pub mod pipeline;
pub mod prompt;
pub mod registry;
pub mod retry;
pub mod service;
pub mod styles;
pub mod submitter;
pub mod types;

pub use batch::BatchEncoder;
pub use client::GenerationClient;
pub use config::{PipelineConfig, PipelineConfigBuilder};
pub use error::{
    BatchError, FailureKind, GenerationError, PipelineError, RejectionReason, Result,
    ServiceRejection,
};
pub use events::JobEvent;
pub use gemini::{GeminiConfig, GeminiService};
pub use pipeline::RestylePipeline;
pub use registry::PhotoRegistry;
pub use service::{GenerationRequest, ImageService};
pub use styles::{Style, StyleCatalog, CUSTOM_STYLE};
pub use submitter::JobSubmitter;
pub use types::{
    BatchArtifact, EncodedImage, ErrorNotice, GenerationOutcome, JobId, JobRecord, PipelineState,
};
pub use tokio_util::sync::CancellationToken;
