use std::future::Future;

use crate::error::ServiceRejection;
use crate::prompt::Framing;
use crate::types::EncodedImage;

/// Harm categories relaxed on every request.
pub const RELAXED_SAFETY_CATEGORIES: [&str; 4] = [
    "HARM_CATEGORY_HATE_SPEECH",
    "HARM_CATEGORY_SEXUALLY_EXPLICIT",
    "HARM_CATEGORY_DANGEROUS_CONTENT",
    "HARM_CATEGORY_HARASSMENT",
];

/// One request to the generative image service.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub model: String,
    pub framing: Framing,
    pub input: Option<EncodedImage>,
    /// Categories for which the service is asked not to block.
    pub relaxed_safety: Vec<&'static str>,
    /// Fresh per attempt so retries don't replay a deterministic failure.
    pub seed: u32,
    /// Zero-based attempt index, for logging.
    pub attempt: u32,
}

/// The external generative image service.
///
/// `Ok(Some(_))` is an image, `Ok(None)` a response that carried no image
/// data, and `Err(_)` a classified rejection. Transport failures are
/// reported as [`RejectionReason::Interrupted`](crate::error::RejectionReason::Interrupted).
///
/// # Example
///
/// ```ignore
/// use restyle_pipeline::*;
///
/// struct Echo;
///
/// impl ImageService for Echo {
///     async fn generate(
///         &self,
///         request: &GenerationRequest,
///     ) -> Result<Option<EncodedImage>, ServiceRejection> {
///         Ok(request.input.clone())
///     }
/// }
/// ```
pub trait ImageService: Send + Sync {
    fn generate(
        &self,
        request: &GenerationRequest,
    ) -> impl Future<Output = Result<Option<EncodedImage>, ServiceRejection>> + Send;
}
