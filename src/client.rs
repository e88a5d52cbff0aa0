use rand::Rng;
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::PipelineConfig;
use crate::error::{FailureKind, GenerationError};
use crate::prompt::framing_for_attempt;
use crate::retry::{BackoffPolicy, FailureClass};
use crate::service::{GenerationRequest, ImageService, RELAXED_SAFETY_CATEGORIES};
use crate::types::{EncodedImage, GenerationOutcome};

/// Concurrency-bounded dispatcher to an [`ImageService`].
///
/// At most `concurrency` transformations talk to the service at once.
/// Waiting callers are admitted in arrival order, and a caller keeps its
/// slot for its whole retry loop. Failures are classified, retried with
/// backoff and reframed prompts, and surfaced only once the policy gives up.
pub struct GenerationClient<S> {
    service: S,
    slots: Arc<Semaphore>,
    model: String,
    max_attempts: u32,
    backoff: BackoffPolicy,
}

impl<S> std::fmt::Debug for GenerationClient<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GenerationClient")
            .field("model", &self.model)
            .field("available_slots", &self.slots.available_permits())
            .field("max_attempts", &self.max_attempts)
            .field("backoff", &self.backoff)
            .finish()
    }
}

impl<S: ImageService> GenerationClient<S> {
    pub fn new(service: S, config: &PipelineConfig) -> Self {
        Self {
            service,
            slots: Arc::new(Semaphore::new(config.concurrency.max(1))),
            model: config.model.clone(),
            max_attempts: config.max_attempts.max(1),
            backoff: BackoffPolicy::from_config(config),
        }
    }

    pub fn service(&self) -> &S {
        &self.service
    }

    /// Slots not currently held by a transformation.
    pub fn available_slots(&self) -> usize {
        self.slots.available_permits()
    }

    /// Wait for a free slot, in arrival order.
    ///
    /// Returns `Ok(None)` if `cancel` fires while waiting.
    pub async fn acquire_slot(
        &self,
        cancel: &CancellationToken,
    ) -> Result<Option<OwnedSemaphorePermit>, GenerationError> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Ok(None),
            permit = Arc::clone(&self.slots).acquire_owned() => match permit {
                Ok(p) => Ok(Some(p)),
                Err(_) => Err(GenerationError {
                    kind: FailureKind::Technical,
                    attempts: 0,
                    detail: "concurrency limiter closed".into(),
                }),
            },
        }
    }

    /// Restyle `input` according to `instruction`.
    ///
    /// Returns [`GenerationOutcome::Cancelled`] without error as soon as
    /// `cancel` fires at an attempt boundary (while queued for a slot,
    /// before an attempt, or during a backoff wait). In-flight requests are
    /// never interrupted.
    pub async fn transform(
        &self,
        instruction: &str,
        input: EncodedImage,
        cancel: &CancellationToken,
    ) -> Result<GenerationOutcome, GenerationError> {
        match self.acquire_slot(cancel).await? {
            Some(permit) => self.transform_in_slot(permit, instruction, input, cancel).await,
            None => Ok(GenerationOutcome::Cancelled),
        }
    }

    /// Run the retry loop for a caller that already holds a slot. The slot
    /// is released when this returns.
    pub async fn transform_in_slot(
        &self,
        _permit: OwnedSemaphorePermit,
        instruction: &str,
        input: EncodedImage,
        cancel: &CancellationToken,
    ) -> Result<GenerationOutcome, GenerationError> {
        let mut attempt: u32 = 0;
        loop {
            if cancel.is_cancelled() {
                return Ok(GenerationOutcome::Cancelled);
            }

            if attempt > 0 {
                info!(attempt = attempt + 1, max = self.max_attempts, "Retrying generation");
            }

            let request = GenerationRequest {
                model: self.model.clone(),
                framing: framing_for_attempt(attempt, instruction),
                input: Some(input.clone()),
                relaxed_safety: RELAXED_SAFETY_CATEGORIES.to_vec(),
                seed: rand::rng().random_range(0..i32::MAX as u32),
                attempt,
            };

            let (class, detail) = match self.service.generate(&request).await {
                Ok(Some(image)) if !image.is_empty() => {
                    debug!(attempt = attempt + 1, bytes = image.data.len(), "Generation succeeded");
                    return Ok(GenerationOutcome::Completed(image));
                }
                Ok(_) => (
                    FailureClass::TransientTechnical,
                    "Response contained no image data".to_string(),
                ),
                Err(rejection) => (FailureClass::classify(&rejection), rejection.detail),
            };

            // Cancellation during the request wins over its failure.
            if cancel.is_cancelled() {
                return Ok(GenerationOutcome::Cancelled);
            }

            warn!(attempt = attempt + 1, class = ?class, %detail, "Generation attempt failed");

            if !class.is_retryable() || attempt + 1 >= self.max_attempts {
                return Err(GenerationError {
                    kind: class.terminal_kind(),
                    attempts: attempt + 1,
                    detail,
                });
            }

            let delay = self.backoff.delay(attempt, class);
            debug!(?delay, "Backing off before retry");
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Ok(GenerationOutcome::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }

            attempt += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ServiceRejection;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::time::Duration;

    type Reply = Result<Option<EncodedImage>, ServiceRejection>;

    /// Replays scripted replies and records every request.
    struct Scripted {
        replies: Mutex<VecDeque<Reply>>,
        requests: Mutex<Vec<GenerationRequest>>,
    }

    impl Scripted {
        fn new(replies: Vec<Reply>) -> Self {
            Self {
                replies: Mutex::new(replies.into()),
                requests: Mutex::new(Vec::new()),
            }
        }

        fn calls(&self) -> usize {
            self.requests.lock().unwrap().len()
        }
    }

    impl ImageService for Scripted {
        async fn generate(&self, request: &GenerationRequest) -> Reply {
            self.requests.lock().unwrap().push(request.clone());
            self.replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(Some(image())))
        }
    }

    fn image() -> EncodedImage {
        EncodedImage::new("image/png", &b"png"[..])
    }

    fn client(replies: Vec<Reply>, attempts: u32) -> GenerationClient<Scripted> {
        let config = PipelineConfig::builder()
            .with_max_attempts(attempts)
            .with_base_backoff(Duration::from_millis(100))
            .build();
        GenerationClient::new(Scripted::new(replies), &config)
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_first_try() {
        let c = client(vec![], 5);
        let out = c.transform("s", image(), &CancellationToken::new()).await.unwrap();
        assert!(matches!(out, GenerationOutcome::Completed(_)));
        assert_eq!(c.service().calls(), 1);
        assert_eq!(c.available_slots(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_then_success() {
        let c = client(
            vec![
                Err(ServiceRejection::interrupted("IMAGE_OTHER")),
                Ok(None),
                Err(ServiceRejection::interrupted("timeout")),
            ],
            5,
        );
        let out = c.transform("s", image(), &CancellationToken::new()).await.unwrap();
        assert!(matches!(out, GenerationOutcome::Completed(_)));
        assert_eq!(c.service().calls(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_image_is_retried() {
        let c = client(vec![Ok(Some(EncodedImage::new("image/png", Vec::new())))], 2);
        let out = c.transform("s", image(), &CancellationToken::new()).await.unwrap();
        assert!(matches!(out, GenerationOutcome::Completed(_)));
        assert_eq!(c.service().calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_safety_is_not_retried() {
        let c = client(vec![Err(ServiceRejection::safety("SAFETY"))], 5);
        let err = c
            .transform("s", image(), &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), FailureKind::Safety);
        assert_eq!(err.attempts, 1);
        assert_eq!(c.service().calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_quota_exhaustion_is_distinguishable() {
        let replies = (0..3).map(|_| Err(ServiceRejection::quota("429"))).collect();
        let c = client(replies, 3);
        let err = c
            .transform("s", image(), &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), FailureKind::Quota);
        assert_eq!(err.attempts, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_exhaustion_is_technical() {
        let replies = (0..2).map(|_| Ok(None)).collect();
        let c = client(replies, 2);
        let err = c
            .transform("s", image(), &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), FailureKind::Technical);
        assert_eq!(c.service().calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_quota_backs_off_longer() {
        let started = tokio::time::Instant::now();
        let c = client(vec![Err(ServiceRejection::quota("429"))], 2);
        c.transform("s", image(), &CancellationToken::new()).await.unwrap();
        // 100ms base × 3 for quota, plus up to 50% jitter.
        let waited = started.elapsed();
        assert!(waited >= Duration::from_millis(300));
        assert!(waited <= Duration::from_millis(450));
    }

    #[tokio::test(start_paused = true)]
    async fn test_framing_changes_on_later_attempts() {
        let replies = (0..4).map(|_| Ok(None)).collect();
        let c = client(replies, 5);
        c.transform("cartoon", image(), &CancellationToken::new())
            .await
            .unwrap();
        let requests = c.service().requests.lock().unwrap();
        assert_eq!(requests.len(), 5);
        assert_eq!(requests[0].framing.prompt, "cartoon");
        assert_ne!(requests[2].framing.prompt, "cartoon");
        assert!(requests[4].framing.system_instruction.is_none());
        assert!(requests.iter().all(|r| r.relaxed_safety.len() == 4));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_before_start() {
        let c = client(vec![], 5);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let out = c.transform("s", image(), &cancel).await.unwrap();
        assert!(matches!(out, GenerationOutcome::Cancelled));
        assert_eq!(c.service().calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_backoff() {
        let c = Arc::new(client(vec![Err(ServiceRejection::interrupted("x"))], 5));
        let cancel = CancellationToken::new();

        let task = {
            let c = Arc::clone(&c);
            let cancel = cancel.clone();
            tokio::spawn(async move { c.transform("s", image(), &cancel).await })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;
        cancel.cancel();
        let out = task.await.unwrap().unwrap();
        assert!(matches!(out, GenerationOutcome::Cancelled));
        assert_eq!(c.service().calls(), 1);
        assert_eq!(c.available_slots(), 2);
    }
}
