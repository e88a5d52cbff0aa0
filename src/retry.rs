use rand::Rng;
use std::time::Duration;

use crate::config::PipelineConfig;
use crate::error::{FailureKind, RejectionReason, ServiceRejection};

/// Classification of a single failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    QuotaExceeded,
    SafetyBlocked,
    TransientTechnical,
}

impl FailureClass {
    pub fn classify(rejection: &ServiceRejection) -> Self {
        match rejection.reason {
            RejectionReason::Quota => FailureClass::QuotaExceeded,
            RejectionReason::Safety => FailureClass::SafetyBlocked,
            RejectionReason::Interrupted => FailureClass::TransientTechnical,
        }
    }

    /// Safety rejections are never re-sent.
    pub fn is_retryable(self) -> bool {
        !matches!(self, FailureClass::SafetyBlocked)
    }

    /// Kind reported once retries are exhausted.
    pub fn terminal_kind(self) -> FailureKind {
        match self {
            FailureClass::QuotaExceeded => FailureKind::Quota,
            FailureClass::SafetyBlocked => FailureKind::Safety,
            FailureClass::TransientTechnical => FailureKind::Technical,
        }
    }
}

/// Linear backoff with jitter; quota failures wait a multiple longer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackoffPolicy {
    pub base: Duration,
    pub quota_multiplier: u32,
    pub jitter: f64,
}

impl BackoffPolicy {
    pub fn from_config(config: &PipelineConfig) -> Self {
        Self {
            base: config.base_backoff,
            quota_multiplier: config.quota_backoff_multiplier,
            jitter: config.backoff_jitter,
        }
    }

    /// Delay before the attempt following failed zero-based `attempt`,
    /// without jitter.
    pub fn base_delay(&self, attempt: u32, class: FailureClass) -> Duration {
        let step = attempt.saturating_add(1);
        let factor = match class {
            FailureClass::QuotaExceeded => self.quota_multiplier.saturating_mul(step),
            _ => step,
        };
        self.base.saturating_mul(factor)
    }

    /// Delay with jitter: `base_delay × (1 + sample × jitter)`, where
    /// `sample` is in `[0, 1)`.
    pub fn delay_with_sample(&self, attempt: u32, class: FailureClass, sample: f64) -> Duration {
        let sample = sample.clamp(0.0, 1.0);
        Duration::try_from_secs_f64(
            self.base_delay(attempt, class).as_secs_f64() * (1.0 + sample * self.jitter),
        )
        .unwrap_or(Duration::MAX)
    }

    /// Delay with a fresh random jitter sample.
    pub fn delay(&self, attempt: u32, class: FailureClass) -> Duration {
        let sample: f64 = rand::rng().random();
        self.delay_with_sample(attempt, class, sample)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> BackoffPolicy {
        BackoffPolicy {
            base: Duration::from_millis(1000),
            quota_multiplier: 3,
            jitter: 0.5,
        }
    }

    #[test]
    fn test_classify() {
        assert_eq!(
            FailureClass::classify(&ServiceRejection::quota("429")),
            FailureClass::QuotaExceeded
        );
        assert_eq!(
            FailureClass::classify(&ServiceRejection::safety("SAFETY")),
            FailureClass::SafetyBlocked
        );
        assert_eq!(
            FailureClass::classify(&ServiceRejection::interrupted("timeout")),
            FailureClass::TransientTechnical
        );
    }

    #[test]
    fn test_retryable() {
        assert!(FailureClass::QuotaExceeded.is_retryable());
        assert!(FailureClass::TransientTechnical.is_retryable());
        assert!(!FailureClass::SafetyBlocked.is_retryable());
    }

    #[test]
    fn test_linear_growth() {
        let p = policy();
        assert_eq!(
            p.base_delay(0, FailureClass::TransientTechnical),
            Duration::from_millis(1000)
        );
        assert_eq!(
            p.base_delay(2, FailureClass::TransientTechnical),
            Duration::from_millis(3000)
        );
    }

    #[test]
    fn test_quota_waits_longer() {
        let p = policy();
        assert_eq!(
            p.base_delay(1, FailureClass::QuotaExceeded),
            Duration::from_millis(6000)
        );
    }

    #[test]
    fn test_jitter_bounds() {
        let p = policy();
        let low = p.delay_with_sample(0, FailureClass::TransientTechnical, 0.0);
        let high = p.delay_with_sample(0, FailureClass::TransientTechnical, 0.999);
        assert_eq!(low, Duration::from_millis(1000));
        assert!(high < Duration::from_millis(1500));

        for _ in 0..50 {
            let d = p.delay(0, FailureClass::TransientTechnical);
            assert!(d >= Duration::from_millis(1000) && d <= Duration::from_millis(1500));
        }
    }

    #[test]
    fn test_huge_base_saturates() {
        let p = BackoffPolicy {
            base: Duration::MAX / 2,
            ..policy()
        };
        assert_eq!(p.base_delay(3, FailureClass::QuotaExceeded), Duration::MAX);
        assert_eq!(
            p.delay_with_sample(0, FailureClass::TransientTechnical, 0.9),
            Duration::MAX
        );
    }
}
