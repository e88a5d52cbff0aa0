use serde::{Deserialize, Serialize};

use crate::error::FailureKind;

/// Job lifecycle notifications broadcast by the
/// [`JobSubmitter`](crate::submitter::JobSubmitter).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum JobEvent {
    /// A record was created and its generation task spawned.
    #[serde(rename_all = "camelCase")]
    Started { job_id: String, style_key: String },

    /// The restyled image is stored and the record is no longer busy.
    #[serde(rename_all = "camelCase")]
    Completed { job_id: String },

    /// Generation failed for good; the record was removed.
    #[serde(rename_all = "camelCase")]
    Failed {
        job_id: String,
        kind: FailureKindTag,
        message: String,
    },

    /// The job was deleted before its generation finished.
    #[serde(rename_all = "camelCase")]
    Cancelled { job_id: String },

    /// A result arrived for a job that no longer exists and was dropped.
    #[serde(rename_all = "camelCase")]
    Discarded { job_id: String },
}

impl JobEvent {
    pub fn job_id(&self) -> &str {
        match self {
            JobEvent::Started { job_id, .. }
            | JobEvent::Completed { job_id }
            | JobEvent::Failed { job_id, .. }
            | JobEvent::Cancelled { job_id }
            | JobEvent::Discarded { job_id } => job_id,
        }
    }

    /// Whether no further events will follow for this job.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, JobEvent::Started { .. })
    }
}

/// Serializable mirror of [`FailureKind`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FailureKindTag {
    Quota,
    Safety,
    Technical,
}

impl From<FailureKind> for FailureKindTag {
    fn from(kind: FailureKind) -> Self {
        match kind {
            FailureKind::Quota => FailureKindTag::Quota,
            FailureKind::Safety => FailureKindTag::Safety,
            FailureKind::Technical => FailureKindTag::Technical,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_serialization() {
        let event = JobEvent::Failed {
            job_id: "j1".into(),
            kind: FailureKind::Quota.into(),
            message: "busy".into(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "failed");
        assert_eq!(json["jobId"], "j1");
        assert_eq!(json["kind"], "quota");
    }

    #[test]
    fn test_terminal() {
        let started = JobEvent::Started {
            job_id: "j".into(),
            style_key: "s".into(),
        };
        assert!(!started.is_terminal());
        assert_eq!(started.job_id(), "j");
        assert!(JobEvent::Discarded { job_id: "j".into() }.is_terminal());
    }
}
