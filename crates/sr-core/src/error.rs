use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::job::{JobId, JobStatus, Phase};

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    #[error("Invalid request: {0}")]
    Validation(String),

    #[error("{phase} failed: {message}")]
    Collaborator { phase: Phase, message: String },

    #[error("{phase} timed out after {}s", after.as_secs())]
    Timeout { phase: Phase, after: Duration },

    #[error("Assembly failed: {0}")]
    Assembly(String),

    #[error("Job {0} not found")]
    NotFound(JobId),

    #[error("Job {id} is not ready (status: {status})")]
    NotReady { id: JobId, status: JobStatus },

    #[error("Job cancelled")]
    Cancelled,

    #[error("Job {0} already finished")]
    Terminal(JobId),

    #[error("Job {id} cannot move from {from} to {to}")]
    InvalidTransition { id: JobId, from: JobStatus, to: JobStatus },
}

/// Stable cause tag recorded on a failed job.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    Collaborator,
    Timeout,
    Assembly,
    NotFound,
    NotReady,
    Cancelled,
}

impl Error {
    pub fn collaborator(phase: Phase, err: impl std::fmt::Display) -> Self {
        Self::Collaborator {
            phase,
            message: err.to_string(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(_) => ErrorKind::Validation,
            Self::Collaborator { .. } => ErrorKind::Collaborator,
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::Assembly(_) => ErrorKind::Assembly,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::NotReady { .. } | Self::Terminal(_) | Self::InvalidTransition { .. } => {
                ErrorKind::NotReady
            }
            Self::Cancelled => ErrorKind::Cancelled,
        }
    }

    /// Whether another attempt of the same external call may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Collaborator { .. } | Self::Timeout { .. } | Self::Assembly(_)
        )
    }

    /// Pipeline phase the failure belongs to, if any.
    pub fn phase(&self) -> Option<Phase> {
        match self {
            Self::Collaborator { phase, .. } | Self::Timeout { phase, .. } => Some(*phase),
            Self::Assembly(_) => Some(Phase::Assembly),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_tags() {
        let err = Error::collaborator(Phase::Images, "rate limited");
        assert_eq!(err.kind(), ErrorKind::Collaborator);
        assert_eq!(err.phase(), Some(Phase::Images));
        assert_eq!(err.to_string(), "image generation failed: rate limited");
    }

    #[test]
    fn test_retryable() {
        assert!(Error::collaborator(Phase::Speech, "503").is_retryable());
        assert!(
            Error::Timeout {
                phase: Phase::Clips,
                after: Duration::from_secs(300)
            }
            .is_retryable()
        );
        assert!(!Error::Cancelled.is_retryable());
        assert!(!Error::Validation("empty text".into()).is_retryable());
    }

    #[test]
    fn test_invalid_transition_is_a_state_conflict() {
        let err = Error::InvalidTransition {
            id: JobId::new(),
            from: JobStatus::Queued,
            to: JobStatus::Completed,
        };
        assert_eq!(err.kind(), ErrorKind::NotReady);
        assert!(!err.is_retryable());
        assert_eq!(err.phase(), None);
        assert!(err.to_string().ends_with("cannot move from queued to completed"));
    }
}
