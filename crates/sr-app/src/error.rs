use axum::Json;
use axum::extract::multipart::MultipartError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Error from backend: {0}")]
    BackendError(String),

    #[error(transparent)]
    Core(#[from] sr_core::Error),

    #[error("Job {0} not found")]
    InvalidJobId(String),

    #[error("Error reading video: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid form data: {0}")]
    Multipart(#[from] MultipartError),
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Core(err) => match err {
                sr_core::Error::Validation(_) => StatusCode::BAD_REQUEST,
                sr_core::Error::NotFound(_) => StatusCode::NOT_FOUND,
                sr_core::Error::NotReady { .. }
                | sr_core::Error::Terminal(_)
                | sr_core::Error::InvalidTransition { .. } => StatusCode::CONFLICT,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
            Self::InvalidJobId(_) => StatusCode::NOT_FOUND,
            Self::Io(err) if err.kind() == std::io::ErrorKind::NotFound => StatusCode::NOT_FOUND,
            Self::Multipart(err) => err.status(),
            Self::BackendError(_) | Self::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = match &self {
            Self::Core(sr_core::Error::NotReady { status: job_status, .. }) => {
                json!({ "error": self.to_string(), "status": job_status })
            }
            _ => json!({ "error": self.to_string() }),
        };
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use sr_core::{JobId, JobStatus};

    use super::*;

    #[test]
    fn test_status_mapping() {
        let id = JobId::new();
        let cases = [
            (AppError::from(sr_core::Error::Validation("empty".into())), StatusCode::BAD_REQUEST),
            (AppError::from(sr_core::Error::NotFound(id)), StatusCode::NOT_FOUND),
            (
                AppError::from(sr_core::Error::NotReady {
                    id,
                    status: JobStatus::Processing,
                }),
                StatusCode::CONFLICT,
            ),
            (
                AppError::from(sr_core::Error::InvalidTransition {
                    id,
                    from: JobStatus::Queued,
                    to: JobStatus::Completed,
                }),
                StatusCode::CONFLICT,
            ),
            (AppError::from(sr_core::Error::Terminal(id)), StatusCode::CONFLICT),
            (AppError::from(sr_core::Error::Cancelled), StatusCode::INTERNAL_SERVER_ERROR),
            (AppError::InvalidJobId("nope".into()), StatusCode::NOT_FOUND),
        ];
        for (err, expected) in cases {
            assert_eq!(err.into_response().status(), expected);
        }
    }
}
