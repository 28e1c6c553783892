//! Error types for slicemetrics-svc
//!
//! [`SliceError`] is the engine's error taxonomy; every component error
//! folds into it. [`ApiError`] is what HTTP handlers return.

use crate::models::JobState;
use crate::services::model_stager::ValidationError;
use crate::services::output_parser::ParseError;
use crate::services::profile_resolver::ProfileError;
use crate::services::slicer_process::ProcessError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use std::time::Duration;
use thiserror::Error;

/// Why a slice job did not succeed
#[derive(Debug, Error)]
pub enum SliceError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Profile(#[from] ProfileError),

    #[error("Slicer at capacity ({capacity} running, {queued} queued)")]
    Overloaded { capacity: usize, queued: usize },

    #[error("Slicer failed: {reason}")]
    ProcessFailed {
        exit_code: Option<i32>,
        reason: String,
        stderr_excerpt: String,
    },

    #[error("Slicer did not finish within {}s", .timeout.as_secs())]
    ProcessTimedOut { timeout: Duration },

    #[error("Cannot extract metrics: {0}")]
    Parse(#[from] ParseError),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl SliceError {
    /// Stable category code
    pub fn kind(&self) -> &'static str {
        match self {
            SliceError::Validation(_) => "validation",
            SliceError::Profile(_) => "profile",
            SliceError::Overloaded { .. } => "overloaded",
            SliceError::ProcessFailed { .. } => "process-failed",
            SliceError::ProcessTimedOut { .. } => "process-timed-out",
            SliceError::Parse(_) => "parse",
            SliceError::Internal(_) => "internal",
        }
    }

    /// State the job ends in when this error stops it
    pub fn terminal_state(&self) -> JobState {
        match self {
            SliceError::ProcessTimedOut { .. } => JobState::TimedOut,
            _ => JobState::Failed,
        }
    }

    /// Whether the fault lies with the service or slicer rather than the request
    pub fn is_server_side(&self) -> bool {
        !matches!(self, SliceError::Validation(_) | SliceError::Profile(_) | SliceError::Overloaded { .. })
    }
}

impl From<ProcessError> for SliceError {
    fn from(err: ProcessError) -> Self {
        match err {
            ProcessError::Overloaded { capacity, queued } => SliceError::Overloaded { capacity, queued },
            ProcessError::Failed {
                exit_code,
                reason,
                stderr_excerpt,
            } => SliceError::ProcessFailed {
                exit_code,
                reason,
                stderr_excerpt,
            },
            ProcessError::TimedOut(timeout) => SliceError::ProcessTimedOut { timeout },
            ProcessError::Launch(message) => SliceError::ProcessFailed {
                exit_code: None,
                reason: "launch-failed".to_string(),
                stderr_excerpt: message,
            },
            ProcessError::Workspace(e) => SliceError::Internal(format!("job workspace: {}", e)),
        }
    }
}

/// API error type
#[derive(Debug, Error)]
pub enum ApiError {
    /// Invalid request (400)
    #[error("Invalid request: {0}")]
    BadRequest(String),

    /// Slice job failure, status depends on the category
    #[error(transparent)]
    Slice(#[from] SliceError),

    /// Profile reload failure (500)
    #[error("Profile reload failed: {0}")]
    ProfileReload(#[from] crate::services::profile_store::ProfileLoadError),

    /// Internal server error (500)
    #[error("Internal server error: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Slice(err) => match err {
                SliceError::Validation(ValidationError::PayloadTooLarge { .. }) => StatusCode::PAYLOAD_TOO_LARGE,
                SliceError::Validation(ValidationError::UnsupportedFormat(_)) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
                SliceError::Validation(ValidationError::Io(_)) => StatusCode::BAD_REQUEST,
                SliceError::Validation(ValidationError::EmptyUpload) => StatusCode::BAD_REQUEST,
                SliceError::Profile(_) => StatusCode::NOT_FOUND,
                SliceError::Overloaded { .. } => StatusCode::SERVICE_UNAVAILABLE,
                SliceError::ProcessFailed { .. } => StatusCode::BAD_GATEWAY,
                SliceError::ProcessTimedOut { .. } => StatusCode::GATEWAY_TIMEOUT,
                SliceError::Parse(_) => StatusCode::UNPROCESSABLE_ENTITY,
                SliceError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
            ApiError::ProfileReload(_) | ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn code(&self) -> &'static str {
        match self {
            ApiError::BadRequest(_) => "BAD_REQUEST",
            ApiError::Slice(err) => match err {
                SliceError::Validation(ValidationError::PayloadTooLarge { .. }) => "PAYLOAD_TOO_LARGE",
                SliceError::Validation(ValidationError::UnsupportedFormat(_)) => "UNSUPPORTED_FORMAT",
                SliceError::Validation(_) => "INVALID_UPLOAD",
                SliceError::Profile(_) => "PROFILE_NOT_FOUND",
                SliceError::Overloaded { .. } => "OVERLOADED",
                SliceError::ProcessFailed { .. } => "SLICER_FAILED",
                SliceError::ProcessTimedOut { .. } => "SLICER_TIMEOUT",
                SliceError::Parse(_) => "NO_METRICS",
                SliceError::Internal(_) => "INTERNAL_ERROR",
            },
            ApiError::ProfileReload(_) => "PROFILE_RELOAD_FAILED",
            ApiError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let code = self.code();
        let message = self.to_string();

        let mut error = json!({
            "code": code,
            "message": message,
        });

        match &self {
            ApiError::Slice(SliceError::ProcessFailed {
                exit_code,
                reason,
                stderr_excerpt,
            }) => {
                error["details"] = json!({
                    "exit_code": exit_code,
                    "reason": reason,
                    "stderr_excerpt": stderr_excerpt,
                });
            }
            ApiError::Slice(SliceError::Parse(parse)) => {
                error["details"] = json!({ "reason": parse.reason() });
            }
            _ => {}
        }

        (status, Json(json!({ "error": error }))).into_response()
    }
}

/// Result type for API handlers
pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ProfileKind;

    #[test]
    fn test_status_mapping() {
        let cases: Vec<(SliceError, StatusCode)> = vec![
            (
                ValidationError::PayloadTooLarge { limit: 1 }.into(),
                StatusCode::PAYLOAD_TOO_LARGE,
            ),
            (
                ValidationError::UnsupportedFormat("x".into()).into(),
                StatusCode::UNSUPPORTED_MEDIA_TYPE,
            ),
            (ValidationError::EmptyUpload.into(), StatusCode::BAD_REQUEST),
            (
                ProfileError::ProfileNotFound {
                    kind: ProfileKind::Printer,
                    name: "x".into(),
                }
                .into(),
                StatusCode::NOT_FOUND,
            ),
            (
                SliceError::Overloaded { capacity: 1, queued: 0 },
                StatusCode::SERVICE_UNAVAILABLE,
            ),
            (
                ProcessError::TimedOut(Duration::from_secs(1)).into(),
                StatusCode::GATEWAY_TIMEOUT,
            ),
            (ParseError::NoMetricsFound.into(), StatusCode::UNPROCESSABLE_ENTITY),
            (SliceError::Internal("x".into()), StatusCode::INTERNAL_SERVER_ERROR),
        ];

        for (err, status) in cases {
            assert_eq!(ApiError::from(err).status(), status);
        }
    }

    #[test]
    fn test_terminal_states() {
        assert_eq!(
            SliceError::ProcessTimedOut { timeout: Duration::from_secs(1) }.terminal_state(),
            JobState::TimedOut
        );
        assert_eq!(SliceError::Internal("x".into()).terminal_state(), JobState::Failed);
    }

    #[test]
    fn test_launch_failure_is_process_failure() {
        let err: SliceError = ProcessError::Launch("No such file or directory".into()).into();
        assert_eq!(err.kind(), "process-failed");
        assert!(matches!(ApiError::from(err).status(), StatusCode::BAD_GATEWAY));
    }
}
