//! Error responses for the REST API.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use mk_core::ConductorError;
use mk_protocol::ErrorResponse;
use thiserror::Error;

/// Result type for route handlers.
pub type ApiResult<T> = Result<T, ApiError>;

/// Errors a route handler can return.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Conductor(#[from] ConductorError),

    /// The request was well-formed JSON but not acceptable.
    #[error("{0}")]
    BadRequest(String),
}

impl ApiError {
    /// HTTP status for this error.
    ///
    /// - `NodeLocked`: 409 Conflict, the client may retry
    /// - Unknown node or runbook: 404 Not Found
    /// - Invalid state and step validation: 400 Bad Request
    /// - Store and driver failures: 500 Internal Server Error
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Conductor(e) => match e {
                ConductorError::NodeLocked { .. } => StatusCode::CONFLICT,
                ConductorError::NodeNotFound(_) | ConductorError::RunbookNotFound(_) => {
                    StatusCode::NOT_FOUND
                }
                ConductorError::InvalidState { .. }
                | ConductorError::InvalidStep { .. }
                | ConductorError::MissingStepArgs { .. }
                | ConductorError::DuplicateStep(_) => StatusCode::BAD_REQUEST,
                ConductorError::StepFailed { .. }
                | ConductorError::CallbackTimeout(_)
                | ConductorError::Store(_)
                | ConductorError::Driver(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            ApiError::BadRequest(_) => "BadRequest",
            ApiError::Conductor(e) => e.kind(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        } else {
            tracing::debug!(error = %self, %status, "request rejected");
        }

        let body = ErrorResponse {
            error: self.kind().to_string(),
            message: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}
