use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use dispatchd::DispatchError;

use crate::model::ErrorBody;

#[derive(Debug, thiserror::Error)]
pub enum WebError {
    #[error(transparent)]
    Dispatch(#[from] DispatchError),
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("internal error: {message}")]
    Internal { message: String },
}

impl WebError {
    pub fn status(&self) -> StatusCode {
        match self {
            WebError::Dispatch(err) => dispatch_status(err),
            WebError::BadRequest(_) => StatusCode::BAD_REQUEST,
            WebError::Io(_) | WebError::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Stable machine-readable tag for clients.
    pub fn code(&self) -> &'static str {
        match self {
            WebError::Dispatch(err) => match err {
                DispatchError::Validation { .. } => "validation_error",
                DispatchError::JobNotFound { .. } | DispatchError::DriverNotFound { .. } => {
                    "not_found"
                }
                DispatchError::InvalidStatus(_) => "invalid_status",
                DispatchError::InvalidTransition(_) => "invalid_transition",
                DispatchError::NotOpen { .. } => "not_open",
                DispatchError::AlreadyClaimed { .. } => "already_claimed",
                DispatchError::InvalidInput { .. } => "invalid_input",
                DispatchError::Conflict { .. } => "conflict",
                DispatchError::StorageUnavailable(_) => "storage_unavailable",
                DispatchError::Startup(_) => "internal",
            },
            WebError::BadRequest(_) => "bad_request",
            WebError::Io(_) | WebError::Internal { .. } => "internal",
        }
    }
}

fn dispatch_status(err: &DispatchError) -> StatusCode {
    match err {
        DispatchError::Validation { .. }
        | DispatchError::InvalidStatus(_)
        | DispatchError::InvalidTransition(_)
        | DispatchError::InvalidInput { .. } => StatusCode::BAD_REQUEST,
        DispatchError::JobNotFound { .. } | DispatchError::DriverNotFound { .. } => {
            StatusCode::NOT_FOUND
        }
        DispatchError::NotOpen { .. }
        | DispatchError::AlreadyClaimed { .. }
        | DispatchError::Conflict { .. } => StatusCode::CONFLICT,
        DispatchError::StorageUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        DispatchError::Startup(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for WebError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        } else {
            tracing::debug!(error = %self, status = status.as_u16(), "request rejected");
        }
        let body = ErrorBody {
            error: self.to_string(),
            code: self.code().to_string(),
        };
        (status, Json(body)).into_response()
    }
}
