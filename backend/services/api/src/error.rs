use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use relay_common::error::RelayError;
use relay_sync::OperationResult;
use serde::Serialize;

pub struct ApiError(pub RelayError);

impl From<RelayError> for ApiError {
    fn from(err: RelayError) -> Self {
        Self(err)
    }
}

pub fn status_for(err: &RelayError) -> StatusCode {
    match err {
        RelayError::Unauthorized => StatusCode::FORBIDDEN,
        RelayError::NotFound(_) => StatusCode::NOT_FOUND,
        RelayError::Precondition(_) => StatusCode::CONFLICT,
        RelayError::Validation(_) => StatusCode::BAD_REQUEST,
        RelayError::External(_) => StatusCode::BAD_GATEWAY,
        RelayError::Config(_) | RelayError::Database(_) | RelayError::Internal(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        OperationResponse::<()>(OperationResult::Failure(self.0)).into_response()
    }
}

/// The tagged operation body, with the status code derived from the error.
pub struct OperationResponse<T>(pub OperationResult<T>);

impl<T: Serialize> IntoResponse for OperationResponse<T> {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            OperationResult::Success(_) => StatusCode::OK,
            OperationResult::Failure(err) => status_for(err),
        };
        if status.is_server_error() {
            if let OperationResult::Failure(err) = &self.0 {
                tracing::error!(code = err.code(), error = %err, "request failed");
            }
        }
        (status, Json(self.0)).into_response()
    }
}
