//! HTTP error mapping, adapted from the teacher's `ormdb-gateway::error::AppError`
//! (`IntoResponse` over a JSON body) but sourcing status codes from
//! `clusterd_core::DaemonError` (spec §7) instead of a gateway-local enum.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use clusterd_core::DaemonError;
use serde::Serialize;

#[derive(Serialize)]
pub struct ErrorBody {
    pub error: bool,
    pub code: String,
    pub message: String,
}

pub struct ApiError(pub DaemonError);

impl From<DaemonError> for ApiError {
    fn from(err: DaemonError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.0.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let body = ErrorBody {
            error: true,
            code: self.0.status_name().to_string(),
            message: self.0.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

/// The distinguishable "invalid host" error from spec §4.8 step 3, kept
/// separate from `Forbidden` so a caller can tell a routing misconfiguration
/// apart from an authentication failure.
#[derive(Debug, thiserror::Error)]
#[error("invalid host header: {0}")]
pub struct InvalidHostError(pub String);

impl IntoResponse for InvalidHostError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: true,
            code: "INVALID_HOST".to_string(),
            message: self.0,
        };
        (StatusCode::BAD_REQUEST, Json(body)).into_response()
    }
}

impl From<InvalidHostError> for ApiError {
    fn from(err: InvalidHostError) -> Self {
        Self(DaemonError::BadRequest(format!("invalid host header: {}", err.0)))
    }
}
