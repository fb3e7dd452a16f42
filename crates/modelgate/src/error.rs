//! HTTP-facing error envelope.
//!
//! Wraps [`modelgate_kernel::DispatchError`] and implements axum's
//! `IntoResponse`, mapping each kind to the status table in the
//! specification — the same role `mofa-gateway::error::GatewayError` plays
//! over its own local enum.

use axum::{http::StatusCode, response::IntoResponse, response::Response, Json};
use modelgate_kernel::DispatchError;
use serde_json::json;

pub struct ApiError(pub DispatchError);

impl From<DispatchError> for ApiError {
    fn from(e: DispatchError) -> Self {
        ApiError(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            DispatchError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            DispatchError::JobNotFound(_) => StatusCode::NOT_FOUND,
            DispatchError::Overloaded => StatusCode::TOO_MANY_REQUESTS,
            DispatchError::NoBackendAvailable => StatusCode::SERVICE_UNAVAILABLE,
            DispatchError::Timeout => StatusCode::GATEWAY_TIMEOUT,
            DispatchError::UpstreamClient { .. } => StatusCode::BAD_GATEWAY,
            DispatchError::UpstreamServer { .. } => StatusCode::BAD_GATEWAY,
            DispatchError::MalformedResponse { .. } => StatusCode::BAD_GATEWAY,
            DispatchError::Cancelled => StatusCode::from_u16(499).unwrap_or(StatusCode::BAD_REQUEST),
            DispatchError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            DispatchError::Transport(_) => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let body = Json(json!({
            "error": {
                "kind": self.0.kind(),
                "message": self.0.to_string(),
                "details": self.0.details(),
            }
        }));

        (status, body).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
