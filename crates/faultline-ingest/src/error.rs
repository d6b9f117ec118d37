//! HTTP error taxonomy for the ingest surface: one `IntoResponse`-implementing
//! variant per distinct failure mode, mapped to its own status code instead
//! of collapsing everything into generic not-found/bad-request/internal.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use faultline_harness::throttle::ThrottleError;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("auth denied: {0}")]
    AuthDenied(String),

    #[error("throttled, retry after {retry_after_secs}s")]
    Throttled { retry_after_secs: u64 },

    #[error("envelope malformed: {0}")]
    EnvelopeMalformed(String),

    #[error("payload too large")]
    PayloadTooLarge,

    #[error("events are not currently being accepted due to maintenance")]
    MaintenanceFreeze,

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<ThrottleError> for ApiError {
    fn from(err: ThrottleError) -> Self {
        match err {
            ThrottleError::InvalidDsn => ApiError::AuthDenied("Invalid DSN".to_string()),
            ThrottleError::Throttled { retry_after_secs } => {
                ApiError::Throttled { retry_after_secs }
            }
            ThrottleError::MaintenanceFreeze => ApiError::MaintenanceFreeze,
        }
    }
}

impl From<tokio_rusqlite::Error> for ApiError {
    fn from(err: tokio_rusqlite::Error) -> Self {
        ApiError::Internal(err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::AuthDenied(msg) => {
                (StatusCode::FORBIDDEN, Json(json!({"detail": msg}))).into_response()
            }
            ApiError::Throttled { retry_after_secs } => (
                StatusCode::TOO_MANY_REQUESTS,
                [("Retry-After", retry_after_secs.to_string())],
                Json(json!({"detail": "Too Many Requests"})),
            )
                .into_response(),
            ApiError::EnvelopeMalformed(msg) => {
                (StatusCode::BAD_REQUEST, Json(json!({"detail": msg}))).into_response()
            }
            ApiError::PayloadTooLarge => (
                StatusCode::PAYLOAD_TOO_LARGE,
                Json(json!({"detail": "Payload too large"})),
            )
                .into_response(),
            ApiError::MaintenanceFreeze => (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({
                    "detail": "Events are not currently being accepted due to maintenance"
                })),
            )
                .into_response(),
            ApiError::Internal(msg) => {
                tracing::error!(error = %msg, "internal ingest error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(json!({"detail": "internal error"})),
                )
                    .into_response()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn throttled_sets_retry_after_header() {
        let resp = ApiError::Throttled {
            retry_after_secs: 42,
        }
        .into_response();
        assert_eq!(resp.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(resp.headers().get("Retry-After").unwrap(), "42");
    }

    #[test]
    fn auth_denied_is_403() {
        let resp = ApiError::AuthDenied("Invalid DSN".into()).into_response();
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    }

    #[test]
    fn maintenance_freeze_is_503() {
        let resp = ApiError::MaintenanceFreeze.into_response();
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[test]
    fn payload_too_large_is_413() {
        let resp = ApiError::PayloadTooLarge.into_response();
        assert_eq!(resp.status(), StatusCode::PAYLOAD_TOO_LARGE);
    }
}
