//! API error types with IntoResponse
//!
//! Errors are converted to JSON responses with appropriate status codes.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use repowatch_core::ReconcileError;

/// API error type with automatic HTTP status mapping
#[derive(Debug)]
pub enum ApiError {
    /// Missing or wrong cron key (401)
    Unauthorized,

    /// A pass is already running (409)
    Busy { message: String },

    /// Collection or internal failure (500, logged)
    Internal { message: String },
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match &self {
            Self::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                json!({
                    "status": 401,
                    "message": "Unauthorized"
                }),
            ),
            Self::Busy { message } => (
                StatusCode::CONFLICT,
                json!({
                    "status": 409,
                    "message": message
                }),
            ),
            Self::Internal { message } => {
                // Log the actual error, return generic message
                tracing::error!("Internal error: {}", message);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    json!({
                        "status": 500,
                        "message": "API error, contact the administrator"
                    }),
                )
            }
        };

        (status, Json(body)).into_response()
    }
}

impl From<ReconcileError> for ApiError {
    fn from(e: ReconcileError) -> Self {
        match e {
            ReconcileError::ServiceBusy => Self::Busy {
                message: e.to_string(),
            },
            other => Self::Internal {
                message: other.to_string(),
            },
        }
    }
}
