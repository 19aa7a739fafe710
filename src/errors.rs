use crate::services::share_service::ShareError;
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use std::fmt;

/// A lightweight wrapper for general errors that keeps the message local.
#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub message: String,
    /// Set for rate-limit denials; rendered as a `Retry-After` header.
    pub retry_after_secs: Option<u64>,
}

impl AppError {
    /// Create a new AppError with a specific status and message.
    pub fn new(status: StatusCode, msg: impl Into<String>) -> Self {
        Self {
            status,
            message: msg.into(),
            retry_after_secs: None,
        }
    }

    /// Shortcut for a 500 Internal Server Error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, msg)
    }

    /// Shortcut for 404 Not Found
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, msg)
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "error": self.message,
            "status": self.status.as_u16()
        }));

        let mut response = (self.status, body).into_response();
        if let Some(secs) = self.retry_after_secs {
            if let Ok(value) = secs.to_string().parse() {
                response.headers_mut().insert("Retry-After", value);
            }
        }
        response
    }
}

impl From<ShareError> for AppError {
    fn from(err: ShareError) -> Self {
        let message = err.to_string();
        match err {
            ShareError::PayloadTooLarge { .. } => {
                Self::new(StatusCode::PAYLOAD_TOO_LARGE, message)
            }
            ShareError::MissingFileName | ShareError::InvalidCode => {
                Self::new(StatusCode::BAD_REQUEST, message)
            }
            ShareError::CodeTaken(_) => Self::new(StatusCode::CONFLICT, message),
            ShareError::AllocationExhausted(_) => {
                Self::new(StatusCode::SERVICE_UNAVAILABLE, message)
            }
            // Absent, expired and deleted records are indistinguishable on
            // purpose; none of them leak existence.
            ShareError::NotFound(_) => Self::not_found("file not found"),
            ShareError::Denied => Self::new(StatusCode::FORBIDDEN, message),
            ShareError::RateLimited { retry_after_secs } => Self {
                status: StatusCode::TOO_MANY_REQUESTS,
                message,
                retry_after_secs: Some(retry_after_secs),
            },
            ShareError::Timeout => Self::new(StatusCode::REQUEST_TIMEOUT, message),
            ShareError::Artifact(_) | ShareError::Sqlx(_) | ShareError::Io(_) => {
                tracing::error!(error = %message, "internal failure");
                Self::internal("internal error")
            }
        }
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::internal(err.to_string())
    }
}
