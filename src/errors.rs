//! Gateway error taxonomy.
//!
//! Every variant maps to a stable error code and HTTP status.  The enum
//! implements [`axum::response::IntoResponse`] so handlers can simply
//! return `Err(GatewayError::NotFound { .. })`.  Backend failures are
//! wrapped and never reach the caller verbatim.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use thiserror::Error;

/// Generate a 16-character hex request ID.
pub fn generate_request_id() -> String {
    let bytes: [u8; 8] = rand::random();
    hex::encode(bytes).to_uppercase()
}

/// Gateway error codes expressed as a Rust enum.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Malformed or out-of-range input. Never retried.
    #[error("{message}")]
    Validation { message: String },

    /// Missing or rejected authorization on a protected operation.
    #[error("{message}")]
    Unauthorized { message: String },

    /// A referenced key, upload ID, or session does not exist.
    #[error("The resource you requested does not exist: {resource}")]
    NotFound { resource: String },

    /// The operation is invalid for the current session or object state.
    #[error("{message}")]
    Conflict { message: String },

    /// The backing object store failed or returned an unexpected condition.
    #[error("The storage backend reported an error, please retry later.")]
    Backend(#[from] anyhow::Error),
}

impl GatewayError {
    /// Return the stable error code string.
    pub fn code(&self) -> &'static str {
        match self {
            GatewayError::Validation { .. } => "ValidationError",
            GatewayError::Unauthorized { .. } => "Unauthorized",
            GatewayError::NotFound { .. } => "NotFound",
            GatewayError::Conflict { .. } => "Conflict",
            GatewayError::Backend(_) => "StorageBackendError",
        }
    }

    /// Return the appropriate HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            GatewayError::Validation { .. } => StatusCode::BAD_REQUEST,
            GatewayError::Unauthorized { .. } => StatusCode::UNAUTHORIZED,
            GatewayError::NotFound { .. } => StatusCode::NOT_FOUND,
            GatewayError::Conflict { .. } => StatusCode::CONFLICT,
            GatewayError::Backend(_) => StatusCode::BAD_GATEWAY,
        }
    }

    /// Shorthand for a validation failure.
    pub fn validation(message: impl Into<String>) -> Self {
        GatewayError::Validation {
            message: message.into(),
        }
    }

    /// Shorthand for a state conflict.
    pub fn conflict(message: impl Into<String>) -> Self {
        GatewayError::Conflict {
            message: message.into(),
        }
    }
}

/// JSON error body returned to callers.
#[derive(Debug, Serialize)]
struct ErrorBody<'a> {
    code: &'a str,
    message: String,
    #[serde(rename = "requestId")]
    request_id: &'a str,
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let request_id = generate_request_id();
        let status = self.status_code();

        // Log backend failures with their cause; the caller only sees the
        // wrapped message.
        if let GatewayError::Backend(ref cause) = self {
            tracing::error!(request_id = %request_id, "storage backend error: {cause:#}");
        }

        let body = serde_json::to_string(&ErrorBody {
            code: self.code(),
            message: self.to_string(),
            request_id: &request_id,
        })
        .unwrap_or_else(|_| r#"{"code":"StorageBackendError","message":"internal error"}"#.into());

        (
            status,
            [
                ("content-type", "application/json".to_string()),
                ("x-request-id", request_id),
            ],
            body,
        )
            .into_response()
    }
}

// -- Tests --------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_id_format() {
        let id = generate_request_id();
        assert_eq!(id.len(), 16);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(id, id.to_uppercase());
    }

    #[test]
    fn test_codes_and_statuses() {
        let cases: Vec<(GatewayError, &str, StatusCode)> = vec![
            (
                GatewayError::validation("bad part number"),
                "ValidationError",
                StatusCode::BAD_REQUEST,
            ),
            (
                GatewayError::Unauthorized {
                    message: "missing authorization header".into(),
                },
                "Unauthorized",
                StatusCode::UNAUTHORIZED,
            ),
            (
                GatewayError::NotFound {
                    resource: "books/42/audio.mp3".into(),
                },
                "NotFound",
                StatusCode::NOT_FOUND,
            ),
            (
                GatewayError::conflict("session is not open"),
                "Conflict",
                StatusCode::CONFLICT,
            ),
            (
                GatewayError::Backend(anyhow::anyhow!("boom")),
                "StorageBackendError",
                StatusCode::BAD_GATEWAY,
            ),
        ];

        for (err, code, status) in cases {
            assert_eq!(err.code(), code);
            assert_eq!(err.status_code(), status);
        }
    }

    #[test]
    fn test_backend_message_is_wrapped() {
        let err = GatewayError::Backend(anyhow::anyhow!("raw sdk dispatch failure"));
        // The caller-facing message must not leak the raw backend error.
        assert!(!err.to_string().contains("sdk"));
    }
}
