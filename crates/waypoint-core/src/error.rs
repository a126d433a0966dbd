//! Error types for API boundaries.
//!
//! Uses `thiserror` for structured error types that can be converted to HTTP responses.

use serde::Serialize;

/// Sandbox failure kinds surfaced to callers.
///
/// All of these are non-fatal to the host: they describe what went wrong
/// with a single script evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SandboxErrorKind {
    /// Wall-clock deadline exceeded
    Timeout,
    /// Allocation watermark exceeded
    OutOfMemory,
    /// The script failed to parse
    CompileError,
    /// The script failed during evaluation
    RuntimeError,
    /// Render output exceeded the per-run cap
    OutputTooLarge,
    /// A progress script finished without calling `progress.set`
    MissingProgress,
}

impl SandboxErrorKind {
    /// Stable code string for this kind.
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::Timeout => "SANDBOX_TIMEOUT",
            Self::OutOfMemory => "SANDBOX_OUT_OF_MEMORY",
            Self::CompileError => "SANDBOX_COMPILE_ERROR",
            Self::RuntimeError => "SANDBOX_RUNTIME_ERROR",
            Self::OutputTooLarge => "SANDBOX_OUTPUT_TOO_LARGE",
            Self::MissingProgress => "SANDBOX_MISSING_PROGRESS",
        }
    }
}

impl std::fmt::Display for SandboxErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.code())
    }
}

/// External provider failure kinds (OAuth and plugin sync).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExternalErrorKind {
    /// OAuth callback state did not match or expired
    OAuthInvalidState,
    /// Authorization code could not be exchanged for tokens
    TokenExchangeFailed,
    /// Refresh token flow failed
    RefreshFailed,
    /// Provider returned 5xx or was unreachable (retried by the scheduler)
    ProviderUnavailable,
}

impl ExternalErrorKind {
    /// Stable code string for this kind.
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::OAuthInvalidState => "OAUTH_INVALID_STATE",
            Self::TokenExchangeFailed => "TOKEN_EXCHANGE_FAILED",
            Self::RefreshFailed => "REFRESH_FAILED",
            Self::ProviderUnavailable => "PROVIDER_UNAVAILABLE",
        }
    }
}

impl std::fmt::Display for ExternalErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.code())
    }
}

/// API error types for HTTP responses.
///
/// These are used at API boundaries to provide structured error responses.
/// Internal code should use `anyhow::Result` for error propagation.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Missing or disabled user
    #[error("Authentication required: {0}")]
    Unauthorized(String),

    /// Permission denied (admin-only surface reached by non-admin)
    #[error("Permission denied: {0}")]
    Forbidden(String),

    /// Referenced entity absent
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// Unique-constraint or state violation (e.g. double-start timer)
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Malformed input, bad field values, size limits exceeded
    #[error("Validation failed: {0}")]
    Validation(String),

    /// Sandbox execution beyond the rolling window
    #[error("Rate limit exceeded")]
    RateLimited,

    /// Script evaluation failure
    #[error("Script error ({kind}): {message}")]
    Sandbox {
        /// What class of sandbox failure occurred
        kind: SandboxErrorKind,
        /// Scrubbed, truncated message
        message: String,
    },

    /// External provider failure
    #[error("External provider error ({kind}): {message}")]
    External {
        /// What class of provider failure occurred
        kind: ExternalErrorKind,
        /// User-surfacable message
        message: String,
    },

    /// Internal server error (wraps anyhow errors)
    #[error("Internal server error")]
    Internal(#[from] anyhow::Error),
}

impl ApiError {
    /// Get the error code for this error type.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::Unauthorized(_) => "UNAUTHORIZED",
            Self::Forbidden(_) => "FORBIDDEN",
            Self::NotFound(_) => "NOT_FOUND",
            Self::Conflict(_) => "CONFLICT",
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::RateLimited => "RATE_LIMITED",
            Self::Sandbox { kind, .. } => kind.code(),
            Self::External { kind, .. } => kind.code(),
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Get the HTTP status code for this error type.
    #[must_use]
    pub const fn status_code(&self) -> u16 {
        match self {
            Self::Unauthorized(_) => 401,
            Self::Forbidden(_) => 403,
            Self::NotFound(_) => 404,
            Self::Conflict(_) => 409,
            Self::Validation(_) => 400,
            Self::RateLimited => 429,
            Self::Sandbox { .. } => 422,
            Self::External { .. } => 502,
            Self::Internal(_) => 500,
        }
    }

    /// Shorthand for a sandbox error.
    #[must_use]
    pub fn sandbox(kind: SandboxErrorKind, message: impl Into<String>) -> Self {
        Self::Sandbox {
            kind,
            message: message.into(),
        }
    }

    /// Shorthand for an external provider error.
    #[must_use]
    pub fn external(kind: ExternalErrorKind, message: impl Into<String>) -> Self {
        Self::External {
            kind,
            message: message.into(),
        }
    }
}

/// Standardized error response format for the API.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorResponse {
    /// Human-readable error message
    pub error: String,
    /// Error code for programmatic handling
    pub code: String,
    /// Additional error details (optional)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ErrorResponse {
    /// Create a new error response.
    #[must_use]
    pub fn new(error: impl Into<String>, code: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            code: code.into(),
            details: None,
        }
    }
}

impl From<&ApiError> for ErrorResponse {
    fn from(err: &ApiError) -> Self {
        // Internal errors never leak their cause chain to responses.
        let message = match err {
            ApiError::Internal(_) => "Internal server error".to_string(),
            other => other.to_string(),
        };
        Self::new(message, err.code())
    }
}

// Axum integration: IntoResponse for ApiError
#[cfg(feature = "axum")]
mod axum_impl {
    use super::{ApiError, ErrorResponse};
    use axum::{
        http::StatusCode,
        response::{IntoResponse, Response},
        Json,
    };

    impl IntoResponse for ApiError {
        fn into_response(self) -> Response {
            if let Self::Internal(ref err) = self {
                tracing::error!(error = %err, "Internal error reached the API boundary");
            }

            let status = StatusCode::from_u16(self.status_code())
                .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

            let body = ErrorResponse::from(&self);
            (status, Json(body)).into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_error_codes() {
        assert_eq!(ApiError::NotFound("test".into()).code(), "NOT_FOUND");
        assert_eq!(
            ApiError::Validation("test".into()).code(),
            "VALIDATION_ERROR"
        );
        assert_eq!(ApiError::RateLimited.code(), "RATE_LIMITED");
        assert_eq!(
            ApiError::sandbox(SandboxErrorKind::Timeout, "took too long").code(),
            "SANDBOX_TIMEOUT"
        );
        assert_eq!(
            ApiError::external(ExternalErrorKind::RefreshFailed, "revoked").code(),
            "REFRESH_FAILED"
        );
    }

    #[test]
    fn test_api_error_status_codes() {
        assert_eq!(ApiError::NotFound("test".into()).status_code(), 404);
        assert_eq!(ApiError::Conflict("test".into()).status_code(), 409);
        assert_eq!(ApiError::RateLimited.status_code(), 429);
        assert_eq!(
            ApiError::sandbox(SandboxErrorKind::RuntimeError, "x").status_code(),
            422
        );
        assert_eq!(
            ApiError::external(ExternalErrorKind::ProviderUnavailable, "x").status_code(),
            502
        );
    }

    #[test]
    fn test_internal_error_message_is_opaque() {
        let err = ApiError::Internal(anyhow::anyhow!("secret path /var/db/waypoint.db"));
        let response = ErrorResponse::from(&err);
        assert_eq!(response.error, "Internal server error");
        assert!(!response.error.contains("/var/db"));
    }

    #[test]
    fn test_error_response_serialization() {
        let response = ErrorResponse::new("Task not found", "NOT_FOUND");
        let json = serde_json::to_string(&response).expect("Failed to serialize");
        assert!(json.contains("\"error\":\"Task not found\""));
        assert!(json.contains("\"code\":\"NOT_FOUND\""));
    }
}
