//! Error types for emojibot.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Application result type.
pub type AppResult<T> = Result<T, AppError>;

/// Application error type.
#[derive(Debug, Error)]
pub enum AppError {
    // === Ingress Errors ===
    /// Bad, missing or stale request signature. The reason is kept for logs only.
    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    /// Malformed request.
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Input failed validation.
    #[error("Validation error: {0}")]
    Validation(String),

    // === Pipeline Errors ===
    /// A credential required by the requested provider is absent.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Provider quota or rate limit hit.
    #[error("Rate limit exceeded: {0}")]
    RateLimitExceeded(String),

    /// Network or 5xx failure from a provider after model fallback.
    #[error("Transient provider error: {0}")]
    TransientProvider(String),

    /// The artifact was generated but could not be delivered.
    #[error("Sharing failed: {0}")]
    SharingFailed(String),

    /// The queue payload could not be decoded into a job.
    #[error("Corrupted job data: {0}")]
    CorruptedJobData(String),

    // === Plumbing Errors ===
    /// Queue transport failure.
    #[error("Queue error: {0}")]
    Queue(String),

    /// Failure of some other remote service.
    #[error("External service error: {0}")]
    ExternalService(String),

    /// Bug or unexpected state.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Returns the HTTP status code for this error.
    #[must_use]
    pub const fn status_code(&self) -> StatusCode {
        match self {
            // 4xx Client Errors
            Self::AuthenticationFailed(_) => StatusCode::UNAUTHORIZED,
            Self::BadRequest(_) | Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::RateLimitExceeded(_) => StatusCode::TOO_MANY_REQUESTS,

            // 5xx Server Errors
            Self::TransientProvider(_) | Self::Queue(_) | Self::ExternalService(_) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            Self::Configuration(_)
            | Self::SharingFailed(_)
            | Self::CorruptedJobData(_)
            | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Returns the error code for API responses.
    #[must_use]
    pub const fn error_code(&self) -> &'static str {
        match self {
            Self::AuthenticationFailed(_) => "AUTHENTICATION_FAILED",
            Self::BadRequest(_) => "BAD_REQUEST",
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::Configuration(_) => "CONFIG_ERROR",
            Self::RateLimitExceeded(_) => "RATE_LIMIT_EXCEEDED",
            Self::TransientProvider(_) => "TRANSIENT_PROVIDER_ERROR",
            Self::SharingFailed(_) => "SHARING_FAILED",
            Self::CorruptedJobData(_) => "CORRUPTED_JOB_DATA",
            Self::Queue(_) => "QUEUE_ERROR",
            Self::ExternalService(_) => "EXTERNAL_SERVICE_ERROR",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Returns whether this error should be logged at error level.
    #[must_use]
    pub fn is_server_error(&self) -> bool {
        self.status_code().is_server_error()
    }

    /// Whether a queue redelivery could plausibly succeed.
    ///
    /// Configuration and corrupted-payload errors are terminal.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::RateLimitExceeded(_)
                | Self::TransientProvider(_)
                | Self::Queue(_)
                | Self::ExternalService(_)
        )
    }

    /// Message safe to show to the caller.
    ///
    /// Authentication failures never reveal which check failed.
    #[must_use]
    pub fn public_message(&self) -> String {
        match self {
            Self::AuthenticationFailed(_) => "Unauthorized".to_string(),
            Self::Internal(_) => "Internal error".to_string(),
            other => other.to_string(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let code = self.error_code();

        // Log server errors
        if self.is_server_error() {
            tracing::error!(error = %self, code = code, "Server error occurred");
        } else {
            tracing::debug!(error = %self, code = code, "Client error occurred");
        }

        let body = Json(json!({
            "error": {
                "code": code,
                "message": self.public_message(),
            }
        }));

        (status, body).into_response()
    }
}

// === From implementations ===

impl From<validator::ValidationErrors> for AppError {
    fn from(err: validator::ValidationErrors) -> Self {
        Self::Validation(err.to_string())
    }
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        Self::Configuration(err.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        Self::CorruptedJobData(err.to_string())
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        Self::Internal(err.to_string())
    }
}
