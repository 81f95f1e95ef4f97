//! Error types for web handlers.
//!
//! This module bridges engine errors and HTTP responses, implementing
//! Axum's `IntoResponse`. The mapping follows the engine's taxonomy:
//! unknown or lazily-expired request → 404, missing credential → 401,
//! credential present but scope mismatch → 403, provider unreachable → 503.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use std::fmt;
use veriflow_core::{ProviderError, ScopeDecision, ServiceError, StoreError};

/// Application error type for web handlers.
///
/// Wraps engine errors with an HTTP status, a client-facing message, and a
/// stable error code; internal detail stays in `source` for logging only.
#[derive(Debug)]
pub struct AppError {
    /// HTTP status code
    status: StatusCode,
    /// Error message (user-facing)
    message: String,
    /// Error code (for client error handling)
    code: String,
    /// Internal error (for logging, not exposed to client)
    source: Option<anyhow::Error>,
}

impl AppError {
    /// Create a new application error.
    #[must_use]
    pub const fn new(status: StatusCode, message: String, code: String) -> Self {
        Self {
            status,
            message,
            code,
            source: None,
        }
    }

    /// Attach a source error for logging.
    #[must_use]
    pub fn with_source(mut self, source: anyhow::Error) -> Self {
        self.source = Some(source);
        self
    }

    /// Create a 400 Bad Request error.
    #[must_use]
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(
            StatusCode::BAD_REQUEST,
            message.into(),
            "BAD_REQUEST".to_string(),
        )
    }

    /// Create a 401 Unauthorized error.
    #[must_use]
    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(
            StatusCode::UNAUTHORIZED,
            message.into(),
            "UNAUTHORIZED".to_string(),
        )
    }

    /// Create a 403 Forbidden error.
    #[must_use]
    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(
            StatusCode::FORBIDDEN,
            message.into(),
            "FORBIDDEN".to_string(),
        )
    }

    /// Create a 404 Not Found error.
    #[must_use]
    pub fn not_found(resource: impl fmt::Display, id: impl fmt::Display) -> Self {
        Self::new(
            StatusCode::NOT_FOUND,
            format!("{resource} with id {id} not found"),
            "NOT_FOUND".to_string(),
        )
    }

    /// Create a 409 Conflict error.
    #[must_use]
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(StatusCode::CONFLICT, message.into(), "CONFLICT".to_string())
    }

    /// Create a 500 Internal Server Error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            message.into(),
            "INTERNAL_SERVER_ERROR".to_string(),
        )
    }

    /// Create a 503 Service Unavailable error.
    #[must_use]
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(
            StatusCode::SERVICE_UNAVAILABLE,
            message.into(),
            "SERVICE_UNAVAILABLE".to_string(),
        )
    }

    /// Map a scope decision to a response: 401 for missing credentials,
    /// 403 for a mismatch, `Ok` for granted.
    ///
    /// # Errors
    ///
    /// The corresponding `AppError` for non-granted decisions.
    pub fn check_scope(decision: ScopeDecision) -> Result<(), Self> {
        match decision {
            ScopeDecision::Granted => Ok(()),
            ScopeDecision::Unauthorized => {
                Err(Self::unauthorized("Credential required for this stream"))
            }
            ScopeDecision::Forbidden => {
                Err(Self::forbidden("Credential does not match request scope"))
            }
        }
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

impl std::error::Error for AppError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_ref()
            .map(|e| e.as_ref() as &(dyn std::error::Error + 'static))
    }
}

/// Error response body (JSON).
#[derive(Debug, Serialize)]
struct ErrorResponse {
    /// Error code (for client error handling).
    code: String,
    /// Human-readable error message.
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            if let Some(source) = &self.source {
                tracing::error!(
                    status = %self.status,
                    code = %self.code,
                    message = %self.message,
                    error = %source,
                    "Server error"
                );
            } else {
                tracing::error!(
                    status = %self.status,
                    code = %self.code,
                    message = %self.message,
                    "Server error"
                );
            }
        }

        let body = ErrorResponse {
            code: self.code,
            message: self.message,
        };

        (self.status, Json(body)).into_response()
    }
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(id) => Self::not_found("Request", id),
            StoreError::CorrelationNotFound(correlation) => {
                Self::not_found("Request", correlation)
            }
            StoreError::CorrelationInUse(correlation) => {
                Self::conflict(format!("Correlation id {correlation} already in use"))
            }
            StoreError::NotTerminal(_) => {
                Self::internal("Invalid transition target").with_source(err.into())
            }
        }
    }
}

impl From<ServiceError> for AppError {
    fn from(err: ServiceError) -> Self {
        match err {
            ServiceError::Store(store) => store.into(),
            ServiceError::Provider(provider) => match provider {
                ProviderError::UnknownAuthorization(correlation) => {
                    Self::not_found("Authorization", correlation)
                }
                ProviderError::Transport(_) | ProviderError::UnexpectedPayload(_) => {
                    Self::unavailable("Verification provider unavailable")
                        .with_source(provider.into())
                }
            },
            ServiceError::Completion(completion) => {
                Self::internal("Completion handling failed").with_source(completion.into())
            }
            ServiceError::Transition(transition) => {
                Self::internal("Transition failed").with_source(transition.into())
            }
        }
    }
}

/// Convert `anyhow::Error` to `AppError`.
impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        Self::internal("An internal error occurred").with_source(err)
    }
}
