//! Health check endpoint.
//!
//! Used by load balancers and monitoring systems to verify the service is
//! running. The engine has no external dependencies to probe, so liveness
//! is the whole story.

use axum::http::StatusCode;

/// Simple liveness check.
///
/// # Endpoint
///
/// ```text
/// GET /health
/// ```
#[allow(clippy::unused_async)]
pub async fn health_check() -> (StatusCode, &'static str) {
    (StatusCode::OK, "ok")
}
