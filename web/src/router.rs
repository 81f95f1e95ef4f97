//! Router assembly.

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::handlers;
use crate::state::AppState;

/// Build the full application router.
///
/// ```text
/// GET    /health
/// POST   /api/v1/requests
/// GET    /api/v1/requests/{id}
/// DELETE /api/v1/requests/{id}
/// GET    /api/v1/requests/{id}/stream            (business SSE)
/// GET    /api/v1/requests/{id}/debug/stream      (diagnostic SSE)
/// POST   /api/v1/wallet-responses
/// GET    /api/v1/correlations/{correlation_id}/resolution
/// ```
#[must_use]
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health_check))
        .route("/api/v1/requests", post(handlers::requests::create_request))
        .route(
            "/api/v1/requests/:id",
            get(handlers::requests::get_request).delete(handlers::requests::delete_request),
        )
        .route(
            "/api/v1/requests/:id/stream",
            get(handlers::business_stream),
        )
        .route(
            "/api/v1/requests/:id/debug/stream",
            get(handlers::debug_stream),
        )
        .route(
            "/api/v1/wallet-responses",
            post(handlers::requests::forward_wallet_response),
        )
        .route(
            "/api/v1/correlations/:correlation_id/resolution",
            get(handlers::requests::await_resolution),
        )
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
