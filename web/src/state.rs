//! Shared application state.

use std::sync::Arc;

use veriflow_core::AuthorizationService;

/// State shared across all handlers.
///
/// Cloning is cheap: the service is behind an [`Arc`].
#[derive(Clone)]
pub struct AppState {
    /// The authorization request lifecycle engine.
    pub service: Arc<AuthorizationService>,
}

impl AppState {
    /// Wrap a service for use as router state.
    #[must_use]
    pub fn new(service: Arc<AuthorizationService>) -> Self {
        Self { service }
    }
}
