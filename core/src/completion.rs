//! Domain completion handler seam and per-kind routing.
//!
//! When the provider reports `authorized`, the engine does not write the
//! terminal state itself. It hands the request to the completion handler
//! registered for the request's flow kind; the handler performs its business
//! side effects (account creation, balance credit, profile merge, all
//! opaque to this crate) and **must** call
//! [`crate::store::RequestStore::transition_to_terminal`] with `Completed`
//! and its result patch exactly once before returning. Keeping the write in
//! the handler means the terminal row already carries the business results
//! when the lifecycle event becomes observable.

use crate::provider::ProviderError;
use crate::request::{FlowKind, PendingAuthRequest};
use crate::store::{RequestStore, StoreError};
use crate::sync::lock;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use thiserror::Error;

/// Errors from completion handling.
#[derive(Error, Debug)]
pub enum CompletionError {
    /// No handler registered for the request's flow kind.
    #[error("No completion handler registered for kind '{0}'")]
    UnknownKind(FlowKind),

    /// The handler's business side effects failed.
    #[error("Completion failed: {0}")]
    Failed(String),

    /// The handler's terminal write failed.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The handler needed the provider (for example to fetch claims) and it
    /// failed.
    #[error(transparent)]
    Provider(#[from] ProviderError),
}

/// Boxed future type for dyn-compatible handler methods.
type CompletionFuture<'a> = Pin<Box<dyn Future<Output = Result<(), CompletionError>> + Send + 'a>>;

/// Flow-specific completion side effects for an authorized request.
pub trait CompletionHandler: Send + Sync {
    /// Finalize an authorized request.
    ///
    /// Must call `store.transition_to_terminal(request.id, Completed, patch)`
    /// exactly once before returning. The store's CAS makes a duplicate call
    /// harmless, but the patch of the second call would be discarded.
    ///
    /// # Errors
    ///
    /// Any error is converted by the monitor into a terminal `failed`
    /// transition for the request.
    fn on_authorized(
        &self,
        store: Arc<dyn RequestStore>,
        request: PendingAuthRequest,
    ) -> CompletionFuture<'_>;
}

/// Registry mapping flow kinds to their completion handlers.
///
/// Registration normally happens at startup, but the table is behind a lock
/// so flows can be added to a running engine.
#[derive(Default)]
pub struct CompletionRouter {
    handlers: Mutex<HashMap<FlowKind, Arc<dyn CompletionHandler>>>,
}

impl CompletionRouter {
    /// Create an empty router.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the handler for a flow kind, replacing any previous one.
    pub fn register(&self, kind: FlowKind, handler: Arc<dyn CompletionHandler>) {
        lock(&self.handlers).insert(kind, handler);
    }

    /// Builder-style registration for startup wiring.
    #[must_use]
    pub fn with(self, kind: FlowKind, handler: Arc<dyn CompletionHandler>) -> Self {
        self.register(kind, handler);
        self
    }

    /// Resolve the handler for a flow kind.
    ///
    /// # Errors
    ///
    /// [`CompletionError::UnknownKind`] when no handler is registered.
    pub fn resolve(&self, kind: &FlowKind) -> Result<Arc<dyn CompletionHandler>, CompletionError> {
        lock(&self.handlers)
            .get(kind)
            .cloned()
            .ok_or_else(|| CompletionError::UnknownKind(kind.clone()))
    }
}

impl std::fmt::Debug for CompletionRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompletionRouter")
            .field("kinds", &lock(&self.handlers).keys().cloned().collect::<Vec<_>>())
            .finish()
    }
}
