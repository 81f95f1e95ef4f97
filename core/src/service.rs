//! Composition root: the authorization service facade.
//!
//! [`AuthorizationService`] owns the wired-together engine (store, bus,
//! diagnostic log, monitor) and exposes the operations callers use:
//! beginning a verification, forwarding a wallet response, the bounded
//! resolution wait, snapshot reads, and deletion. The web crate holds one
//! `Arc<AuthorizationService>` in its application state.

use crate::bus::EventBus;
use crate::completion::{CompletionError, CompletionRouter};
use crate::config::EngineConfig;
use crate::diagnostics::DiagnosticLog;
use crate::environment::{Clock, SystemClock};
use crate::events::DiagnosticLevel;
use crate::monitor::AuthorizationMonitor;
use crate::provider::{ProviderError, VerificationProvider};
use crate::request::{
    CorrelationId, FlowKind, PendingAuthRequest, RequestId, StreamScope, TransportMode,
};
use crate::store::{InMemoryRequestStore, NewRequest, RequestStore, StoreError};
use crate::transition::{TransitionEngine, TransitionError};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Errors surfaced by service operations.
#[derive(Error, Debug)]
pub enum ServiceError {
    /// Store failure (NotFound, correlation conflicts).
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Provider client failure.
    #[error(transparent)]
    Provider(#[from] ProviderError),

    /// Completion routing or handler failure.
    #[error(transparent)]
    Completion(#[from] CompletionError),

    /// Transition application failure.
    #[error(transparent)]
    Transition(#[from] TransitionError),
}

/// Parameters for starting a verification.
#[derive(Clone, Debug)]
pub struct BeginVerification {
    /// Flow discriminator.
    pub kind: FlowKind,
    /// Transport variant, forwarded to the provider.
    pub mode: TransportMode,
    /// Stream authorization predicate for this request.
    pub scope: StreamScope,
    /// Flow-specific payload, stored immutably on the request.
    pub metadata: serde_json::Value,
    /// Attribute names to request from the wallet.
    pub requested_attributes: Vec<String>,
    /// Purpose statement shown to the subject.
    pub purpose: String,
}

/// A created verification: the persisted request plus the provider's opaque
/// wallet handoff (deep link, QR payload, ...).
#[derive(Clone, Debug)]
pub struct StartedVerification {
    /// The persisted pending request.
    pub request: PendingAuthRequest,
    /// Provider handoff payload for the wallet.
    pub wallet_handoff: serde_json::Value,
}

/// The lifecycle engine facade.
pub struct AuthorizationService {
    store: Arc<dyn RequestStore>,
    bus: Arc<EventBus>,
    diagnostics: Arc<DiagnosticLog>,
    monitor: AuthorizationMonitor,
    provider: Arc<dyn VerificationProvider>,
    router: Arc<CompletionRouter>,
    engine: TransitionEngine,
    config: EngineConfig,
}

impl AuthorizationService {
    /// Wire a service around the in-memory reference store with the system
    /// clock.
    #[must_use]
    pub fn new(
        provider: Arc<dyn VerificationProvider>,
        router: Arc<CompletionRouter>,
        config: EngineConfig,
    ) -> Self {
        Self::with_clock(provider, router, config, Arc::new(SystemClock))
    }

    /// Wire a service with an injected clock (tests pin time through this).
    #[must_use]
    pub fn with_clock(
        provider: Arc<dyn VerificationProvider>,
        router: Arc<CompletionRouter>,
        config: EngineConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let bus = Arc::new(EventBus::new(config.channel_capacity));
        let store: Arc<dyn RequestStore> = Arc::new(InMemoryRequestStore::new(
            Arc::clone(&bus),
            Arc::clone(&clock),
            config.clone(),
        ));
        let diagnostics = Arc::new(DiagnosticLog::new(
            Arc::clone(&bus),
            clock,
            config.history_capacity,
        ));
        let monitor = AuthorizationMonitor::new(
            Arc::clone(&store),
            Arc::clone(&provider),
            Arc::clone(&router),
            Arc::clone(&diagnostics),
            config.poll_interval,
        );
        let engine = TransitionEngine::new(Arc::clone(&store));
        Self {
            store,
            bus,
            diagnostics,
            monitor,
            provider,
            router,
            engine,
            config,
        }
    }

    /// Begin a verification: create the provider-side transaction, persist
    /// the pending request, and start its monitor.
    ///
    /// # Errors
    ///
    /// Provider failures creating the transaction; store failures persisting
    /// the row.
    pub async fn begin_verification(
        &self,
        begin: BeginVerification,
    ) -> Result<StartedVerification, ServiceError> {
        let created = self
            .provider
            .create_authorization(
                begin.mode.clone(),
                begin.requested_attributes,
                begin.purpose,
            )
            .await?;

        let request = self
            .store
            .create(NewRequest {
                kind: begin.kind,
                mode: begin.mode,
                scope: begin.scope,
                correlation_id: created.correlation_id,
                metadata: begin.metadata,
            })
            .await?;

        self.diagnostics.record(
            request.id,
            "request_created",
            DiagnosticLevel::Info,
            "verification request created",
            serde_json::json!({
                "kind": request.kind,
                "mode": request.mode,
                "correlationId": request.correlation_id,
            }),
        );
        self.monitor.start(request.id);

        Ok(StartedVerification {
            request,
            wallet_handoff: created.wallet_handoff,
        })
    }

    /// Forward a wallet's direct response to the provider and apply the
    /// returned status through the same transition path a poll tick uses.
    ///
    /// Already-terminal requests short-circuit to the existing row (the
    /// store's idempotency makes a late forward harmless).
    ///
    /// # Errors
    ///
    /// Unknown correlation id; provider, routing, or transition failures.
    pub async fn forward_wallet_response(
        &self,
        correlation_id: CorrelationId,
        origin: String,
        response: serde_json::Value,
    ) -> Result<PendingAuthRequest, ServiceError> {
        let request = self
            .store
            .find_by_correlation(correlation_id.clone())
            .await?;
        if request.is_terminal() {
            return Ok(request);
        }

        let poll = self
            .provider
            .forward_wallet_response(correlation_id, origin, response)
            .await?;
        self.diagnostics.record(
            request.id,
            "wallet_response_forwarded",
            DiagnosticLevel::Info,
            "wallet response forwarded to provider",
            serde_json::json!({ "status": poll.status }),
        );

        let handler = self.router.resolve(&request.kind)?;
        self.engine.apply(&request, poll, handler.as_ref()).await?;
        Ok(self.store.fetch(request.id).await?)
    }

    /// Wait up to `timeout` (the configured default when `None`) for the
    /// request with this correlation id to reach a terminal state.
    ///
    /// Best-effort: on timeout this is not an error; the then-current
    /// persisted snapshot is returned instead.
    ///
    /// # Errors
    ///
    /// Unknown correlation id.
    pub async fn await_resolution(
        &self,
        correlation_id: CorrelationId,
        timeout: Option<Duration>,
    ) -> Result<PendingAuthRequest, ServiceError> {
        let request = self
            .store
            .find_by_correlation(correlation_id.clone())
            .await?;
        if request.is_terminal() {
            return Ok(request);
        }

        let timeout = timeout.unwrap_or(self.config.resolution_timeout);
        match self.bus.wait_for_terminal(&correlation_id, timeout).await {
            Some(event) => Ok(self.store.fetch(event.request_id).await?),
            None => Ok(self.store.find_by_correlation(correlation_id).await?),
        }
    }

    /// Read a request as API callers see it (lazily-expired rows are gone).
    ///
    /// # Errors
    ///
    /// [`StoreError::NotFound`] for unknown or expired requests.
    pub async fn request(&self, id: RequestId) -> Result<PendingAuthRequest, ServiceError> {
        Ok(self.store.get(id).await?)
    }

    /// Read a request as engine internals see it (terminal rows included).
    ///
    /// # Errors
    ///
    /// [`StoreError::NotFound`] for unknown ids.
    pub async fn snapshot(&self, id: RequestId) -> Result<PendingAuthRequest, ServiceError> {
        Ok(self.store.fetch(id).await?)
    }

    /// Delete a request: stop its monitor, drop the row and its trace
    /// history.
    ///
    /// # Errors
    ///
    /// [`StoreError::NotFound`] for unknown ids.
    pub async fn delete(&self, id: RequestId) -> Result<(), ServiceError> {
        self.monitor.stop(id);
        self.store.delete(id).await?;
        self.diagnostics.clear(id);
        Ok(())
    }

    /// The event bus (stream services subscribe here).
    #[must_use]
    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    /// The diagnostic log (debug stream replay source).
    #[must_use]
    pub fn diagnostics(&self) -> &Arc<DiagnosticLog> {
        &self.diagnostics
    }

    /// The monitor registry (exposed for lifecycle inspection).
    #[must_use]
    pub fn monitor(&self) -> &AuthorizationMonitor {
        &self.monitor
    }

    /// The underlying store.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn RequestStore> {
        &self.store
    }
}

impl std::fmt::Debug for AuthorizationService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthorizationService")
            .field("monitor", &self.monitor)
            .finish_non_exhaustive()
    }
}
