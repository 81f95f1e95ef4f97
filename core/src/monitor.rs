//! Per-request recurring poll scheduler.
//!
//! One lightweight tokio task per monitored request, registered in an
//! explicit registry owned by [`AuthorizationMonitor`] (injected into the
//! service, never a process-global). The task loops on a fixed interval with
//! [`MissedTickBehavior::Skip`] and runs the tick body inline, so a provider
//! call slower than the interval delays the loop and the ticks that fell due
//! meanwhile are dropped, never queued. Worst-case concurrent provider
//! calls are bounded to one per request.
//!
//! Failure semantics: any error while polling or transitioning is converted
//! into a terminal `failed` transition (reason = the error message) and the
//! monitor stops. There is no retry of transient provider errors.

use crate::completion::{CompletionError, CompletionRouter};
use crate::diagnostics::DiagnosticLog;
use crate::events::DiagnosticLevel;
use crate::provider::{ProviderError, VerificationProvider};
use crate::request::{RequestId, RequestStatus, ResultPatch};
use crate::store::RequestStore;
use crate::sync::lock;
use crate::transition::{TransitionEngine, TransitionError};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Everything that can go wrong inside one tick.
#[derive(Error, Debug)]
enum TickError {
    #[error(transparent)]
    Provider(#[from] ProviderError),
    #[error(transparent)]
    Completion(#[from] CompletionError),
    #[error(transparent)]
    Transition(#[from] TransitionError),
}

enum TickOutcome {
    Continue,
    Stop(&'static str),
}

/// A registered polling task. The generation tags which `start` call owns
/// the entry, so a task finishing late cannot unregister a successor that
/// reused its request id.
struct MonitorTask {
    generation: u64,
    handle: JoinHandle<()>,
}

#[derive(Default)]
struct Registry {
    next_generation: u64,
    tasks: HashMap<RequestId, MonitorTask>,
}

struct Inner {
    registry: Mutex<Registry>,
    store: Arc<dyn RequestStore>,
    provider: Arc<dyn VerificationProvider>,
    router: Arc<CompletionRouter>,
    engine: TransitionEngine,
    diagnostics: Arc<DiagnosticLog>,
    poll_interval: Duration,
}

/// Registry of per-request polling tasks.
pub struct AuthorizationMonitor {
    inner: Arc<Inner>,
}

impl AuthorizationMonitor {
    /// Create a monitor polling `provider` every `poll_interval` and driving
    /// transitions through `store`.
    #[must_use]
    pub fn new(
        store: Arc<dyn RequestStore>,
        provider: Arc<dyn VerificationProvider>,
        router: Arc<CompletionRouter>,
        diagnostics: Arc<DiagnosticLog>,
        poll_interval: Duration,
    ) -> Self {
        let engine = TransitionEngine::new(Arc::clone(&store));
        Self {
            inner: Arc::new(Inner {
                registry: Mutex::new(Registry::default()),
                store,
                provider,
                router,
                engine,
                diagnostics,
                poll_interval,
            }),
        }
    }

    /// Start polling for `id`. Idempotent: a no-op if a monitor is already
    /// registered for this request. The first tick fires immediately.
    pub fn start(&self, id: RequestId) {
        let mut registry = lock(&self.inner.registry);
        if registry.tasks.contains_key(&id) {
            return;
        }
        let generation = registry.next_generation;
        registry.next_generation += 1;

        let inner = Arc::clone(&self.inner);
        let handle = tokio::spawn(async move {
            inner.run(id).await;
            inner.unregister(id, generation);
        });
        registry.tasks.insert(id, MonitorTask { generation, handle });
        tracing::debug!(request_id = %id, "monitor registered");
    }

    /// Cancel the polling task for `id` and remove the registration.
    /// Idempotent: a no-op if not registered.
    pub fn stop(&self, id: RequestId) {
        if let Some(task) = lock(&self.inner.registry).tasks.remove(&id) {
            task.handle.abort();
            tracing::debug!(request_id = %id, "monitor cancelled");
        }
    }

    /// Whether a monitor is currently registered for `id`.
    #[must_use]
    pub fn is_registered(&self, id: RequestId) -> bool {
        lock(&self.inner.registry).tasks.contains_key(&id)
    }

    /// Number of currently registered monitors.
    #[must_use]
    pub fn registered_count(&self) -> usize {
        lock(&self.inner.registry).tasks.len()
    }
}

impl std::fmt::Debug for AuthorizationMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthorizationMonitor")
            .field("registered", &self.registered_count())
            .field("poll_interval", &self.inner.poll_interval)
            .finish()
    }
}

impl Inner {
    /// Remove the registry entry for `id`, but only if it still belongs to
    /// the `start` call identified by `generation`.
    fn unregister(&self, id: RequestId, generation: u64) {
        let mut registry = lock(&self.registry);
        if registry
            .tasks
            .get(&id)
            .is_some_and(|task| task.generation == generation)
        {
            registry.tasks.remove(&id);
        }
    }

    async fn run(&self, id: RequestId) {
        self.diagnostics.record(
            id,
            "monitor_started",
            DiagnosticLevel::Info,
            "polling started",
            serde_json::json!({
                "intervalMs": u64::try_from(self.poll_interval.as_millis()).unwrap_or(u64::MAX)
            }),
        );

        let mut interval = tokio::time::interval(self.poll_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let reason = loop {
            interval.tick().await;
            match self.tick(id).await {
                TickOutcome::Continue => {}
                TickOutcome::Stop(reason) => break reason,
            }
        };

        self.diagnostics.record(
            id,
            "monitor_stopped",
            DiagnosticLevel::Info,
            "polling stopped",
            serde_json::json!({ "reason": reason }),
        );
        tracing::debug!(request_id = %id, reason, "monitor stopped");
    }

    async fn tick(&self, id: RequestId) -> TickOutcome {
        let request = match self.store.fetch(id).await {
            Ok(request) => request,
            Err(_) => return TickOutcome::Stop("request missing"),
        };
        if request.is_terminal() {
            return TickOutcome::Stop("request terminal");
        }

        let outcome: Result<(), TickError> = async {
            let poll = self
                .provider
                .poll_status(request.correlation_id.clone())
                .await?;
            self.diagnostics.record(
                id,
                "provider_status",
                DiagnosticLevel::Debug,
                "provider status received",
                serde_json::json!({
                    "status": poll.status,
                    "errorDetail": poll.error_detail,
                }),
            );
            let handler = self.router.resolve(&request.kind)?;
            self.engine.apply(&request, poll, handler.as_ref()).await?;
            Ok(())
        }
        .await;

        if let Err(error) = outcome {
            self.diagnostics.record(
                id,
                "monitor_error",
                DiagnosticLevel::Error,
                error.to_string(),
                serde_json::json!({}),
            );
            tracing::warn!(request_id = %id, error = %error, "tick failed, failing request");
            // A single hiccup is treated as permanent: fail and stop. The
            // CAS makes this harmless if something else won meanwhile.
            let _ = self
                .store
                .transition_to_terminal(id, RequestStatus::Failed, ResultPatch::error(error.to_string()))
                .await;
            return TickOutcome::Stop("tick error");
        }

        match self.store.fetch(id).await {
            Ok(request) if request.is_terminal() => TickOutcome::Stop("request terminal"),
            Ok(_) => TickOutcome::Continue,
            Err(_) => TickOutcome::Stop("request missing"),
        }
    }
}
