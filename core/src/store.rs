//! Pending request store: the only component allowed to write terminal state.
//!
//! # Design
//!
//! The [`RequestStore`] trait is deliberately minimal. It provides exactly
//! what the lifecycle engine needs:
//!
//! - create a pending row (publishing the `pending` lifecycle event),
//! - read with lazy TTL expiry,
//! - the single conditional terminal write,
//! - lookup by provider correlation id,
//! - deletion.
//!
//! # Idempotency
//!
//! [`RequestStore::transition_to_terminal`] is a compare-and-swap: it
//! succeeds only while the row is still `Pending`. Callers never check then
//! act: they call unconditionally and the store decides atomically. A
//! losing caller gets the existing terminal row back, no write happens, and
//! no event is published. Racing failure/success reports therefore cannot
//! resurrect or re-fail an already-terminal request.
//!
//! # Lazy expiry
//!
//! Expiry is a side effect of observation, not a background sweep: a read of
//! a `Pending` row older than its kind's TTL performs the CAS write to
//! `Expired` (publishing the one lifecycle event) on the spot.
//!
//! # Read variants
//!
//! [`RequestStore::get`] treats expired rows as gone (`NotFound`), which is
//! what API callers should see. [`RequestStore::fetch`] returns any known
//! row regardless of terminal status, because stream services and the
//! monitor need to observe terminal rows. Both trigger the lazy-expiry write.
//!
//! # Implementations
//!
//! [`InMemoryRequestStore`] is the reference implementation. A durable
//! implementation would back the same trait with a database conditional
//! update (`UPDATE ... WHERE status = 'pending'`).

use crate::bus::EventBus;
use crate::config::EngineConfig;
use crate::environment::Clock;
use crate::events::LifecycleEvent;
use crate::request::{
    CorrelationId, FlowKind, PendingAuthRequest, RequestId, RequestStatus, ResultPatch,
    StreamScope, TransportMode, VerificationResult,
};
use crate::sync::lock;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use thiserror::Error;

/// Errors that can occur during store operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Unknown id, or a lazily-expired request observed through `get`.
    #[error("Request not found: {0}")]
    NotFound(RequestId),

    /// Unknown provider correlation id.
    #[error("No request for correlation id: {0}")]
    CorrelationNotFound(CorrelationId),

    /// A request already holds this provider correlation id.
    #[error("Correlation id already in use: {0}")]
    CorrelationInUse(CorrelationId),

    /// `transition_to_terminal` was asked to write `Pending`.
    #[error("Not a terminal status: {0}")]
    NotTerminal(RequestStatus),
}

/// Boxed future type for dyn-compatible store methods.
type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, StoreError>> + Send + 'a>>;

/// Parameters for creating a pending request.
#[derive(Clone, Debug)]
pub struct NewRequest {
    /// Flow discriminator (selects TTL, routes completion).
    pub kind: FlowKind,
    /// Transport variant.
    pub mode: TransportMode,
    /// Stream authorization predicate.
    pub scope: StreamScope,
    /// Provider handle; must be unique across live rows.
    pub correlation_id: CorrelationId,
    /// Flow-specific payload, immutable after creation.
    pub metadata: serde_json::Value,
}

/// Persistence seam for pending authorization requests.
///
/// # Dyn Compatibility
///
/// Methods return explicit `Pin<Box<dyn Future>>` instead of `async fn` so
/// the store can be held as `Arc<dyn RequestStore>` by the engine, the
/// monitor, and completion handlers.
pub trait RequestStore: Send + Sync {
    /// Create a request in `Pending` status and publish the `pending`
    /// lifecycle event.
    ///
    /// # Errors
    ///
    /// [`StoreError::CorrelationInUse`] if the correlation id is taken.
    fn create(&self, new: NewRequest) -> StoreFuture<'_, PendingAuthRequest>;

    /// Read a request as an API caller sees it.
    ///
    /// Triggers lazy expiry; expired rows (newly or previously) read as
    /// [`StoreError::NotFound`].
    fn get(&self, id: RequestId) -> StoreFuture<'_, PendingAuthRequest>;

    /// Read a request as engine internals see it.
    ///
    /// Triggers lazy expiry but returns any known row, terminal or not.
    ///
    /// # Errors
    ///
    /// [`StoreError::NotFound`] only for unknown ids.
    fn fetch(&self, id: RequestId) -> StoreFuture<'_, PendingAuthRequest>;

    /// Look up a request by its provider correlation id (`fetch` semantics).
    ///
    /// # Errors
    ///
    /// [`StoreError::CorrelationNotFound`] for unknown correlation ids.
    fn find_by_correlation(
        &self,
        correlation_id: CorrelationId,
    ) -> StoreFuture<'_, PendingAuthRequest>;

    /// The only write path to a terminal state.
    ///
    /// Conditional write: succeeds only if the row is still `Pending`. On
    /// success the store writes `next`, merges `patch` into the result,
    /// stamps `completed_at`, and publishes one lifecycle event. If the row
    /// is already terminal this is a silent no-op returning the existing row.
    ///
    /// # Errors
    ///
    /// [`StoreError::NotFound`] for unknown ids;
    /// [`StoreError::NotTerminal`] if `next` is `Pending`.
    fn transition_to_terminal(
        &self,
        id: RequestId,
        next: RequestStatus,
        patch: ResultPatch,
    ) -> StoreFuture<'_, PendingAuthRequest>;

    /// Remove a request.
    ///
    /// # Errors
    ///
    /// [`StoreError::NotFound`] for unknown ids.
    fn delete(&self, id: RequestId) -> StoreFuture<'_, ()>;
}

struct Rows {
    by_id: HashMap<RequestId, PendingAuthRequest>,
    by_correlation: HashMap<CorrelationId, RequestId>,
}

/// Reference in-memory store.
///
/// All mutation happens under one mutex; lifecycle events are published
/// after the guard is released, so a slow bus subscriber can never extend
/// the critical section.
pub struct InMemoryRequestStore {
    rows: Mutex<Rows>,
    bus: Arc<EventBus>,
    clock: Arc<dyn Clock>,
    config: EngineConfig,
}

impl InMemoryRequestStore {
    /// Create an empty store.
    #[must_use]
    pub fn new(bus: Arc<EventBus>, clock: Arc<dyn Clock>, config: EngineConfig) -> Self {
        Self {
            rows: Mutex::new(Rows {
                by_id: HashMap::new(),
                by_correlation: HashMap::new(),
            }),
            bus,
            clock,
            config,
        }
    }

    fn create_sync(&self, new: NewRequest) -> Result<PendingAuthRequest, StoreError> {
        let request = PendingAuthRequest {
            id: RequestId::generate(),
            correlation_id: new.correlation_id,
            kind: new.kind,
            mode: new.mode,
            status: RequestStatus::Pending,
            scope: new.scope,
            metadata: new.metadata,
            result: None,
            created_at: self.clock.now(),
            completed_at: None,
        };

        {
            let mut rows = lock(&self.rows);
            if rows.by_correlation.contains_key(&request.correlation_id) {
                return Err(StoreError::CorrelationInUse(request.correlation_id));
            }
            rows.by_correlation
                .insert(request.correlation_id.clone(), request.id);
            rows.by_id.insert(request.id, request.clone());
        }

        tracing::info!(
            request_id = %request.id,
            correlation_id = %request.correlation_id,
            kind = %request.kind,
            "created pending authorization request"
        );
        self.bus.publish_lifecycle(&lifecycle_event(&request));
        Ok(request)
    }

    /// Load a row, applying lazy TTL expiry. Returns the (possibly just
    /// expired) row plus the expiry event to publish, if any.
    fn load_sync(
        &self,
        id: RequestId,
    ) -> Result<(PendingAuthRequest, Option<LifecycleEvent>), StoreError> {
        let now = self.clock.now();
        let mut rows = lock(&self.rows);
        let row = rows.by_id.get_mut(&id).ok_or(StoreError::NotFound(id))?;

        let mut event = None;
        if row.status == RequestStatus::Pending && now - row.created_at > self.config.ttl(&row.kind)
        {
            row.status = RequestStatus::Expired;
            row.completed_at = Some(now);
            row.result = Some(VerificationResult {
                outcome: RequestStatus::Expired,
                claims: None,
                error_detail: None,
                extra: serde_json::Map::new(),
            });
            event = Some(lifecycle_event(row));
        }
        Ok((row.clone(), event))
    }

    fn fetch_sync(&self, id: RequestId) -> Result<PendingAuthRequest, StoreError> {
        let (row, expiry) = self.load_sync(id)?;
        if let Some(event) = expiry {
            tracing::info!(request_id = %id, "request expired lazily on read");
            self.bus.publish_lifecycle(&event);
        }
        Ok(row)
    }

    fn get_sync(&self, id: RequestId) -> Result<PendingAuthRequest, StoreError> {
        let row = self.fetch_sync(id)?;
        if row.status == RequestStatus::Expired {
            return Err(StoreError::NotFound(id));
        }
        Ok(row)
    }

    fn transition_sync(
        &self,
        id: RequestId,
        next: RequestStatus,
        patch: ResultPatch,
    ) -> Result<PendingAuthRequest, StoreError> {
        if !next.is_terminal() {
            return Err(StoreError::NotTerminal(next));
        }

        let (row, event) = {
            let mut rows = lock(&self.rows);
            let row = rows.by_id.get_mut(&id).ok_or(StoreError::NotFound(id))?;

            if row.status.is_terminal() {
                // Losing side of the race: no write, no event.
                (row.clone(), None)
            } else {
                row.status = next;
                row.completed_at = Some(self.clock.now());
                row.result = Some(VerificationResult {
                    outcome: next,
                    claims: patch.claims,
                    error_detail: patch.error_detail,
                    extra: patch.extra,
                });
                (row.clone(), Some(lifecycle_event(row)))
            }
        };

        if let Some(event) = event {
            tracing::info!(request_id = %id, status = %next, "terminal transition applied");
            self.bus.publish_lifecycle(&event);
        } else {
            tracing::debug!(
                request_id = %id,
                current = %row.status,
                attempted = %next,
                "terminal transition skipped, request already terminal"
            );
        }
        Ok(row)
    }

    fn delete_sync(&self, id: RequestId) -> Result<(), StoreError> {
        let mut rows = lock(&self.rows);
        let row = rows.by_id.remove(&id).ok_or(StoreError::NotFound(id))?;
        rows.by_correlation.remove(&row.correlation_id);
        Ok(())
    }
}

fn lifecycle_event(request: &PendingAuthRequest) -> LifecycleEvent {
    LifecycleEvent {
        request_id: request.id,
        correlation_id: request.correlation_id.clone(),
        kind: request.kind.clone(),
        stage: request.status,
    }
}

impl RequestStore for InMemoryRequestStore {
    fn create(&self, new: NewRequest) -> StoreFuture<'_, PendingAuthRequest> {
        let result = self.create_sync(new);
        Box::pin(async move { result })
    }

    fn get(&self, id: RequestId) -> StoreFuture<'_, PendingAuthRequest> {
        let result = self.get_sync(id);
        Box::pin(async move { result })
    }

    fn fetch(&self, id: RequestId) -> StoreFuture<'_, PendingAuthRequest> {
        let result = self.fetch_sync(id);
        Box::pin(async move { result })
    }

    fn find_by_correlation(
        &self,
        correlation_id: CorrelationId,
    ) -> StoreFuture<'_, PendingAuthRequest> {
        let id = lock(&self.rows).by_correlation.get(&correlation_id).copied();
        let result = match id {
            Some(id) => self.fetch_sync(id),
            None => Err(StoreError::CorrelationNotFound(correlation_id)),
        };
        Box::pin(async move { result })
    }

    fn transition_to_terminal(
        &self,
        id: RequestId,
        next: RequestStatus,
        patch: ResultPatch,
    ) -> StoreFuture<'_, PendingAuthRequest> {
        let result = self.transition_sync(id, next, patch);
        Box::pin(async move { result })
    }

    fn delete(&self, id: RequestId) -> StoreFuture<'_, ()> {
        let result = self.delete_sync(id);
        Box::pin(async move { result })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use chrono::{DateTime, Utc};
    use tokio::sync::broadcast::error::TryRecvError;

    /// Adjustable clock for expiry tests.
    struct ManualClock(Mutex<DateTime<Utc>>);

    impl ManualClock {
        fn new() -> Arc<Self> {
            Arc::new(Self(Mutex::new(Utc::now())))
        }

        fn advance(&self, by: chrono::Duration) {
            let mut now = lock(&self.0);
            *now += by;
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> DateTime<Utc> {
            *lock(&self.0)
        }
    }

    fn new_request(correlation: &str) -> NewRequest {
        NewRequest {
            kind: FlowKind::new("signup"),
            mode: TransportMode::new("cross_device"),
            scope: StreamScope::OwnerSession(crate::request::SessionId::new("s1")),
            correlation_id: CorrelationId::new(correlation),
            metadata: serde_json::json!({ "locale": "en" }),
        }
    }

    fn store_with(
        clock: Arc<ManualClock>,
        config: EngineConfig,
    ) -> (Arc<EventBus>, InMemoryRequestStore) {
        let bus = Arc::new(EventBus::new(64));
        let store = InMemoryRequestStore::new(Arc::clone(&bus), clock, config);
        (bus, store)
    }

    fn drain_lifecycle(
        rx: &mut tokio::sync::broadcast::Receiver<LifecycleEvent>,
    ) -> Vec<LifecycleEvent> {
        let mut events = Vec::new();
        loop {
            match rx.try_recv() {
                Ok(event) => events.push(event),
                Err(TryRecvError::Empty | TryRecvError::Closed) => break,
                Err(TryRecvError::Lagged(_)) => {}
            }
        }
        events
    }

    #[tokio::test]
    async fn create_starts_pending_and_publishes() {
        let (bus, store) = store_with(ManualClock::new(), EngineConfig::new());
        let mut rx = bus.subscribe_lifecycle();

        let request = store.create(new_request("txn-1")).await.unwrap();
        assert_eq!(request.status, RequestStatus::Pending);
        assert!(request.result.is_none());
        assert!(request.completed_at.is_none());

        let events = drain_lifecycle(&mut rx);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].stage, RequestStatus::Pending);
        assert_eq!(events[0].request_id, request.id);
    }

    #[tokio::test]
    async fn create_rejects_duplicate_correlation() {
        let (_bus, store) = store_with(ManualClock::new(), EngineConfig::new());
        store.create(new_request("txn-1")).await.unwrap();
        let err = store.create(new_request("txn-1")).await.unwrap_err();
        assert_eq!(
            err,
            StoreError::CorrelationInUse(CorrelationId::new("txn-1"))
        );
    }

    #[tokio::test]
    async fn unknown_id_is_not_found_everywhere() {
        let (_bus, store) = store_with(ManualClock::new(), EngineConfig::new());
        let id = RequestId::generate();
        assert!(matches!(
            store.get(id).await.unwrap_err(),
            StoreError::NotFound(_)
        ));
        assert!(matches!(
            store.fetch(id).await.unwrap_err(),
            StoreError::NotFound(_)
        ));
        assert!(matches!(
            store
                .transition_to_terminal(id, RequestStatus::Failed, ResultPatch::empty())
                .await
                .unwrap_err(),
            StoreError::NotFound(_)
        ));
        assert!(matches!(
            store.delete(id).await.unwrap_err(),
            StoreError::NotFound(_)
        ));
    }

    #[tokio::test]
    async fn transition_rejects_pending_target() {
        let (_bus, store) = store_with(ManualClock::new(), EngineConfig::new());
        let request = store.create(new_request("txn-1")).await.unwrap();
        let err = store
            .transition_to_terminal(request.id, RequestStatus::Pending, ResultPatch::empty())
            .await
            .unwrap_err();
        assert_eq!(err, StoreError::NotTerminal(RequestStatus::Pending));
    }

    #[tokio::test]
    async fn first_terminal_write_wins_second_is_noop() {
        let (bus, store) = store_with(ManualClock::new(), EngineConfig::new());
        let request = store.create(new_request("txn-1")).await.unwrap();
        let mut rx = bus.subscribe_lifecycle();

        let completed = store
            .transition_to_terminal(
                request.id,
                RequestStatus::Completed,
                ResultPatch::completed(Some(serde_json::json!({ "sub": "u1" })), serde_json::Map::new()),
            )
            .await
            .unwrap();
        assert_eq!(completed.status, RequestStatus::Completed);
        assert!(completed.completed_at.is_some());
        let result = completed.result.unwrap();
        assert_eq!(result.outcome, RequestStatus::Completed);
        assert_eq!(result.claims, Some(serde_json::json!({ "sub": "u1" })));

        // Racing failure report: silent no-op returning the existing row.
        let still_completed = store
            .transition_to_terminal(request.id, RequestStatus::Failed, ResultPatch::error("late"))
            .await
            .unwrap();
        assert_eq!(still_completed.status, RequestStatus::Completed);
        assert!(still_completed.result.unwrap().error_detail.is_none());

        let events = drain_lifecycle(&mut rx);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].stage, RequestStatus::Completed);
    }

    #[tokio::test]
    async fn concurrent_transitions_have_exactly_one_winner() {
        let clock = ManualClock::new();
        let bus = Arc::new(EventBus::new(256));
        let store: Arc<InMemoryRequestStore> = Arc::new(InMemoryRequestStore::new(
            Arc::clone(&bus),
            clock,
            EngineConfig::new(),
        ));
        let request = store.create(new_request("txn-1")).await.unwrap();
        let mut rx = bus.subscribe_lifecycle();

        let mut tasks = Vec::new();
        for i in 0..16 {
            let store = Arc::clone(&store);
            let id = request.id;
            tasks.push(tokio::spawn(async move {
                let status = if i % 2 == 0 {
                    RequestStatus::Completed
                } else {
                    RequestStatus::Failed
                };
                store
                    .transition_to_terminal(id, status, ResultPatch::error(format!("caller {i}")))
                    .await
            }));
        }

        let mut statuses = Vec::new();
        for task in tasks {
            statuses.push(task.await.unwrap().unwrap().status);
        }

        // Every caller observes the same winning status.
        let winner = statuses[0];
        assert!(winner.is_terminal());
        assert!(statuses.iter().all(|s| *s == winner));

        // Exactly one lifecycle event was published.
        let events = drain_lifecycle(&mut rx);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].stage, winner);
    }

    #[tokio::test]
    async fn lazy_expiry_fires_once_on_read() {
        let clock = ManualClock::new();
        let config = EngineConfig::new().with_default_ttl(chrono::Duration::minutes(5));
        let (bus, store) = store_with(Arc::clone(&clock), config);
        let request = store.create(new_request("txn-1")).await.unwrap();
        let mut rx = bus.subscribe_lifecycle();

        // Within TTL: still pending.
        clock.advance(chrono::Duration::minutes(4));
        assert_eq!(
            store.get(request.id).await.unwrap().status,
            RequestStatus::Pending
        );

        // Past TTL: the read performs the CAS write and reports NotFound.
        clock.advance(chrono::Duration::minutes(2));
        assert!(matches!(
            store.get(request.id).await.unwrap_err(),
            StoreError::NotFound(_)
        ));

        let events = drain_lifecycle(&mut rx);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].stage, RequestStatus::Expired);

        // Subsequent reads: consistent NotFound, no further events.
        assert!(store.get(request.id).await.is_err());
        assert!(drain_lifecycle(&mut rx).is_empty());

        // fetch still exposes the terminal row to engine internals.
        let row = store.fetch(request.id).await.unwrap();
        assert_eq!(row.status, RequestStatus::Expired);
        assert_eq!(row.result.unwrap().outcome, RequestStatus::Expired);
    }

    #[tokio::test]
    async fn ttl_is_selected_by_kind() {
        let clock = ManualClock::new();
        let config = EngineConfig::new()
            .with_default_ttl(chrono::Duration::minutes(10))
            .with_ttl_for(FlowKind::new("login"), chrono::Duration::minutes(1));
        let (_bus, store) = store_with(Arc::clone(&clock), config);

        let mut login = new_request("txn-login");
        login.kind = FlowKind::new("login");
        let login = store.create(login).await.unwrap();
        let signup = store.create(new_request("txn-signup")).await.unwrap();

        clock.advance(chrono::Duration::minutes(2));
        assert!(store.get(login.id).await.is_err());
        assert!(store.get(signup.id).await.is_ok());
    }

    #[tokio::test]
    async fn expiry_does_not_touch_terminal_rows() {
        let clock = ManualClock::new();
        let config = EngineConfig::new().with_default_ttl(chrono::Duration::minutes(5));
        let (_bus, store) = store_with(Arc::clone(&clock), config);
        let request = store.create(new_request("txn-1")).await.unwrap();

        store
            .transition_to_terminal(request.id, RequestStatus::Completed, ResultPatch::empty())
            .await
            .unwrap();

        clock.advance(chrono::Duration::hours(1));
        let row = store.fetch(request.id).await.unwrap();
        assert_eq!(row.status, RequestStatus::Completed);
        // And `get` serves terminal non-expired rows.
        assert_eq!(
            store.get(request.id).await.unwrap().status,
            RequestStatus::Completed
        );
    }

    #[tokio::test]
    async fn find_by_correlation_matches_fetch() {
        let (_bus, store) = store_with(ManualClock::new(), EngineConfig::new());
        let request = store.create(new_request("txn-1")).await.unwrap();

        let found = store
            .find_by_correlation(CorrelationId::new("txn-1"))
            .await
            .unwrap();
        assert_eq!(found.id, request.id);

        assert!(matches!(
            store
                .find_by_correlation(CorrelationId::new("txn-404"))
                .await
                .unwrap_err(),
            StoreError::CorrelationNotFound(_)
        ));
    }

    #[tokio::test]
    async fn delete_frees_the_correlation_id() {
        let (_bus, store) = store_with(ManualClock::new(), EngineConfig::new());
        let request = store.create(new_request("txn-1")).await.unwrap();
        store.delete(request.id).await.unwrap();

        assert!(store.fetch(request.id).await.is_err());
        // The correlation id can be reused after deletion.
        store.create(new_request("txn-1")).await.unwrap();
    }
}
