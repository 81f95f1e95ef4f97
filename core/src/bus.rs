//! In-process typed publish/subscribe for lifecycle and diagnostic events.
//!
//! The bus carries three logical channels:
//!
//! - **lifecycle**: one [`LifecycleEvent`] per pending/terminal transition,
//!   published only by the store's write paths.
//! - **diagnostic**: [`DiagnosticEvent`] trace entries, published by the
//!   diagnostic log; subscribers filter by request id.
//! - **resolution**: a one-shot wait pattern keyed by provider correlation
//!   id: [`EventBus::wait_for_terminal`] races a listener against a timer and
//!   always deregisters the listener afterward.
//!
//! # Delivery contract
//!
//! Publishing goes through [`tokio::sync::broadcast`]: `send` never awaits
//! subscribers, so a slow consumer can never stall the transition that
//! published the event. Delivery is FIFO per subscriber per channel; a
//! subscriber that falls more than the channel capacity behind loses the
//! oldest messages (`RecvError::Lagged`) rather than back-pressuring the
//! producer. The bus is non-durable: events published with no subscriber are
//! dropped.

use crate::events::{DiagnosticEvent, LifecycleEvent};
use crate::request::CorrelationId;
use crate::sync::lock;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::{broadcast, oneshot};

/// Registered one-shot listeners, keyed by correlation id then by a token
/// so a timed-out waiter can remove exactly its own entry.
#[derive(Default)]
struct WaiterTable {
    next_token: u64,
    by_correlation: HashMap<CorrelationId, Vec<(u64, oneshot::Sender<LifecycleEvent>)>>,
}

/// In-process, synchronous, non-durable event bus.
pub struct EventBus {
    lifecycle: broadcast::Sender<LifecycleEvent>,
    diagnostic: broadcast::Sender<DiagnosticEvent>,
    waiters: Mutex<WaiterTable>,
}

/// Removes a waiter registration when the wait ends, whichever way it ends:
/// resolved, timed out, or the waiting future dropped mid-flight.
struct WaiterGuard<'a> {
    waiters: &'a Mutex<WaiterTable>,
    correlation_id: &'a CorrelationId,
    token: u64,
}

impl Drop for WaiterGuard<'_> {
    fn drop(&mut self) {
        let mut waiters = lock(self.waiters);
        if let Some(listeners) = waiters.by_correlation.get_mut(self.correlation_id) {
            listeners.retain(|(token, _)| *token != self.token);
            if listeners.is_empty() {
                waiters.by_correlation.remove(self.correlation_id);
            }
        }
    }
}

impl EventBus {
    /// Create a bus whose broadcast channels hold `capacity` messages per
    /// subscriber before the oldest are dropped.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (lifecycle, _) = broadcast::channel(capacity);
        let (diagnostic, _) = broadcast::channel(capacity);
        Self {
            lifecycle,
            diagnostic,
            waiters: Mutex::new(WaiterTable::default()),
        }
    }

    /// Publish a lifecycle event.
    ///
    /// Terminal events additionally resolve every one-shot waiter registered
    /// for the event's correlation id.
    pub fn publish_lifecycle(&self, event: &LifecycleEvent) {
        if event.is_terminal() {
            let pending = lock(&self.waiters)
                .by_correlation
                .remove(&event.correlation_id);
            if let Some(listeners) = pending {
                for (_, listener) in listeners {
                    // The waiter may have timed out already; that is fine.
                    let _ = listener.send(event.clone());
                }
            }
        }

        tracing::debug!(
            request_id = %event.request_id,
            stage = %event.stage,
            "publishing lifecycle event"
        );
        // Err means no subscriber is currently connected; non-durable by contract.
        let _ = self.lifecycle.send(event.clone());
    }

    /// Subscribe to the lifecycle channel.
    ///
    /// The returned receiver sees every event published after this call;
    /// dropping it is the unsubscribe.
    #[must_use]
    pub fn subscribe_lifecycle(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.lifecycle.subscribe()
    }

    /// Publish a diagnostic event.
    pub fn publish_diagnostic(&self, event: &DiagnosticEvent) {
        let _ = self.diagnostic.send(event.clone());
    }

    /// Subscribe to the diagnostic channel (all requests; filter by id).
    #[must_use]
    pub fn subscribe_diagnostic(&self) -> broadcast::Receiver<DiagnosticEvent> {
        self.diagnostic.subscribe()
    }

    /// Wait up to `timeout` for a terminal lifecycle event with this
    /// correlation id.
    ///
    /// Returns `None` on timeout; callers fall back to reading the
    /// then-current persisted snapshot. The listener is deregistered on
    /// every exit path, including the future being dropped before either
    /// side fires (a caller hanging up mid-wait).
    pub async fn wait_for_terminal(
        &self,
        correlation_id: &CorrelationId,
        timeout: Duration,
    ) -> Option<LifecycleEvent> {
        let (tx, rx) = oneshot::channel();
        let token = {
            let mut waiters = lock(&self.waiters);
            let token = waiters.next_token;
            waiters.next_token += 1;
            waiters
                .by_correlation
                .entry(correlation_id.clone())
                .or_default()
                .push((token, tx));
            token
        };
        let _guard = WaiterGuard {
            waiters: &self.waiters,
            correlation_id,
            token,
        };

        tokio::select! {
            event = rx => event.ok(),
            () = tokio::time::sleep(timeout) => None,
        }
    }

    /// Number of currently registered resolution waiters (test support).
    #[must_use]
    pub fn waiter_count(&self) -> usize {
        lock(&self.waiters)
            .by_correlation
            .values()
            .map(Vec::len)
            .sum()
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("waiters", &self.waiter_count())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::request::{FlowKind, RequestId, RequestStatus};

    fn lifecycle(correlation: &str, stage: RequestStatus) -> LifecycleEvent {
        LifecycleEvent {
            request_id: RequestId::generate(),
            correlation_id: CorrelationId::new(correlation),
            kind: FlowKind::new("signup"),
            stage,
        }
    }

    #[tokio::test]
    async fn lifecycle_fan_out_reaches_all_subscribers() {
        let bus = EventBus::new(16);
        let mut rx_a = bus.subscribe_lifecycle();
        let mut rx_b = bus.subscribe_lifecycle();

        let event = lifecycle("txn-1", RequestStatus::Pending);
        bus.publish_lifecycle(&event);

        assert_eq!(rx_a.recv().await.unwrap(), event);
        assert_eq!(rx_b.recv().await.unwrap(), event);
    }

    #[tokio::test]
    async fn publish_without_subscribers_is_a_noop() {
        let bus = EventBus::new(16);
        bus.publish_lifecycle(&lifecycle("txn-1", RequestStatus::Pending));
    }

    #[tokio::test]
    async fn wait_resolves_on_terminal_event() {
        let bus = std::sync::Arc::new(EventBus::new(16));
        let correlation = CorrelationId::new("txn-1");

        let waiter = {
            let bus = std::sync::Arc::clone(&bus);
            let correlation = correlation.clone();
            tokio::spawn(async move {
                bus.wait_for_terminal(&correlation, Duration::from_secs(5))
                    .await
            })
        };

        // Let the waiter register before publishing.
        tokio::task::yield_now().await;
        while bus.waiter_count() == 0 {
            tokio::task::yield_now().await;
        }

        bus.publish_lifecycle(&lifecycle("txn-1", RequestStatus::Completed));
        let resolved = waiter.await.unwrap();
        assert_eq!(resolved.unwrap().stage, RequestStatus::Completed);
        assert_eq!(bus.waiter_count(), 0);
    }

    #[tokio::test]
    async fn wait_ignores_non_terminal_events() {
        let bus = std::sync::Arc::new(EventBus::new(16));
        let correlation = CorrelationId::new("txn-1");

        let waiter = {
            let bus = std::sync::Arc::clone(&bus);
            let correlation = correlation.clone();
            tokio::spawn(async move {
                bus.wait_for_terminal(&correlation, Duration::from_millis(50))
                    .await
            })
        };
        while bus.waiter_count() == 0 {
            tokio::task::yield_now().await;
        }

        bus.publish_lifecycle(&lifecycle("txn-1", RequestStatus::Pending));
        assert!(waiter.await.unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn wait_times_out_and_deregisters() {
        let bus = EventBus::new(16);
        let correlation = CorrelationId::new("txn-1");

        let resolved = bus
            .wait_for_terminal(&correlation, Duration::from_secs(1))
            .await;
        assert!(resolved.is_none());
        assert_eq!(bus.waiter_count(), 0);
    }

    #[tokio::test]
    async fn cancelled_wait_deregisters_its_listener() {
        let bus = std::sync::Arc::new(EventBus::new(16));

        let waiter = {
            let bus = std::sync::Arc::clone(&bus);
            tokio::spawn(async move {
                bus.wait_for_terminal(&CorrelationId::new("txn-1"), Duration::from_secs(30))
                    .await
            })
        };
        while bus.waiter_count() == 0 {
            tokio::task::yield_now().await;
        }

        // Dropping the wait future (client hung up) must remove the entry.
        waiter.abort();
        let _ = waiter.await;
        assert_eq!(bus.waiter_count(), 0);
    }

    #[tokio::test]
    async fn wait_is_scoped_to_its_correlation_id() {
        let bus = std::sync::Arc::new(EventBus::new(16));

        let waiter = {
            let bus = std::sync::Arc::clone(&bus);
            tokio::spawn(async move {
                bus.wait_for_terminal(&CorrelationId::new("txn-a"), Duration::from_millis(50))
                    .await
            })
        };
        while bus.waiter_count() == 0 {
            tokio::task::yield_now().await;
        }

        bus.publish_lifecycle(&lifecycle("txn-b", RequestStatus::Completed));
        assert!(waiter.await.unwrap().is_none());
    }
}
