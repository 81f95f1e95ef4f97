//! Bounded per-request diagnostic trace history.
//!
//! [`DiagnosticLog`] is the single producer of diagnostic events: `record`
//! assigns the process-wide sequence number, appends the entry to the
//! request's ring, and publishes it on the bus's diagnostic channel. The ring
//! is what the debug stream replays to late subscribers; the bus is what it
//! follows live.
//!
//! Retention: a fixed-capacity ring per request
//! ([`crate::config::EngineConfig::history_capacity`]), oldest entries
//! evicted first. Replay serves whatever the ring still holds; consumers can
//! observe eviction as gaps in `seq`.

use crate::bus::EventBus;
use crate::environment::Clock;
use crate::events::{DiagnosticEvent, DiagnosticLevel};
use crate::request::RequestId;
use crate::sync::lock;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

/// Append-only trace log with bounded per-request history.
///
/// `record` is synchronous and lock-scoped so it can be called from any
/// context, including `Drop` implementations (the debug stream's close guard
/// records its final entry that way).
pub struct DiagnosticLog {
    bus: Arc<EventBus>,
    clock: Arc<dyn Clock>,
    capacity: usize,
    seq: AtomicU64,
    history: Mutex<HashMap<RequestId, VecDeque<DiagnosticEvent>>>,
}

impl DiagnosticLog {
    /// Create a log publishing to `bus`, keeping at most `capacity` entries
    /// per request.
    #[must_use]
    pub fn new(bus: Arc<EventBus>, clock: Arc<dyn Clock>, capacity: usize) -> Self {
        Self {
            bus,
            clock,
            capacity,
            seq: AtomicU64::new(0),
            history: Mutex::new(HashMap::new()),
        }
    }

    /// Record a trace entry for `request_id` and publish it.
    ///
    /// Returns the recorded event (with its assigned `seq` and timestamp).
    pub fn record(
        &self,
        request_id: RequestId,
        event_type: &str,
        level: DiagnosticLevel,
        message: impl Into<String>,
        payload: serde_json::Value,
    ) -> DiagnosticEvent {
        let event = DiagnosticEvent {
            seq: self.seq.fetch_add(1, Ordering::Relaxed),
            request_id,
            event_type: event_type.to_string(),
            level,
            message: message.into(),
            payload,
            timestamp: self.clock.now(),
        };

        {
            let mut history = lock(&self.history);
            let ring = history.entry(request_id).or_default();
            ring.push_back(event.clone());
            while ring.len() > self.capacity {
                ring.pop_front();
            }
        }

        self.bus.publish_diagnostic(&event);
        event
    }

    /// Snapshot of the buffered history for one request, oldest first.
    #[must_use]
    pub fn history(&self, request_id: RequestId) -> Vec<DiagnosticEvent> {
        lock(&self.history)
            .get(&request_id)
            .map(|ring| ring.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Drop the buffered history for one request (request deletion).
    pub fn clear(&self, request_id: RequestId) {
        lock(&self.history).remove(&request_id);
    }
}

impl std::fmt::Debug for DiagnosticLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiagnosticLog")
            .field("capacity", &self.capacity)
            .field("requests", &lock(&self.history).len())
            .finish_non_exhaustive()
    }
}
