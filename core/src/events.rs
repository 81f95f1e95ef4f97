//! Event payloads published on the engine's in-process channels.
//!
//! Two event families exist:
//!
//! - [`LifecycleEvent`]: one per pending/terminal status transition,
//!   published only by the store's write paths. Consumed by both stream
//!   services and the one-shot resolution channel.
//! - [`DiagnosticEvent`]: fine-grained trace entries scoped to one request,
//!   held in a bounded per-request history and consumed by the debug stream.

use crate::request::{CorrelationId, FlowKind, RequestId, RequestStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Notification of a request's pending/terminal state change.
///
/// Published exactly once per successful transition: once at creation
/// (`Pending`) and once at the single terminal write.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LifecycleEvent {
    /// Internal id of the request that transitioned.
    pub request_id: RequestId,
    /// Provider handle of the request (resolution-channel join key).
    pub correlation_id: CorrelationId,
    /// Flow discriminator of the request.
    pub kind: FlowKind,
    /// The status the request transitioned to.
    pub stage: RequestStatus,
}

impl LifecycleEvent {
    /// Whether this event announces a terminal transition.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        self.stage.is_terminal()
    }
}

/// Severity of a diagnostic trace entry.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiagnosticLevel {
    /// Verbose detail.
    Debug,
    /// Normal progress.
    Info,
    /// Something unexpected but recoverable.
    Warn,
    /// A failure.
    Error,
}

impl fmt::Display for DiagnosticLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        };
        write!(f, "{label}")
    }
}

/// Ordered, append-only trace entry scoped to one request.
///
/// `seq` is process-wide monotone and is the event's identity: the debug
/// stream's replay protocol uses it to deduplicate the overlap between the
/// buffered history and the subscribe-then-read window.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiagnosticEvent {
    /// Process-wide monotone sequence number (dedup identity).
    pub seq: u64,
    /// Request this entry belongs to.
    pub request_id: RequestId,
    /// Machine-readable entry discriminator (for example `provider_status`).
    pub event_type: String,
    /// Severity.
    pub level: DiagnosticLevel,
    /// Human-readable message.
    pub message: String,
    /// Free-form structured payload.
    pub payload: serde_json::Value,
    /// Recording timestamp.
    pub timestamp: DateTime<Utc>,
}
