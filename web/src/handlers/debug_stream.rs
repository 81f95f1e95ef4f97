//! Diagnostic SSE stream: buffered trace replay plus live tail.
//!
//! # Replay protocol
//!
//! The handler subscribes to the diagnostic channel *before* reading the
//! buffered history, so every entry is observed at least once: either in
//! the history snapshot or on the channel. The overlap between the two
//! windows is deduplicated by each entry's process-wide `seq`.
//!
//! ```text
//! 1. subscribe diagnostic + lifecycle channels
//! 2. read row, authorize caller against its scope
//! 3. replay buffered history, remembering every seq sent
//! 4. drain entries already queued on the channel, skipping seen seqs
//! 5. live tail: forward new entries, re-authorizing on each one
//! 6. close on the request's terminal lifecycle event
//! ```
//!
//! Wallet-side tooling often cannot set headers mid-flow, so this endpoint
//! additionally accepts the session credential as a `session` query
//! parameter; a header value wins when both are present.
//!
//! Every close path records a `stream_closed` trace entry with its reason,
//! including abrupt client disconnects (via the guard's `Drop`).

use std::collections::HashSet;
use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    response::sse::{Event, KeepAlive, Sse},
};
use futures::Stream;
use serde::Deserialize;
use tokio::sync::broadcast::error::{RecvError, TryRecvError};
use tracing::debug;
use uuid::Uuid;
use veriflow_core::{DiagnosticLevel, DiagnosticLog, RequestId, ScopeDecision};

use crate::error::AppError;
use crate::extractors::Caller;
use crate::state::AppState;

/// Query parameters for the debug stream.
#[derive(Debug, Deserialize)]
pub struct DebugStreamQuery {
    /// Session credential fallback for callers that cannot set headers.
    pub session: Option<String>,
}

/// Records a `stream_closed` trace entry when the stream ends, whatever
/// the path: protocol close, scope revocation, or the client hanging up.
struct CloseGuard {
    diagnostics: Arc<DiagnosticLog>,
    request_id: RequestId,
    reason: &'static str,
}

impl CloseGuard {
    fn new(diagnostics: Arc<DiagnosticLog>, request_id: RequestId) -> Self {
        Self {
            diagnostics,
            request_id,
            reason: "client disconnected",
        }
    }
}

impl Drop for CloseGuard {
    fn drop(&mut self) {
        self.diagnostics.record(
            self.request_id,
            "stream_closed",
            DiagnosticLevel::Debug,
            "debug stream closed",
            serde_json::json!({ "reason": self.reason }),
        );
    }
}

/// Drain entries already queued on the diagnostic channel, in arrival
/// order, keeping those for `id` whose `seq` has not been sent yet.
///
/// History replay and the subscribe-before-read window overlap: an entry
/// recorded between subscribing and reading the history shows up in both.
/// The `sent` set keeps each seq to exactly one delivery.
fn drain_backlog(
    rx: &mut tokio::sync::broadcast::Receiver<veriflow_core::DiagnosticEvent>,
    id: RequestId,
    sent: &mut HashSet<u64>,
) -> Vec<veriflow_core::DiagnosticEvent> {
    let mut backlog = Vec::new();
    loop {
        match rx.try_recv() {
            Ok(entry) if entry.request_id == id && sent.insert(entry.seq) => {
                backlog.push(entry);
            }
            Ok(_) => {}
            Err(TryRecvError::Empty | TryRecvError::Closed) => break,
            Err(TryRecvError::Lagged(_)) => {}
        }
    }
    backlog
}

/// Subscribe to a request's diagnostic trace as Server-Sent Events.
///
/// # Endpoint
///
/// ```text
/// GET /api/v1/requests/{id}/debug/stream?session=...
/// ```
///
/// # Errors
///
/// 404 for unknown requests; 401/403 when the caller's credential does not
/// satisfy the request's scope.
pub async fn debug_stream(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Query(query): Query<DebugStreamQuery>,
    caller: Caller,
) -> Result<Sse<impl Stream<Item = Result<Event, axum::Error>>>, AppError> {
    let id = RequestId::from(id);
    let caller = caller.with_session_param(query.session);
    let credential = caller.credential();

    // Subscribe before the history read so no entry falls between the two.
    let mut diagnostic = state.service.bus().subscribe_diagnostic();
    let mut lifecycle = state.service.bus().subscribe_lifecycle();

    // Terminal rows stay readable here: the trace is most useful after a
    // failure.
    let request = state.service.snapshot(id).await?;
    AppError::check_scope(request.scope.authorize(&credential))?;

    let service = state.service;
    let diagnostics = Arc::clone(service.diagnostics());
    let history = diagnostics.history(id);

    let stream = async_stream::try_stream! {
        let mut guard = CloseGuard::new(diagnostics, id);
        let mut sent: HashSet<u64> = HashSet::new();

        yield Event::default()
            .event("connected")
            .json_data(serde_json::json!({
                "requestId": id,
                "replayCount": history.len(),
            }))?;

        for entry in history {
            sent.insert(entry.seq);
            yield Event::default().event("diagnostic").json_data(&entry)?;
        }

        // Entries published between subscribing and reading the history are
        // already queued; flush them now, skipping the replayed overlap.
        for entry in drain_backlog(&mut diagnostic, id, &mut sent) {
            yield Event::default().event("diagnostic").json_data(&entry)?;
        }

        if request.is_terminal() {
            guard.reason = "request resolved";
            yield Event::default()
                .event("closed")
                .json_data(serde_json::json!({ "reason": guard.reason }))?;
            return;
        }

        loop {
            tokio::select! {
                entry = diagnostic.recv() => {
                    let entry = match entry {
                        Ok(entry) => entry,
                        Err(RecvError::Lagged(skipped)) => {
                            debug!(request_id = %id, skipped, "diagnostic subscriber lagged");
                            continue;
                        }
                        Err(RecvError::Closed) => return,
                    };
                    if entry.request_id != id || !sent.insert(entry.seq) {
                        continue;
                    }

                    // Re-check the scope on every entry: deleting the
                    // request (or rewriting its scope upstream) must cut
                    // the stream off, not just future connects.
                    match service.snapshot(id).await {
                        Ok(row) => {
                            if row.scope.authorize(&credential) != ScopeDecision::Granted {
                                guard.reason = "scope revoked";
                                yield Event::default()
                                    .event("closed")
                                    .json_data(serde_json::json!({ "reason": guard.reason }))?;
                                return;
                            }
                        }
                        Err(_) => {
                            guard.reason = "request deleted";
                            yield Event::default()
                                .event("closed")
                                .json_data(serde_json::json!({ "reason": guard.reason }))?;
                            return;
                        }
                    }

                    yield Event::default().event("diagnostic").json_data(&entry)?;
                }
                event = lifecycle.recv() => {
                    match event {
                        Ok(event) if event.request_id == id && event.is_terminal() => {
                            guard.reason = "request resolved";
                            yield Event::default()
                                .event("closed")
                                .json_data(serde_json::json!({
                                    "reason": guard.reason,
                                    "status": event.stage,
                                }))?;
                            return;
                        }
                        Ok(_) => {}
                        Err(RecvError::Lagged(_)) => {
                            if let Ok(row) = service.snapshot(id).await {
                                if row.is_terminal() {
                                    guard.reason = "request resolved";
                                    yield Event::default()
                                        .event("closed")
                                        .json_data(serde_json::json!({ "reason": guard.reason }))?;
                                    return;
                                }
                            }
                        }
                        Err(RecvError::Closed) => return,
                    }
                }
            }
        }
    };

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}
