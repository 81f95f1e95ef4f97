//! Business-facing SSE stream: one request's lifecycle, then close.
//!
//! # Protocol
//!
//! ```text
//! Client                   Handler                    Engine
//!   │                        │                          │
//!   ├─ GET …/stream ────────>│                          │
//!   │                        ├─ subscribe lifecycle ───>│
//!   │                        ├─ read row + authorize    │
//!   │<─ event: connected ────┤                          │
//!   │                        │<── lifecycle events ─────┤
//!   │<─ event: pending ──────┤   (pending stages)       │
//!   │<─ event: completed ────┤   (first terminal stage) │
//!   │   connection closes    │                          │
//! ```
//!
//! Event names are the stage discriminators (`connected`, `pending`,
//! `completed`, `failed`, `expired`); stream close signals terminal
//! delivery. The subscription is opened before the row is read so a
//! terminal transition landing between the two is seen either in the
//! snapshot or on the channel, never missed. Terminal events carry the
//! full persisted snapshot, so clients need no follow-up read.

use axum::{
    extract::{Path, State},
    response::sse::{Event, KeepAlive, Sse},
};
use futures::Stream;
use tokio::sync::broadcast::error::RecvError;
use tracing::debug;
use uuid::Uuid;
use veriflow_core::RequestId;

use crate::error::AppError;
use crate::extractors::Caller;
use crate::state::AppState;

/// Subscribe to a request's lifecycle as Server-Sent Events.
///
/// # Endpoint
///
/// ```text
/// GET /api/v1/requests/{id}/stream
/// ```
///
/// # Errors
///
/// 404 for unknown or expired requests; 401/403 when the caller's
/// credential does not satisfy the request's scope.
pub async fn business_stream(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    caller: Caller,
) -> Result<Sse<impl Stream<Item = Result<Event, axum::Error>>>, AppError> {
    let id = RequestId::from(id);

    // Subscribe before reading the row: a transition landing in between is
    // then visible on one side or the other. Terminal rows stay readable so
    // a client connecting after resolution still gets its one terminal
    // event; the read also applies lazy expiry.
    let mut lifecycle = state.service.bus().subscribe_lifecycle();
    let request = state.service.snapshot(id).await?;
    AppError::check_scope(request.scope.authorize(&caller.credential()))?;

    let service = state.service;
    let stream = async_stream::try_stream! {
        yield Event::default()
            .event("connected")
            .json_data(serde_json::json!({ "requestId": id }))?;

        if request.is_terminal() {
            yield Event::default()
                .event(request.status.as_str())
                .json_data(&request)?;
            return;
        }

        loop {
            let event = match lifecycle.recv().await {
                Ok(event) => event,
                Err(RecvError::Lagged(skipped)) => {
                    debug!(request_id = %id, skipped, "lifecycle subscriber lagged");
                    // Missed events may have included the terminal one.
                    match service.snapshot(id).await {
                        Ok(row) if row.is_terminal() => {
                            yield Event::default()
                                .event(row.status.as_str())
                                .json_data(&row)?;
                            return;
                        }
                        _ => continue,
                    }
                }
                Err(RecvError::Closed) => return,
            };
            if event.request_id != id {
                continue;
            }

            if event.is_terminal() {
                // Send the full snapshot so clients need no follow-up read.
                match service.snapshot(id).await {
                    Ok(row) => {
                        yield Event::default()
                            .event(row.status.as_str())
                            .json_data(&row)?;
                    }
                    Err(_) => {
                        yield Event::default()
                            .event(event.stage.as_str())
                            .json_data(serde_json::json!({
                                "requestId": id,
                                "status": event.stage,
                            }))?;
                    }
                }
                return;
            }

            yield Event::default()
                .event(event.stage.as_str())
                .json_data(serde_json::json!({
                    "requestId": id,
                    "status": event.stage,
                }))?;
        }
    };

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}
