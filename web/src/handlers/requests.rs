//! Verification request lifecycle endpoints.
//!
//! Create, read, delete, wallet-response forwarding, and the bounded
//! resolution wait. Streaming endpoints live in their own modules.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;
use veriflow_core::{
    BeginVerification, CorrelationId, FlowKind, PendingAuthRequest, RequestId, StreamScope,
    TransportMode,
};

use crate::error::AppError;
use crate::state::AppState;

/// Request body for `POST /api/v1/requests`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateRequestBody {
    /// Flow discriminator (for example `"signup"`).
    pub kind: String,
    /// Transport variant, forwarded opaquely to the provider.
    pub mode: String,
    /// Stream authorization predicate for this request.
    pub scope: StreamScope,
    /// Flow-specific payload, immutable after creation.
    #[serde(default)]
    pub metadata: serde_json::Value,
    /// Attribute names to request from the wallet.
    #[serde(default)]
    pub requested_attributes: Vec<String>,
    /// Purpose statement shown to the subject.
    pub purpose: String,
}

/// Response body for `POST /api/v1/requests`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatedRequestResponse {
    /// The persisted pending request.
    pub request: PendingAuthRequest,
    /// Opaque provider handoff for the wallet (deep link, QR payload, ...).
    pub wallet_handoff: serde_json::Value,
}

/// Create a verification request and start monitoring it.
///
/// # Endpoint
///
/// ```text
/// POST /api/v1/requests
/// ```
///
/// # Errors
///
/// 400 for an empty kind or purpose; 503 when the provider is unreachable.
pub async fn create_request(
    State(state): State<AppState>,
    Json(body): Json<CreateRequestBody>,
) -> Result<(StatusCode, Json<CreatedRequestResponse>), AppError> {
    if body.kind.trim().is_empty() {
        return Err(AppError::bad_request("kind must not be empty"));
    }
    if body.purpose.trim().is_empty() {
        return Err(AppError::bad_request("purpose must not be empty"));
    }

    let started = state
        .service
        .begin_verification(BeginVerification {
            kind: FlowKind::new(body.kind),
            mode: TransportMode::new(body.mode),
            scope: body.scope,
            metadata: body.metadata,
            requested_attributes: body.requested_attributes,
            purpose: body.purpose,
        })
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(CreatedRequestResponse {
            request: started.request,
            wallet_handoff: started.wallet_handoff,
        }),
    ))
}

/// Read a request.
///
/// Lazily-expired and deleted requests both read as 404; callers cannot
/// distinguish "never existed" from "expired".
///
/// # Endpoint
///
/// ```text
/// GET /api/v1/requests/{id}
/// ```
///
/// # Errors
///
/// 404 for unknown or expired ids.
pub async fn get_request(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<PendingAuthRequest>, AppError> {
    let request = state.service.request(RequestId::from(id)).await?;
    Ok(Json(request))
}

/// Delete a request: stops its monitor and drops the row and trace history.
///
/// # Endpoint
///
/// ```text
/// DELETE /api/v1/requests/{id}
/// ```
///
/// # Errors
///
/// 404 for unknown ids.
pub async fn delete_request(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    state.service.delete(RequestId::from(id)).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Request body for `POST /api/v1/wallet-responses`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WalletResponseBody {
    /// Provider handle of the verification transaction.
    pub correlation_id: String,
    /// Origin the wallet reported the response from.
    #[serde(default)]
    pub origin: String,
    /// Raw wallet response payload, forwarded opaquely to the provider.
    pub response: serde_json::Value,
}

/// Forward a wallet's direct response to the provider.
///
/// Returns the request snapshot after the resulting status has been
/// applied. A late forward against an already-terminal request is harmless
/// and returns the existing row.
///
/// # Endpoint
///
/// ```text
/// POST /api/v1/wallet-responses
/// ```
///
/// # Errors
///
/// 404 for an unknown correlation id; 503 when the provider is unreachable.
pub async fn forward_wallet_response(
    State(state): State<AppState>,
    Json(body): Json<WalletResponseBody>,
) -> Result<Json<PendingAuthRequest>, AppError> {
    let request = state
        .service
        .forward_wallet_response(
            CorrelationId::new(body.correlation_id),
            body.origin,
            body.response,
        )
        .await?;
    Ok(Json(request))
}

/// Query parameters for the resolution wait.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolutionQuery {
    /// Maximum wait in milliseconds; the engine default applies when absent.
    pub timeout_ms: Option<u64>,
}

/// Block until the request with this correlation id resolves, or the
/// timeout elapses.
///
/// Best-effort: timing out is not an error, the then-current snapshot is
/// returned with its (still pending) status.
///
/// # Endpoint
///
/// ```text
/// GET /api/v1/correlations/{correlation_id}/resolution
/// ```
///
/// # Errors
///
/// 404 for an unknown correlation id.
pub async fn await_resolution(
    State(state): State<AppState>,
    Path(correlation_id): Path<String>,
    Query(query): Query<ResolutionQuery>,
) -> Result<Json<PendingAuthRequest>, AppError> {
    let timeout = query.timeout_ms.map(Duration::from_millis);
    let request = state
        .service
        .await_resolution(CorrelationId::new(correlation_id), timeout)
        .await?;
    Ok(Json(request))
}
