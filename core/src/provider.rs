//! Verification provider client seam.
//!
//! The engine never talks a provider protocol itself; it depends only on the
//! shape of this trait. Implementations live with the embedding application
//! (an HTTP client against the real provider, a scripted mock in tests).

use crate::request::{CorrelationId, TransportMode};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Errors surfaced by a provider client.
///
/// The monitor converts any of these into a terminal `failed` transition;
/// a provider error never leaves a request dangling in `pending`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProviderError {
    /// Provider unreachable or the transport failed.
    #[error("Provider transport error: {0}")]
    Transport(String),

    /// Provider responded with something the client could not interpret.
    #[error("Unexpected provider payload: {0}")]
    UnexpectedPayload(String),

    /// Provider does not know this authorization.
    #[error("Unknown authorization: {0}")]
    UnknownAuthorization(CorrelationId),
}

/// Verification status as reported by the provider.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderStatus {
    /// Wallet interaction still in progress.
    Pending,
    /// The subject presented valid credentials.
    Authorized,
    /// The provider-side transaction expired.
    Expired,
    /// The subject or wallet declined.
    Rejected,
    /// The provider hit an error.
    Error,
}

/// One status poll result.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusPoll {
    /// Current provider-side status.
    pub status: ProviderStatus,
    /// Optional detail accompanying `Rejected`/`Error`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_detail: Option<String>,
}

impl StatusPoll {
    /// A poll result with no detail.
    #[must_use]
    pub const fn of(status: ProviderStatus) -> Self {
        Self {
            status,
            error_detail: None,
        }
    }
}

/// Result of creating a provider-side authorization transaction.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatedAuthorization {
    /// Unique provider handle for the transaction.
    pub correlation_id: CorrelationId,
    /// Opaque handoff payload for the wallet (deep link, QR contents, ...).
    pub wallet_handoff: serde_json::Value,
}

/// Boxed future type for dyn-compatible provider methods.
type ProviderFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, ProviderError>> + Send + 'a>>;

/// Narrow client interface to the external verification provider.
///
/// # Dyn Compatibility
///
/// Methods return explicit `Pin<Box<dyn Future>>` so the client can be held
/// as `Arc<dyn VerificationProvider>` across the monitor and the service.
pub trait VerificationProvider: Send + Sync {
    /// Start a provider-side authorization transaction.
    ///
    /// # Errors
    ///
    /// [`ProviderError`] when the provider is unreachable or the response
    /// cannot be interpreted.
    fn create_authorization(
        &self,
        mode: TransportMode,
        requested_attributes: Vec<String>,
        purpose: String,
    ) -> ProviderFuture<'_, CreatedAuthorization>;

    /// Poll the current status of a transaction.
    ///
    /// # Errors
    ///
    /// [`ProviderError`] on transport failure or unknown transactions.
    fn poll_status(&self, correlation_id: CorrelationId) -> ProviderFuture<'_, StatusPoll>;

    /// Forward a wallet's direct response to the provider, returning the
    /// resulting status.
    ///
    /// # Errors
    ///
    /// [`ProviderError`] on transport failure or unknown transactions.
    fn forward_wallet_response(
        &self,
        correlation_id: CorrelationId,
        origin: String,
        response: serde_json::Value,
    ) -> ProviderFuture<'_, StatusPoll>;

    /// Fetch the verified credential claims of an authorized transaction.
    ///
    /// # Errors
    ///
    /// [`ProviderError`] on transport failure or unknown transactions.
    fn fetch_credential_claims(
        &self,
        correlation_id: CorrelationId,
    ) -> ProviderFuture<'_, serde_json::Value>;
}
