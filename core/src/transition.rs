//! Pure dispatch from a provider status to a store transition.
//!
//! The engine maps each [`ProviderStatus`] to at most one store action:
//!
//! | provider status | action |
//! |---|---|
//! | `pending` | nothing |
//! | `authorized` | delegate to the completion handler (it writes `Completed`) |
//! | `expired` | terminal `Expired`, empty patch |
//! | `rejected` / `error` | terminal `Failed` with the reported or default detail |
//!
//! The `authorized` branch never writes the store itself; the handler owns
//! that write, which is what prevents a double terminal write between the
//! engine and the flow's business logic.

use crate::completion::{CompletionError, CompletionHandler};
use crate::provider::{ProviderStatus, StatusPoll};
use crate::request::{PendingAuthRequest, RequestStatus, ResultPatch};
use crate::store::{RequestStore, StoreError};
use std::sync::Arc;
use thiserror::Error;

/// Default detail for a `rejected` poll carrying none.
const REJECTED_DETAIL: &str = "verification rejected by provider";
/// Default detail for an `error` poll carrying none.
const ERROR_DETAIL: &str = "verification provider reported an error";

/// Errors from applying a transition.
#[derive(Error, Debug)]
pub enum TransitionError {
    /// The store write failed.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The completion handler failed.
    #[error(transparent)]
    Completion(#[from] CompletionError),
}

/// What a transition application did, for logging and tests.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Applied {
    /// Provider still pending; nothing to do.
    Nothing,
    /// Delegated to the completion handler.
    Delegated,
    /// Wrote (or no-op'd against) the given terminal status.
    Terminal(RequestStatus),
}

/// Maps provider statuses onto store transitions.
pub struct TransitionEngine {
    store: Arc<dyn RequestStore>,
}

impl TransitionEngine {
    /// Create an engine writing through `store`.
    #[must_use]
    pub fn new(store: Arc<dyn RequestStore>) -> Self {
        Self { store }
    }

    /// Apply one poll result for `request`.
    ///
    /// # Errors
    ///
    /// Store or completion failures; the monitor converts those into a
    /// terminal `failed` transition.
    pub async fn apply(
        &self,
        request: &PendingAuthRequest,
        poll: StatusPoll,
        handler: &dyn CompletionHandler,
    ) -> Result<Applied, TransitionError> {
        match poll.status {
            ProviderStatus::Pending => Ok(Applied::Nothing),
            ProviderStatus::Authorized => {
                tracing::debug!(
                    request_id = %request.id,
                    kind = %request.kind,
                    "provider authorized, delegating to completion handler"
                );
                handler
                    .on_authorized(Arc::clone(&self.store), request.clone())
                    .await?;
                Ok(Applied::Delegated)
            }
            ProviderStatus::Expired => {
                self.store
                    .transition_to_terminal(request.id, RequestStatus::Expired, ResultPatch::empty())
                    .await?;
                Ok(Applied::Terminal(RequestStatus::Expired))
            }
            ProviderStatus::Rejected | ProviderStatus::Error => {
                let default = if poll.status == ProviderStatus::Rejected {
                    REJECTED_DETAIL
                } else {
                    ERROR_DETAIL
                };
                let detail = poll.error_detail.unwrap_or_else(|| default.to_string());
                self.store
                    .transition_to_terminal(
                        request.id,
                        RequestStatus::Failed,
                        ResultPatch::error(detail),
                    )
                    .await?;
                Ok(Applied::Terminal(RequestStatus::Failed))
            }
        }
    }
}
