//! Core identifiers and the persisted authorization request entity.
//!
//! This module defines strong types for request identification (`RequestId`,
//! `CorrelationId`), flow discrimination (`FlowKind`, `TransportMode`), the
//! persisted [`PendingAuthRequest`] entity, and the [`StreamScope`]
//! authorization predicate used by the streaming services.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

/// Error type for parsing non-empty identifier newtypes.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Invalid identifier: {0}")]
pub struct ParseIdError(String);

macro_rules! string_id {
    ($(#[$doc:meta])* $name:ident, $label:literal) => {
        $(#[$doc])*
        #[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub struct $name(String);

        impl $name {
            /// Create a new identifier from trusted input (no validation).
            #[must_use]
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            /// Get the identifier as a string slice.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Convert into the inner `String`.
            #[must_use]
            pub fn into_inner(self) -> String {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = ParseIdError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                if s.is_empty() {
                    return Err(ParseIdError(concat!($label, " cannot be empty").to_string()));
                }
                Ok(Self(s.to_string()))
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

string_id!(
    /// Unique handle assigned by the verification provider.
    ///
    /// This is the join key between the engine and the provider: polling,
    /// wallet-response forwarding, and the one-shot resolution channel are
    /// all keyed by it. Exactly one request ever holds a given value.
    CorrelationId,
    "Correlation ID"
);

string_id!(
    /// Flow discriminator, opaque to the engine.
    ///
    /// The engine uses it for exactly two things: selecting a TTL
    /// ([`crate::config::EngineConfig::ttl`]) and routing to the completion
    /// handler registered for this kind.
    FlowKind,
    "Flow kind"
);

string_id!(
    /// Transport variant for the provider handoff, opaque to the engine.
    TransportMode,
    "Transport mode"
);

string_id!(
    /// Authenticated user identity owning a request's streams.
    UserId,
    "User ID"
);

string_id!(
    /// Caller-declared session correlation value, for flows where no
    /// authenticated user exists yet.
    SessionId,
    "Session ID"
);

/// Internal correlation key for one verification attempt.
///
/// Generated at creation; never reused. Serializes as a plain UUID string.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RequestId(Uuid);

impl RequestId {
    /// Generate a fresh random request id.
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    /// Get the underlying UUID.
    #[must_use]
    pub const fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for RequestId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

/// Lifecycle status of a verification attempt.
///
/// A request starts `Pending` and makes exactly one transition to one of the
/// three terminal states. Terminal states never transition again; the store's
/// conditional write ([`crate::store::RequestStore::transition_to_terminal`])
/// is the only path out of `Pending`.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestStatus {
    /// Verification is in progress; the monitor is (or should be) polling.
    Pending,
    /// The provider authorized the request and the completion handler
    /// finalized it with business results.
    Completed,
    /// The provider rejected or errored, or the engine hit an unrecoverable
    /// failure while driving the request.
    Failed,
    /// The request outlived its TTL, or the provider reported expiry.
    Expired,
}

impl RequestStatus {
    /// Whether this status is terminal (anything but `Pending`).
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        !matches!(self, Self::Pending)
    }

    /// Stable string discriminator, used as the SSE event name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Expired => "expired",
        }
    }
}

impl fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Credential presented by a stream subscriber.
///
/// Either side may be absent; [`StreamScope::authorize`] decides what that
/// means for a given request.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CallerCredential {
    /// Authenticated user identity, if any.
    pub user: Option<UserId>,
    /// Caller-declared session correlation value, if any.
    pub session: Option<SessionId>,
}

impl CallerCredential {
    /// Credential for an authenticated user.
    #[must_use]
    pub fn user(id: UserId) -> Self {
        Self {
            user: Some(id),
            session: None,
        }
    }

    /// Credential for a session-scoped caller with no authenticated user.
    #[must_use]
    pub fn session(id: SessionId) -> Self {
        Self {
            user: None,
            session: Some(id),
        }
    }
}

/// Outcome of evaluating a credential against a scope.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ScopeDecision {
    /// Credential matches the scope.
    Granted,
    /// The credential kind the scope requires is missing entirely (HTTP 401).
    Unauthorized,
    /// A credential of the right kind is present but does not match (HTTP 403).
    Forbidden,
}

/// Authorization predicate gating access to a request's event streams.
///
/// Set at creation and immutable afterward. Stream services evaluate it at
/// connect time; the debug stream additionally re-evaluates it on every live
/// event so that a scope invalidated mid-stream (for example by deleting the
/// request) closes the connection.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamScope {
    /// Streams are visible only to this authenticated user.
    OwnerUser(UserId),
    /// Streams are visible only to callers declaring this session value.
    OwnerSession(SessionId),
}

impl StreamScope {
    /// Pure authorization function: `(credential, scope) -> decision`.
    ///
    /// Missing credential of the required kind yields `Unauthorized`;
    /// a present but mismatched credential yields `Forbidden`.
    #[must_use]
    pub fn authorize(&self, caller: &CallerCredential) -> ScopeDecision {
        match self {
            Self::OwnerUser(owner) => match &caller.user {
                None => ScopeDecision::Unauthorized,
                Some(user) if user == owner => ScopeDecision::Granted,
                Some(_) => ScopeDecision::Forbidden,
            },
            Self::OwnerSession(owner) => match &caller.session {
                None => ScopeDecision::Unauthorized,
                Some(session) if session == owner => ScopeDecision::Granted,
                Some(_) => ScopeDecision::Forbidden,
            },
        }
    }
}

/// Terminal outcome data, populated exactly once by the terminal write.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct VerificationResult {
    /// Terminal status discriminator this result was written with.
    pub outcome: RequestStatus,
    /// Provider claims or opaque payload, when the flow completed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub claims: Option<serde_json::Value>,
    /// Human-readable failure detail, when the flow failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_detail: Option<String>,
    /// Flow-specific extras set by the completion handler.
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Data merged into [`VerificationResult`] by a terminal transition.
///
/// The store owns stamping `outcome`; callers only supply the payload.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ResultPatch {
    /// Provider claims or opaque payload.
    pub claims: Option<serde_json::Value>,
    /// Failure detail.
    pub error_detail: Option<String>,
    /// Flow-specific extras.
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl ResultPatch {
    /// Empty patch, used by time-based expiry.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Patch carrying only a failure detail.
    #[must_use]
    pub fn error(detail: impl Into<String>) -> Self {
        Self {
            error_detail: Some(detail.into()),
            ..Self::default()
        }
    }

    /// Patch carrying completion claims and extras.
    #[must_use]
    pub fn completed(
        claims: Option<serde_json::Value>,
        extra: serde_json::Map<String, serde_json::Value>,
    ) -> Self {
        Self {
            claims,
            error_detail: None,
            extra,
        }
    }
}

/// One persisted verification attempt, from creation to terminal outcome.
///
/// Mutated only by the store: `metadata` never after creation, `status`,
/// `result` and `completed_at` only by the single terminal write.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingAuthRequest {
    /// Internal correlation key.
    pub id: RequestId,
    /// Unique handle from the verification provider.
    pub correlation_id: CorrelationId,
    /// Flow discriminator.
    pub kind: FlowKind,
    /// Transport variant.
    pub mode: TransportMode,
    /// Current lifecycle status.
    pub status: RequestStatus,
    /// Stream authorization predicate.
    pub scope: StreamScope,
    /// Flow-specific payload, immutable after creation.
    pub metadata: serde_json::Value,
    /// Terminal outcome, `None` while pending.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<VerificationResult>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Terminal transition timestamp, `None` while pending.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl PendingAuthRequest {
    /// Whether the request has reached a terminal status.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}
