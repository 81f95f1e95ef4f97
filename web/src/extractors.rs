//! Custom Axum extractors.
//!
//! [`Caller`] collects whatever credential material a stream request
//! carries: an authenticated user identity from the `Authorization` bearer
//! token and/or a caller-declared session correlation value from the
//! `X-Session-Id` header (or, for the debug stream, a `session` query
//! parameter merged in by the handler). It never rejects; authorization is
//! decided per request by [`veriflow_core::StreamScope::authorize`], which
//! distinguishes a missing credential (401) from a mismatched one (403).
//!
//! Token validation is the embedding application's concern: upstream
//! middleware is expected to have authenticated the bearer token and left
//! the subject identity as its value. This crate treats it as opaque.

use axum::{async_trait, extract::FromRequestParts, http::request::Parts};
use veriflow_core::{CallerCredential, SessionId, UserId};

/// Header carrying the caller-declared session correlation value.
pub const SESSION_ID_HEADER: &str = "X-Session-Id";

/// Credential material presented by the caller.
#[derive(Debug, Clone, Default)]
pub struct Caller {
    /// Authenticated user identity from the bearer token, if present.
    pub user: Option<UserId>,
    /// Session correlation value from `X-Session-Id`, if present.
    pub session: Option<SessionId>,
}

impl Caller {
    /// The credential as the scope predicate sees it.
    #[must_use]
    pub fn credential(&self) -> CallerCredential {
        CallerCredential {
            user: self.user.clone(),
            session: self.session.clone(),
        }
    }

    /// Merge a query-supplied session value (used by the debug stream,
    /// where wallet-side tooling cannot set headers). A header value wins.
    #[must_use]
    pub fn with_session_param(mut self, session: Option<String>) -> Self {
        if self.session.is_none() {
            self.session = session.map(SessionId::new);
        }
        self
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for Caller
where
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let user = parts
            .headers
            .get(http::header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .filter(|token| !token.is_empty())
            .map(UserId::new);

        let session = parts
            .headers
            .get(SESSION_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .filter(|v| !v.is_empty())
            .map(SessionId::new);

        Ok(Self { user, session })
    }
}
