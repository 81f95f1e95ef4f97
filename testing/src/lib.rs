//! # Veriflow Testing
//!
//! Testing utilities and mocks for the Veriflow lifecycle engine.
//!
//! This crate provides:
//! - Deterministic clocks for TTL and expiry tests
//! - A scripted verification provider that answers polls from a fixed
//!   sequence of statuses
//! - A recording completion handler that finalizes requests and counts
//!   invocations
//!
//! ## Example
//!
//! ```ignore
//! use veriflow_testing::mocks::{ScriptedProvider, RecordingHandler};
//! use veriflow_core::provider::{ProviderStatus, StatusPoll};
//!
//! #[tokio::test(start_paused = true)]
//! async fn test_authorized_flow() {
//!     let provider = ScriptedProvider::answering(vec![
//!         StatusPoll::of(ProviderStatus::Pending),
//!         StatusPoll::of(ProviderStatus::Authorized),
//!     ]);
//!     let handler = RecordingHandler::completing(serde_json::json!({ "sub": "u1" }));
//!     // wire into an AuthorizationService and drive it...
//! }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs, clippy::pedantic)]

/// Mock implementations of the engine's seams.
pub mod mocks {
    use chrono::{DateTime, Duration, Utc};
    use std::collections::VecDeque;
    use std::future::Future;
    use std::pin::Pin;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex, PoisonError};
    use veriflow_core::{
        Clock, CompletionError, CompletionHandler, CorrelationId, CreatedAuthorization,
        PendingAuthRequest, ProviderError, RequestStatus, RequestStore, ResultPatch, StatusPoll,
        TransportMode, VerificationProvider,
    };

    fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
        mutex.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Fixed clock for deterministic tests.
    ///
    /// Always returns the same time, making tests reproducible.
    #[derive(Debug, Clone)]
    pub struct FixedClock {
        time: DateTime<Utc>,
    }

    impl FixedClock {
        /// Create a new fixed clock with the given time.
        #[must_use]
        pub const fn new(time: DateTime<Utc>) -> Self {
            Self { time }
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.time
        }
    }

    /// Manually-advanced clock for TTL and lazy-expiry tests.
    #[derive(Debug)]
    pub struct TestClock {
        now: Mutex<DateTime<Utc>>,
    }

    impl TestClock {
        /// Create a clock pinned to the given instant.
        #[must_use]
        pub fn new(start: DateTime<Utc>) -> Arc<Self> {
            Arc::new(Self {
                now: Mutex::new(start),
            })
        }

        /// Move the clock forward.
        pub fn advance(&self, by: Duration) {
            let mut now = lock(&self.now);
            *now += by;
        }
    }

    impl Clock for TestClock {
        fn now(&self) -> DateTime<Utc> {
            *lock(&self.now)
        }
    }

    /// Create a default fixed clock for tests (2026-01-01 00:00:00 UTC).
    ///
    /// # Panics
    ///
    /// Panics if the hardcoded timestamp fails to parse, which should never
    /// happen in practice.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn test_clock() -> FixedClock {
        FixedClock::new(
            DateTime::parse_from_rfc3339("2026-01-01T00:00:00Z")
                .expect("hardcoded timestamp should always parse")
                .with_timezone(&Utc),
        )
    }

    /// Verification provider that answers polls from a fixed script.
    ///
    /// The last script entry repeats once the script is exhausted, so a
    /// script ending in `Authorized` keeps answering `Authorized`. Wallet
    /// forwards consume from the same script.
    pub struct ScriptedProvider {
        script: Mutex<VecDeque<Result<StatusPoll, ProviderError>>>,
        created: AtomicUsize,
        polls: AtomicUsize,
    }

    impl ScriptedProvider {
        /// A provider answering each poll with the next scripted result.
        #[must_use]
        pub fn new(script: Vec<Result<StatusPoll, ProviderError>>) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(script.into()),
                created: AtomicUsize::new(0),
                polls: AtomicUsize::new(0),
            })
        }

        /// Shorthand for an all-successful script.
        #[must_use]
        pub fn answering(polls: Vec<StatusPoll>) -> Arc<Self> {
            Self::new(polls.into_iter().map(Ok).collect())
        }

        /// Number of polls (and wallet forwards) answered so far.
        #[must_use]
        pub fn poll_count(&self) -> usize {
            self.polls.load(Ordering::SeqCst)
        }

        /// Number of authorization transactions created so far.
        #[must_use]
        pub fn created_count(&self) -> usize {
            self.created.load(Ordering::SeqCst)
        }

        /// Replace the remaining script.
        pub fn rescript(&self, script: Vec<Result<StatusPoll, ProviderError>>) {
            *lock(&self.script) = script.into();
        }

        fn next(&self) -> Result<StatusPoll, ProviderError> {
            self.polls.fetch_add(1, Ordering::SeqCst);
            let mut script = lock(&self.script);
            let entry = if script.len() > 1 {
                script.pop_front()
            } else {
                script.front().cloned()
            };
            entry.unwrap_or(Ok(StatusPoll::of(
                veriflow_core::ProviderStatus::Pending,
            )))
        }
    }

    impl VerificationProvider for ScriptedProvider {
        fn create_authorization(
            &self,
            _mode: TransportMode,
            _requested_attributes: Vec<String>,
            _purpose: String,
        ) -> Pin<Box<dyn Future<Output = Result<CreatedAuthorization, ProviderError>> + Send + '_>>
        {
            let n = self.created.fetch_add(1, Ordering::SeqCst);
            Box::pin(async move {
                Ok(CreatedAuthorization {
                    correlation_id: CorrelationId::new(format!("txn-{n}")),
                    wallet_handoff: serde_json::json!({ "uri": format!("wallet://txn-{n}") }),
                })
            })
        }

        fn poll_status(
            &self,
            _correlation_id: CorrelationId,
        ) -> Pin<Box<dyn Future<Output = Result<StatusPoll, ProviderError>> + Send + '_>> {
            Box::pin(async { self.next() })
        }

        fn forward_wallet_response(
            &self,
            _correlation_id: CorrelationId,
            _origin: String,
            _response: serde_json::Value,
        ) -> Pin<Box<dyn Future<Output = Result<StatusPoll, ProviderError>> + Send + '_>> {
            Box::pin(async { self.next() })
        }

        fn fetch_credential_claims(
            &self,
            _correlation_id: CorrelationId,
        ) -> Pin<Box<dyn Future<Output = Result<serde_json::Value, ProviderError>> + Send + '_>>
        {
            Box::pin(async { Ok(serde_json::json!({})) })
        }
    }

    /// Completion handler that finalizes requests with fixed claims and
    /// counts its invocations.
    pub struct RecordingHandler {
        claims: serde_json::Value,
        calls: AtomicUsize,
    }

    impl RecordingHandler {
        /// A handler completing every authorized request with these claims.
        #[must_use]
        pub fn completing(claims: serde_json::Value) -> Arc<Self> {
            Arc::new(Self {
                claims,
                calls: AtomicUsize::new(0),
            })
        }

        /// Number of authorized requests handled so far.
        #[must_use]
        pub fn call_count(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl CompletionHandler for RecordingHandler {
        fn on_authorized(
            &self,
            store: Arc<dyn RequestStore>,
            request: PendingAuthRequest,
        ) -> Pin<Box<dyn Future<Output = Result<(), CompletionError>> + Send + '_>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let claims = self.claims.clone();
            Box::pin(async move {
                store
                    .transition_to_terminal(
                        request.id,
                        RequestStatus::Completed,
                        ResultPatch::completed(Some(claims), serde_json::Map::new()),
                    )
                    .await?;
                Ok(())
            })
        }
    }
}
