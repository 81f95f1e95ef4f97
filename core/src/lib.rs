//! # Veriflow Core
//!
//! Authorization-request lifecycle engine for asynchronous identity
//! verification, with in-process real-time event distribution.
//!
//! A relying application creates a [`request::PendingAuthRequest`], the
//! [`monitor::AuthorizationMonitor`] polls the external
//! [`provider::VerificationProvider`] on a fixed interval, the
//! [`transition::TransitionEngine`] maps each reported status onto the
//! single idempotent terminal write owned by the
//! [`store::RequestStore`], and the [`bus::EventBus`] fans the resulting
//! lifecycle events out to any number of subscribers, including the SSE
//! stream handlers in the web crate and the one-shot resolution wait.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────┐   create    ┌───────────────┐   start    ┌───────────────┐
//! │  Caller   ├────────────►│ Authorization  ├───────────►│ Authorization  │
//! │           │             │ Service        │            │ Monitor        │
//! └──────────┘             └───────┬───────┘            └───────┬───────┘
//!                                   │                            │ poll
//!                                   ▼                            ▼
//!                           ┌───────────────┐  CAS write  ┌───────────────┐
//!                           │ RequestStore   │◄────────────┤ Transition     │
//!                           │ (terminal      │             │ Engine         │
//!                           │  writes only)  │             └───────────────┘
//!                           └───────┬───────┘
//!                                   │ lifecycle events
//!                                   ▼
//!                           ┌───────────────┐
//!                           │   EventBus     ├──► business stream (SSE)
//!                           │                ├──► debug stream (SSE, replay)
//!                           └───────────────┘──► resolution wait (one-shot)
//! ```
//!
//! # Key guarantees
//!
//! - **At-most-once terminal mutation**: the store's compare-and-swap write
//!   means racing success/failure reports cannot resurrect or re-fail an
//!   already-terminal request; the loser is a silent no-op.
//! - **Lazy TTL expiry**: a pending request older than its kind's TTL is
//!   expired by the next read, not by a background sweep.
//! - **Non-blocking fan-out**: publishing never waits on subscribers; slow
//!   consumers lag, producers never stall.
//! - **Skip-not-queue polling**: a provider call slower than the poll
//!   interval delays the loop; the missed ticks are dropped.

pub mod bus;
pub mod completion;
pub mod config;
pub mod diagnostics;
pub mod environment;
pub mod events;
pub mod monitor;
pub mod provider;
pub mod request;
pub mod service;
pub mod store;
mod sync;
pub mod transition;

pub use bus::EventBus;
pub use completion::{CompletionError, CompletionHandler, CompletionRouter};
pub use config::EngineConfig;
pub use diagnostics::DiagnosticLog;
pub use environment::{Clock, SystemClock};
pub use events::{DiagnosticEvent, DiagnosticLevel, LifecycleEvent};
pub use monitor::AuthorizationMonitor;
pub use provider::{
    CreatedAuthorization, ProviderError, ProviderStatus, StatusPoll, VerificationProvider,
};
pub use request::{
    CallerCredential, CorrelationId, FlowKind, PendingAuthRequest, RequestId, RequestStatus,
    ResultPatch, ScopeDecision, SessionId, StreamScope, TransportMode, UserId, VerificationResult,
};
pub use service::{AuthorizationService, BeginVerification, ServiceError, StartedVerification};
pub use store::{InMemoryRequestStore, NewRequest, RequestStore, StoreError};
pub use transition::{Applied, TransitionEngine, TransitionError};
