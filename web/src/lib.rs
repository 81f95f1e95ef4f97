//! Axum web surface for the Veriflow lifecycle engine.
//!
//! This crate exposes [`veriflow_core::AuthorizationService`] over HTTP:
//! a JSON lifecycle API plus two Server-Sent-Events streams per request:
//! the business stream (lifecycle transitions, closes on resolution) and
//! the debug stream (diagnostic trace replay plus live tail).
//!
//! # Request Flow
//!
//! ```text
//! ┌──────────────────────────────────────────┐
//! │            HTTP shell (Axum)             │  ← JSON bodies, SSE framing
//! │  - credential extraction                 │  ← scope checks (401/403)
//! │  - error mapping                         │
//! ├──────────────────────────────────────────┤
//! │     Lifecycle engine (veriflow-core)     │
//! │  - persisted request state machine       │
//! │  - monitor polling, event bus            │
//! └──────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use veriflow_core::{AuthorizationService, CompletionRouter, EngineConfig};
//! use veriflow_web::{router, AppState};
//!
//! let service = Arc::new(AuthorizationService::new(
//!     provider,
//!     Arc::new(CompletionRouter::new()),
//!     EngineConfig::new(),
//! ));
//! let app = router(AppState::new(service));
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod error;
pub mod extractors;
pub mod handlers;
pub mod router;
pub mod state;

pub use error::AppError;
pub use extractors::{Caller, SESSION_ID_HEADER};
pub use router::router;
pub use state::AppState;

/// Result type alias for web handlers.
pub type WebResult<T> = Result<T, AppError>;
