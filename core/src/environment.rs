//! Clock abstraction for testable time.
//!
//! TTL expiry decisions and persisted timestamps go through [`Clock`] so
//! tests can pin or advance time deterministically (see the testing crate's
//! `FixedClock`/`TestClock`).

use chrono::{DateTime, Utc};

/// Source of the current wall-clock time.
pub trait Clock: Send + Sync {
    /// Current time.
    fn now(&self) -> DateTime<Utc>;
}

/// Production clock backed by the system time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}
