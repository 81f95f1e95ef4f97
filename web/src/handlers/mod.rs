//! HTTP request handlers.
//!
//! Organized by surface: request lifecycle CRUD, the business-facing
//! lifecycle stream, and the diagnostic debug stream.

pub mod business_stream;
pub mod debug_stream;
pub mod health;
pub mod requests;

pub use business_stream::business_stream;
pub use debug_stream::debug_stream;
pub use health::health_check;
