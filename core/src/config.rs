//! Engine configuration.
//!
//! Values are provided by the embedding application through builder-style
//! setters; defaults match the reference deployment. Nothing here reads
//! files or environment variables.

use crate::request::FlowKind;
use std::collections::HashMap;
use std::time::Duration;

/// Configuration for the lifecycle engine.
///
/// # Examples
///
/// ```
/// use veriflow_core::config::EngineConfig;
/// use veriflow_core::request::FlowKind;
/// use std::time::Duration;
///
/// let config = EngineConfig::new()
///     .with_poll_interval(Duration::from_millis(500))
///     .with_ttl_for(FlowKind::new("login"), chrono::Duration::minutes(2));
///
/// assert_eq!(config.ttl(&FlowKind::new("login")), chrono::Duration::minutes(2));
/// assert_eq!(config.ttl(&FlowKind::new("signup")), chrono::Duration::minutes(10));
/// ```
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Interval between monitor poll ticks.
    ///
    /// Default: 1 second.
    pub poll_interval: Duration,

    /// Maximum pending duration before a request is lazily expired on read,
    /// for kinds without an override.
    ///
    /// Default: 10 minutes.
    pub default_ttl: chrono::Duration,

    /// Per-kind TTL overrides (shorter for time-sensitive flows).
    pub ttl_overrides: HashMap<FlowKind, chrono::Duration>,

    /// Capacity of the per-request diagnostic history ring; oldest entries
    /// are evicted first.
    ///
    /// Default: 256.
    pub history_capacity: usize,

    /// Capacity of the lifecycle and diagnostic broadcast channels. Slow
    /// subscribers past this bound lose the oldest messages rather than
    /// stalling publishers.
    ///
    /// Default: 256.
    pub channel_capacity: usize,

    /// Default bound for the one-shot resolution wait.
    ///
    /// Default: 30 seconds.
    pub resolution_timeout: Duration,
}

impl EngineConfig {
    /// Create a configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            default_ttl: chrono::Duration::minutes(10),
            ttl_overrides: HashMap::new(),
            history_capacity: 256,
            channel_capacity: 256,
            resolution_timeout: Duration::from_secs(30),
        }
    }

    /// Set the monitor poll interval.
    #[must_use]
    pub const fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Set the default TTL.
    #[must_use]
    pub const fn with_default_ttl(mut self, ttl: chrono::Duration) -> Self {
        self.default_ttl = ttl;
        self
    }

    /// Override the TTL for one flow kind.
    #[must_use]
    pub fn with_ttl_for(mut self, kind: FlowKind, ttl: chrono::Duration) -> Self {
        self.ttl_overrides.insert(kind, ttl);
        self
    }

    /// Set the diagnostic history ring capacity.
    #[must_use]
    pub const fn with_history_capacity(mut self, capacity: usize) -> Self {
        self.history_capacity = capacity;
        self
    }

    /// Set the broadcast channel capacity.
    #[must_use]
    pub const fn with_channel_capacity(mut self, capacity: usize) -> Self {
        self.channel_capacity = capacity;
        self
    }

    /// Set the default resolution-wait bound.
    #[must_use]
    pub const fn with_resolution_timeout(mut self, timeout: Duration) -> Self {
        self.resolution_timeout = timeout;
        self
    }

    /// TTL for a flow kind: the override when present, the default otherwise.
    #[must_use]
    pub fn ttl(&self, kind: &FlowKind) -> chrono::Duration {
        self.ttl_overrides
            .get(kind)
            .copied()
            .unwrap_or(self.default_ttl)
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::new()
    }
}
