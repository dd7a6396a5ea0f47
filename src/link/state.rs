//! Connection state
//!
//! The single mutable record the link state machine owns, plus the
//! backoff policy that drives retry delays.

use serde::Serialize;
use std::fmt;
use std::time::Duration;

use crate::config::LinkConfig;

/// Connection lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    Connected,
    /// Retry budget exhausted; only an explicit start resumes
    GivenUp,
}

impl ConnectionStatus {
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionStatus::Connected)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionStatus::Disconnected => "disconnected",
            ConnectionStatus::Connecting => "connecting",
            ConnectionStatus::Connected => "connected",
            ConnectionStatus::GivenUp => "given_up",
        }
    }
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identifies one socket handle for the lifetime of a link
///
/// Events carrying a handle other than the live one come from a retired
/// socket and are ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HandleId(pub u64);

impl fmt::Display for HandleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "socket-{}", self.0)
    }
}

/// Reconnect delay policy
#[derive(Debug, Clone, PartialEq)]
pub struct BackoffPolicy {
    /// First retry delay in milliseconds
    pub base_ms: u64,
    /// Upper bound for any retry delay in milliseconds
    pub max_ms: u64,
    /// Growth factor applied after each scheduled retry
    pub multiplier: f64,
    /// Failed attempts allowed before giving up
    pub max_attempts: u32,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base_ms: 3000,
            max_ms: 30000,
            multiplier: 1.5,
            max_attempts: 5,
        }
    }
}

impl BackoffPolicy {
    pub fn from_config(config: &LinkConfig) -> Self {
        Self {
            base_ms: config.reconnect_delay_ms,
            max_ms: config.max_reconnect_delay_ms.max(config.reconnect_delay_ms),
            multiplier: config.backoff_multiplier.max(1.0),
            max_attempts: config.max_reconnect_attempts,
        }
    }

    /// Delay to use after the one just scheduled
    pub fn grow(&self, current_ms: u64) -> u64 {
        let next = (current_ms as f64 * self.multiplier).round() as u64;
        next.min(self.max_ms)
    }

    /// Whether `attempt` failures exhaust the budget
    pub fn exhausted(&self, attempt: u32) -> bool {
        attempt >= self.max_attempts
    }
}

/// Mutable per-session connection record
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionState {
    pub status: ConnectionStatus,
    /// Consecutive failures since the last successful open
    pub attempt: u32,
    /// Delay before the next scheduled retry
    pub backoff_ms: u64,
    /// The live socket handle, if any
    pub handle: Option<HandleId>,
    /// Generation tag for scheduled retries
    pub retry_epoch: u64,
}

impl ConnectionState {
    pub fn new(policy: &BackoffPolicy) -> Self {
        Self {
            status: ConnectionStatus::Disconnected,
            attempt: 0,
            backoff_ms: policy.base_ms,
            handle: None,
            retry_epoch: 0,
        }
    }

    pub fn backoff(&self) -> Duration {
        Duration::from_millis(self.backoff_ms)
    }

    /// Whether `handle` is the live socket
    pub fn owns(&self, handle: HandleId) -> bool {
        self.handle == Some(handle)
    }

    pub(crate) fn reset_backoff(&mut self, policy: &BackoffPolicy) {
        self.attempt = 0;
        self.backoff_ms = policy.base_ms;
    }
}
