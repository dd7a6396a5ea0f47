//! Notification link error types
//!
//! None of these are fatal to the host: each one is either recovered
//! locally (backoff, discard) or surfaced as a notice.

use thiserror::Error;

/// Errors that can occur in the notification link
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LinkError {
    /// No active session; the connection is not attempted
    #[error("Authentication required: no active session")]
    AuthRequired,

    /// The WebSocket address could not be resolved or is unusable
    #[error("Invalid notification endpoint: {0}")]
    InvalidAddress(String),

    /// The transport could not be constructed or failed to open
    #[error("Transport failure: {0}")]
    TransportFailure(String),

    /// An inbound payload was not a structured notification
    #[error("Malformed message: {0}")]
    MalformedMessage(String),

    /// The reconnect budget is spent; a manual start is required
    #[error("Gave up reconnecting after {attempts} attempts")]
    RetryExhausted { attempts: u32 },

    /// The driver task has stopped
    #[error("Notification link is shut down")]
    Shutdown,
}

impl LinkError {
    /// Whether this error sends the link down the reconnect path
    pub fn triggers_backoff(&self) -> bool {
        matches!(
            self,
            LinkError::InvalidAddress(_) | LinkError::TransportFailure(_)
        )
    }
}

impl From<serde_json::Error> for LinkError {
    fn from(err: serde_json::Error) -> Self {
        LinkError::MalformedMessage(err.to_string())
    }
}

/// Result type alias for link operations
pub type LinkResult<T> = Result<T, LinkError>;
