//! Error types for the fundwatch system
//!
//! This module defines all error types used throughout the crate, and the
//! classification the poll scheduler uses to pick a retry mode.

use thiserror::Error;

/// Result type alias for fundwatch operations
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for the fundwatch system
#[derive(Error, Debug)]
pub enum Error {
    /// The campaign could not be loaded during bootstrap
    #[error("Campaign load error: {0}")]
    CampaignLoad(String),

    /// The campaign's cause could not be loaded during bootstrap
    #[error("Cause load error: {0}")]
    CauseLoad(String),

    /// The fundraising service answered with a non-success status
    #[error("Remote service error ({status}): {message}")]
    Remote {
        /// HTTP status code returned by the service
        status: u16,
        /// Error message
        message: String,
    },

    /// The fundraising service could not be reached (connect, timeout)
    #[error("Transport error: {0}")]
    Transport(String),

    /// State store-related errors
    #[error("State store error: {0}")]
    StateStore(String),

    /// Events could not be handed to the event sink
    #[error("Event sink error: {0}")]
    EventSink(String),

    /// The campaign's poller was stopped while the operation ran
    #[error("Poller of campaign {0} was stopped")]
    Cancelled(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Filesystem errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Record not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Generic error with context
    #[error("{0}")]
    Other(String),
}

/// How the poll scheduler reacts to a failed tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryClass {
    /// Transient server-side failure, retry with exponential backoff
    Backoff,

    /// Authentication failure, tolerate exactly one more attempt
    Once,

    /// Permanent failure, stop polling the campaign
    Shutdown,
}

impl Error {
    /// Create a campaign load error
    pub fn campaign_load(msg: impl Into<String>) -> Self {
        Self::CampaignLoad(msg.into())
    }

    /// Create a cause load error
    pub fn cause_load(msg: impl Into<String>) -> Self {
        Self::CauseLoad(msg.into())
    }

    /// Create a remote service error from a status code
    pub fn remote(status: u16, message: impl Into<String>) -> Self {
        Self::Remote {
            status,
            message: message.into(),
        }
    }

    /// Create a transport error
    pub fn transport(msg: impl Into<String>) -> Self {
        Self::Transport(msg.into())
    }

    /// Create a state store error
    pub fn state_store(msg: impl Into<String>) -> Self {
        Self::StateStore(msg.into())
    }

    /// Create an event sink error
    pub fn event_sink(msg: impl Into<String>) -> Self {
        Self::EventSink(msg.into())
    }

    /// Create a cancellation error for a stopped campaign
    pub fn cancelled(campaign_id: impl Into<String>) -> Self {
        Self::Cancelled(campaign_id.into())
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a "not found" error
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    /// Create an invalid input error
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    /// HTTP status code carried by this error, if any
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Remote { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Classify the error for the scheduler's retry policy
    ///
    /// | error | class |
    /// |---|---|
    /// | 5xx, transport | `Backoff` |
    /// | 401 | `Once` |
    /// | 404, 422, other 4xx, persistence, anything else | `Shutdown` |
    pub fn retry_class(&self) -> RetryClass {
        match self {
            Self::Remote { status, .. } => match *status {
                401 => RetryClass::Once,
                500..=599 => RetryClass::Backoff,
                _ => RetryClass::Shutdown,
            },
            Self::Transport(_) => RetryClass::Backoff,
            _ => RetryClass::Shutdown,
        }
    }
}

/// Helper for converting anyhow::Error to our Error type
impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Self::Other(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remote_errors_are_classified_by_status() {
        assert_eq!(Error::remote(500, "boom").retry_class(), RetryClass::Backoff);
        assert_eq!(Error::remote(503, "busy").retry_class(), RetryClass::Backoff);
        assert_eq!(Error::remote(401, "expired").retry_class(), RetryClass::Once);
        assert_eq!(Error::remote(404, "gone").retry_class(), RetryClass::Shutdown);
        assert_eq!(Error::remote(422, "bad").retry_class(), RetryClass::Shutdown);
        assert_eq!(Error::remote(429, "slow down").retry_class(), RetryClass::Shutdown);
    }

    #[test]
    fn test_non_remote_errors() {
        assert_eq!(Error::transport("timeout").retry_class(), RetryClass::Backoff);
        assert_eq!(Error::state_store("disk full").retry_class(), RetryClass::Shutdown);
        assert_eq!(Error::Other("?".into()).retry_class(), RetryClass::Shutdown);
        assert_eq!(Error::cancelled("c1").retry_class(), RetryClass::Shutdown);
        assert_eq!(Error::event_sink("closed").retry_class(), RetryClass::Shutdown);
        assert_eq!(Error::state_store("x").status(), None);
        assert_eq!(Error::remote(418, "teapot").status(), Some(418));
    }
}
