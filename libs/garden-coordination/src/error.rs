//! Error types for garden coordination operations.
//!
//! Typed variants let callers tell transport failures, timeouts, rejected
//! responses and malformed payloads apart without leaking `reqwest` details.

use thiserror::Error;

/// Top-level error type for the garden-coordination crate.
#[derive(Debug, Error)]
pub enum CoordinationError {
    /// Network or connection-level failure talking to the store.
    #[error("transport error: {0}")]
    Transport(String),

    /// The request did not complete within the configured timeout.
    #[error("timeout: {0}")]
    Timeout(String),

    /// The store answered with a non-success status.
    #[error("store returned status {status} for {path}")]
    Status { status: u16, path: String },

    /// Malformed or incomplete state payload.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Configuration error (e.g. unparsable base url).
    #[error("configuration error: {0}")]
    Config(String),

    /// The operation was abandoned because its session is shutting down.
    #[error("cancelled")]
    Cancelled,
}

impl CoordinationError {
    /// Returns true if the failure is transient and the next cycle may
    /// succeed (transport, timeout or a rejected status).
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            CoordinationError::Transport(_)
                | CoordinationError::Timeout(_)
                | CoordinationError::Status { .. }
        )
    }

    /// Returns true if the store was reached but answered with a non-success
    /// status.
    pub fn is_status(&self) -> bool {
        matches!(self, CoordinationError::Status { .. })
    }

    /// Returns true if this error is a malformed payload.
    pub fn is_protocol(&self) -> bool {
        matches!(self, CoordinationError::Protocol(_))
    }
}

impl From<reqwest::Error> for CoordinationError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            CoordinationError::Timeout(err.to_string())
        } else if err.is_decode() {
            CoordinationError::Protocol(err.to_string())
        } else {
            CoordinationError::Transport(err.to_string())
        }
    }
}

/// Shorthand result alias for coordination operations.
pub type CoordinationResult<T> = Result<T, CoordinationError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        let transport = CoordinationError::Transport("conn reset".into());
        assert!(transport.is_retryable());
        assert!(!transport.is_status());
        assert!(!transport.is_protocol());

        let timeout = CoordinationError::Timeout("deadline exceeded".into());
        assert!(timeout.is_retryable());

        let status = CoordinationError::Status {
            status: 503,
            path: "/api/stato".into(),
        };
        assert!(status.is_retryable());
        assert!(status.is_status());

        let proto = CoordinationError::Protocol("missing famiglia".into());
        assert!(!proto.is_retryable());
        assert!(proto.is_protocol());

        let config = CoordinationError::Config("bad url".into());
        assert!(!config.is_retryable());

        assert!(!CoordinationError::Cancelled.is_retryable());
    }

    #[test]
    fn test_error_display() {
        let err = CoordinationError::Status {
            status: 502,
            path: "/api/health".into(),
        };
        let msg = format!("{err}");
        assert!(msg.contains("502"));
        assert!(msg.contains("/api/health"));
    }
}
