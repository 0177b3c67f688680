//! Error types for the push notification side channel.

use client_state::ClientStateError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum NotificationError {
    /// The platform refused to show notifications.
    #[error("notification permission denied")]
    PermissionDenied,

    /// The subscription backend could not be reached or answered badly.
    #[error("subscription backend error: {0}")]
    Backend(String),

    /// The subscription backend answered with a non-success status.
    #[error("subscription backend returned status {status} for {path}")]
    Status { status: u16, path: String },

    /// The platform push service failed.
    #[error("push platform error: {0}")]
    Platform(String),

    /// The application server key is not valid base64url.
    #[error("invalid application server key: {0}")]
    KeyDecode(String),

    /// Persisting the enabled flag failed.
    #[error(transparent)]
    State(#[from] ClientStateError),
}

impl NotificationError {
    /// Returns true if the failure came from the backend and a later attempt
    /// may succeed.
    pub fn is_remote(&self) -> bool {
        matches!(
            self,
            NotificationError::Backend(_) | NotificationError::Status { .. }
        )
    }
}

impl From<reqwest::Error> for NotificationError {
    fn from(err: reqwest::Error) -> Self {
        NotificationError::Backend(err.to_string())
    }
}

pub type NotificationResult<T> = Result<T, NotificationError>;
