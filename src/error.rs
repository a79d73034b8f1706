//! Huginn error types

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Last.fm error code for "no user with that name".
///
/// The code alone is unreliable (Last.fm reuses 6 for several "not found"
/// conditions), so callers should match on the message as well.
pub const CODE_INVALID_PARAMETERS: u32 = 6;

/// Typed error reported by the remote service itself.
///
/// Unlike transport failures these are part of the remote truth for a given
/// request, so they are stored in the response cache alongside successes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("{message}")]
pub struct RemoteError {
    pub code: u32,
    pub message: String,
}

impl RemoteError {
    pub fn new(code: u32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into().trim().to_string(),
        }
    }

    /// Whether this is the "no such user" error.
    ///
    /// Last.fm also reports this for existing users with an empty history.
    pub fn is_user_not_found(&self) -> bool {
        self.message.starts_with("No user with that name") || self.message == "User not found"
    }
}

/// Huginn error types
#[derive(Debug, thiserror::Error)]
pub enum HuginnError {
    // Remote service errors (cacheable)
    #[error("{0}")]
    Remote(#[from] RemoteError),

    // Network errors
    #[error("HTTP error: {0}")]
    Http(String),

    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    // Data errors
    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("unexpected payload for {method}")]
    UnexpectedPayload { method: String },

    #[error("invalid input: {0}")]
    InvalidInput(String),

    // Configuration errors
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("{0} has shut down")]
    Shutdown(&'static str),

    #[error("task aborted: {0}")]
    Aborted(String),
}

impl HuginnError {
    /// Whether this error may be stored in the response cache.
    ///
    /// Only typed remote-service errors qualify; everything else describes
    /// the path to the service rather than the answer it gave.
    pub fn is_cacheable(&self) -> bool {
        matches!(self, HuginnError::Remote(_))
    }

    /// Whether the error is likely to go away on its own.
    pub fn is_transient(&self) -> bool {
        match self {
            HuginnError::Http(_) | HuginnError::Transport(_) | HuginnError::Timeout(_) => true,
            HuginnError::Api { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }

    /// The typed remote error, if this is one.
    pub fn remote(&self) -> Option<&RemoteError> {
        match self {
            HuginnError::Remote(e) => Some(e),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for HuginnError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            HuginnError::Http(format!("request timed out: {err}"))
        } else {
            HuginnError::Http(err.to_string())
        }
    }
}

/// Result type alias for Huginn operations
pub type Result<T> = std::result::Result<T, HuginnError>;
