//! Token engine error types.
//!
//! `TokenError` is `Clone` because a single in-flight fetch fans its result
//! out to every caller waiting on it.

use thiserror::Error;

/// Errors that can occur while obtaining a bearer token.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TokenError {
    /// Missing, empty or invalid settings. Fatal, never retried.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The token endpoint was reached but rejected the request or returned
    /// a malformed/erroring body. Also used when the only cached token has
    /// expired while refreshes keep failing.
    #[error("Identity provider error: {0}")]
    Idp(String),

    /// The token endpoint could not be reached (connect failure, timeout,
    /// broken response stream).
    #[error("Transport error: {0}")]
    Transport(String),

    /// The operation was aborted by shutdown or caller cancellation.
    #[error("Token request cancelled")]
    Cancelled,

    /// The engine was used after it was disposed.
    #[error("Token engine disposed")]
    Disposed,

    /// An outbound request could not be authorized with a bearer token.
    #[error("Unauthorized: {0}")]
    Unauthorized(String),
}

impl TokenError {
    /// Whether a later attempt could succeed (IdP and transport failures).
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, TokenError::Idp(_) | TokenError::Transport(_))
    }

    /// Bounded label for metrics.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            TokenError::Configuration(_) => "configuration",
            TokenError::Idp(_) => "idp",
            TokenError::Transport(_) => "transport",
            TokenError::Cancelled => "cancelled",
            TokenError::Disposed => "disposed",
            TokenError::Unauthorized(_) => "unauthorized",
        }
    }
}

/// Result type alias using `TokenError`
pub type Result<T> = std::result::Result<T, TokenError>;
