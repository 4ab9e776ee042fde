//! Error types for the Mailwire client.

use thiserror::Error;

/// Errors reported by the client-side rate limiter.
///
/// There is no "over limit" variant: exceeding a limit always suspends the
/// caller until a token is available, it never rejects the request.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RateLimitError {
    /// The caller's cancellation signal fired before a token was obtained.
    #[error("context canceled")]
    Canceled,

    /// The caller's deadline elapsed before a token was obtained.
    #[error("context deadline exceeded")]
    DeadlineExceeded,

    /// A rate limit setting was rejected during validation.
    #[error("invalid rate limit configuration: {field} must be between 0 and {max}, got {value}")]
    InvalidConfig {
        /// Name of the offending field
        field: &'static str,
        /// The rejected value
        value: i64,
        /// Largest accepted value
        max: i64,
    },
}

/// Main error type for Mailwire operations.
#[derive(Error, Debug)]
pub enum MailwireError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Rate limiting errors
    #[error("Rate limit error: {0}")]
    RateLimit(#[from] RateLimitError),

    /// Failures reported by the HTTP transport
    #[error("Transport error: {0}")]
    Transport(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl MailwireError {
    /// Whether a caller may reasonably retry the request.
    ///
    /// Cancellation and deadline errors originate from the caller, not the
    /// server, so they are never retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(self, MailwireError::Transport(_))
    }
}

impl From<config::ConfigError> for MailwireError {
    fn from(err: config::ConfigError) -> Self {
        MailwireError::Config(err.to_string())
    }
}

/// Result type alias for Mailwire operations.
pub type Result<T> = std::result::Result<T, MailwireError>;
