//! Secret store error types.
//!
//! Provides store-specific errors with retryability classification and
//! integration with the common kit error.

use hurley_common::{KitError, Retryable};
use thiserror::Error;

/// Secret store errors.
#[derive(Error, Debug)]
pub enum SecretsError {
    /// Invalid configuration; raised at construction, never retried
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// No usable Vault client token could be obtained
    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    /// Nothing is stored at the requested path
    #[error("Secret path does not exist: {0}")]
    SecretNotFound(String),

    /// Vault answered but the response carried no data
    #[error("Vault response does not contain data: {0}")]
    EmptyData(String),

    /// S3 request failed
    #[error("Object store error: {0}")]
    ObjectStore(String),

    /// Remote store refused the request
    #[error("Secret store rejected request with status {status}: {message}")]
    Rejected {
        /// HTTP status code
        status: u16,
        /// Response body or reason
        message: String,
    },

    /// Remote store unavailable or answered with a server error
    #[error("Secret store unavailable: {0}")]
    Unavailable(String),

    /// Local file access failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// HTTP error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Kit error
    #[error(transparent)]
    Platform(#[from] KitError),
}

/// Result type for secret store operations.
pub type SecretsResult<T> = Result<T, SecretsError>;

impl SecretsError {
    /// Check if error is retryable.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Unavailable(_) => true,
            Self::Http(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            Self::Platform(e) => e.is_retryable(),
            _ => false,
        }
    }

    /// Create an invalid configuration error.
    #[must_use]
    pub fn invalid_config(msg: impl Into<String>) -> Self {
        Self::InvalidConfig(msg.into())
    }

    /// Create an unavailable error.
    #[must_use]
    pub fn unavailable(msg: impl Into<String>) -> Self {
        Self::Unavailable(msg.into())
    }

    /// Create an authentication failed error.
    #[must_use]
    pub fn auth_failed(msg: impl Into<String>) -> Self {
        Self::AuthenticationFailed(msg.into())
    }

    /// Create a secret not found error.
    #[must_use]
    pub fn not_found(path: impl Into<String>) -> Self {
        Self::SecretNotFound(path.into())
    }
}

impl Retryable for SecretsError {
    fn is_retryable(&self) -> bool {
        Self::is_retryable(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = SecretsError::unavailable("connection refused");
        assert_eq!(err.to_string(), "Secret store unavailable: connection refused");

        let err = SecretsError::not_found("secret/hurley/auth");
        assert_eq!(err.to_string(), "Secret path does not exist: secret/hurley/auth");
    }

    #[test]
    fn test_retryable_errors() {
        assert!(SecretsError::unavailable("503").is_retryable());
        assert!(!SecretsError::not_found("path").is_retryable());
        assert!(!SecretsError::invalid_config("ttl").is_retryable());
        assert!(!SecretsError::auth_failed("no token").is_retryable());
    }

    #[test]
    fn test_from_kit_error() {
        let err: SecretsError = KitError::circuit_open("vault").into();
        assert!(matches!(err, SecretsError::Platform(_)));
        assert!(!err.is_retryable());
        assert_eq!(err.to_string(), "circuit open for vault");
    }
}
