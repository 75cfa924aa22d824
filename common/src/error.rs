//! Centralized error type for the hurley-kit crates.
//!
//! Every error is classified as retryable or not, and the circuit breaker
//! conditions are typed variants so callers never have to match on message
//! text to tell them apart from ordinary I/O failures.

use std::error::Error as StdError;
use std::time::Duration;

use thiserror::Error;

/// Boxed error used for transports that are not `reqwest`.
pub type BoxError = Box<dyn StdError + Send + Sync + 'static>;

/// Common error type for kit operations.
#[derive(Error, Debug)]
pub enum KitError {
    /// HTTP request failed inside reqwest
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// A non-reqwest transport failed
    #[error("transport error: {0}")]
    Transport(#[source] BoxError),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Circuit breaker is open for the specified service
    #[error("circuit open for {service}")]
    CircuitOpen {
        /// The service name that has an open circuit
        service: String,
    },

    /// Circuit breaker is half-open and already has its probes in flight
    #[error("too many requests to {service} while circuit is half-open")]
    TooManyRequests {
        /// The service name that is being probed
        service: String,
    },

    /// The request did not complete within its timeout
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    /// Invalid configuration supplied at construction time
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Invalid input provided
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Service is temporarily unavailable
    #[error("Service unavailable: {0}")]
    Unavailable(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result alias for kit operations.
pub type KitResult<T> = Result<T, KitError>;

impl KitError {
    /// Check if this error is retryable.
    ///
    /// Circuit-open is deliberately not retryable: callers should back off
    /// rather than hammer a breaker that is shedding load.
    ///
    /// # Examples
    ///
    /// ```
    /// use hurley_common::KitError;
    /// use std::time::Duration;
    ///
    /// assert!(KitError::Timeout(Duration::from_secs(3)).is_retryable());
    /// assert!(!KitError::circuit_open("billing").is_retryable());
    /// ```
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Unavailable(_) | Self::Timeout(_) | Self::Transport(_) => true,
            Self::Http(e) => e.is_timeout() || e.is_connect(),
            _ => false,
        }
    }

    /// Whether this is the circuit-open rejection.
    #[must_use]
    pub const fn is_circuit_open(&self) -> bool {
        matches!(self, Self::CircuitOpen { .. })
    }

    /// Whether this error represents a request timeout.
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        match self {
            Self::Timeout(_) => true,
            Self::Http(e) => e.is_timeout(),
            _ => false,
        }
    }

    /// Create a circuit open error for the given service.
    #[must_use]
    pub fn circuit_open(service: impl Into<String>) -> Self {
        Self::CircuitOpen {
            service: service.into(),
        }
    }

    /// Create a half-open rejection for the given service.
    #[must_use]
    pub fn too_many_requests(service: impl Into<String>) -> Self {
        Self::TooManyRequests {
            service: service.into(),
        }
    }

    /// Create an invalid configuration error.
    #[must_use]
    pub fn invalid_config(msg: impl Into<String>) -> Self {
        Self::InvalidConfig(msg.into())
    }

    /// Create an unavailable error with the given message.
    #[must_use]
    pub fn unavailable(msg: impl Into<String>) -> Self {
        Self::Unavailable(msg.into())
    }

    /// Wrap an arbitrary transport error.
    #[must_use]
    pub fn transport(err: impl Into<BoxError>) -> Self {
        Self::Transport(err.into())
    }
}

/// Walks `err` and its sources looking for a [`KitError`] matching `pred`.
fn find_in_chain(err: &(dyn StdError + 'static), pred: impl Fn(&KitError) -> bool) -> bool {
    let mut current = Some(err);
    while let Some(e) = current {
        if let Some(kit) = e.downcast_ref::<KitError>() {
            if pred(kit) {
                return true;
            }
        }
        current = e.source();
    }
    false
}

/// Reports whether `err`, or any error it wraps, is the circuit-open
/// rejection.
///
/// Middleware stacks commonly box or wrap the errors they pass along, so
/// the whole source chain is inspected.
#[must_use]
pub fn is_circuit_open_error(err: &(dyn StdError + 'static)) -> bool {
    find_in_chain(err, KitError::is_circuit_open)
}

/// Reports whether `err`, or any error it wraps, is a request timeout.
#[must_use]
pub fn is_timeout_error(err: &(dyn StdError + 'static)) -> bool {
    let mut current = Some(err);
    while let Some(e) = current {
        if let Some(kit) = e.downcast_ref::<KitError>() {
            if kit.is_timeout() {
                return true;
            }
        }
        if let Some(req) = e.downcast_ref::<reqwest::Error>() {
            if req.is_timeout() {
                return true;
            }
        }
        if e.is::<tokio::time::error::Elapsed>() {
            return true;
        }
        current = e.source();
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Error)]
    #[error("request to {url} failed")]
    struct Wrapped {
        url: String,
        #[source]
        inner: KitError,
    }

    #[test]
    fn test_retryable_errors() {
        assert!(KitError::unavailable("test").is_retryable());
        assert!(KitError::Timeout(Duration::from_secs(1)).is_retryable());
        assert!(KitError::transport("reset by peer").is_retryable());
    }

    #[test]
    fn test_non_retryable_errors() {
        assert!(!KitError::invalid_config("test").is_retryable());
        assert!(!KitError::InvalidInput("test".to_string()).is_retryable());
        assert!(!KitError::circuit_open("test").is_retryable());
        assert!(!KitError::too_many_requests("test").is_retryable());
    }

    #[test]
    fn test_error_display() {
        let err = KitError::circuit_open("vault");
        assert_eq!(err.to_string(), "circuit open for vault");

        let err = KitError::Timeout(Duration::from_secs(3));
        assert_eq!(err.to_string(), "request timed out after 3s");
    }

    #[test]
    fn test_circuit_open_found_through_wrapper() {
        let err = Wrapped {
            url: "http://billing/charge".to_string(),
            inner: KitError::circuit_open("billing"),
        };
        assert!(is_circuit_open_error(&err));
        assert!(!is_timeout_error(&err));
    }

    #[test]
    fn test_circuit_open_found_in_box() {
        let boxed: BoxError = Box::new(KitError::circuit_open("billing"));
        assert!(is_circuit_open_error(boxed.as_ref()));
    }

    #[test]
    fn test_timeout_distinct_from_circuit_open() {
        let err = Wrapped {
            url: "http://billing/charge".to_string(),
            inner: KitError::Timeout(Duration::from_millis(10)),
        };
        assert!(is_timeout_error(&err));
        assert!(!is_circuit_open_error(&err));
    }

    #[test]
    fn test_other_errors_are_neither() {
        let err = KitError::unavailable("connection refused");
        assert!(!is_circuit_open_error(&err));
        assert!(!is_timeout_error(&err));
    }
}
