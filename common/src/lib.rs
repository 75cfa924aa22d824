//! Shared resilience primitives for hurley-kit services.
//!
//! This crate provides:
//! - An error type with retryability and circuit-open classification
//! - A windowed circuit breaker
//! - A circuit-breaking Tower transport with response validation
//! - A drop-in resilient HTTP client built on `reqwest`
//! - Retry policies with exponential backoff
//! - Logging initialization and in-process counters
//! - Small string helpers

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod circuit_breaker;
pub mod error;
pub mod http;
pub mod metrics;
pub mod retry;
pub mod strutil;
pub mod tracing_config;
pub mod transport;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState, Counts};
pub use error::{BoxError, KitError, KitResult, is_circuit_open_error, is_timeout_error};
pub use http::{HttpConfig, ResilientClient, ResilientClientBuilder, build_http_client};
pub use retry::{RetryConfig, RetryPolicy, Retryable};
pub use tracing_config::{TracingConfig, init_tracing};
pub use transport::{
    CircuitBreakingLayer, CircuitBreakingTransport, ResponseValidator, default_response_validator,
};
