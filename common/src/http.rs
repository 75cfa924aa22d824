//! HTTP client configuration and the circuit-breaking client.
//!
//! [`build_http_client`] produces the pooled `reqwest` client every service
//! shares. [`ResilientClient`] layers a [`CircuitBreakingTransport`] on top
//! of such a client and is meant as a drop-in replacement for calling
//! `reqwest::Client::execute` directly.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use reqwest::{Client, ClientBuilder, IntoUrl, Method, Request, RequestBuilder, Response};
use tower::ServiceExt;

use crate::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig};
use crate::error::{KitError, KitResult};
use crate::transport::{CircuitBreakingTransport, ResponseValidator, default_validator};

/// Default overall timeout for a request made through [`ResilientClient`].
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(3);

/// HTTP client configuration.
///
/// Provides sensible defaults for production use with connection pooling,
/// timeouts, and TLS configuration.
#[derive(Debug, Clone)]
pub struct HttpConfig {
    /// Request timeout enforced by reqwest (default: 30s)
    pub timeout: Duration,
    /// Connection timeout (default: 10s)
    pub connect_timeout: Duration,
    /// Pool idle timeout (default: 90s)
    pub pool_idle_timeout: Duration,
    /// Maximum idle connections per host (default: 10)
    pub pool_max_idle_per_host: usize,
    /// User agent string
    pub user_agent: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
            pool_idle_timeout: Duration::from_secs(90),
            pool_max_idle_per_host: 10,
            user_agent: concat!("hurley-kit/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

impl HttpConfig {
    /// Create a new HTTP config with custom timeout.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Create a new HTTP config with custom connect timeout.
    #[must_use]
    pub const fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Create a new HTTP config with custom user agent.
    #[must_use]
    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    /// Create a new HTTP config with custom pool settings.
    #[must_use]
    pub const fn with_pool_config(mut self, idle_timeout: Duration, max_idle: usize) -> Self {
        self.pool_idle_timeout = idle_timeout;
        self.pool_max_idle_per_host = max_idle;
        self
    }
}

/// Build a configured HTTP client.
///
/// # Errors
///
/// Returns an error if the client cannot be built (e.g., TLS initialization fails).
///
/// # Examples
///
/// ```
/// use hurley_common::{HttpConfig, build_http_client};
/// use std::time::Duration;
///
/// let config = HttpConfig::default()
///     .with_timeout(Duration::from_secs(5));
/// let client = build_http_client(&config).expect("Failed to build client");
/// ```
pub fn build_http_client(config: &HttpConfig) -> Result<Client, reqwest::Error> {
    ClientBuilder::new()
        .timeout(config.timeout)
        .connect_timeout(config.connect_timeout)
        .pool_idle_timeout(config.pool_idle_timeout)
        .pool_max_idle_per_host(config.pool_max_idle_per_host)
        .user_agent(&config.user_agent)
        .use_rustls_tls()
        .build()
}

/// HTTP client whose requests go through a shared circuit breaker.
///
/// Cloning is cheap; clones share the connection pool and the breaker.
#[derive(Clone)]
pub struct ResilientClient {
    client: Client,
    transport: CircuitBreakingTransport<Client>,
}

impl ResilientClient {
    /// Start building a client with the default breaker (5s window,
    /// 10 observations, 50% failures) and a 3s request timeout.
    #[must_use]
    pub fn builder() -> ResilientClientBuilder {
        ResilientClientBuilder::default()
    }

    /// Build a client with all defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying reqwest client cannot be built.
    pub fn with_defaults() -> KitResult<Self> {
        Self::builder().build()
    }

    /// Send a request through the breaker.
    ///
    /// Responses that fail validation are still returned; only the breaker
    /// statistics record them as failures.
    ///
    /// # Errors
    ///
    /// Returns [`crate::KitError::CircuitOpen`] or
    /// [`crate::KitError::TooManyRequests`] when the breaker rejects the
    /// request, [`crate::KitError::Timeout`] when the request timeout
    /// elapses, and [`crate::KitError::Http`] for transport failures.
    pub async fn execute(&self, request: Request) -> KitResult<Response> {
        self.transport.clone().oneshot(request).await
    }

    /// Build `builder` and send it through the breaker.
    ///
    /// # Errors
    ///
    /// See [`ResilientClient::execute`]; request construction errors are
    /// returned as [`crate::KitError::Http`].
    pub async fn send(&self, builder: RequestBuilder) -> KitResult<Response> {
        let request = builder.build()?;
        self.execute(request).await
    }

    /// Start a request with the given method on the underlying client.
    pub fn request<U: IntoUrl>(&self, method: Method, url: U) -> RequestBuilder {
        self.client.request(method, url)
    }

    /// Start a GET request on the underlying client.
    pub fn get<U: IntoUrl>(&self, url: U) -> RequestBuilder {
        self.client.get(url)
    }

    /// Start a POST request on the underlying client.
    pub fn post<U: IntoUrl>(&self, url: U) -> RequestBuilder {
        self.client.post(url)
    }

    /// The breaker guarding this client.
    #[must_use]
    pub const fn breaker(&self) -> &Arc<CircuitBreaker> {
        self.transport.breaker()
    }
}

impl fmt::Debug for ResilientClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResilientClient")
            .field("transport", &self.transport)
            .finish_non_exhaustive()
    }
}

/// Builder for [`ResilientClient`].
pub struct ResilientClientBuilder {
    http: HttpConfig,
    breaker: CircuitBreakerConfig,
    timeout: Duration,
    transport: Option<Client>,
    validator: ResponseValidator,
}

impl Default for ResilientClientBuilder {
    fn default() -> Self {
        Self {
            http: HttpConfig::default(),
            breaker: CircuitBreakerConfig::default(),
            timeout: DEFAULT_REQUEST_TIMEOUT,
            transport: None,
            validator: default_validator(),
        }
    }
}

impl ResilientClientBuilder {
    /// Configure the breaker window, minimum observations and failure
    /// percentage. The percentage is validated by [`Self::build`].
    #[must_use]
    pub fn circuit_breaker(
        mut self,
        window: Duration,
        min_observations: u32,
        failure_percentage: u32,
    ) -> Self {
        self.breaker = self
            .breaker
            .with_window(window)
            .with_min_observations(min_observations)
            .with_failure_percentage(failure_percentage);
        self
    }

    /// Replace the whole breaker configuration.
    #[must_use]
    pub fn breaker_config(mut self, config: CircuitBreakerConfig) -> Self {
        self.breaker = config;
        self
    }

    /// Set the overall per-request timeout.
    #[must_use]
    pub const fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Use an existing reqwest client as the underlying transport.
    #[must_use]
    pub fn transport(mut self, client: Client) -> Self {
        self.transport = Some(client);
        self
    }

    /// Configure the pooled client built when no transport is supplied.
    #[must_use]
    pub fn http_config(mut self, config: HttpConfig) -> Self {
        self.http = config;
        self
    }

    /// Decide which responses count as failures.
    #[must_use]
    pub fn response_validator<F>(mut self, validator: F) -> Self
    where
        F: Fn(&Response) -> bool + Send + Sync + 'static,
    {
        self.validator = Arc::new(validator);
        self
    }

    /// Build the client.
    ///
    /// # Errors
    ///
    /// Returns [`crate::KitError::InvalidConfig`] for an invalid breaker
    /// configuration or a zero timeout, or [`crate::KitError::Http`] if the reqwest client
    /// cannot be built.
    pub fn build(self) -> KitResult<ResilientClient> {
        if self.timeout.is_zero() {
            return Err(KitError::invalid_config(
                "request timeout must be greater than 0",
            ));
        }
        let breaker = Arc::new(CircuitBreaker::new(self.breaker)?);
        let client = match self.transport {
            Some(client) => client,
            None => build_http_client(&self.http)?,
        };
        let transport = CircuitBreakingTransport::new(client.clone(), breaker)
            .with_validator(self.validator)
            .with_timeout(self.timeout);

        Ok(ResilientClient { client, transport })
    }
}

impl fmt::Debug for ResilientClientBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResilientClientBuilder")
            .field("http", &self.http)
            .field("breaker", &self.breaker)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}
