//! Circuit-breaking HTTP transport.
//!
//! [`CircuitBreakingTransport`] is a Tower service that guards any inner
//! `reqwest` transport with a shared [`CircuitBreaker`]. Each response is
//! passed through a [`ResponseValidator`]; a response that fails
//! validation counts as a breaker failure but is still handed back to the
//! caller untouched.

use std::fmt;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use futures::future::BoxFuture;
use reqwest::{Request, Response};
use tower::{Layer, Service};
use tracing::debug;

use crate::circuit_breaker::CircuitBreaker;
use crate::error::{KitError, KitResult};

/// Decides whether a response counts as a success for the breaker.
pub type ResponseValidator = Arc<dyn Fn(&Response) -> bool + Send + Sync>;

/// Any status below 500 is a success from the client's point of view.
#[must_use]
pub fn default_response_validator(response: &Response) -> bool {
    response.status().as_u16() < 500
}

/// The validator used when none is configured.
#[must_use]
pub fn default_validator() -> ResponseValidator {
    Arc::new(default_response_validator)
}

/// Tower service wrapping an inner transport with a circuit breaker.
pub struct CircuitBreakingTransport<S> {
    inner: S,
    breaker: Arc<CircuitBreaker>,
    validator: ResponseValidator,
    timeout: Option<Duration>,
}

impl<S> CircuitBreakingTransport<S> {
    /// Wrap `inner` with `breaker` using the default validator and no
    /// per-request timeout.
    #[must_use]
    pub fn new(inner: S, breaker: Arc<CircuitBreaker>) -> Self {
        Self {
            inner,
            breaker,
            validator: default_validator(),
            timeout: None,
        }
    }

    /// Use a custom response validator.
    #[must_use]
    pub fn with_validator(mut self, validator: ResponseValidator) -> Self {
        self.validator = validator;
        self
    }

    /// Bound every request by `timeout`.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// The breaker guarding this transport.
    #[must_use]
    pub const fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }
}

impl<S: Clone> Clone for CircuitBreakingTransport<S> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            breaker: self.breaker.clone(),
            validator: self.validator.clone(),
            timeout: self.timeout,
        }
    }
}

impl<S: fmt::Debug> fmt::Debug for CircuitBreakingTransport<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreakingTransport")
            .field("inner", &self.inner)
            .field("breaker", &self.breaker.name())
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl<S> Service<Request> for CircuitBreakingTransport<S>
where
    S: Service<Request, Response = Response> + Clone + Send + 'static,
    S::Error: Into<KitError>,
    S::Future: Send + 'static,
{
    type Response = Response;
    type Error = KitError;
    type Future = BoxFuture<'static, KitResult<Response>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx).map_err(Into::into)
    }

    fn call(&mut self, mut req: Request) -> Self::Future {
        // Take the service that was driven to readiness and leave a clone.
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);
        let breaker = self.breaker.clone();
        let validator = self.validator.clone();
        let timeout = self.timeout;

        // Lets reqwest keep enforcing the limit while the body is read.
        if let Some(limit) = timeout {
            req.timeout_mut().get_or_insert(limit);
        }

        Box::pin(async move {
            let url = req.url().clone();
            let attempt = async move {
                let fut = inner.call(req);
                match timeout {
                    Some(limit) => tokio::time::timeout(limit, fut)
                        .await
                        .map_err(|_| KitError::Timeout(limit))?
                        .map_err(Into::into),
                    None => fut.await.map_err(Into::into),
                }
            };

            let result = breaker
                .execute_with(attempt, |result| {
                    matches!(result, Ok(response) if validator(response))
                })
                .await;

            match &result {
                Ok(response) => debug!(%url, status = %response.status(), "Request completed"),
                Err(e) => debug!(%url, error = %e, "Request failed"),
            }
            result
        })
    }
}

/// Tower layer producing [`CircuitBreakingTransport`]s that share one breaker.
#[derive(Clone)]
pub struct CircuitBreakingLayer {
    breaker: Arc<CircuitBreaker>,
    validator: ResponseValidator,
    timeout: Option<Duration>,
}

impl CircuitBreakingLayer {
    /// Create a layer around `breaker`.
    #[must_use]
    pub fn new(breaker: Arc<CircuitBreaker>) -> Self {
        Self {
            breaker,
            validator: default_validator(),
            timeout: None,
        }
    }

    /// Use a custom response validator.
    #[must_use]
    pub fn with_validator(mut self, validator: ResponseValidator) -> Self {
        self.validator = validator;
        self
    }

    /// Bound every request by `timeout`.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

impl fmt::Debug for CircuitBreakingLayer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreakingLayer")
            .field("breaker", &self.breaker.name())
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl<S> Layer<S> for CircuitBreakingLayer {
    type Service = CircuitBreakingTransport<S>;

    fn layer(&self, inner: S) -> Self::Service {
        CircuitBreakingTransport {
            inner,
            breaker: self.breaker.clone(),
            validator: self.validator.clone(),
            timeout: self.timeout,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::circuit_breaker::{CircuitBreakerConfig, CircuitState};
    use crate::error::is_circuit_open_error;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tower::ServiceExt;

    fn response(status: u16) -> Response {
        Response::from(
            http::Response::builder()
                .status(status)
                .body(Vec::<u8>::new())
                .unwrap(),
        )
    }

    fn request() -> Request {
        Request::new(
            reqwest::Method::GET,
            reqwest::Url::parse("http://upstream.local/health").unwrap(),
        )
    }

    fn breaker(min_observations: u32) -> Arc<CircuitBreaker> {
        Arc::new(
            CircuitBreaker::new(
                CircuitBreakerConfig::default()
                    .with_min_observations(min_observations)
                    .with_failure_percentage(50),
            )
            .unwrap(),
        )
    }

    fn fixed_status(
        status: u16,
        calls: Arc<AtomicUsize>,
    ) -> impl Service<Request, Response = Response, Error = KitError, Future: Send> + Clone + Send
    {
        tower::service_fn(move |_req: Request| {
            calls.fetch_add(1, Ordering::SeqCst);
            async move { Ok::<_, KitError>(response(status)) }
        })
    }

    #[test]
    fn test_default_validator_codes() {
        for status in [200, 404, 499] {
            assert!(default_response_validator(&response(status)), "{status}");
        }
        for status in [500, 503] {
            assert!(!default_response_validator(&response(status)), "{status}");
        }
    }

    #[test]
    fn test_ready_when_inner_ready() {
        let mut transport =
            CircuitBreakingTransport::new(fixed_status(200, Arc::new(AtomicUsize::new(0))), breaker(10));
        let mut task = tokio_test::task::spawn(());
        tokio_test::assert_ready_ok!(task.enter(|cx, _| transport.poll_ready(cx)));
    }

    #[tokio::test]
    async fn test_invalid_response_returned_and_counted() {
        let calls = Arc::new(AtomicUsize::new(0));
        let cb = breaker(10);
        let transport = CircuitBreakingTransport::new(fixed_status(503, calls.clone()), cb.clone());

        let resp = transport.oneshot(request()).await.unwrap();

        assert_eq!(resp.status().as_u16(), 503);
        assert_eq!(cb.counts().total_failures, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_trips_and_fails_fast_without_calling_inner() {
        let calls = Arc::new(AtomicUsize::new(0));
        let cb = breaker(4);
        let transport = CircuitBreakingTransport::new(fixed_status(500, calls.clone()), cb.clone());

        for _ in 0..4 {
            let resp = transport.clone().oneshot(request()).await.unwrap();
            assert_eq!(resp.status().as_u16(), 500);
        }
        assert_eq!(cb.state(), CircuitState::Open);

        let err = transport.clone().oneshot(request()).await.unwrap_err();
        assert!(err.is_circuit_open());
        assert!(is_circuit_open_error(&err));
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_transport_error_recorded_and_propagated() {
        let cb = breaker(10);
        let failing = tower::service_fn(|_req: Request| async {
            Err::<Response, _>(KitError::unavailable("connection refused"))
        });
        let transport = CircuitBreakingTransport::new(failing, cb.clone());

        let err = transport.oneshot(request()).await.unwrap_err();

        assert!(matches!(err, KitError::Unavailable(_)));
        assert_eq!(cb.counts().total_failures, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_is_not_circuit_open() {
        let cb = breaker(10);
        let slow = tower::service_fn(|_req: Request| async {
            tokio::time::sleep(Duration::from_secs(10)).await;
            Ok::<_, KitError>(response(200))
        });
        let transport =
            CircuitBreakingTransport::new(slow, cb.clone()).with_timeout(Duration::from_secs(3));

        let err = transport.oneshot(request()).await.unwrap_err();

        assert!(err.is_timeout());
        assert!(!err.is_circuit_open());
        assert_eq!(cb.counts().total_failures, 1);
    }

    #[tokio::test]
    async fn test_timeout_carried_on_request() {
        let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let recorder = seen.clone();
        let inner = tower::service_fn(move |req: Request| {
            recorder.lock().push(req.timeout().copied());
            async { Ok::<_, KitError>(response(200)) }
        });
        let transport =
            CircuitBreakingTransport::new(inner, breaker(10)).with_timeout(Duration::from_secs(3));

        transport.clone().oneshot(request()).await.unwrap();
        let mut explicit = request();
        *explicit.timeout_mut() = Some(Duration::from_secs(1));
        transport.oneshot(explicit).await.unwrap();

        assert_eq!(
            *seen.lock(),
            vec![Some(Duration::from_secs(3)), Some(Duration::from_secs(1))]
        );
    }

    #[tokio::test]
    async fn test_custom_validator() {
        let calls = Arc::new(AtomicUsize::new(0));
        let cb = breaker(10);
        let not_found_is_failure: ResponseValidator =
            Arc::new(|resp: &Response| resp.status().is_success());
        let transport = CircuitBreakingLayer::new(cb.clone())
            .with_validator(not_found_is_failure)
            .layer(fixed_status(404, calls));

        let resp = transport.oneshot(request()).await.unwrap();

        assert_eq!(resp.status().as_u16(), 404);
        assert_eq!(cb.counts().total_failures, 1);
    }
}
