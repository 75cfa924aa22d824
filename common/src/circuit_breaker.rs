//! Windowed circuit breaker.
//!
//! Request outcomes are aggregated over a rolling window. The breaker trips
//! from `Closed` to `Open` once a window has seen enough requests and the
//! failure ratio reaches the configured percentage. After a cool-down it
//! admits a limited number of probes in `HalfOpen`; a successful probe
//! closes the circuit, a failed one re-opens it.
//!
//! Every state change (and every window roll-over while closed) starts a
//! new generation. Outcomes reported against an older generation are
//! dropped so a slow request cannot skew the counts of a newer window.

use std::future::Future;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::error::{KitError, KitResult};
use crate::metrics::BreakerMetrics;

/// Circuit breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Circuit is closed, requests are allowed
    Closed,
    /// Circuit is open, requests are rejected
    Open,
    /// Circuit is half-open, limited requests are allowed to test recovery
    HalfOpen,
}

/// Circuit breaker configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CircuitBreakerConfig {
    /// Name used in errors and log fields
    pub name: String,
    /// Window over which request counts are aggregated while closed
    pub window: Duration,
    /// Minimum requests in a window before the breaker may trip
    pub min_observations: u32,
    /// Percentage of failed requests (0, 100] that trips the breaker
    pub failure_percentage: u32,
    /// Time spent open before probing in half-open
    pub cool_down: Duration,
    /// Requests admitted while half-open; this many consecutive successes close it
    pub max_probes: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            name: "http-client".to_string(),
            window: Duration::from_secs(5),
            min_observations: 10,
            failure_percentage: 50,
            cool_down: Duration::from_secs(60),
            max_probes: 1,
        }
    }
}

impl CircuitBreakerConfig {
    /// Set the name reported in errors and logs.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Set the aggregation window.
    #[must_use]
    pub const fn with_window(mut self, window: Duration) -> Self {
        self.window = window;
        self
    }

    /// Set the minimum number of observations per window.
    #[must_use]
    pub const fn with_min_observations(mut self, min_observations: u32) -> Self {
        self.min_observations = min_observations;
        self
    }

    /// Set the failure percentage that trips the breaker.
    #[must_use]
    pub const fn with_failure_percentage(mut self, failure_percentage: u32) -> Self {
        self.failure_percentage = failure_percentage;
        self
    }

    /// Set the open-state cool-down.
    #[must_use]
    pub const fn with_cool_down(mut self, cool_down: Duration) -> Self {
        self.cool_down = cool_down;
        self
    }

    /// Set the number of half-open probes.
    #[must_use]
    pub const fn with_max_probes(mut self, max_probes: u32) -> Self {
        self.max_probes = max_probes;
        self
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`KitError::InvalidConfig`] when the failure percentage is
    /// outside `(0, 100]` or the half-open probe count is zero.
    pub fn validate(&self) -> KitResult<()> {
        if self.failure_percentage == 0 || self.failure_percentage > 100 {
            return Err(KitError::invalid_config(
                "failure_percentage must be in the range (0, 100]",
            ));
        }
        if self.max_probes == 0 {
            return Err(KitError::invalid_config("max_probes must be at least 1"));
        }
        Ok(())
    }

    /// Whether the given counts should trip a closed breaker.
    #[must_use]
    pub fn ready_to_trip(&self, counts: &Counts) -> bool {
        if counts.requests == 0 || counts.requests < self.min_observations {
            return false;
        }
        let failure_ratio = f64::from(counts.total_failures) / f64::from(counts.requests);
        failure_ratio >= f64::from(self.failure_percentage) / 100.0
    }
}

/// Request counts for the current generation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Counts {
    /// Requests admitted, including those still in flight
    pub requests: u32,
    /// Successful requests
    pub total_successes: u32,
    /// Failed requests
    pub total_failures: u32,
    /// Successes since the last failure
    pub consecutive_successes: u32,
    /// Failures since the last success
    pub consecutive_failures: u32,
}

impl Counts {
    const fn on_request(&mut self) {
        self.requests = self.requests.saturating_add(1);
    }

    const fn on_success(&mut self) {
        self.total_successes = self.total_successes.saturating_add(1);
        self.consecutive_successes = self.consecutive_successes.saturating_add(1);
        self.consecutive_failures = 0;
    }

    const fn on_failure(&mut self) {
        self.total_failures = self.total_failures.saturating_add(1);
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        self.consecutive_successes = 0;
    }
}

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    generation: u64,
    counts: Counts,
    expiry: Option<Instant>,
}

/// Circuit breaker shared by every request to one dependency.
///
/// Cheap to share behind an `Arc`; all bookkeeping happens under a short,
/// synchronous lock that is never held across an await point.
#[derive(Debug)]
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    inner: Mutex<BreakerState>,
    metrics: BreakerMetrics,
}

impl CircuitBreaker {
    /// Create a new circuit breaker with the given configuration.
    ///
    /// # Errors
    ///
    /// Returns [`KitError::InvalidConfig`] if the configuration is invalid.
    pub fn new(config: CircuitBreakerConfig) -> KitResult<Self> {
        config.validate()?;
        Ok(Self::from_valid_config(config))
    }

    /// Create a circuit breaker with default configuration.
    #[must_use]
    pub fn with_defaults() -> Self {
        Self::from_valid_config(CircuitBreakerConfig::default())
    }

    fn from_valid_config(config: CircuitBreakerConfig) -> Self {
        let metrics = BreakerMetrics::new(&config.name);
        Self {
            inner: Mutex::new(BreakerState {
                state: CircuitState::Closed,
                generation: 0,
                counts: Counts::default(),
                expiry: closed_expiry(&config, Instant::now()),
            }),
            config,
            metrics,
        }
    }

    /// The breaker's name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// The breaker's configuration.
    #[must_use]
    pub const fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Outcome counters for this breaker.
    #[must_use]
    pub const fn metrics(&self) -> &BreakerMetrics {
        &self.metrics
    }

    /// Get the current circuit state, applying any pending time-based
    /// transition first.
    #[must_use]
    pub fn state(&self) -> CircuitState {
        let mut inner = self.inner.lock();
        self.current_state(&mut inner, Instant::now());
        inner.state
    }

    /// Get the counts of the current generation.
    #[must_use]
    pub fn counts(&self) -> Counts {
        let mut inner = self.inner.lock();
        self.current_state(&mut inner, Instant::now());
        inner.counts
    }

    /// Admit a request, returning the generation it belongs to.
    ///
    /// # Errors
    ///
    /// Returns [`KitError::CircuitOpen`] while open, or
    /// [`KitError::TooManyRequests`] when half-open and all probes are in
    /// flight.
    pub fn before_request(&self) -> KitResult<u64> {
        let mut inner = self.inner.lock();
        let now = Instant::now();
        self.current_state(&mut inner, now);

        match inner.state {
            CircuitState::Open => {
                self.metrics.rejections.inc();
                return Err(KitError::circuit_open(&self.config.name));
            }
            CircuitState::HalfOpen if inner.counts.requests >= self.config.max_probes => {
                self.metrics.rejections.inc();
                return Err(KitError::too_many_requests(&self.config.name));
            }
            _ => {}
        }

        inner.counts.on_request();
        Ok(inner.generation)
    }

    /// Record the outcome of a request admitted in `generation`.
    pub fn after_request(&self, generation: u64, success: bool) {
        let mut inner = self.inner.lock();
        let now = Instant::now();
        self.current_state(&mut inner, now);

        if inner.generation != generation {
            debug!(
                circuit = %self.config.name,
                generation,
                current = inner.generation,
                "Dropping outcome from a previous generation"
            );
            return;
        }

        if success {
            self.metrics.successes.inc();
            self.on_success(&mut inner, now);
        } else {
            self.metrics.failures.inc();
            self.on_failure(&mut inner, now);
        }
    }

    /// Run `fut` under the breaker, counting `Ok` as success.
    ///
    /// # Errors
    ///
    /// Returns the breaker rejection without polling `fut`, or `fut`'s own
    /// error.
    pub async fn execute<F, T>(&self, fut: F) -> KitResult<T>
    where
        F: Future<Output = KitResult<T>>,
    {
        self.execute_with(fut, Result::is_ok).await
    }

    /// Run `fut` under the breaker, letting `is_success` classify the result.
    ///
    /// If the returned future is dropped before `fut` completes, the request
    /// is recorded as a failure so half-open probes are never leaked.
    ///
    /// # Errors
    ///
    /// Returns the breaker rejection without polling `fut`, or `fut`'s own
    /// error.
    pub async fn execute_with<F, T, C>(&self, fut: F, is_success: C) -> KitResult<T>
    where
        F: Future<Output = KitResult<T>>,
        C: FnOnce(&KitResult<T>) -> bool,
    {
        let generation = self.before_request()?;
        let mut guard = InFlight {
            breaker: self,
            generation,
            settled: false,
        };

        let result = fut.await;
        guard.settle(is_success(&result));
        result
    }

    /// Force the breaker back to closed with fresh counts.
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        let now = Instant::now();
        self.set_state(&mut inner, CircuitState::Closed, now);
        self.new_generation(&mut inner, now);
    }

    fn current_state(&self, inner: &mut BreakerState, now: Instant) {
        match inner.state {
            CircuitState::Closed => {
                if inner.expiry.is_some_and(|expiry| expiry <= now) {
                    self.new_generation(inner, now);
                }
            }
            CircuitState::Open => {
                if inner.expiry.is_some_and(|expiry| expiry <= now) {
                    self.set_state(inner, CircuitState::HalfOpen, now);
                }
            }
            CircuitState::HalfOpen => {}
        }
    }

    fn on_success(&self, inner: &mut BreakerState, now: Instant) {
        match inner.state {
            CircuitState::Closed => inner.counts.on_success(),
            CircuitState::HalfOpen => {
                inner.counts.on_success();
                if inner.counts.consecutive_successes >= self.config.max_probes {
                    self.set_state(inner, CircuitState::Closed, now);
                }
            }
            CircuitState::Open => {}
        }
    }

    fn on_failure(&self, inner: &mut BreakerState, now: Instant) {
        match inner.state {
            CircuitState::Closed => {
                inner.counts.on_failure();
                if self.config.ready_to_trip(&inner.counts) {
                    warn!(
                        circuit = %self.config.name,
                        requests = inner.counts.requests,
                        failures = inner.counts.total_failures,
                        "Circuit opened due to failure ratio"
                    );
                    self.metrics.trips.inc();
                    self.set_state(inner, CircuitState::Open, now);
                }
            }
            CircuitState::HalfOpen => {
                warn!(circuit = %self.config.name, "Circuit re-opened from half-open");
                self.metrics.trips.inc();
                self.set_state(inner, CircuitState::Open, now);
            }
            CircuitState::Open => {}
        }
    }

    fn set_state(&self, inner: &mut BreakerState, state: CircuitState, now: Instant) {
        if inner.state == state {
            return;
        }
        let from = inner.state;
        inner.state = state;
        self.new_generation(inner, now);
        info!(circuit = %self.config.name, ?from, to = ?state, "Circuit state changed");
    }

    fn new_generation(&self, inner: &mut BreakerState, now: Instant) {
        inner.generation = inner.generation.wrapping_add(1);
        inner.counts = Counts::default();
        inner.expiry = match inner.state {
            CircuitState::Closed => closed_expiry(&self.config, now),
            CircuitState::Open => Some(now + self.config.cool_down),
            CircuitState::HalfOpen => None,
        };
    }
}

fn closed_expiry(config: &CircuitBreakerConfig, now: Instant) -> Option<Instant> {
    (!config.window.is_zero()).then(|| now + config.window)
}

/// Records a failure if an admitted request never reports back.
struct InFlight<'a> {
    breaker: &'a CircuitBreaker,
    generation: u64,
    settled: bool,
}

impl InFlight<'_> {
    fn settle(&mut self, success: bool) {
        self.settled = true;
        self.breaker.after_request(self.generation, success);
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if !self.settled {
            self.breaker.after_request(self.generation, false);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breaker(min_observations: u32, failure_percentage: u32) -> CircuitBreaker {
        CircuitBreaker::new(
            CircuitBreakerConfig::default()
                .with_min_observations(min_observations)
                .with_failure_percentage(failure_percentage)
                .with_window(Duration::from_secs(5))
                .with_cool_down(Duration::from_secs(10)),
        )
        .unwrap()
    }

    fn record(cb: &CircuitBreaker, success: bool) {
        let generation = cb.before_request().unwrap();
        cb.after_request(generation, success);
    }

    #[test]
    fn test_rejects_invalid_percentage() {
        for pct in [0, 101, 250] {
            let result =
                CircuitBreaker::new(CircuitBreakerConfig::default().with_failure_percentage(pct));
            assert!(matches!(result, Err(KitError::InvalidConfig(_))));
        }
        assert!(
            CircuitBreaker::new(CircuitBreakerConfig::default().with_failure_percentage(100))
                .is_ok()
        );
    }

    #[test]
    fn test_ready_to_trip() {
        let config = CircuitBreakerConfig::default();
        let mut counts = Counts {
            requests: 9,
            total_failures: 9,
            ..Counts::default()
        };
        assert!(!config.ready_to_trip(&counts));

        counts.requests = 10;
        counts.total_failures = 5;
        assert!(config.ready_to_trip(&counts));

        counts.total_failures = 4;
        assert!(!config.ready_to_trip(&counts));
    }

    #[tokio::test(start_paused = true)]
    async fn test_initial_state_closed() {
        let cb = CircuitBreaker::with_defaults();
        assert_eq!(cb.state(), CircuitState::Closed);
        assert!(cb.before_request().is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stays_closed_below_min_observations() {
        let cb = breaker(10, 50);
        for _ in 0..9 {
            record(&cb, false);
        }
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.counts().total_failures, 9);
    }

    #[tokio::test(start_paused = true)]
    async fn test_opens_on_ratio_breach() {
        let cb = breaker(4, 50);
        record(&cb, true);
        record(&cb, true);
        record(&cb, false);
        assert_eq!(cb.state(), CircuitState::Closed);
        record(&cb, false);

        assert_eq!(cb.state(), CircuitState::Open);
        assert!(matches!(cb.before_request(), Err(KitError::CircuitOpen { .. })));
        assert_eq!(cb.metrics().trips.get(), 1);
        assert_eq!(cb.metrics().rejections.get(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_successes_after_failures_do_not_trip() {
        let cb = breaker(4, 50);
        record(&cb, false);
        record(&cb, false);
        record(&cb, true);
        record(&cb, true);
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.metrics().trips.get(), 0);

        // 3 of 5 failed
        record(&cb, false);
        assert_eq!(cb.state(), CircuitState::Open);
    }

    #[test]
    fn test_defaults_match_validated_construction() {
        let defaults = CircuitBreaker::with_defaults();
        let validated = CircuitBreaker::new(CircuitBreakerConfig::default()).unwrap();
        assert_eq!(defaults.config(), validated.config());
        assert_eq!(defaults.state(), validated.state());
    }

    #[tokio::test(start_paused = true)]
    async fn test_window_rollover_clears_counts() {
        let cb = breaker(4, 50);
        record(&cb, false);
        record(&cb, false);
        record(&cb, false);

        tokio::time::advance(Duration::from_secs(6)).await;
        assert_eq!(cb.counts(), Counts::default());

        record(&cb, false);
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_after_cool_down() {
        let cb = breaker(2, 50);
        record(&cb, false);
        record(&cb, false);
        assert_eq!(cb.state(), CircuitState::Open);

        tokio::time::advance(Duration::from_secs(9)).await;
        assert_eq!(cb.state(), CircuitState::Open);

        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(cb.state(), CircuitState::HalfOpen);
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_limits_admitted_requests() {
        let cb = breaker(2, 50);
        record(&cb, false);
        record(&cb, false);
        tokio::time::advance(Duration::from_secs(11)).await;

        let probe = cb.before_request().unwrap();
        assert!(matches!(
            cb.before_request(),
            Err(KitError::TooManyRequests { .. })
        ));
        cb.after_request(probe, true);
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_failure_reopens() {
        let cb = breaker(2, 50);
        record(&cb, false);
        record(&cb, false);
        tokio::time::advance(Duration::from_secs(11)).await;

        record(&cb, false);
        assert_eq!(cb.state(), CircuitState::Open);
        assert_eq!(cb.metrics().trips.get(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_generation_ignored() {
        let cb = breaker(2, 50);
        let slow = cb.before_request().unwrap();

        tokio::time::advance(Duration::from_secs(6)).await;
        cb.after_request(slow, false);

        assert_eq!(cb.counts().total_failures, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_execute_does_not_poll_when_open() {
        let cb = breaker(1, 100);
        let _ = cb
            .execute(async { Err::<(), _>(KitError::unavailable("down")) })
            .await;
        assert_eq!(cb.state(), CircuitState::Open);

        let mut polled = false;
        let result = cb
            .execute(async {
                polled = true;
                Ok(())
            })
            .await;
        assert!(matches!(result, Err(KitError::CircuitOpen { .. })));
        assert!(!polled);
    }

    #[tokio::test(start_paused = true)]
    async fn test_execute_with_custom_classifier() {
        let cb = breaker(1, 100);
        let result = cb.execute_with(async { Ok(503u16) }, |r| matches!(r, Ok(s) if *s < 500)).await;
        assert_eq!(result.unwrap(), 503);
        assert_eq!(cb.state(), CircuitState::Open);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_request_counts_as_failure() {
        let cb = breaker(1, 100);
        {
            let fut = cb.execute(std::future::pending::<KitResult<()>>());
            let _ = tokio::time::timeout(Duration::from_millis(10), fut).await;
        }
        assert_eq!(cb.state(), CircuitState::Open);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset() {
        let cb = breaker(1, 100);
        record(&cb, false);
        assert_eq!(cb.state(), CircuitState::Open);

        cb.reset();

        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.counts(), Counts::default());
    }
}
