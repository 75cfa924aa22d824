//! Bounded retries with exponential backoff.
//!
//! Remote clients that take a `max_retries` setting (the Vault client today)
//! wrap each call in a [`RetryPolicy`]. Caches and the breaker never retry.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::debug;

use crate::KitError;

/// Errors that know whether a repeat attempt could succeed.
pub trait Retryable {
    /// `true` for transient failures.
    fn is_retryable(&self) -> bool;
}

impl Retryable for KitError {
    fn is_retryable(&self) -> bool {
        Self::is_retryable(self)
    }
}

/// Backoff settings.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// Attempts allowed after the first one
    pub max_retries: u32,
    /// Pause before the first retry; doubles each retry after that
    pub base_delay: Duration,
    /// Upper bound on a single pause, before jitter
    pub max_delay: Duration,
    /// Extra random fraction added to each pause, in `[0, 1]`
    pub jitter: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(10),
            jitter: 0.25,
        }
    }
}

impl RetryConfig {
    /// Set the number of retries.
    #[must_use]
    pub const fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Set the first pause.
    #[must_use]
    pub const fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    /// Cap every pause at `delay`.
    #[must_use]
    pub const fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Use exact pauses.
    #[must_use]
    pub const fn without_jitter(mut self) -> Self {
        self.jitter = 0.0;
        self
    }
}

/// Runs an operation until it succeeds, fails permanently or runs out of
/// retries.
#[derive(Debug, Clone, Default)]
pub struct RetryPolicy {
    config: RetryConfig,
}

impl RetryPolicy {
    /// Wrap `config`.
    #[must_use]
    pub const fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    /// Pause before retry number `retry` (0-based).
    #[must_use]
    pub fn backoff(&self, retry: u32) -> Duration {
        let doubled = 1u32
            .checked_shl(retry)
            .and_then(|factor| self.config.base_delay.checked_mul(factor))
            .unwrap_or(self.config.max_delay);
        let capped = doubled.min(self.config.max_delay);

        let jitter = self.config.jitter.clamp(0.0, 1.0);
        if jitter <= 0.0 {
            return capped;
        }
        let factor = 1.0 + rand::thread_rng().gen_range(0.0..=jitter);
        Duration::try_from_secs_f64(capped.as_secs_f64() * factor).unwrap_or(capped)
    }

    /// Whether `error`, seen after `retry` retries, earns another attempt.
    #[must_use]
    pub fn should_retry<E: Retryable>(&self, error: &E, retry: u32) -> bool {
        retry < self.config.max_retries && error.is_retryable()
    }

    /// Run `operation`, retrying transient failures with backoff.
    ///
    /// # Errors
    ///
    /// The first permanent error, or the last transient one once retries
    /// run out.
    pub async fn execute<F, Fut, T, E>(&self, mut operation: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Retryable + std::fmt::Display,
    {
        let mut retry = 0;
        loop {
            let error = match operation().await {
                Ok(value) => return Ok(value),
                Err(error) => error,
            };
            if !self.should_retry(&error, retry) {
                return Err(error);
            }
            let pause = self.backoff(retry);
            debug!(retry, ?pause, %error, "Transient failure, retrying");
            tokio::time::sleep(pause).await;
            retry += 1;
        }
    }

    /// Retries allowed after the first attempt.
    #[must_use]
    pub const fn max_retries(&self) -> u32 {
        self.config.max_retries
    }
}
