//! Fake collaborators for testing.
//!
//! [`FakeClock`] only moves when told to. [`MockObjectGetter`] serves
//! scripted values, counts calls per key and can be switched into failure.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use hurley_secrets::{Clock, ObjectGetter, SecretsError, SecretsResult};
use tokio::sync::RwLock;

/// Clock that advances only through [`FakeClock::advance`].
#[derive(Debug)]
pub struct FakeClock {
    now: std::sync::Mutex<DateTime<Utc>>,
}

impl FakeClock {
    /// Create a clock starting at the current system time.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Self::at(Utc::now())
    }

    /// Create a clock starting at `start`.
    #[must_use]
    pub fn at(start: DateTime<Utc>) -> Arc<Self> {
        Arc::new(Self {
            now: std::sync::Mutex::new(start),
        })
    }

    /// Move the clock forward.
    ///
    /// # Panics
    ///
    /// Panics if `by` does not fit a `TimeDelta`.
    pub fn advance(&self, by: Duration) {
        let delta = TimeDelta::from_std(by).expect("advance out of range");
        let mut now = self.now.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        *now += delta;
    }
}

impl Clock for FakeClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

/// Scripted object getter.
///
/// Each fetch of a key returns its scripted value with the call number
/// appended, so tests can tell fresh fetches from cached ones.
#[derive(Debug, Default)]
pub struct MockObjectGetter {
    values: RwLock<HashMap<String, Vec<u8>>>,
    calls: RwLock<HashMap<String, usize>>,
    total: AtomicUsize,
    failing: AtomicBool,
    delay: std::sync::Mutex<Option<Duration>>,
}

impl MockObjectGetter {
    /// Create a getter with no scripted values.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Script the value for `key`.
    pub async fn set(&self, key: &str, value: impl Into<Vec<u8>>) {
        self.values.write().await.insert(key.to_string(), value.into());
    }

    /// Make every subsequent fetch fail (or succeed again).
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Delay every subsequent fetch.
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap_or_else(std::sync::PoisonError::into_inner) = Some(delay);
    }

    /// Fetches of `key` so far, including failed ones.
    pub async fn calls(&self, key: &str) -> usize {
        self.calls.read().await.get(key).copied().unwrap_or(0)
    }

    /// Fetches of any key so far.
    #[must_use]
    pub fn total_calls(&self) -> usize {
        self.total.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl<P: Send + Sync> ObjectGetter<P> for MockObjectGetter {
    async fn get_object(&self, _params: &P, key: &str) -> SecretsResult<Vec<u8>> {
        let n = {
            let mut calls = self.calls.write().await;
            let count = calls.entry(key.to_string()).or_insert(0);
            *count += 1;
            *count
        };
        self.total.fetch_add(1, Ordering::SeqCst);

        let delay = *self.delay.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if self.failing.load(Ordering::SeqCst) {
            return Err(SecretsError::unavailable(format!("scripted failure for {key}")));
        }

        let Some(value) = self.values.read().await.get(key).cloned() else {
            return Err(SecretsError::not_found(key));
        };
        let mut value = value;
        value.extend_from_slice(format!("#{n}").as_bytes());
        Ok(value)
    }
}

/// Counts how often a client constructor runs.
#[derive(Debug, Default)]
pub struct ConstructionCounter {
    count: AtomicUsize,
}

impl ConstructionCounter {
    /// Create a counter at zero.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Record a construction and return its ordinal, starting at 0.
    pub fn record(&self) -> usize {
        self.count.fetch_add(1, Ordering::SeqCst)
    }

    /// Constructions so far.
    #[must_use]
    pub fn count(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fake_clock_advances() {
        let clock = FakeClock::new();
        let start = clock.now();
        clock.advance(Duration::from_secs(30));
        assert_eq!(clock.now() - start, TimeDelta::seconds(30));
    }

    #[tokio::test]
    async fn test_mock_getter_counts_and_fails() {
        let getter = MockObjectGetter::new();
        getter.set("db", "secret").await;

        let value = ObjectGetter::<()>::get_object(getter.as_ref(), &(), "db").await.unwrap();
        assert_eq!(value, b"secret#1");
        assert_eq!(getter.calls("db").await, 1);

        getter.set_failing(true);
        assert!(ObjectGetter::<()>::get_object(getter.as_ref(), &(), "db").await.is_err());
        assert_eq!(getter.total_calls(), 2);

        getter.set_failing(false);
        let missing = ObjectGetter::<()>::get_object(getter.as_ref(), &(), "other").await;
        assert!(matches!(missing, Err(SecretsError::SecretNotFound(_))));
    }
}
