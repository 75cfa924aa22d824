//! TTL cache in front of a remote secret store.
//!
//! [`SecretCache::get`] serves a stored value while it is fresh and falls
//! through to [`SecretCache::refresh`] otherwise. A refresh always goes to the
//! remote store; a failed refresh leaves the previous entry in place. Entries
//! are never evicted.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use hurley_common::metrics::CacheMetrics;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::clock::{Clock, SystemClock};
use crate::config::{S3Location, S3StoreConfig, VaultEnv, VaultStoreConfig, validate_ttl};
use crate::error::{SecretsError, SecretsResult};
use crate::lazy::SecretClients;
use crate::s3::S3ObjectGetter;
use crate::vault::VaultObjectGetter;

/// Fetches the raw bytes stored under a key.
///
/// `P` carries the backend parameters (bucket and region, Vault settings)
/// that accompany every fetch.
#[async_trait]
pub trait ObjectGetter<P>: Send + Sync {
    /// Fetch the object stored under `key`.
    async fn get_object(&self, params: &P, key: &str) -> SecretsResult<Vec<u8>>;
}

#[derive(Debug, Clone)]
struct CacheEntry {
    value: Vec<u8>,
    expires_at: DateTime<Utc>,
}

/// Expiring secret cache over an [`ObjectGetter`].
pub struct SecretCache<P> {
    params: P,
    getter: Arc<dyn ObjectGetter<P>>,
    clock: Arc<dyn Clock>,
    ttl: TimeDelta,
    entries: RwLock<HashMap<String, CacheEntry>>,
    metrics: CacheMetrics,
}

/// Cache over an S3 bucket.
pub type S3SecretCache = SecretCache<S3Location>;

/// Cache over Vault logical reads.
pub type VaultSecretCache = SecretCache<VaultStoreConfig>;

impl<P> SecretCache<P>
where
    P: Send + Sync,
{
    /// Create a cache over `getter` using the system clock.
    ///
    /// # Errors
    ///
    /// Returns [`SecretsError::InvalidConfig`] if `ttl` is zero or too large.
    pub fn new(params: P, ttl: Duration, getter: Arc<dyn ObjectGetter<P>>) -> SecretsResult<Self> {
        validate_ttl(ttl)?;
        let ttl = TimeDelta::from_std(ttl)
            .map_err(|_| SecretsError::invalid_config("ttl is out of range"))?;

        Ok(Self {
            params,
            getter,
            clock: Arc::new(SystemClock),
            ttl,
            entries: RwLock::new(HashMap::new()),
            metrics: CacheMetrics::new("secret_cache"),
        })
    }

    /// Use `clock` as the time source.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Name the cache's counters with `prefix`.
    #[must_use]
    pub fn with_metrics_prefix(mut self, prefix: &str) -> Self {
        self.metrics = CacheMetrics::new(prefix);
        self
    }

    /// Return the value for `key`, fetching it if there is no fresh entry.
    ///
    /// # Errors
    ///
    /// Returns the remote store's error when a fetch is needed and fails.
    pub async fn get(&self, key: &str) -> SecretsResult<Vec<u8>> {
        let now = self.clock.now();
        let cached = {
            let entries = self.entries.read().await;
            entries
                .get(key)
                .filter(|entry| now < entry.expires_at)
                .map(|entry| entry.value.clone())
        };

        if let Some(value) = cached {
            self.metrics.record_hit();
            debug!(key, "Secret cache hit");
            return Ok(value);
        }

        self.metrics.record_miss();
        self.refresh(key).await
    }

    /// Fetch `key` from the remote store and replace the cached entry.
    ///
    /// # Errors
    ///
    /// Returns the remote store's error. The existing entry, if any, is kept.
    pub async fn refresh(&self, key: &str) -> SecretsResult<Vec<u8>> {
        let value = match self.getter.get_object(&self.params, key).await {
            Ok(value) => value,
            Err(e) => {
                self.metrics.record_refresh_failure();
                warn!(key, error = %e, "Secret refresh failed");
                return Err(e);
            }
        };

        let expires_at = self
            .clock
            .now()
            .checked_add_signed(self.ttl)
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        self.entries.write().await.insert(
            key.to_string(),
            CacheEntry {
                value: value.clone(),
                expires_at,
            },
        );
        debug!(key, %expires_at, "Secret cached");

        Ok(value)
    }

    /// The backend parameters passed to every fetch.
    #[must_use]
    pub const fn params(&self) -> &P {
        &self.params
    }

    /// How long an entry stays fresh.
    #[must_use]
    pub const fn ttl(&self) -> TimeDelta {
        self.ttl
    }

    /// Hit, miss and refresh-failure counters.
    #[must_use]
    pub const fn metrics(&self) -> &CacheMetrics {
        &self.metrics
    }
}

impl SecretCache<S3Location> {
    /// Create a cache over the bucket in `config`.
    ///
    /// The S3 client in `clients` is built on the first fetch, not here.
    ///
    /// # Errors
    ///
    /// Returns [`SecretsError::InvalidConfig`] if `config` is incomplete.
    pub fn s3(config: &S3StoreConfig, clients: Arc<SecretClients>) -> SecretsResult<Self> {
        config.validate()?;
        Ok(Self::new(config.location(), config.ttl, Arc::new(S3ObjectGetter::new(clients)))?
            .with_metrics_prefix("s3_secret_cache"))
    }
}

impl SecretCache<VaultStoreConfig> {
    /// Create a cache over Vault reads described by `config`.
    ///
    /// The Vault client in `clients` is built and logged in on the first
    /// fetch, not here.
    ///
    /// # Errors
    ///
    /// Returns [`SecretsError::InvalidConfig`] if `config` is incomplete.
    pub fn vault(
        config: VaultStoreConfig,
        env: VaultEnv,
        clients: Arc<SecretClients>,
    ) -> SecretsResult<Self> {
        config.validate()?;
        let ttl = config.ttl;
        Ok(
            Self::new(config, ttl, Arc::new(VaultObjectGetter::new(clients, env)))?
                .with_metrics_prefix("vault_secret_cache"),
        )
    }
}

impl<P: fmt::Debug> fmt::Debug for SecretCache<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecretCache")
            .field("params", &self.params)
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    struct ManualClock(Mutex<DateTime<Utc>>);

    impl ManualClock {
        fn new() -> Arc<Self> {
            Arc::new(Self(Mutex::new(Utc::now())))
        }

        fn advance(&self, by: Duration) {
            let mut now = self.0.lock().unwrap();
            *now += TimeDelta::from_std(by).unwrap();
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> DateTime<Utc> {
            *self.0.lock().unwrap()
        }
    }

    #[derive(Default)]
    struct CountingGetter {
        calls: AtomicUsize,
        fail: AtomicBool,
    }

    #[async_trait]
    impl ObjectGetter<String> for CountingGetter {
        async fn get_object(&self, params: &String, key: &str) -> SecretsResult<Vec<u8>> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail.load(Ordering::SeqCst) {
                return Err(SecretsError::unavailable("store down"));
            }
            Ok(format!("{params}/{key}#{n}").into_bytes())
        }
    }

    fn cache(getter: Arc<CountingGetter>, clock: Arc<ManualClock>) -> SecretCache<String> {
        SecretCache::new("bucket".to_string(), Duration::from_secs(60), getter)
            .unwrap()
            .with_clock(clock)
    }

    #[tokio::test]
    async fn test_get_within_ttl_fetches_once() {
        let getter = Arc::new(CountingGetter::default());
        let clock = ManualClock::new();
        let cache = cache(getter.clone(), clock.clone());

        let first = cache.get("db-password").await.unwrap();
        clock.advance(Duration::from_secs(59));
        let second = cache.get("db-password").await.unwrap();

        assert_eq!(first, second);
        assert_eq!(first, b"bucket/db-password#0");
        assert_eq!(getter.calls.load(Ordering::SeqCst), 1);
        assert_eq!(cache.metrics().hits.get(), 1);
        assert_eq!(cache.metrics().misses.get(), 1);
    }

    #[tokio::test]
    async fn test_get_after_ttl_refetches() {
        let getter = Arc::new(CountingGetter::default());
        let clock = ManualClock::new();
        let cache = cache(getter.clone(), clock.clone());

        cache.get("db-password").await.unwrap();
        clock.advance(Duration::from_secs(60));
        let value = cache.get("db-password").await.unwrap();

        assert_eq!(value, b"bucket/db-password#1");
        assert_eq!(getter.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_refresh_always_fetches() {
        let getter = Arc::new(CountingGetter::default());
        let cache = cache(getter.clone(), ManualClock::new());

        cache.get("api-key").await.unwrap();
        let value = cache.refresh("api-key").await.unwrap();

        assert_eq!(value, b"bucket/api-key#1");
        assert_eq!(cache.get("api-key").await.unwrap(), b"bucket/api-key#1");
        assert_eq!(getter.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_failed_refresh_keeps_entry() {
        let getter = Arc::new(CountingGetter::default());
        let cache = cache(getter.clone(), ManualClock::new());

        cache.get("api-key").await.unwrap();
        getter.fail.store(true, Ordering::SeqCst);

        let err = cache.refresh("api-key").await.unwrap_err();
        assert!(matches!(err, SecretsError::Unavailable(_)));
        assert_eq!(cache.get("api-key").await.unwrap(), b"bucket/api-key#0");
        assert_eq!(cache.metrics().refresh_failures.get(), 1);
    }

    #[tokio::test]
    async fn test_miss_error_is_returned() {
        let getter = Arc::new(CountingGetter::default());
        getter.fail.store(true, Ordering::SeqCst);
        let cache = cache(getter, ManualClock::new());

        assert!(cache.get("missing").await.is_err());
    }

    #[tokio::test]
    async fn test_huge_ttl_saturates_expiry() {
        let getter = Arc::new(CountingGetter::default());
        let clock = ManualClock::new();
        let cache = SecretCache::new(
            "bucket".to_string(),
            Duration::from_secs(10_000_000_000_000),
            getter.clone() as Arc<dyn ObjectGetter<String>>,
        )
        .unwrap()
        .with_clock(clock.clone());

        let first = cache.get("k").await.unwrap();
        clock.advance(Duration::from_secs(365 * 24 * 3600));
        assert_eq!(cache.get("k").await.unwrap(), first);
        assert_eq!(getter.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_zero_ttl_rejected() {
        let result = SecretCache::new(
            "bucket".to_string(),
            Duration::ZERO,
            Arc::new(CountingGetter::default()) as Arc<dyn ObjectGetter<String>>,
        );
        assert!(matches!(result, Err(SecretsError::InvalidConfig(_))));
    }

    #[test]
    fn test_store_construction_builds_no_client() {
        let clients = SecretClients::new();

        let s3 = SecretCache::s3(
            &S3StoreConfig::new(Duration::from_secs(60), "hurley-secrets", "us-east-1"),
            clients.clone(),
        );
        assert!(s3.is_ok());

        let bad = SecretCache::s3(
            &S3StoreConfig::new(Duration::from_secs(60), "", "us-east-1"),
            clients.clone(),
        );
        assert!(matches!(bad, Err(SecretsError::InvalidConfig(_))));

        let vault = SecretCache::vault(VaultStoreConfig::default(), VaultEnv::empty(), clients.clone());
        assert!(matches!(vault, Err(SecretsError::InvalidConfig(_))));

        assert!(!clients.s3.is_initialized());
        assert!(!clients.vault.is_initialized());
    }
}
