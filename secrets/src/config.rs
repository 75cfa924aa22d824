//! Secret store configuration.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use secrecy::SecretString;
use serde::{Deserialize, Serialize};

use crate::error::{SecretsError, SecretsResult};

/// Where Kubernetes mounts the service account token.
pub const KUBERNETES_JWT_PATH: &str = "/var/run/secrets/kubernetes.io/serviceaccount/token";

/// Environment variable holding a fallback Vault address.
pub const VAULT_ADDR_ENV: &str = "VAULT_ADDR";

/// Environment variable holding an override Vault client token.
pub const VAULT_TOKEN_ENV: &str = "VAULT_TOKEN";

pub(crate) fn validate_ttl(ttl: Duration) -> SecretsResult<()> {
    if ttl.is_zero() {
        return Err(SecretsError::invalid_config("ttl must be greater than 0"));
    }
    if chrono::TimeDelta::from_std(ttl).is_err() {
        return Err(SecretsError::invalid_config("ttl is out of range"));
    }
    Ok(())
}

/// Configuration for an S3-backed secret store.
#[derive(Debug, Clone)]
pub struct S3StoreConfig {
    /// How long a fetched secret is served from memory
    pub ttl: Duration,
    /// Bucket holding the secrets
    pub bucket: String,
    /// AWS region of the bucket
    pub region: String,
}

impl S3StoreConfig {
    /// Create a new configuration.
    #[must_use]
    pub fn new(ttl: Duration, bucket: impl Into<String>, region: impl Into<String>) -> Self {
        Self {
            ttl,
            bucket: bucket.into(),
            region: region.into(),
        }
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`SecretsError::InvalidConfig`] for a zero TTL or an empty
    /// bucket or region.
    pub fn validate(&self) -> SecretsResult<()> {
        validate_ttl(self.ttl)?;
        if self.bucket.is_empty() {
            return Err(SecretsError::invalid_config("must specify bucket"));
        }
        if self.region.is_empty() {
            return Err(SecretsError::invalid_config("must specify region"));
        }
        Ok(())
    }

    /// The parameters handed to the object getter on every fetch.
    #[must_use]
    pub fn location(&self) -> S3Location {
        S3Location {
            region: self.region.clone(),
            bucket: self.bucket.clone(),
        }
    }
}

/// Bucket coordinates for an S3 fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct S3Location {
    /// AWS region
    pub region: String,
    /// Bucket name
    pub bucket: String,
}

/// Configuration for a Vault-backed secret store.
#[derive(Debug, Clone)]
pub struct VaultStoreConfig {
    /// How long a fetched secret is served from memory
    pub ttl: Duration,
    /// Vault address; falls back to `VAULT_ADDR` when unset
    pub address: Option<String>,
    /// Timeout applied to every Vault request
    pub timeout: Duration,
    /// Retries for transient Vault failures
    pub max_retries: u32,
    /// Role presented with the service account JWT
    pub app_role: String,
    /// Mount name of the Kubernetes auth backend
    pub kubernetes_auth_cluster_id: String,
    /// Location of the service account JWT
    pub jwt_path: PathBuf,
    /// Client to use for Vault requests instead of a freshly built one
    pub http_client: Option<reqwest::Client>,
}

impl Default for VaultStoreConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(10),
            address: None,
            timeout: Duration::from_secs(3),
            max_retries: 5,
            app_role: String::new(),
            kubernetes_auth_cluster_id: "kubernetes".to_string(),
            jwt_path: PathBuf::from(KUBERNETES_JWT_PATH),
            http_client: None,
        }
    }
}

impl VaultStoreConfig {
    /// Create a configuration for `app_role` with defaults elsewhere.
    #[must_use]
    pub fn new(app_role: impl Into<String>) -> Self {
        Self {
            app_role: app_role.into(),
            ..Default::default()
        }
    }

    /// Set the cache TTL.
    #[must_use]
    pub const fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Set the Vault address.
    #[must_use]
    pub fn with_address(mut self, address: impl Into<String>) -> Self {
        self.address = Some(address.into());
        self
    }

    /// Set the request timeout.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the maximum number of retries.
    #[must_use]
    pub const fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Set the Kubernetes auth mount.
    #[must_use]
    pub fn with_kubernetes_auth_cluster_id(mut self, cluster_id: impl Into<String>) -> Self {
        self.kubernetes_auth_cluster_id = cluster_id.into();
        self
    }

    /// Read the service account JWT from `path`.
    #[must_use]
    pub fn with_jwt_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.jwt_path = path.into();
        self
    }

    /// Use `client` for all Vault requests.
    #[must_use]
    pub fn with_http_client(mut self, client: reqwest::Client) -> Self {
        self.http_client = Some(client);
        self
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`SecretsError::InvalidConfig`] for a zero TTL or timeout, an
    /// empty app role or an empty auth cluster ID.
    pub fn validate(&self) -> SecretsResult<()> {
        validate_ttl(self.ttl)?;
        if self.timeout.is_zero() {
            return Err(SecretsError::invalid_config("timeout must be greater than 0"));
        }
        if self.app_role.is_empty() {
            return Err(SecretsError::invalid_config("must specify app_role"));
        }
        if self.kubernetes_auth_cluster_id.is_empty() {
            return Err(SecretsError::invalid_config(
                "must specify kubernetes_auth_cluster_id",
            ));
        }
        Ok(())
    }
}

/// Vault block of a service's JSON configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct VaultSettings {
    /// Vault address
    pub endpoint: Option<String>,
    /// Kubernetes auth mount
    #[serde(rename = "k8SAuthCluster", alias = "k8sAuthCluster")]
    pub k8s_auth_cluster: String,
    /// Role presented with the service account JWT
    pub app_role: String,
    /// Cache TTL in seconds
    pub cache_timeout_in_seconds: u64,
    /// Request timeout in seconds
    pub timeout_in_seconds: u64,
    /// Retries for transient failures
    pub max_retries: u32,
}

impl Default for VaultSettings {
    fn default() -> Self {
        let defaults = VaultStoreConfig::default();
        Self {
            endpoint: None,
            k8s_auth_cluster: defaults.kubernetes_auth_cluster_id,
            app_role: defaults.app_role,
            cache_timeout_in_seconds: defaults.ttl.as_secs(),
            timeout_in_seconds: defaults.timeout.as_secs(),
            max_retries: defaults.max_retries,
        }
    }
}

impl From<VaultSettings> for VaultStoreConfig {
    fn from(settings: VaultSettings) -> Self {
        Self {
            ttl: Duration::from_secs(settings.cache_timeout_in_seconds),
            address: settings.endpoint.filter(|e| !e.is_empty()),
            timeout: Duration::from_secs(settings.timeout_in_seconds),
            max_retries: settings.max_retries,
            app_role: settings.app_role,
            kubernetes_auth_cluster_id: settings.k8s_auth_cluster,
            ..Self::default()
        }
    }
}

/// Vault-related environment variables, captured once.
#[derive(Clone, Default)]
pub struct VaultEnv {
    /// Value of `VAULT_ADDR`
    pub address: Option<String>,
    /// Value of `VAULT_TOKEN`
    pub token: Option<SecretString>,
}

impl VaultEnv {
    /// Read `VAULT_ADDR` and `VAULT_TOKEN` from the process environment.
    /// Empty values are treated as unset.
    #[must_use]
    pub fn from_process() -> Self {
        let read = |name: &str| std::env::var(name).ok().filter(|v| !v.is_empty());
        Self {
            address: read(VAULT_ADDR_ENV),
            token: read(VAULT_TOKEN_ENV).map(SecretString::from),
        }
    }

    /// An environment with neither variable set.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }
}

impl fmt::Debug for VaultEnv {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VaultEnv")
            .field("address", &self.address)
            .field("token", &self.token.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}
