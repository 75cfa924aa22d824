//! Vault client with Kubernetes login and logical reads.

use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use hurley_common::http::{HttpConfig, build_http_client};
use hurley_common::retry::{RetryConfig, RetryPolicy};
use hurley_common::strutil::elide;
use reqwest::{Client, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};
use url::Url;

use crate::cache::ObjectGetter;
use crate::config::{VaultEnv, VaultStoreConfig};
use crate::error::{SecretsError, SecretsResult};
use crate::lazy::SecretClients;

const VAULT_TOKEN_HEADER: &str = "X-Vault-Token";

#[derive(Serialize)]
struct LoginRequest<'a> {
    jwt: &'a str,
    role: &'a str,
}

#[derive(Deserialize)]
struct LoginResponse {
    auth: Option<AuthBlock>,
}

#[derive(Deserialize)]
struct AuthBlock {
    client_token: String,
}

#[derive(Deserialize)]
struct ReadResponse {
    #[serde(default)]
    data: Option<serde_json::Value>,
}

/// Authenticated Vault client.
pub struct VaultClient {
    http: Client,
    address: Url,
    token: SecretString,
    timeout: Duration,
    retry: RetryPolicy,
}

impl VaultClient {
    /// Resolve the address, obtain a client token and build the client.
    ///
    /// The address comes from `config`, else from `VAULT_ADDR`. The token is
    /// obtained by exchanging the service account JWT for the configured app
    /// role. A `VAULT_TOKEN` value overrides the exchanged token and is used
    /// instead when the JWT is missing or the exchange fails.
    ///
    /// # Errors
    ///
    /// Returns [`SecretsError::InvalidConfig`] without a usable address and
    /// [`SecretsError::AuthenticationFailed`] without a usable token.
    #[instrument(skip_all, fields(role = %config.app_role))]
    pub async fn connect(config: &VaultStoreConfig, env: &VaultEnv) -> SecretsResult<Self> {
        let raw = config
            .address
            .as_deref()
            .or(env.address.as_deref())
            .filter(|a| !a.is_empty())
            .ok_or_else(|| SecretsError::invalid_config("You must provide a Vault cluster address"))?;
        let address = Url::parse(raw)
            .map_err(|e| SecretsError::invalid_config(format!("invalid Vault address {raw}: {e}")))?;
        if address.cannot_be_a_base() {
            return Err(SecretsError::invalid_config(format!(
                "invalid Vault address {raw}"
            )));
        }

        let http = match &config.http_client {
            Some(client) => client.clone(),
            None => build_http_client(&HttpConfig::default().with_timeout(config.timeout))?,
        };

        let exchanged = match read_jwt(&config.jwt_path).await {
            Ok(jwt) => match login(&http, &address, config, &jwt).await {
                Ok(token) => Some(token),
                Err(e) if env.token.is_some() => {
                    warn!(error = %e, "Kubernetes login failed, using VAULT_TOKEN");
                    None
                }
                Err(e) => return Err(e),
            },
            Err(e) => {
                warn!(
                    path = %config.jwt_path.display(),
                    error = %e,
                    "Kubernetes service account JWT not found"
                );
                None
            }
        };

        let token = match (&env.token, exchanged) {
            (Some(token), _) => {
                debug!("Setting Vault client token from VAULT_TOKEN");
                token.clone()
            }
            (None, Some(token)) => token,
            (None, None) => {
                return Err(SecretsError::auth_failed(
                    "no client token found; set VAULT_TOKEN when running outside Kubernetes",
                ));
            }
        };
        if token.expose_secret().is_empty() {
            return Err(SecretsError::auth_failed("client token is empty"));
        }

        info!(
            address = %address,
            token = %elide(token.expose_secret(), 4, 0),
            "Vault client initialized"
        );

        let retry = RetryPolicy::new(
            RetryConfig::default()
                .with_max_retries(config.max_retries)
                .with_max_delay(Duration::from_millis(1500)),
        );

        Ok(Self {
            http,
            address,
            token,
            timeout: config.timeout,
            retry,
        })
    }

    /// Read the secret at `path` and return its `data` object as JSON bytes.
    ///
    /// # Errors
    ///
    /// Returns [`SecretsError::SecretNotFound`] when nothing is stored at
    /// `path`, [`SecretsError::EmptyData`] when the response has no data, and
    /// the last transport or server error once retries are exhausted.
    pub async fn read(&self, path: &str) -> SecretsResult<Vec<u8>> {
        self.retry.execute(|| self.read_once(path)).await
    }

    async fn read_once(&self, path: &str) -> SecretsResult<Vec<u8>> {
        let url = endpoint(&self.address, path);
        debug!(path, "Reading secret from Vault");

        let response = self
            .http
            .get(url)
            .timeout(self.timeout)
            .header(VAULT_TOKEN_HEADER, self.token.expose_secret())
            .send()
            .await?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(SecretsError::not_found(path));
        }
        if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
            return Err(SecretsError::unavailable(format!(
                "status {status} reading {path}"
            )));
        }
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(SecretsError::Rejected {
                status: status.as_u16(),
                message,
            });
        }

        let body = response.bytes().await?;
        if body.is_empty() {
            return Err(SecretsError::not_found(path));
        }

        let parsed: ReadResponse = serde_json::from_slice(&body)?;
        match parsed.data {
            Some(data) => Ok(serde_json::to_vec(&data)?),
            None => Err(SecretsError::EmptyData(path.to_string())),
        }
    }

    /// The resolved Vault address.
    #[must_use]
    pub const fn address(&self) -> &Url {
        &self.address
    }
}

impl fmt::Debug for VaultClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VaultClient")
            .field("address", &self.address.as_str())
            .field("token", &"[REDACTED]")
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

fn endpoint(address: &Url, path: &str) -> Url {
    let mut url = address.clone();
    let joined = format!(
        "{}/v1/{}",
        address.path().trim_end_matches('/'),
        path.trim_start_matches('/')
    );
    url.set_path(&joined);
    url
}

async fn read_jwt(path: &Path) -> SecretsResult<String> {
    let contents = tokio::fs::read_to_string(path).await?;
    Ok(contents.strip_suffix('\n').unwrap_or(&contents).to_string())
}

async fn login(
    http: &Client,
    address: &Url,
    config: &VaultStoreConfig,
    jwt: &str,
) -> SecretsResult<SecretString> {
    let url = endpoint(
        address,
        &format!("auth/{}/login", config.kubernetes_auth_cluster_id),
    );
    debug!(%url, "Exchanging Kubernetes JWT for a Vault token");

    let response = http
        .post(url)
        .timeout(config.timeout)
        .json(&LoginRequest {
            jwt,
            role: &config.app_role,
        })
        .send()
        .await?;

    let status = response.status();
    let body: LoginResponse = response
        .json()
        .await
        .map_err(|e| SecretsError::auth_failed(format!("status {status}: {e}")))?;

    body.auth
        .map(|auth| SecretString::from(auth.client_token))
        .ok_or_else(|| {
            SecretsError::auth_failed("Error trying to authenticate with provided app role and JWT")
        })
}

/// Reads secrets through the shared, lazily logged-in Vault client.
#[derive(Debug, Clone)]
pub struct VaultObjectGetter {
    clients: Arc<SecretClients>,
    env: VaultEnv,
}

impl VaultObjectGetter {
    /// Create a getter over the shared handles.
    #[must_use]
    pub const fn new(clients: Arc<SecretClients>, env: VaultEnv) -> Self {
        Self { clients, env }
    }
}

#[async_trait]
impl ObjectGetter<VaultStoreConfig> for VaultObjectGetter {
    async fn get_object(&self, params: &VaultStoreConfig, key: &str) -> SecretsResult<Vec<u8>> {
        let client = self
            .clients
            .vault
            .get_or_try_init(|| VaultClient::connect(params, &self.env))
            .await?;
        client.read(key).await
    }
}
