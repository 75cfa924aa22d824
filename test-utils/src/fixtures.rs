//! Test fixtures with sample data.

use std::time::Duration;

use hurley_secrets::{S3StoreConfig, VaultStoreConfig};

/// Role used by the sample Vault configuration.
pub const SAMPLE_APP_ROLE: &str = "staging-tests";

/// Service account JWT used by the sample login flow.
pub const SAMPLE_JWT: &str = "eyJhbGciOiJSUzI1NiJ9.eyJzdWIiOiJzeXN0ZW06c2VydmljZWFjY291bnQifQ.c2ln";

/// Sample S3 store configuration.
#[must_use]
pub fn sample_s3_config() -> S3StoreConfig {
    S3StoreConfig::new(Duration::from_secs(300), "hurley-secrets", "us-east-1")
}

/// Sample Vault store configuration pointed at `address`.
#[must_use]
pub fn sample_vault_config(address: &str) -> VaultStoreConfig {
    VaultStoreConfig::new(SAMPLE_APP_ROLE)
        .with_address(address)
        .with_max_retries(1)
}

/// Body of a successful Kubernetes login.
#[must_use]
pub fn vault_login_body(client_token: &str) -> serde_json::Value {
    serde_json::json!({
        "request_id": "0f5d3c8e-3b0a-4f7e-9d6a-2f1a5c7d9e10",
        "lease_id": "",
        "renewable": false,
        "lease_duration": 0,
        "data": null,
        "auth": {
            "client_token": client_token,
            "accessor": "8609694a-cdbc-db9b-d345-e782dbb562ed",
            "policies": ["default", SAMPLE_APP_ROLE],
            "lease_duration": 2764800,
            "renewable": true
        }
    })
}

/// Body of a Vault logical read returning `data`.
#[must_use]
pub fn vault_read_body(data: serde_json::Value) -> serde_json::Value {
    serde_json::json!({
        "request_id": "5b1f2e7a-9c3d-4a8b-b6e1-7d0c2f4a9e83",
        "lease_id": "",
        "renewable": false,
        "lease_duration": 2764800,
        "data": data,
        "wrap_info": null,
        "warnings": null,
        "auth": null
    })
}
