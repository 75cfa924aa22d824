//! Harnesses shared by the end-to-end tests.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use std::io::Write;

use hurley_secrets::VaultStoreConfig;
use tempfile::NamedTempFile;
use test_utils::{SAMPLE_APP_ROLE, SAMPLE_JWT, sample_vault_config, vault_login_body, vault_read_body};
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// A mock Vault server plus a service account JWT file.
pub struct VaultHarness {
    /// The mock server
    pub server: MockServer,
    jwt: NamedTempFile,
}

impl VaultHarness {
    /// Start the server and write the JWT file.
    ///
    /// # Panics
    ///
    /// Panics if the temporary JWT file cannot be written.
    pub async fn start() -> Self {
        let server = MockServer::start().await;
        let mut jwt = NamedTempFile::new().expect("create jwt file");
        writeln!(jwt, "{SAMPLE_JWT}").expect("write jwt file");
        tracing::debug!(uri = %server.uri(), "Mock Vault started");
        Self { server, jwt }
    }

    /// A store configuration pointed at this server and JWT file.
    #[must_use]
    pub fn config(&self) -> VaultStoreConfig {
        sample_vault_config(&self.server.uri()).with_jwt_path(self.jwt.path())
    }

    /// Expect `times` Kubernetes logins, each answered with `token`.
    pub async fn expect_login(&self, token: &str, times: u64) {
        Mock::given(method("POST"))
            .and(path("/v1/auth/kubernetes/login"))
            .and(body_json(serde_json::json!({
                "jwt": SAMPLE_JWT,
                "role": SAMPLE_APP_ROLE
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(vault_login_body(token)))
            .expect(times)
            .mount(&self.server)
            .await;
    }

    /// Expect `times` reads of `secret_path` carrying `token`.
    pub async fn expect_read(
        &self,
        secret_path: &str,
        token: &str,
        data: serde_json::Value,
        times: u64,
    ) {
        Mock::given(method("GET"))
            .and(path(format!("/v1/{secret_path}")))
            .and(header("X-Vault-Token", token))
            .respond_with(ResponseTemplate::new(200).set_body_json(vault_read_body(data)))
            .expect(times)
            .mount(&self.server)
            .await;
    }
}
