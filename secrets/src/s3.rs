//! S3 object fetching.

use std::sync::Arc;

use async_trait::async_trait;
use aws_sdk_s3::config::{BehaviorVersion, Region};
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::operation::get_object::GetObjectError;
use tracing::{debug, info};

use crate::cache::ObjectGetter;
use crate::config::S3Location;
use crate::error::{SecretsError, SecretsResult};
use crate::lazy::SecretClients;

/// Build an S3 client for `region` from the default credential chain.
pub async fn build_s3_client(region: &str) -> aws_sdk_s3::Client {
    let config = aws_config::defaults(BehaviorVersion::latest())
        .region(Region::new(region.to_string()))
        .load()
        .await;
    info!(region, "S3 client initialized");
    aws_sdk_s3::Client::new(&config)
}

/// Reads objects from S3 through the shared client.
///
/// The client is built on first use with the region of that fetch; later
/// fetches reuse it whatever region they name.
#[derive(Debug, Clone)]
pub struct S3ObjectGetter {
    clients: Arc<SecretClients>,
}

impl S3ObjectGetter {
    /// Create a getter over the shared handles.
    #[must_use]
    pub const fn new(clients: Arc<SecretClients>) -> Self {
        Self { clients }
    }
}

#[async_trait]
impl ObjectGetter<S3Location> for S3ObjectGetter {
    async fn get_object(&self, params: &S3Location, key: &str) -> SecretsResult<Vec<u8>> {
        let client = self
            .clients
            .s3
            .get_or_try_init(|| async { Ok(build_s3_client(&params.region).await) })
            .await?;

        debug!(bucket = %params.bucket, key, "Fetching object from S3");
        let output = client
            .get_object()
            .bucket(&params.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| {
                if e.as_service_error().is_some_and(GetObjectError::is_no_such_key) {
                    SecretsError::not_found(format!("s3://{}/{key}", params.bucket))
                } else {
                    SecretsError::ObjectStore(DisplayErrorContext(&e).to_string())
                }
            })?;

        let body = output
            .body
            .collect()
            .await
            .map_err(|e| SecretsError::ObjectStore(e.to_string()))?;
        Ok(body.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_client_uses_requested_region() {
        let client = build_s3_client("eu-west-1").await;
        assert_eq!(
            client.config().region().map(ToString::to_string),
            Some("eu-west-1".to_string())
        );
    }

    #[test]
    fn test_getter_does_not_build_client() {
        let clients = SecretClients::new();
        let _getter = S3ObjectGetter::new(clients.clone());
        assert!(!clients.s3.is_initialized());
    }
}
