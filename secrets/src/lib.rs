//! TTL-cached secret retrieval for hurley-kit services.
//!
//! A [`SecretCache`] sits in front of an S3 bucket or Vault and serves each
//! key from memory until its TTL runs out. The remote clients behind every
//! cache are built once, on first use, through the [`SecretClients`] handles
//! the service creates at startup.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod cache;
pub mod clock;
pub mod config;
pub mod error;
pub mod lazy;
pub mod s3;
pub mod vault;

pub use cache::{ObjectGetter, S3SecretCache, SecretCache, VaultSecretCache};
pub use clock::{Clock, SystemClock};
pub use config::{S3Location, S3StoreConfig, VaultEnv, VaultSettings, VaultStoreConfig};
pub use error::{SecretsError, SecretsResult};
pub use lazy::{LazyClient, SecretClients};
pub use s3::{S3ObjectGetter, build_s3_client};
pub use vault::{VaultClient, VaultObjectGetter};
