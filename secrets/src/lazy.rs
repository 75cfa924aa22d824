//! Lazily constructed, shared remote clients.
//!
//! A [`LazyClient`] runs its constructor at most once successfully. Callers
//! that arrive while construction is in flight wait for it; later callers
//! get the stored instance. A failed construction leaves the handle empty so
//! the next caller tries again.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use tokio::sync::OnceCell;
use tracing::debug;

use crate::error::SecretsResult;
use crate::vault::VaultClient;

/// One-time initialized handle to a client of type `T`.
pub struct LazyClient<T> {
    cell: OnceCell<Arc<T>>,
}

impl<T> LazyClient<T> {
    /// Create an empty handle.
    #[must_use]
    pub fn new() -> Self {
        Self {
            cell: OnceCell::new(),
        }
    }

    /// Return the client, constructing it with `init` if this is the first
    /// successful call.
    ///
    /// # Errors
    ///
    /// Returns the constructor's error. Nothing is stored in that case.
    pub async fn get_or_try_init<F, Fut>(&self, init: F) -> SecretsResult<Arc<T>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = SecretsResult<T>>,
    {
        self.cell
            .get_or_try_init(|| async {
                debug!(client = std::any::type_name::<T>(), "Constructing shared client");
                init().await.map(Arc::new)
            })
            .await
            .cloned()
    }

    /// The client, if it has been constructed.
    #[must_use]
    pub fn get(&self) -> Option<Arc<T>> {
        self.cell.get().cloned()
    }

    /// Whether the client has been constructed.
    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.cell.initialized()
    }
}

impl<T> Default for LazyClient<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for LazyClient<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LazyClient")
            .field("client", &std::any::type_name::<T>())
            .field("initialized", &self.is_initialized())
            .finish()
    }
}

/// The remote clients shared by every secret store in a service.
///
/// Create one per process (or per test) and hand it to each store
/// constructor.
#[derive(Debug, Default)]
pub struct SecretClients {
    /// S3 client, built with the region of the first store that fetches
    pub s3: LazyClient<aws_sdk_s3::Client>,
    /// Logged-in Vault client
    pub vault: LazyClient<VaultClient>,
}

impl SecretClients {
    /// Create a set of empty handles.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }
}
