//! Registry module - advertising this server to a discovery backend.
//!
//! The backend itself is an external collaborator; the server only needs two
//! calls from it, expressed by [`DiscoveryBackend`]. [`RegistryClient`] wraps
//! a backend with a timeout and turns every failure into a logged `false`:
//! a server whose registry is down still serves the clients that know its
//! address.
//!
//! Backends:
//! - [`NoopDiscovery`] - nothing configured
//! - [`MemoryDiscovery`] - in-process, for tests and embedding
//! - [`LineDiscovery`] - newline-delimited JSON-RPC over TCP

mod line;
mod memory;

pub use line::LineDiscovery;
pub use memory::{MemoryDiscovery, NoopDiscovery};

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::error::Result;
use crate::service::BoxFuture;

/// Default per-call registry timeout.
pub const DEFAULT_REGISTRY_TIMEOUT: Duration = Duration::from_secs(3);

/// A discovery service that can record and forget server addresses.
pub trait DiscoveryBackend: Send + Sync + 'static {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Advertise `address` (`host:port`).
    fn register<'a>(&'a self, address: &'a str) -> BoxFuture<'a, Result<()>>;

    /// Withdraw `address`.
    fn deregister<'a>(&'a self, address: &'a str) -> BoxFuture<'a, Result<()>>;
}

/// Best-effort, timeout-bounded access to a [`DiscoveryBackend`].
#[derive(Clone)]
pub struct RegistryClient {
    backend: Arc<dyn DiscoveryBackend>,
    timeout: Duration,
}

impl RegistryClient {
    pub fn new(backend: Arc<dyn DiscoveryBackend>, timeout: Duration) -> Self {
        Self { backend, timeout }
    }

    /// Pick a backend from the configured registry address.
    ///
    /// No address means no registry.
    pub fn from_address(address: Option<&str>, timeout: Duration) -> Self {
        let backend: Arc<dyn DiscoveryBackend> = match address.map(str::trim) {
            Some(addr) if !addr.is_empty() => Arc::new(LineDiscovery::new(addr)),
            _ => Arc::new(NoopDiscovery),
        };
        Self::new(backend, timeout)
    }

    /// Advertise `address`. Returns `false` on failure or timeout.
    pub async fn register(&self, address: &str) -> bool {
        self.call("register", address, self.backend.register(address))
            .await
    }

    /// Withdraw `address`. Returns `false` on failure or timeout.
    pub async fn deregister(&self, address: &str) -> bool {
        self.call("deregister", address, self.backend.deregister(address))
            .await
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    async fn call(
        &self,
        operation: &str,
        address: &str,
        fut: impl Future<Output = Result<()>>,
    ) -> bool {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(Ok(())) => {
                info!(%address, backend = self.backend.name(), "Registry {} succeeded", operation);
                true
            }
            Ok(Err(e)) => {
                warn!(%address, backend = self.backend.name(), "Registry {} failed: {}", operation, e);
                false
            }
            Err(_) => {
                warn!(
                    %address,
                    backend = self.backend.name(),
                    timeout_ms = self.timeout.as_millis() as u64,
                    "Registry {} timed out",
                    operation
                );
                false
            }
        }
    }
}

impl fmt::Debug for RegistryClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegistryClient")
            .field("backend", &self.backend.name())
            .field("timeout", &self.timeout)
            .finish()
    }
}
