//! In-process discovery backends.

use std::collections::BTreeSet;
use std::sync::Arc;

use parking_lot::Mutex;

use super::DiscoveryBackend;
use crate::error::Result;
use crate::service::BoxFuture;

/// Used when no registry is configured. Every call succeeds.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopDiscovery;

impl DiscoveryBackend for NoopDiscovery {
    fn name(&self) -> &'static str {
        "noop"
    }

    fn register<'a>(&'a self, _address: &'a str) -> BoxFuture<'a, Result<()>> {
        Box::pin(async { Ok(()) })
    }

    fn deregister<'a>(&'a self, _address: &'a str) -> BoxFuture<'a, Result<()>> {
        Box::pin(async { Ok(()) })
    }
}

/// Set of advertised addresses shared by every clone.
#[derive(Debug, Clone, Default)]
pub struct MemoryDiscovery {
    addresses: Arc<Mutex<BTreeSet<String>>>,
}

impl MemoryDiscovery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, address: &str) -> bool {
        self.addresses.lock().contains(address)
    }

    /// Currently advertised addresses.
    pub fn addresses(&self) -> BTreeSet<String> {
        self.addresses.lock().clone()
    }
}

impl DiscoveryBackend for MemoryDiscovery {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn register<'a>(&'a self, address: &'a str) -> BoxFuture<'a, Result<()>> {
        self.addresses.lock().insert(address.to_string());
        Box::pin(async { Ok(()) })
    }

    fn deregister<'a>(&'a self, address: &'a str) -> BoxFuture<'a, Result<()>> {
        self.addresses.lock().remove(address);
        Box::pin(async { Ok(()) })
    }
}
