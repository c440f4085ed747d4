//! Concurrent interface id → service instance map.
//!
//! Readers load the current map through `arc-swap` without locking. Writers
//! take a mutex, copy the map, apply the change and publish the copy, so a
//! reader sees either the old or the new map and never a half-built one.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use arc_swap::ArcSwap;
use parking_lot::Mutex;

use super::ServiceInstance;

type Entries = HashMap<String, Arc<ServiceInstance>>;

/// Registry of active service implementations.
pub struct ServiceTable {
    entries: ArcSwap<Entries>,
    write_lock: Mutex<()>,
}

impl ServiceTable {
    pub fn new() -> Self {
        Self {
            entries: ArcSwap::from_pointee(HashMap::new()),
            write_lock: Mutex::new(()),
        }
    }

    /// Insert or replace the implementation for `id`.
    pub fn register(
        &self,
        id: impl Into<String>,
        instance: Arc<ServiceInstance>,
    ) -> Option<Arc<ServiceInstance>> {
        let id = id.into();
        self.update(|map| map.insert(id, instance))
    }

    /// Remove the implementation for `id`. Unknown ids return `None`.
    pub fn unregister(&self, id: &str) -> Option<Arc<ServiceInstance>> {
        if !self.entries.load().contains_key(id) {
            return None;
        }
        self.update(|map| map.remove(id))
    }

    /// Current implementation for `id`.
    pub fn lookup(&self, id: &str) -> Option<Arc<ServiceInstance>> {
        self.entries.load().get(id).cloned()
    }

    /// Register an instance under every interface it declares.
    ///
    /// Returns the instances that were replaced.
    pub fn add_service(&self, instance: Arc<ServiceInstance>) -> Vec<Arc<ServiceInstance>> {
        self.update(|map| {
            instance
                .interfaces()
                .iter()
                .filter_map(|id| map.insert(id.clone(), Arc::clone(&instance)))
                .collect()
        })
    }

    /// Ids registered at the time of the call.
    pub fn snapshot(&self) -> BTreeSet<String> {
        self.entries.load().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.load().is_empty()
    }

    /// Remove every entry.
    pub fn clear(&self) {
        let _guard = self.write_lock.lock();
        self.entries.store(Arc::new(HashMap::new()));
    }

    fn update<T>(&self, apply: impl FnOnce(&mut Entries) -> T) -> T {
        let _guard = self.write_lock.lock();
        let mut next = Entries::clone(&self.entries.load());
        let out = apply(&mut next);
        self.entries.store(Arc::new(next));
        out
    }
}

impl Default for ServiceTable {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ServiceTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_set().entries(self.snapshot()).finish()
    }
}
