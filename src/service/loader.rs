//! Service discovery at startup.
//!
//! Services are listed up front in a [`ServiceCatalog`], each tagged with a
//! dotted namespace. [`ServiceLoader::load`] instantiates every entry under
//! the configured namespace and registers it in a [`ServiceTable`]. A factory
//! that fails or panics is logged and skipped; it never aborts the load.

use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use tracing::{debug, info, warn};

use super::{RemoteService, ServiceInstance, ServiceTable};

type Factory = Box<dyn Fn() -> std::result::Result<ServiceInstance, String> + Send + Sync>;

struct CatalogEntry {
    namespace: String,
    type_name: String,
    factory: Factory,
}

/// Explicit list of constructible services.
#[derive(Default)]
pub struct ServiceCatalog {
    entries: Vec<CatalogEntry>,
}

impl ServiceCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Catalogue a service built with `Default`.
    pub fn provide<S>(&mut self, namespace: &str) -> &mut Self
    where
        S: RemoteService + Default,
    {
        let type_name = super::short_type_name::<S>().to_string();
        self.entries.push(CatalogEntry {
            namespace: namespace.to_string(),
            type_name,
            factory: Box::new(|| Ok(ServiceInstance::from_service(S::default()))),
        });
        self
    }

    /// Catalogue a service with a fallible factory.
    pub fn provide_with<F, E>(&mut self, namespace: &str, type_name: &str, factory: F) -> &mut Self
    where
        F: Fn() -> std::result::Result<ServiceInstance, E> + Send + Sync + 'static,
        E: fmt::Display,
    {
        self.entries.push(CatalogEntry {
            namespace: namespace.to_string(),
            type_name: type_name.to_string(),
            factory: Box::new(move || factory().map_err(|e| e.to_string())),
        });
        self
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl fmt::Debug for ServiceCatalog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(
                self.entries
                    .iter()
                    .map(|e| format!("{}::{}", e.namespace, e.type_name)),
            )
            .finish()
    }
}

/// A catalogued service that could not be instantiated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedService {
    pub type_name: String,
    pub reason: String,
}

/// Outcome of a load.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct LoadReport {
    /// Type names that were instantiated and registered.
    pub loaded: Vec<String>,
    /// Entries whose factory failed.
    pub skipped: Vec<SkippedService>,
}

/// Instantiates catalogued services into a table.
#[derive(Debug, Default)]
pub struct ServiceLoader {
    catalog: ServiceCatalog,
}

impl ServiceLoader {
    pub fn new(catalog: ServiceCatalog) -> Self {
        Self { catalog }
    }

    pub fn catalog(&self) -> &ServiceCatalog {
        &self.catalog
    }

    /// Instantiate every entry under `namespace` and register it.
    ///
    /// An empty namespace selects every entry.
    pub fn load(&self, namespace: &str, table: &ServiceTable) -> LoadReport {
        let mut report = LoadReport::default();

        for entry in self
            .catalog
            .entries
            .iter()
            .filter(|e| namespace_contains(namespace, &e.namespace))
        {
            let built = catch_unwind(AssertUnwindSafe(|| (entry.factory)()));
            let instance = match built {
                Ok(Ok(instance)) => instance,
                Ok(Err(reason)) => {
                    warn!(service = %entry.type_name, %reason, "Skipping service: factory failed");
                    report.skipped.push(SkippedService {
                        type_name: entry.type_name.clone(),
                        reason,
                    });
                    continue;
                }
                Err(panic) => {
                    let reason = panic_message(panic.as_ref());
                    warn!(service = %entry.type_name, %reason, "Skipping service: factory panicked");
                    report.skipped.push(SkippedService {
                        type_name: entry.type_name.clone(),
                        reason,
                    });
                    continue;
                }
            };

            debug!(
                service = %entry.type_name,
                interfaces = ?instance.interfaces(),
                "Registering service"
            );
            table.add_service(Arc::new(instance));
            report.loaded.push(entry.type_name.clone());
        }

        info!(
            namespace = %namespace,
            loaded = report.loaded.len(),
            skipped = report.skipped.len(),
            "Services loaded"
        );
        report
    }
}

/// True when `candidate` equals `namespace` or is nested beneath it.
fn namespace_contains(namespace: &str, candidate: &str) -> bool {
    if namespace.is_empty() {
        return true;
    }
    match candidate.strip_prefix(namespace) {
        Some(rest) => rest.is_empty() || rest.starts_with('.'),
        None => false,
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "factory panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::MethodRegistry;
    use std::convert::Infallible;

    #[derive(Default)]
    struct Calc;

    impl RemoteService for Calc {
        const INTERFACES: &'static [&'static str] = &["Calc"];

        fn methods(self: Arc<Self>, methods: &mut MethodRegistry) {
            methods.register("neg", &["int"], |(a,): (i64,)| async move { Ok::<_, Infallible>(-a) });
        }
    }

    #[derive(Default)]
    struct Clock;

    impl RemoteService for Clock {
        const INTERFACES: &'static [&'static str] = &["Clock"];

        fn methods(self: Arc<Self>, _methods: &mut MethodRegistry) {}
    }

    #[test]
    fn test_namespace_contains() {
        assert!(namespace_contains("a.b", "a.b"));
        assert!(namespace_contains("a.b", "a.b.c"));
        assert!(!namespace_contains("a.b", "a.bc"));
        assert!(!namespace_contains("a.b", "a"));
        assert!(namespace_contains("", "anything"));
    }

    #[test]
    fn test_load_filters_by_namespace() {
        let mut catalog = ServiceCatalog::new();
        catalog.provide::<Calc>("app.math").provide::<Clock>("other");

        let table = ServiceTable::new();
        let report = ServiceLoader::new(catalog).load("app", &table);

        assert_eq!(report.loaded, vec!["Calc"]);
        assert!(report.skipped.is_empty());
        assert!(table.lookup("Calc").is_some());
        assert!(table.lookup("Clock").is_none());
    }

    #[test]
    fn test_failing_and_panicking_factories_are_skipped() {
        let mut catalog = ServiceCatalog::new();
        catalog
            .provide_with("app", "Broken", || Err::<ServiceInstance, _>("no database"))
            .provide_with("app", "Explodes", || -> Result<ServiceInstance, String> {
                panic!("constructor blew up")
            })
            .provide::<Calc>("app");

        let table = ServiceTable::new();
        let report = ServiceLoader::new(catalog).load("app", &table);

        assert_eq!(report.loaded, vec!["Calc"]);
        assert_eq!(
            report.skipped,
            vec![
                SkippedService {
                    type_name: "Broken".into(),
                    reason: "no database".into()
                },
                SkippedService {
                    type_name: "Explodes".into(),
                    reason: "constructor blew up".into()
                },
            ]
        );
        assert_eq!(table.snapshot().len(), 1);
    }

    #[test]
    fn test_no_matches_is_empty_table() {
        let mut catalog = ServiceCatalog::new();
        catalog.provide::<Calc>("app");

        let table = ServiceTable::new();
        let report = ServiceLoader::new(catalog).load("nothing.here", &table);

        assert!(report.loaded.is_empty());
        assert!(table.is_empty());
    }
}
