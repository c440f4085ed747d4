//! Service module - service implementations and their registration.
//!
//! Provides:
//! - [`RemoteService`] - implemented by types exposed over the network
//! - [`ServiceInstance`] - a type-erased, dispatchable service
//! - [`ServiceTable`] - concurrent interface id → instance map
//! - [`ServiceLoader`] - instantiates catalogued services for a namespace
//!
//! # Example
//!
//! ```
//! use std::convert::Infallible;
//! use std::sync::Arc;
//! use netwire_server::service::{MethodRegistry, RemoteService, ServiceInstance, ServiceTable};
//!
//! struct Greeter;
//!
//! impl RemoteService for Greeter {
//!     const INTERFACES: &'static [&'static str] = &["Greeter"];
//!
//!     fn methods(self: Arc<Self>, methods: &mut MethodRegistry) {
//!         methods.register("hello", &["string"], |(name,): (String,)| async move {
//!             Ok::<_, Infallible>(format!("hello {}", name))
//!         });
//!     }
//! }
//!
//! let table = ServiceTable::new();
//! table.add_service(Arc::new(ServiceInstance::from_service(Greeter)));
//! assert!(table.lookup("Greeter").is_some());
//! ```

mod loader;
mod method;
mod table;

pub use loader::{LoadReport, ServiceCatalog, ServiceLoader, SkippedService};
pub use method::{
    BlockingHandler, BoxFuture, Handler, InvocationResult, MethodRegistry, MethodSignature,
    TypedHandler,
};
pub use table::ServiceTable;

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;

/// A type whose methods can be called remotely.
pub trait RemoteService: Send + Sync + 'static {
    /// Interface identifiers this type satisfies.
    const INTERFACES: &'static [&'static str];

    /// Register every remotely callable method.
    fn methods(self: Arc<Self>, methods: &mut MethodRegistry);
}

/// A registered service implementation.
///
/// Built once and shared as `Arc<ServiceInstance>`; the table holds one
/// reference per interface id.
#[derive(Debug)]
pub struct ServiceInstance {
    name: String,
    interfaces: Vec<String>,
    methods: MethodRegistry,
}

impl ServiceInstance {
    /// Erase a [`RemoteService`] into a dispatchable instance.
    pub fn from_service<S: RemoteService>(service: S) -> Self {
        let mut methods = MethodRegistry::new();
        Arc::new(service).methods(&mut methods);

        Self {
            name: short_type_name::<S>().to_string(),
            interfaces: S::INTERFACES.iter().map(|i| i.to_string()).collect(),
            methods,
        }
    }

    /// Start building an instance by hand.
    pub fn builder(name: impl Into<String>) -> ServiceInstanceBuilder {
        ServiceInstanceBuilder {
            name: name.into(),
            interfaces: Vec::new(),
            methods: MethodRegistry::new(),
        }
    }

    /// Implementation name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Interface identifiers this instance is registered under.
    pub fn interfaces(&self) -> &[String] {
        &self.interfaces
    }

    /// Method table.
    pub fn methods(&self) -> &MethodRegistry {
        &self.methods
    }
}

/// Builder for [`ServiceInstance`].
pub struct ServiceInstanceBuilder {
    name: String,
    interfaces: Vec<String>,
    methods: MethodRegistry,
}

impl ServiceInstanceBuilder {
    /// Add an interface identifier.
    pub fn interface(mut self, id: impl Into<String>) -> Self {
        self.interfaces.push(id.into());
        self
    }

    /// Add an async method.
    pub fn method<F, T, Fut, R, E>(mut self, name: &str, param_types: &[&str], handler: F) -> Self
    where
        F: Fn(T) -> Fut + Send + Sync + 'static,
        T: DeserializeOwned + Send + 'static,
        Fut: Future<Output = std::result::Result<R, E>> + Send + 'static,
        R: Serialize + Send + 'static,
        E: fmt::Display + Send + 'static,
    {
        self.methods.register(name, param_types, handler);
        self
    }

    /// Add a blocking method.
    pub fn blocking_method<F, T, R, E>(mut self, name: &str, param_types: &[&str], handler: F) -> Self
    where
        F: Fn(T) -> std::result::Result<R, E> + Send + Sync + 'static,
        T: DeserializeOwned + Send + 'static,
        R: Serialize + Send + 'static,
        E: fmt::Display + Send + 'static,
    {
        self.methods.register_blocking(name, param_types, handler);
        self
    }

    pub fn build(self) -> ServiceInstance {
        ServiceInstance {
            name: self.name,
            interfaces: self.interfaces,
            methods: self.methods,
        }
    }
}

pub(crate) fn short_type_name<S>() -> &'static str {
    let full = std::any::type_name::<S>();
    full.rsplit("::").next().unwrap_or(full)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::convert::Infallible;

    struct Echo;

    impl RemoteService for Echo {
        const INTERFACES: &'static [&'static str] = &["Echo", "Mirror"];

        fn methods(self: Arc<Self>, methods: &mut MethodRegistry) {
            methods.register("echo", &["string"], |(s,): (String,)| async move {
                Ok::<_, Infallible>(s)
            });
        }
    }

    #[test]
    fn test_from_service() {
        let instance = ServiceInstance::from_service(Echo);

        assert_eq!(instance.name(), "Echo");
        assert_eq!(instance.interfaces(), &["Echo".to_string(), "Mirror".to_string()]);
        assert_eq!(instance.methods().len(), 1);
    }

    #[test]
    fn test_builder() {
        let instance = ServiceInstance::builder("Clock")
            .interface("Clock")
            .method("now", &[], |_: ()| async move { Ok::<_, Infallible>(42u64) })
            .blocking_method("sleep", &["long"], |(_ms,): (u64,)| Ok::<_, Infallible>(()))
            .build();

        assert_eq!(instance.name(), "Clock");
        assert_eq!(instance.interfaces(), &["Clock".to_string()]);
        assert_eq!(instance.methods().len(), 2);
    }
}
