//! Method table for a service instance.
//!
//! Methods are keyed by name plus ordered parameter-type descriptors, so a
//! service may overload a name with different signatures.
//!
//! # Example
//!
//! ```
//! use std::convert::Infallible;
//! use netwire_server::service::MethodRegistry;
//!
//! let mut methods = MethodRegistry::new();
//! methods.register("add", &["int", "int"], |(a, b): (i64, i64)| async move {
//!     Ok::<_, Infallible>(a + b)
//! });
//!
//! assert!(methods.lookup("add", &["int".to_string(), "int".to_string()]).is_some());
//! assert!(methods.lookup("add", &["int".to_string()]).is_none());
//! ```

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::marker::PhantomData;
use std::pin::Pin;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

/// Boxed future for handler results.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Result of one invocation: the encoded return value, or a failure message.
pub type InvocationResult = std::result::Result<Value, String>;

/// Trait for method handlers.
pub trait Handler: Send + Sync + 'static {
    /// Invoke with the request's parameter values.
    fn call(&self, params: Vec<Value>) -> BoxFuture<'static, InvocationResult>;
}

/// Name and parameter-type descriptors identifying one method.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MethodSignature {
    pub name: String,
    pub param_types: Vec<String>,
}

impl MethodSignature {
    pub fn new(name: impl Into<String>, param_types: &[&str]) -> Self {
        Self {
            name: name.into(),
            param_types: param_types.iter().map(|t| t.to_string()).collect(),
        }
    }
}

impl fmt::Display for MethodSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.name, self.param_types.join(","))
    }
}

/// Decode positional parameters into the handler's argument type.
///
/// Parameters are presented as a JSON array, so tuples and tuple structs
/// decode positionally. An empty parameter list also decodes as `()`.
fn decode_args<T: DeserializeOwned>(params: Vec<Value>) -> serde_json::Result<T> {
    let empty = params.is_empty();
    match serde_json::from_value(Value::Array(params)) {
        Ok(args) => Ok(args),
        Err(_) if empty => serde_json::from_value(Value::Null),
        Err(e) => Err(e),
    }
}

fn encode_result<R: Serialize>(value: R) -> InvocationResult {
    serde_json::to_value(value).map_err(|e| format!("result could not be encoded: {}", e))
}

/// Wrapper that decodes arguments before calling an async handler.
pub struct TypedHandler<F, T, Fut, R, E>
where
    F: Fn(T) -> Fut + Send + Sync + 'static,
    T: DeserializeOwned + Send + 'static,
    Fut: Future<Output = std::result::Result<R, E>> + Send + 'static,
    R: Serialize + Send + 'static,
    E: fmt::Display + Send + 'static,
{
    handler: F,
    _phantom: PhantomData<fn(T) -> (Fut, R, E)>,
}

impl<F, T, Fut, R, E> TypedHandler<F, T, Fut, R, E>
where
    F: Fn(T) -> Fut + Send + Sync + 'static,
    T: DeserializeOwned + Send + 'static,
    Fut: Future<Output = std::result::Result<R, E>> + Send + 'static,
    R: Serialize + Send + 'static,
    E: fmt::Display + Send + 'static,
{
    pub fn new(handler: F) -> Self {
        Self {
            handler,
            _phantom: PhantomData,
        }
    }
}

impl<F, T, Fut, R, E> Handler for TypedHandler<F, T, Fut, R, E>
where
    F: Fn(T) -> Fut + Send + Sync + 'static,
    T: DeserializeOwned + Send + 'static,
    Fut: Future<Output = std::result::Result<R, E>> + Send + 'static,
    R: Serialize + Send + 'static,
    E: fmt::Display + Send + 'static,
{
    fn call(&self, params: Vec<Value>) -> BoxFuture<'static, InvocationResult> {
        let args: T = match decode_args(params) {
            Ok(v) => v,
            Err(e) => {
                let msg = format!("arguments could not be decoded: {}", e);
                return Box::pin(async move { Err(msg) });
            }
        };

        let fut = (self.handler)(args);
        Box::pin(async move {
            match fut.await {
                Ok(value) => encode_result(value),
                Err(e) => Err(e.to_string()),
            }
        })
    }
}

/// Wrapper that runs a synchronous handler on the blocking thread pool.
pub struct BlockingHandler<F, T, R, E>
where
    F: Fn(T) -> std::result::Result<R, E> + Send + Sync + 'static,
    T: DeserializeOwned + Send + 'static,
    R: Serialize + Send + 'static,
    E: fmt::Display + Send + 'static,
{
    handler: Arc<F>,
    _phantom: PhantomData<fn(T) -> (R, E)>,
}

impl<F, T, R, E> BlockingHandler<F, T, R, E>
where
    F: Fn(T) -> std::result::Result<R, E> + Send + Sync + 'static,
    T: DeserializeOwned + Send + 'static,
    R: Serialize + Send + 'static,
    E: fmt::Display + Send + 'static,
{
    pub fn new(handler: F) -> Self {
        Self {
            handler: Arc::new(handler),
            _phantom: PhantomData,
        }
    }
}

impl<F, T, R, E> Handler for BlockingHandler<F, T, R, E>
where
    F: Fn(T) -> std::result::Result<R, E> + Send + Sync + 'static,
    T: DeserializeOwned + Send + 'static,
    R: Serialize + Send + 'static,
    E: fmt::Display + Send + 'static,
{
    fn call(&self, params: Vec<Value>) -> BoxFuture<'static, InvocationResult> {
        let handler = Arc::clone(&self.handler);
        Box::pin(async move {
            let args: T = decode_args(params)
                .map_err(|e| format!("arguments could not be decoded: {}", e))?;

            let joined = tokio::task::spawn_blocking(move || {
                (*handler)(args)
                    .map_err(|e| e.to_string())
                    .and_then(encode_result)
            })
            .await;

            match joined {
                Ok(result) => result,
                Err(e) if e.is_panic() => Err("method panicked".to_string()),
                Err(e) => Err(format!("method was cancelled: {}", e)),
            }
        })
    }
}

/// Registry mapping method signatures to handlers.
#[derive(Default)]
pub struct MethodRegistry {
    /// Handlers by name, then by parameter types.
    methods: HashMap<String, HashMap<Vec<String>, Arc<dyn Handler>>>,
}

impl MethodRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an async method handler.
    ///
    /// The handler receives the decoded argument tuple and returns any
    /// serializable value or a displayable error. Registering the same
    /// signature twice replaces the earlier handler.
    pub fn register<F, T, Fut, R, E>(&mut self, name: &str, param_types: &[&str], handler: F)
    where
        F: Fn(T) -> Fut + Send + Sync + 'static,
        T: DeserializeOwned + Send + 'static,
        Fut: Future<Output = std::result::Result<R, E>> + Send + 'static,
        R: Serialize + Send + 'static,
        E: fmt::Display + Send + 'static,
    {
        self.insert(name, param_types, Arc::new(TypedHandler::new(handler)));
    }

    /// Register a synchronous handler that may block.
    pub fn register_blocking<F, T, R, E>(&mut self, name: &str, param_types: &[&str], handler: F)
    where
        F: Fn(T) -> std::result::Result<R, E> + Send + Sync + 'static,
        T: DeserializeOwned + Send + 'static,
        R: Serialize + Send + 'static,
        E: fmt::Display + Send + 'static,
    {
        self.insert(name, param_types, Arc::new(BlockingHandler::new(handler)));
    }

    /// Register an already type-erased handler.
    pub fn insert(&mut self, name: &str, param_types: &[&str], handler: Arc<dyn Handler>) {
        let types = param_types.iter().map(|t| t.to_string()).collect();
        self.methods
            .entry(name.to_string())
            .or_default()
            .insert(types, handler);
    }

    /// Find the handler for an exact signature.
    pub fn lookup(&self, name: &str, param_types: &[String]) -> Option<Arc<dyn Handler>> {
        self.methods
            .get(name)
            .and_then(|overloads| overloads.get(param_types))
            .cloned()
    }

    /// True if any overload with this name exists.
    pub fn contains_name(&self, name: &str) -> bool {
        self.methods.contains_key(name)
    }

    /// All registered signatures, sorted.
    pub fn signatures(&self) -> Vec<MethodSignature> {
        let mut out: Vec<MethodSignature> = self
            .methods
            .iter()
            .flat_map(|(name, overloads)| {
                overloads.keys().map(move |types| MethodSignature {
                    name: name.clone(),
                    param_types: types.clone(),
                })
            })
            .collect();
        out.sort();
        out
    }

    /// Number of registered signatures.
    pub fn len(&self) -> usize {
        self.methods.values().map(HashMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.methods.is_empty()
    }
}

impl fmt::Debug for MethodRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.signatures()).finish()
    }
}
