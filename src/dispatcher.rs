//! Request dispatch.
//!
//! Resolves a [`Request`] against the [`ServiceTable`], hands the invocation
//! to the [`WorkerPool`] and turns every outcome into a [`Response`]. Nothing
//! that goes wrong inside a method reaches the connection: lookup misses,
//! handler errors, panics and a saturated pool all become error responses.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::protocol::{ErrorKind, Request, Response};
use crate::service::{InvocationResult, MethodSignature, ServiceTable};
use crate::worker_pool::WorkerPool;

/// A response that is either known now or being computed on the pool.
#[derive(Debug)]
pub enum PendingResponse {
    /// Resolved without running a method.
    Ready(Response),
    /// Running on the worker pool.
    Running {
        id: u64,
        job: JoinHandle<InvocationResult>,
    },
}

impl PendingResponse {
    /// Correlation id of the request.
    pub fn id(&self) -> u64 {
        match self {
            Self::Ready(response) => response.id,
            Self::Running { id, .. } => *id,
        }
    }

    /// Wait for the response. Always yields a response carrying the request id.
    pub async fn resolve(self) -> Response {
        match self {
            Self::Ready(response) => response,
            Self::Running { id, job } => match job.await {
                Ok(Ok(value)) => Response::ok(id, value),
                Ok(Err(message)) => Response::error(id, ErrorKind::InvocationFailed, message),
                Err(e) if e.is_panic() => {
                    warn!(id, "Method panicked");
                    Response::error(id, ErrorKind::InvocationFailed, "method panicked")
                }
                Err(_) => Response::error(
                    id,
                    ErrorKind::InvocationFailed,
                    "invocation cancelled by server shutdown",
                ),
            },
        }
    }
}

/// Resolves requests and submits invocations.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    services: Arc<ServiceTable>,
    pool: Arc<WorkerPool>,
}

impl Dispatcher {
    pub fn new(services: Arc<ServiceTable>, pool: Arc<WorkerPool>) -> Self {
        Self { services, pool }
    }

    /// Dispatch one request.
    pub fn dispatch(&self, request: Request) -> PendingResponse {
        let Request {
            id,
            interface,
            method,
            param_types,
            params,
        } = request;

        let Some(service) = self.services.lookup(&interface) else {
            debug!(id, %interface, "Service not found");
            return PendingResponse::Ready(Response::error(
                id,
                ErrorKind::ServiceNotFound,
                interface,
            ));
        };

        let Some(handler) = service.methods().lookup(&method, &param_types) else {
            let signature = MethodSignature {
                name: method,
                param_types,
            };
            debug!(id, %interface, %signature, "Method not found");
            return PendingResponse::Ready(Response::error(
                id,
                ErrorKind::MethodNotFound,
                format!("{}.{}", interface, signature),
            ));
        };

        // Argument decoding and the handler's synchronous prologue run on the pool too
        match self.pool.try_submit(async move { handler.call(params).await }) {
            Ok(job) => PendingResponse::Running { id, job },
            Err(e) => {
                warn!(id, %interface, %method, "Shedding request: {}", e);
                PendingResponse::Ready(Response::error(id, ErrorKind::ServerBusy, e.to_string()))
            }
        }
    }

    pub fn services(&self) -> &Arc<ServiceTable> {
        &self.services
    }

    pub fn pool(&self) -> &Arc<WorkerPool> {
        &self.pool
    }
}
