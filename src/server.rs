//! Server lifecycle.
//!
//! ```text
//! Initializing ──► Accepting ──► Draining ──► Stopped
//!  load services     accept loop    listener closed   registry withdrawn
//!  bind socket       per-connection connections drain worker pool released
//!  register address  pipelines      then force-close
//! ```
//!
//! Binding happens before the address is advertised, so a client that learns
//! the address from the registry always finds a listening socket. Registry
//! failures are logged and do not stop the server. A stopped server cannot be
//! restarted.
//!
//! # Example
//!
//! ```no_run
//! use netwire_server::server::Server;
//! use netwire_server::service::ServiceCatalog;
//!
//! # async fn run() -> netwire_server::Result<()> {
//! let server = Server::builder()
//!     .address("127.0.0.1:9999")
//!     .catalog(ServiceCatalog::new())
//!     .build();
//!
//! server.run_until(async { tokio::signal::ctrl_c().await.ok(); }).await
//! # }
//! ```

use std::collections::BTreeSet;
use std::fmt;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::net::{TcpListener, TcpSocket};
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use crate::codec::CodecKind;
use crate::config::NetwireConfig;
use crate::connection::{serve_connection, ConnectionConfig};
use crate::dispatcher::Dispatcher;
use crate::error::{NetwireError, Result};
use crate::registry::{DiscoveryBackend, RegistryClient, DEFAULT_REGISTRY_TIMEOUT};
use crate::service::{ServiceCatalog, ServiceInstance, ServiceLoader, ServiceTable};
use crate::worker_pool::{WorkerPool, WorkerPoolConfig, WorkerPoolMetrics};

/// Default shutdown grace window.
pub const DEFAULT_DRAIN_GRACE: Duration = Duration::from_secs(5);

/// Default listen backlog.
pub const DEFAULT_BACKLOG: u32 = 128;

/// Pause after a failed accept, e.g. when out of file descriptors.
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(100);

/// Where the server is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Initializing,
    Accepting,
    Draining,
    Stopped,
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Initializing => "initializing",
            Self::Accepting => "accepting",
            Self::Draining => "draining",
            Self::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// Builder for creating a [`Server`].
pub struct ServerBuilder {
    address: String,
    service_package: String,
    catalog: ServiceCatalog,
    discovery: Option<Arc<dyn DiscoveryBackend>>,
    registry_address: Option<String>,
    registry_timeout: Duration,
    pool: WorkerPoolConfig,
    connection: ConnectionConfig,
    drain_grace: Duration,
    backlog: u32,
}

impl ServerBuilder {
    pub fn new() -> Self {
        Self {
            address: "127.0.0.1:9999".to_string(),
            service_package: String::new(),
            catalog: ServiceCatalog::new(),
            discovery: None,
            registry_address: None,
            registry_timeout: DEFAULT_REGISTRY_TIMEOUT,
            pool: WorkerPoolConfig::default(),
            connection: ConnectionConfig::default(),
            drain_grace: DEFAULT_DRAIN_GRACE,
            backlog: DEFAULT_BACKLOG,
        }
    }

    /// Start from loaded configuration.
    pub fn from_config(config: &NetwireConfig) -> Self {
        let server = &config.server;
        let mut builder = Self::new()
            .address(&server.address)
            .service_package(&server.service_package)
            .workers(server.workers)
            .queue_capacity(server.queue_capacity)
            .max_frame_size(server.max_frame_size)
            .max_in_flight(server.max_in_flight)
            .drain_grace(config.drain_grace())
            .backlog(server.backlog)
            .codec(server.codec)
            .registry_timeout(config.registry_timeout());
        builder.registry_address = config.registry.address.clone();
        builder
    }

    /// Bind and advertise address (`host:port`).
    pub fn address(mut self, address: impl Into<String>) -> Self {
        self.address = address.into();
        self
    }

    /// Namespace whose catalogued services are loaded at start.
    pub fn service_package(mut self, namespace: impl Into<String>) -> Self {
        self.service_package = namespace.into();
        self
    }

    pub fn catalog(mut self, catalog: ServiceCatalog) -> Self {
        self.catalog = catalog;
        self
    }

    /// Use this discovery backend instead of one derived from the registry address.
    pub fn discovery(mut self, backend: Arc<dyn DiscoveryBackend>) -> Self {
        self.discovery = Some(backend);
        self
    }

    pub fn registry_timeout(mut self, timeout: Duration) -> Self {
        self.registry_timeout = timeout;
        self
    }

    pub fn workers(mut self, workers: usize) -> Self {
        self.pool.workers = workers;
        self
    }

    pub fn queue_capacity(mut self, capacity: usize) -> Self {
        self.pool.queue_capacity = capacity;
        self
    }

    pub fn max_frame_size(mut self, size: u32) -> Self {
        self.connection.max_frame_size = size;
        self
    }

    pub fn max_in_flight(mut self, limit: usize) -> Self {
        self.connection.max_in_flight = limit;
        self
    }

    pub fn codec(mut self, codec: CodecKind) -> Self {
        self.connection.codec = codec;
        self
    }

    pub fn drain_grace(mut self, grace: Duration) -> Self {
        self.drain_grace = grace;
        self
    }

    pub fn backlog(mut self, backlog: u32) -> Self {
        self.backlog = backlog;
        self
    }

    pub fn build(self) -> Server {
        let registry = match self.discovery {
            Some(backend) => RegistryClient::new(backend, self.registry_timeout),
            None => RegistryClient::from_address(self.registry_address.as_deref(), self.registry_timeout),
        };

        Server {
            address: self.address,
            service_package: self.service_package,
            loader: ServiceLoader::new(self.catalog),
            services: Arc::new(ServiceTable::new()),
            registry,
            pool: self.pool,
            connection: self.connection,
            drain_grace: self.drain_grace,
            backlog: self.backlog,
        }
    }
}

impl Default for ServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A configured server that has not started yet.
pub struct Server {
    address: String,
    service_package: String,
    loader: ServiceLoader,
    services: Arc<ServiceTable>,
    registry: RegistryClient,
    pool: WorkerPoolConfig,
    connection: ConnectionConfig,
    drain_grace: Duration,
    backlog: u32,
}

impl Server {
    pub fn builder() -> ServerBuilder {
        ServerBuilder::new()
    }

    /// Register an instance under each of its interfaces.
    pub fn add_service(&self, instance: ServiceInstance) -> Vec<Arc<ServiceInstance>> {
        self.services.add_service(Arc::new(instance))
    }

    /// Remove the implementation for an interface. Unknown ids return `None`.
    pub fn remove_service(&self, interface: &str) -> Option<Arc<ServiceInstance>> {
        self.services.unregister(interface)
    }

    pub fn active_service_names(&self) -> BTreeSet<String> {
        self.services.snapshot()
    }

    pub fn services(&self) -> &Arc<ServiceTable> {
        &self.services
    }

    /// Load services, bind, advertise, and start accepting connections.
    ///
    /// A malformed address, a bind failure or a worker pool that cannot
    /// start is fatal. Registry failure is not.
    pub async fn start(self) -> Result<ServerHandle> {
        let (state_tx, state_rx) = watch::channel(LifecycleState::Initializing);
        info!(address = %self.address, "Server initializing");

        self.loader.load(&self.service_package, &self.services);

        let bind_addr = resolve_address(&self.address).await?;
        let pool = Arc::new(WorkerPool::new(self.pool.clone())?);
        let listener = bind_listener(bind_addr, self.backlog)?;
        let local_addr = listener.local_addr()?;
        let advertised = advertised_address(&self.address, local_addr);
        info!(address = %local_addr, backlog = self.backlog, "Listening");

        self.registry.register(&advertised).await;

        let drain = CancellationToken::new();
        let kill = CancellationToken::new();
        let tracker = TaskTracker::new();
        let dispatcher = Dispatcher::new(Arc::clone(&self.services), Arc::clone(&pool));

        let accept_task = tokio::spawn(accept_loop(
            listener,
            dispatcher,
            self.connection,
            drain.clone(),
            kill.clone(),
            tracker.clone(),
        ));

        state_tx.send_replace(LifecycleState::Accepting);
        info!(
            address = %advertised,
            services = ?self.services.snapshot(),
            codec = %self.connection.codec,
            "Server accepting connections"
        );

        Ok(ServerHandle {
            local_addr,
            advertised: Arc::from(advertised),
            services: self.services,
            pool: Arc::clone(&pool),
            connections: tracker.clone(),
            state_tx: Arc::new(state_tx),
            state_rx,
            drain,
            teardown: Arc::new(Mutex::new(Some(Teardown {
                accept_task,
                tracker,
                kill,
                registry: self.registry,
                pool,
                grace: self.drain_grace,
            }))),
        })
    }

    /// Start, wait for `signal`, then shut down gracefully.
    pub async fn run_until<F>(self, signal: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        let handle = self.start().await?;
        signal.await;
        info!("Shutdown requested");
        handle.shutdown().await;
        Ok(())
    }
}

impl fmt::Debug for Server {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Server")
            .field("address", &self.address)
            .field("service_package", &self.service_package)
            .field("services", &self.services)
            .field("registry", &self.registry)
            .finish()
    }
}

/// Resources released at shutdown, taken exactly once.
struct Teardown {
    accept_task: JoinHandle<()>,
    tracker: TaskTracker,
    kill: CancellationToken,
    registry: RegistryClient,
    pool: Arc<WorkerPool>,
    grace: Duration,
}

/// Handle to a running server.
#[derive(Clone)]
pub struct ServerHandle {
    local_addr: SocketAddr,
    advertised: Arc<str>,
    services: Arc<ServiceTable>,
    pool: Arc<WorkerPool>,
    connections: TaskTracker,
    state_tx: Arc<watch::Sender<LifecycleState>>,
    state_rx: watch::Receiver<LifecycleState>,
    drain: CancellationToken,
    teardown: Arc<Mutex<Option<Teardown>>>,
}

impl ServerHandle {
    /// Address the socket is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Address given to the discovery backend.
    pub fn advertised_address(&self) -> &str {
        &self.advertised
    }

    pub fn state(&self) -> LifecycleState {
        *self.state_rx.borrow()
    }

    /// Register an instance under each of its interfaces.
    pub fn add_service(&self, instance: ServiceInstance) -> Vec<Arc<ServiceInstance>> {
        self.services.add_service(Arc::new(instance))
    }

    pub fn remove_service(&self, interface: &str) -> Option<Arc<ServiceInstance>> {
        self.services.unregister(interface)
    }

    pub fn active_service_names(&self) -> BTreeSet<String> {
        self.services.snapshot()
    }

    /// Open connections.
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    pub fn worker_metrics(&self) -> &Arc<WorkerPoolMetrics> {
        self.pool.metrics()
    }

    /// Stop accepting, drain, force-close leftovers, deregister, release workers.
    ///
    /// Safe to call more than once; later calls wait for the first to finish.
    pub async fn shutdown(&self) {
        let mut teardown = self.teardown.lock().await;
        let Some(Teardown {
            accept_task,
            tracker,
            kill,
            registry,
            pool,
            grace,
        }) = teardown.take()
        else {
            return;
        };

        let deadline = Instant::now() + grace;
        self.state_tx.send_replace(LifecycleState::Draining);
        info!(connections = tracker.len(), grace_ms = grace.as_millis() as u64, "Server draining");

        self.drain.cancel();
        if let Err(e) = accept_task.await {
            error!("Accept loop ended abnormally: {}", e);
        }

        tracker.close();
        if tokio::time::timeout(grace, tracker.wait()).await.is_err() {
            warn!(connections = tracker.len(), "Grace window elapsed, closing remaining connections");
            kill.cancel();
            tracker.wait().await;
        }

        registry.deregister(&self.advertised).await;
        pool.shutdown(deadline.saturating_duration_since(Instant::now())).await;
        self.services.clear();

        self.state_tx.send_replace(LifecycleState::Stopped);
        info!("Server stopped");
    }

    /// Wait until the server has stopped.
    pub async fn wait(&self) {
        let mut state = self.state_rx.clone();
        loop {
            if *state.borrow_and_update() == LifecycleState::Stopped {
                return;
            }
            if state.changed().await.is_err() {
                return;
            }
        }
    }
}

impl fmt::Debug for ServerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerHandle")
            .field("local_addr", &self.local_addr)
            .field("advertised", &self.advertised)
            .field("state", &self.state())
            .finish()
    }
}

async fn accept_loop(
    listener: TcpListener,
    dispatcher: Dispatcher,
    config: ConnectionConfig,
    drain: CancellationToken,
    kill: CancellationToken,
    tracker: TaskTracker,
) {
    loop {
        let accepted = tokio::select! {
            biased;
            _ = drain.cancelled() => break,
            accepted = listener.accept() => accepted,
        };

        let (stream, peer) = match accepted {
            Ok(conn) => conn,
            Err(e) => {
                error!("Accept failed: {}", e);
                tokio::time::sleep(ACCEPT_ERROR_BACKOFF).await;
                continue;
            }
        };

        if let Err(e) = stream.set_nodelay(true) {
            debug!(%peer, "Could not set TCP_NODELAY: {}", e);
        }
        debug!(%peer, "Connection opened");

        let dispatcher = dispatcher.clone();
        let drain = drain.clone();
        let kill = kill.clone();
        tracker.spawn(async move {
            tokio::select! {
                result = serve_connection(stream, peer, dispatcher, config, drain) => match result {
                    Ok(()) => debug!(%peer, "Connection closed"),
                    Err(e) => warn!(%peer, "Connection closed: {}", e),
                },
                _ = kill.cancelled() => debug!(%peer, "Connection force-closed"),
            }
        });
    }

    debug!("Listener closed");
}

/// Parse and resolve `host:port`.
async fn resolve_address(address: &str) -> Result<SocketAddr> {
    let invalid = |reason: String| NetwireError::InvalidAddress {
        address: address.to_string(),
        reason,
    };

    let (host, port) = address
        .rsplit_once(':')
        .ok_or_else(|| invalid("expected host:port".to_string()))?;
    if host.is_empty() {
        return Err(invalid("missing host".to_string()));
    }
    port.parse::<u16>()
        .map_err(|e| invalid(format!("invalid port '{}': {}", port, e)))?;

    tokio::net::lookup_host(address)
        .await
        .map_err(|e| invalid(e.to_string()))?
        .next()
        .ok_or_else(|| invalid("host did not resolve".to_string()))
}

fn bind_listener(addr: SocketAddr, backlog: u32) -> Result<TcpListener> {
    let socket = if addr.is_ipv4() {
        TcpSocket::new_v4()?
    } else {
        TcpSocket::new_v6()?
    };
    #[cfg(unix)]
    socket.set_reuseaddr(true)?;
    socket.set_keepalive(true)?;
    socket.bind(addr)?;
    Ok(socket.listen(backlog)?)
}

/// The configured address, with the real port when port 0 was requested.
fn advertised_address(configured: &str, local: SocketAddr) -> String {
    match configured.rsplit_once(':') {
        Some((host, "0")) => format!("{}:{}", host, local.port()),
        _ => configured.to_string(),
    }
}
