//! # netwire-server
//!
//! Serving half of a minimal RPC framework over TCP.
//!
//! Clients send length-prefixed request frames naming an interface, a method
//! and its parameter types. The server looks the implementation up, runs it
//! on a bounded worker pool and writes the response back on the same
//! connection, in request order.
//!
//! ## Architecture
//!
//! - **Wire** ([`protocol`], [`codec`]): 4-byte big-endian length prefix, then
//!   a MessagePack (or JSON) encoded request or response
//! - **Services** ([`service`]): implementations keyed by interface id, loaded
//!   from a catalog at start or added at runtime
//! - **Execution** ([`dispatcher`], [`worker_pool`]): lookup, invoke, map
//!   failures to structured errors, shed load when saturated
//! - **Lifecycle** ([`server`], [`registry`]): bind, advertise, accept,
//!   drain, withdraw
//!
//! ## Example
//!
//! ```no_run
//! use std::convert::Infallible;
//! use netwire_server::service::ServiceInstance;
//! use netwire_server::Server;
//!
//! #[tokio::main]
//! async fn main() -> netwire_server::Result<()> {
//!     let server = Server::builder().address("127.0.0.1:9999").build();
//!
//!     server.add_service(
//!         ServiceInstance::builder("Calculator")
//!             .interface("Calculator")
//!             .method("add", &["int", "int"], |(a, b): (i64, i64)| async move {
//!                 Ok::<_, Infallible>(a + b)
//!             })
//!             .build(),
//!     );
//!
//!     server
//!         .run_until(async {
//!             let _ = tokio::signal::ctrl_c().await;
//!         })
//!         .await
//! }
//! ```

pub mod codec;
pub mod config;
pub mod connection;
pub mod dispatcher;
pub mod error;
pub mod protocol;
pub mod registry;
pub mod server;
pub mod service;
pub mod worker_pool;

mod writer;

pub use error::{NetwireError, Result};
pub use server::{LifecycleState, Server, ServerBuilder, ServerHandle};
