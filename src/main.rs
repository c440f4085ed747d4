//! netwire-server binary.
//!
//! ```bash
//! netwire-server --address 0.0.0.0:9999 --service-package netwire.demo
//! NETWIRE__SERVER__WORKERS=16 netwire-server -v
//! ```

use std::convert::Infallible;
use std::sync::Arc;

use clap::Parser;
use netwire_server::config::{Args, NetwireConfig};
use netwire_server::service::{MethodRegistry, RemoteService, ServiceCatalog};
use netwire_server::ServerBuilder;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Namespace of the services bundled with the binary.
const DEMO_NAMESPACE: &str = "netwire.demo";

#[derive(Default)]
struct Calculator;

impl RemoteService for Calculator {
    const INTERFACES: &'static [&'static str] = &["Calculator"];

    fn methods(self: Arc<Self>, methods: &mut MethodRegistry) {
        methods.register("add", &["int", "int"], |(a, b): (i64, i64)| async move {
            Ok::<_, Infallible>(a + b)
        });
        methods.register("add", &["double", "double"], |(a, b): (f64, f64)| async move {
            Ok::<_, Infallible>(a + b)
        });
        methods.register("div", &["int", "int"], |(a, b): (i64, i64)| async move {
            a.checked_div(b).ok_or("division by zero")
        });
    }
}

#[derive(Default)]
struct Echo;

impl RemoteService for Echo {
    const INTERFACES: &'static [&'static str] = &["Echo"];

    fn methods(self: Arc<Self>, methods: &mut MethodRegistry) {
        methods.register("echo", &["string"], |(message,): (String,)| async move {
            Ok::<_, Infallible>(message)
        });
    }
}

fn init_tracing(verbose: u8) {
    let default = match verbose {
        0 => "netwire_server=info",
        1 => "netwire_server=debug",
        _ => "netwire_server=trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut terminate) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = terminate.recv() => {}
                }
            }
            Err(_) => {
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    init_tracing(args.verbose);

    let config = NetwireConfig::load(&args)?;

    let mut runtime = tokio::runtime::Builder::new_multi_thread();
    runtime.enable_all().thread_name("netwire-io");
    if let Some(threads) = args.io_threads {
        runtime.worker_threads(threads.max(1));
    }
    let runtime = runtime.build()?;

    let mut catalog = ServiceCatalog::new();
    catalog
        .provide::<Calculator>(DEMO_NAMESPACE)
        .provide::<Echo>(DEMO_NAMESPACE);

    info!(
        address = %config.server.address,
        service_package = %config.server.service_package,
        workers = config.server.workers,
        "Starting netwire-server"
    );

    let server = ServerBuilder::from_config(&config).catalog(catalog).build();
    runtime.block_on(server.run_until(shutdown_signal()))?;

    Ok(())
}
