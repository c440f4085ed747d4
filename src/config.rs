//! Configuration management for the netwire server.
//!
//! Sources, later overriding earlier:
//! 1. Built-in defaults
//! 2. `server-config.toml` in the working directory (optional), or the file
//!    given with `--config` (required when given)
//! 3. Environment variables prefixed with `NETWIRE__`, sections separated by
//!    `__` (e.g. `NETWIRE__SERVER__ADDRESS=0.0.0.0:9999`)
//! 4. Command-line arguments
//!
//! # Example file
//!
//! ```toml
//! [server]
//! address = "0.0.0.0:9999"
//! servicePackage = "netwire.demo"
//! workers = 8
//!
//! [registry]
//! address = "127.0.0.1:2181"
//! ```

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};

use crate::codec::CodecKind;
use crate::connection::DEFAULT_MAX_IN_FLIGHT;
use crate::error::Result;
use crate::protocol::{ABSOLUTE_MAX_FRAME_SIZE, DEFAULT_MAX_FRAME_SIZE};
use crate::registry::DEFAULT_REGISTRY_TIMEOUT;
use crate::server::{DEFAULT_BACKLOG, DEFAULT_DRAIN_GRACE};
use crate::worker_pool::DEFAULT_QUEUE_CAPACITY;

/// Configuration file looked up in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "server-config.toml";

/// Environment variable prefix.
pub const ENV_PREFIX: &str = "NETWIRE";

/// Command-line arguments
#[derive(Debug, Default, Parser)]
#[command(name = "netwire-server", version, about)]
pub struct Args {
    /// Configuration file path
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Bind and advertise address (host:port)
    #[arg(short, long)]
    pub address: Option<String>,

    /// Namespace of services to load
    #[arg(long)]
    pub service_package: Option<String>,

    /// Worker pool threads
    #[arg(long)]
    pub workers: Option<usize>,

    /// Invocations allowed to queue before requests are shed
    #[arg(long)]
    pub queue_capacity: Option<usize>,

    /// Maximum frame payload in bytes
    #[arg(long)]
    pub max_frame_size: Option<u32>,

    /// Pending responses per connection
    #[arg(long)]
    pub max_in_flight: Option<usize>,

    /// Shutdown grace window in milliseconds
    #[arg(long)]
    pub drain_grace_ms: Option<u64>,

    /// Listen backlog
    #[arg(long)]
    pub backlog: Option<u32>,

    /// Payload codec (msgpack, json)
    #[arg(long)]
    pub codec: Option<CodecKind>,

    /// Discovery registry address
    #[arg(long)]
    pub registry: Option<String>,

    /// Registry call timeout in milliseconds
    #[arg(long)]
    pub registry_timeout_ms: Option<u64>,

    /// I/O runtime threads (defaults to the number of CPUs)
    #[arg(long)]
    pub io_threads: Option<usize>,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

/// Server configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetwireConfig {
    pub server: ServerSettings,
    pub registry: RegistrySettings,
}

/// `[server]` section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    /// Bind and advertise address
    pub address: String,
    /// Namespace scanned by the service loader
    #[serde(rename = "servicePackage", alias = "servicepackage", alias = "service_package")]
    pub service_package: String,
    /// Worker pool threads
    pub workers: usize,
    /// Queued invocations before ServerBusy
    #[serde(rename = "queueCapacity", alias = "queuecapacity", alias = "queue_capacity")]
    pub queue_capacity: usize,
    /// Maximum payload bytes per frame
    #[serde(rename = "maxFrameSize", alias = "maxframesize", alias = "max_frame_size")]
    pub max_frame_size: u32,
    /// Pending responses per connection
    #[serde(rename = "maxInFlight", alias = "maxinflight", alias = "max_in_flight")]
    pub max_in_flight: usize,
    /// Shutdown grace window
    #[serde(rename = "drainGraceMs", alias = "draingracems", alias = "drain_grace_ms")]
    pub drain_grace_ms: u64,
    /// Listen backlog
    pub backlog: u32,
    /// Payload codec
    pub codec: CodecKind,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            address: "127.0.0.1:9999".to_string(),
            service_package: String::new(),
            workers: num_cpus::get(),
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            max_in_flight: DEFAULT_MAX_IN_FLIGHT,
            drain_grace_ms: DEFAULT_DRAIN_GRACE.as_millis() as u64,
            backlog: DEFAULT_BACKLOG,
            codec: CodecKind::default(),
        }
    }
}

/// `[registry]` section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistrySettings {
    /// Discovery backend address; unset means no registry
    pub address: Option<String>,
    /// Per-call timeout
    #[serde(rename = "timeoutMs", alias = "timeoutms", alias = "timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for RegistrySettings {
    fn default() -> Self {
        Self {
            address: None,
            timeout_ms: DEFAULT_REGISTRY_TIMEOUT.as_millis() as u64,
        }
    }
}

impl NetwireConfig {
    /// Load configuration from all sources
    pub fn load(args: &Args) -> Result<Self> {
        let mut builder = Config::builder();

        builder = match &args.config {
            Some(path) => builder.add_source(File::from(path.as_path())),
            None => builder.add_source(File::with_name(DEFAULT_CONFIG_FILE).required(false)),
        };

        builder = builder.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        let mut config: NetwireConfig = builder.build()?.try_deserialize()?;
        config.apply_args(args);
        config.validate()?;
        Ok(config)
    }

    /// Override with command line args
    fn apply_args(&mut self, args: &Args) {
        if let Some(address) = &args.address {
            self.server.address = address.clone();
        }
        if let Some(package) = &args.service_package {
            self.server.service_package = package.clone();
        }
        if let Some(workers) = args.workers {
            self.server.workers = workers;
        }
        if let Some(capacity) = args.queue_capacity {
            self.server.queue_capacity = capacity;
        }
        if let Some(size) = args.max_frame_size {
            self.server.max_frame_size = size;
        }
        if let Some(limit) = args.max_in_flight {
            self.server.max_in_flight = limit;
        }
        if let Some(grace) = args.drain_grace_ms {
            self.server.drain_grace_ms = grace;
        }
        if let Some(backlog) = args.backlog {
            self.server.backlog = backlog;
        }
        if let Some(codec) = args.codec {
            self.server.codec = codec;
        }
        if let Some(registry) = &args.registry {
            self.registry.address = Some(registry.clone());
        }
        if let Some(timeout) = args.registry_timeout_ms {
            self.registry.timeout_ms = timeout;
        }
    }

    /// Reject values the server cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.server.address.trim().is_empty() {
            return invalid("server.address must not be empty".to_string());
        }
        if self.server.workers == 0 {
            return invalid("server.workers must be at least 1".to_string());
        }
        if self.server.max_in_flight == 0 {
            return invalid("server.maxInFlight must be at least 1".to_string());
        }
        if self.server.max_frame_size == 0 || self.server.max_frame_size > ABSOLUTE_MAX_FRAME_SIZE {
            return invalid(format!(
                "server.maxFrameSize must be between 1 and {}",
                ABSOLUTE_MAX_FRAME_SIZE
            ));
        }
        Ok(())
    }

    pub fn drain_grace(&self) -> Duration {
        Duration::from_millis(self.server.drain_grace_ms)
    }

    pub fn registry_timeout(&self) -> Duration {
        Duration::from_millis(self.registry.timeout_ms)
    }
}

fn invalid(message: String) -> Result<()> {
    Err(ConfigError::Message(message).into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn toml_file(contents: &str) -> NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    fn args_for(file: &NamedTempFile, extra: &[&str]) -> Args {
        let mut argv = vec![
            "netwire-server".to_string(),
            "--config".to_string(),
            file.path().display().to_string(),
        ];
        argv.extend(extra.iter().map(|s| s.to_string()));
        Args::parse_from(argv)
    }

    #[test]
    fn test_defaults() {
        let config = NetwireConfig::default();

        assert_eq!(config.server.address, "127.0.0.1:9999");
        assert_eq!(config.server.queue_capacity, 1024);
        assert_eq!(config.server.max_frame_size, 16 * 1024 * 1024);
        assert_eq!(config.server.backlog, 128);
        assert_eq!(config.drain_grace(), Duration::from_secs(5));
        assert_eq!(config.registry_timeout(), Duration::from_secs(3));
        assert!(config.registry.address.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_file_values() {
        let file = toml_file(
            r#"
            [server]
            address = "0.0.0.0:7000"
            servicePackage = "netwire.demo"
            workers = 3
            codec = "json"

            [registry]
            address = "127.0.0.1:2181"
            timeoutMs = 500
            "#,
        );

        let config = NetwireConfig::load(&args_for(&file, &[])).unwrap();

        assert_eq!(config.server.address, "0.0.0.0:7000");
        assert_eq!(config.server.service_package, "netwire.demo");
        assert_eq!(config.server.workers, 3);
        assert_eq!(config.server.codec, CodecKind::Json);
        assert_eq!(config.server.queue_capacity, 1024);
        assert_eq!(config.registry.address.as_deref(), Some("127.0.0.1:2181"));
        assert_eq!(config.registry_timeout(), Duration::from_millis(500));
    }

    #[test]
    fn test_args_override_file() {
        let file = toml_file("[server]\naddress = \"0.0.0.0:7000\"\nworkers = 3\n");

        let config = NetwireConfig::load(&args_for(
            &file,
            &["--address", "127.0.0.1:7001", "--workers", "5", "--registry", "10.0.0.1:2181"],
        ))
        .unwrap();

        assert_eq!(config.server.address, "127.0.0.1:7001");
        assert_eq!(config.server.workers, 5);
        assert_eq!(config.registry.address.as_deref(), Some("10.0.0.1:2181"));
    }

    #[test]
    fn test_invalid_value_is_error() {
        let file = toml_file("[server]\nworkers = \"many\"\n");

        assert!(NetwireConfig::load(&args_for(&file, &[])).is_err());
    }

    #[test]
    fn test_zero_workers_rejected() {
        let file = toml_file("[server]\nworkers = 0\n");

        assert!(NetwireConfig::load(&args_for(&file, &[])).is_err());
    }

    #[test]
    fn test_missing_explicit_file_is_error() {
        let args = Args::parse_from(["netwire-server", "--config", "/nonexistent/netwire.toml"]);

        assert!(NetwireConfig::load(&args).is_err());
    }
}
