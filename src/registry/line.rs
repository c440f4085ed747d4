//! Newline-delimited JSON-RPC discovery backend.
//!
//! Each call opens a TCP connection to the registry, writes one request line
//! and reads one reply line:
//!
//! ```text
//! → {"jsonrpc":"2.0","id":1,"method":"$register","params":{"address":"10.0.0.5:9999"}}
//! ← {"jsonrpc":"2.0","id":1,"result":true}
//! ```
//!
//! A reply with an `error` member, or without a `result` member, is a failure.

use std::sync::atomic::{AtomicU64, Ordering};

use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;

use super::DiscoveryBackend;
use crate::error::{NetwireError, Result};
use crate::service::BoxFuture;

/// Upper bound on a reply line.
const MAX_REPLY_SIZE: u64 = 64 * 1024;

/// Build a registry request line (without the trailing newline).
pub fn build_registry_message(id: u64, method: &str, address: &str) -> String {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "method": method,
        "params": {
            "address": address
        }
    })
    .to_string()
}

/// Interpret a reply line.
fn parse_reply(line: &str) -> Result<()> {
    let reply: Value = serde_json::from_str(line.trim())?;

    if let Some(error) = reply.get("error") {
        let message = error
            .get("message")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| error.to_string());
        return Err(NetwireError::Registry(message));
    }
    if reply.get("result").is_none() {
        return Err(NetwireError::Registry(format!("reply has no result: {}", line.trim())));
    }
    Ok(())
}

/// Discovery backend speaking line JSON-RPC to `registry.address`.
#[derive(Debug)]
pub struct LineDiscovery {
    registry_address: String,
    next_id: AtomicU64,
}

impl LineDiscovery {
    pub fn new(registry_address: impl Into<String>) -> Self {
        Self {
            registry_address: registry_address.into(),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn registry_address(&self) -> &str {
        &self.registry_address
    }

    async fn call(&self, method: &str, address: &str) -> Result<()> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let mut line = build_registry_message(id, method, address);
        line.push('\n');

        let stream = TcpStream::connect(&self.registry_address).await?;
        let (read_half, mut write_half) = stream.into_split();
        write_half.write_all(line.as_bytes()).await?;
        write_half.flush().await?;

        let mut reply = String::new();
        let n = BufReader::new(read_half.take(MAX_REPLY_SIZE))
            .read_line(&mut reply)
            .await?;
        if n == 0 {
            return Err(NetwireError::ConnectionClosed);
        }

        parse_reply(&reply)
    }
}

impl DiscoveryBackend for LineDiscovery {
    fn name(&self) -> &'static str {
        "line"
    }

    fn register<'a>(&'a self, address: &'a str) -> BoxFuture<'a, Result<()>> {
        Box::pin(self.call("$register", address))
    }

    fn deregister<'a>(&'a self, address: &'a str) -> BoxFuture<'a, Result<()>> {
        Box::pin(self.call("$deregister", address))
    }
}
