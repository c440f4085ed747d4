//! Calculator - one request/response round trip over a real socket.
//!
//! This example demonstrates:
//! - Registering a service implementation with `RemoteService`
//! - Starting the server on an ephemeral port
//! - Speaking the wire protocol with `FrameCodec` from a plain TCP client
//! - Graceful shutdown
//!
//! ```bash
//! cargo run --example calculator
//! ```

use std::convert::Infallible;
use std::sync::Arc;

use netwire_server::protocol::{FrameCodec, Request, Response};
use netwire_server::service::{MethodRegistry, RemoteService, ServiceInstance};
use netwire_server::Server;
use serde_json::json;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

struct Calculator;

impl RemoteService for Calculator {
    const INTERFACES: &'static [&'static str] = &["Calculator"];

    fn methods(self: Arc<Self>, methods: &mut MethodRegistry) {
        methods.register("add", &["int", "int"], |(a, b): (i64, i64)| async move {
            Ok::<_, Infallible>(a + b)
        });
    }
}

/// Send one request and wait for its response.
async fn call(stream: &mut TcpStream, codec: &mut FrameCodec, request: Request) -> Result<Response, Box<dyn std::error::Error>> {
    stream.write_all(&codec.encode_request(&request)?).await?;

    let mut buf = [0u8; 4096];
    loop {
        let n = stream.read(&mut buf).await?;
        if n == 0 {
            return Err("server closed the connection".into());
        }
        if let Some(response) = codec.decode_responses(&buf[..n])?.into_iter().next() {
            return Ok(response);
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt().with_env_filter("netwire_server=info").init();

    let server = Server::builder().address("127.0.0.1:0").workers(2).build();
    server.add_service(ServiceInstance::from_service(Calculator));
    let handle = server.start().await?;

    let mut stream = TcpStream::connect(handle.local_addr()).await?;
    let mut codec: FrameCodec = FrameCodec::new();

    let sum = call(
        &mut stream,
        &mut codec,
        Request::new(1, "Calculator", "add", vec!["int".into(), "int".into()], vec![json!(2), json!(3)]),
    )
    .await?;
    println!("Calculator.add(2, 3) -> {:?}", sum.result());

    let missing = call(&mut stream, &mut codec, Request::new(2, "Unknown", "x", vec![], vec![])).await?;
    println!("Unknown.x() -> {:?}", missing.error_descriptor());

    drop(stream);
    handle.shutdown().await;
    Ok(())
}
