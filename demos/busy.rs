//! Busy - load shedding when the worker pool is saturated.
//!
//! One worker, no queue: while a slow call occupies the worker, a second
//! call on another connection is answered immediately with `ServerBusy`.
//!
//! ```bash
//! cargo run --example busy
//! ```

use std::convert::Infallible;
use std::time::Duration;

use netwire_server::protocol::{FrameCodec, Request, Response};
use netwire_server::service::ServiceInstance;
use netwire_server::Server;
use serde_json::json;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

async fn call(address: std::net::SocketAddr, request: Request) -> Result<Response, Box<dyn std::error::Error + Send + Sync>> {
    let mut stream = TcpStream::connect(address).await?;
    let mut codec: FrameCodec = FrameCodec::new();
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
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tracing_subscriber::fmt().with_env_filter("netwire_server=info").init();

    let server = Server::builder()
        .address("127.0.0.1:0")
        .workers(1)
        .queue_capacity(0)
        .build();
    server.add_service(
        ServiceInstance::builder("Sleeper")
            .interface("Sleeper")
            .method("sleep", &["long"], |(ms,): (u64,)| async move {
                tokio::time::sleep(Duration::from_millis(ms)).await;
                Ok::<_, Infallible>(ms)
            })
            .build(),
    );
    let handle = server.start().await?;
    let address = handle.local_addr();

    let slow = tokio::spawn(call(
        address,
        Request::new(1, "Sleeper", "sleep", vec!["long".into()], vec![json!(500)]),
    ));
    // Let the slow call reach the worker
    tokio::time::sleep(Duration::from_millis(100)).await;

    let shed = call(address, Request::new(2, "Sleeper", "sleep", vec!["long".into()], vec![json!(1)])).await?;
    println!("second call -> {:?}", shed.error_descriptor());
    println!("first call  -> {:?}", slow.await??.result());
    println!("shed so far: {}", handle.worker_metrics().shed_count());

    handle.shutdown().await;
    Ok(())
}
