//! Per-connection pipeline.
//!
//! ```text
//! socket ─► read stage ─► PendingResponse queue ─► ordering stage ─► writer stage ─► socket
//!           (decode,        (bounded, request      (resolve in order,   (batched writev)
//!            dispatch)       order)                  encode)
//! ```
//!
//! Responses leave in request order even though invocations run
//! concurrently on the worker pool. The pending queue is bounded, so a client
//! that pipelines more than `max_in_flight` requests stops being read until
//! earlier responses are written.
//!
//! Any codec or I/O failure ends this connection only. When the drain token
//! fires the read stage stops taking new frames; requests already read still
//! get their responses before the socket is closed.

use std::net::SocketAddr;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::codec::{CodecKind, JsonCodec, MsgPackCodec, PayloadCodec};
use crate::dispatcher::{Dispatcher, PendingResponse};
use crate::error::{NetwireError, Result};
use crate::protocol::{ErrorKind, FrameCodec, Response, DEFAULT_MAX_FRAME_SIZE};
use crate::writer::{write_loop, writer_channel, OutboundFrame, WriterHandle};

/// Socket read buffer size.
const READ_BUFFER_SIZE: usize = 64 * 1024;

/// Default pending responses per connection.
pub const DEFAULT_MAX_IN_FLIGHT: usize = 64;

/// Per-connection settings.
#[derive(Debug, Clone, Copy)]
pub struct ConnectionConfig {
    /// Maximum payload size in either direction.
    pub max_frame_size: u32,
    /// Requests read but not yet answered.
    pub max_in_flight: usize,
    /// Payload codec.
    pub codec: CodecKind,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            max_in_flight: DEFAULT_MAX_IN_FLIGHT,
            codec: CodecKind::default(),
        }
    }
}

/// Serve one connection until the peer closes it, it fails, or `drain` fires
/// and every admitted request has been answered.
pub async fn serve_connection<S>(
    stream: S,
    peer: SocketAddr,
    dispatcher: Dispatcher,
    config: ConnectionConfig,
    drain: CancellationToken,
) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    match config.codec {
        CodecKind::MsgPack => {
            run_pipeline::<S, MsgPackCodec>(stream, peer, dispatcher, config, drain).await
        }
        CodecKind::Json => run_pipeline::<S, JsonCodec>(stream, peer, dispatcher, config, drain).await,
    }
}

async fn run_pipeline<S, C>(
    stream: S,
    peer: SocketAddr,
    dispatcher: Dispatcher,
    config: ConnectionConfig,
    drain: CancellationToken,
) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    C: PayloadCodec,
{
    let (reader, write_half) = tokio::io::split(stream);
    let (pending_tx, pending_rx) = mpsc::channel(config.max_in_flight.max(1));
    let (writer, frames_rx) = writer_channel(config.max_in_flight);

    // Stops the read stage when a later stage fails; never cancels the server
    let stop = drain.child_token();

    let read = read_stage::<_, C>(
        reader,
        peer,
        FrameCodec::with_max_frame_size(config.max_frame_size),
        &dispatcher,
        pending_tx,
        &stop,
    );
    let order = async {
        let res = ordering_stage::<C>(
            pending_rx,
            FrameCodec::with_max_frame_size(config.max_frame_size),
            writer,
        )
        .await;
        if res.is_err() {
            stop.cancel();
        }
        res
    };
    let write = async {
        let res = write_loop(frames_rx, write_half).await;
        if res.is_err() {
            stop.cancel();
        }
        res
    };

    let (read_res, order_res, write_res) = tokio::join!(read, order, write);
    read_res.and(write_res).and(order_res)
}

async fn read_stage<R, C>(
    mut reader: R,
    peer: SocketAddr,
    mut codec: FrameCodec<C>,
    dispatcher: &Dispatcher,
    pending: mpsc::Sender<PendingResponse>,
    stop: &CancellationToken,
) -> Result<()>
where
    R: AsyncRead + Unpin,
    C: PayloadCodec,
{
    let mut buf = vec![0u8; READ_BUFFER_SIZE];

    loop {
        let n = tokio::select! {
            biased;
            _ = stop.cancelled() => {
                debug!(%peer, "Connection stopped reading");
                return Ok(());
            }
            read = reader.read(&mut buf) => read?,
        };

        if n == 0 {
            if codec.has_partial_frame() {
                return Err(NetwireError::Protocol(
                    "stream ended in the middle of a frame".to_string(),
                ));
            }
            return Ok(());
        }

        codec.feed(&buf[..n]);
        // A bad frame ends the connection only after the requests ahead of it are queued
        while let Some(request) = codec.next_request()? {
            debug!(%peer, id = request.id, interface = %request.interface, method = %request.method, "Request");
            let response = dispatcher.dispatch(request);
            // Waits while max_in_flight responses are outstanding
            if pending.send(response).await.is_err() {
                return Err(NetwireError::ConnectionClosed);
            }
        }
    }
}

async fn ordering_stage<C: PayloadCodec>(
    mut pending: mpsc::Receiver<PendingResponse>,
    codec: FrameCodec<C>,
    writer: WriterHandle,
) -> Result<()> {
    while let Some(next) = pending.recv().await {
        let response = next.resolve().await;
        let payload = match codec.encode_response_payload(&response) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(id = response.id, "Response could not be encoded: {}", e);
                let fallback = Response::error(
                    response.id,
                    ErrorKind::InvocationFailed,
                    format!("result could not be encoded: {}", e),
                );
                codec.encode_response_payload(&fallback)?
            }
        };
        writer.send(OutboundFrame::new(payload)).await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{LengthPrefix, Request, LENGTH_PREFIX_SIZE};
    use crate::service::{MethodRegistry, RemoteService, ServiceInstance, ServiceTable};
    use crate::worker_pool::{WorkerPool, WorkerPoolConfig};
    use serde_json::json;
    use std::convert::Infallible;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::io::{duplex, AsyncWriteExt, DuplexStream};

    struct Slow;

    impl RemoteService for Slow {
        const INTERFACES: &'static [&'static str] = &["Slow"];

        fn methods(self: Arc<Self>, methods: &mut MethodRegistry) {
            methods.register("sleep", &["long"], |(ms,): (u64,)| async move {
                tokio::time::sleep(Duration::from_millis(ms)).await;
                Ok::<_, Infallible>(ms)
            });
            methods.register("huge", &[], |_: ()| async move {
                Ok::<_, Infallible>("x".repeat(1024))
            });
        }
    }

    fn dispatcher() -> Dispatcher {
        let table = Arc::new(ServiceTable::new());
        table.add_service(Arc::new(ServiceInstance::from_service(Slow)));
        let pool = Arc::new(WorkerPool::new(WorkerPoolConfig::new(4, 16)).unwrap());
        Dispatcher::new(table, pool)
    }

    fn peer() -> SocketAddr {
        "127.0.0.1:40000".parse().unwrap()
    }

    fn sleep_request(id: u64, ms: u64) -> Request {
        Request::new(id, "Slow", "sleep", vec!["long".into()], vec![json!(ms)])
    }

    async fn read_responses(client: &mut DuplexStream, count: usize) -> Vec<Response> {
        let mut codec: FrameCodec = FrameCodec::new();
        let mut out = Vec::new();
        let mut buf = [0u8; 4096];
        while out.len() < count {
            let n = client.read(&mut buf).await.unwrap();
            assert!(n > 0, "connection closed early");
            out.extend(codec.decode_responses(&buf[..n]).unwrap());
        }
        out
    }

    #[tokio::test]
    async fn test_responses_keep_request_order() {
        let (mut client, server) = duplex(64 * 1024);
        let task = tokio::spawn(serve_connection(
            server,
            peer(),
            dispatcher(),
            ConnectionConfig::default(),
            CancellationToken::new(),
        ));

        let codec: FrameCodec = FrameCodec::new();
        // The first request finishes last
        for (id, ms) in [(1, 80), (2, 1), (3, 20)] {
            client
                .write_all(&codec.encode_request(&sleep_request(id, ms)).unwrap())
                .await
                .unwrap();
        }

        let ids: Vec<u64> = read_responses(&mut client, 3).await.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![1, 2, 3]);

        drop(client);
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_oversize_prefix_closes_connection() {
        let (mut client, server) = duplex(1024);
        let config = ConnectionConfig {
            max_frame_size: 128,
            ..ConnectionConfig::default()
        };
        let task = tokio::spawn(serve_connection(
            server,
            peer(),
            dispatcher(),
            config,
            CancellationToken::new(),
        ));

        client.write_all(&LengthPrefix::new(129).encode()).await.unwrap();

        let result = task.await.unwrap();
        assert!(matches!(result, Err(NetwireError::Protocol(_))));
    }

    #[tokio::test]
    async fn test_eof_mid_frame_is_error() {
        let (mut client, server) = duplex(1024);
        let task = tokio::spawn(serve_connection(
            server,
            peer(),
            dispatcher(),
            ConnectionConfig::default(),
            CancellationToken::new(),
        ));

        client.write_all(&[0, 0, 0, 10, 1, 2]).await.unwrap();
        drop(client);

        assert!(task.await.unwrap().is_err());
    }

    #[tokio::test]
    async fn test_oversize_response_becomes_error() {
        let (mut client, server) = duplex(64 * 1024);
        let config = ConnectionConfig {
            max_frame_size: 256,
            ..ConnectionConfig::default()
        };
        let _task = tokio::spawn(serve_connection(
            server,
            peer(),
            dispatcher(),
            config,
            CancellationToken::new(),
        ));

        let codec: FrameCodec = FrameCodec::new();
        let request = Request::new(9, "Slow", "huge", vec![], vec![]);
        client.write_all(&codec.encode_request(&request).unwrap()).await.unwrap();

        let responses = read_responses(&mut client, 1).await;
        assert_eq!(responses[0].id, 9);
        assert_eq!(responses[0].error_kind(), Some(ErrorKind::InvocationFailed));
    }

    #[tokio::test]
    async fn test_drain_answers_admitted_requests() {
        let (mut client, server) = duplex(64 * 1024);
        let drain = CancellationToken::new();
        let task = tokio::spawn(serve_connection(
            server,
            peer(),
            dispatcher(),
            ConnectionConfig::default(),
            drain.clone(),
        ));

        let codec: FrameCodec = FrameCodec::new();
        client
            .write_all(&codec.encode_request(&sleep_request(1, 50)).unwrap())
            .await
            .unwrap();
        // Let the read stage pick the request up before draining
        tokio::time::sleep(Duration::from_millis(10)).await;
        drain.cancel();

        let responses = read_responses(&mut client, 1).await;
        assert_eq!(responses[0], Response::ok(1, json!(50)));
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_request_ahead_of_bad_frame_is_answered() {
        let (mut client, server) = duplex(64 * 1024);
        let task = tokio::spawn(serve_connection(
            server,
            peer(),
            dispatcher(),
            ConnectionConfig::default(),
            CancellationToken::new(),
        ));

        let codec: FrameCodec = FrameCodec::new();
        let mut bytes = codec.encode_request(&sleep_request(1, 0)).unwrap().to_vec();
        bytes.extend_from_slice(&crate::protocol::build_frame(&[0xc1, 0xc1]).unwrap());
        client.write_all(&bytes).await.unwrap();

        let responses = read_responses(&mut client, 1).await;
        assert_eq!(responses[0], Response::ok(1, json!(0)));
        assert!(task.await.unwrap().is_err());
    }

    #[tokio::test]
    async fn test_json_codec_connection() {
        let (mut client, server) = duplex(64 * 1024);
        let config = ConnectionConfig {
            codec: CodecKind::Json,
            ..ConnectionConfig::default()
        };
        let task = tokio::spawn(serve_connection(
            server,
            peer(),
            dispatcher(),
            config,
            CancellationToken::new(),
        ));

        let mut codec: FrameCodec<JsonCodec> = FrameCodec::new();
        client
            .write_all(&codec.encode_request(&sleep_request(4, 1)).unwrap())
            .await
            .unwrap();

        let mut received = Vec::new();
        let mut responses = Vec::new();
        let mut buf = [0u8; 4096];
        while responses.is_empty() {
            let n = client.read(&mut buf).await.unwrap();
            assert!(n > 0, "connection closed early");
            received.extend_from_slice(&buf[..n]);
            responses.extend(codec.decode_responses(&buf[..n]).unwrap());
        }

        // Payload is JSON text, not MessagePack
        assert_eq!(received[LENGTH_PREFIX_SIZE], b'{');
        assert_eq!(responses, vec![Response::ok(4, json!(1))]);

        drop(client);
        task.await.unwrap().unwrap();
    }
}
