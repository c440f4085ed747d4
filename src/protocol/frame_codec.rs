//! Frame codec: byte stream ⇄ messages.
//!
//! Combines a [`FrameBuffer`] with a [`PayloadCodec`]. One codec instance is
//! owned by one connection; it is not shared.
//!
//! # Example
//!
//! ```
//! use netwire_server::protocol::{FrameCodec, Request, Response};
//! use serde_json::json;
//!
//! let mut server_side: FrameCodec = FrameCodec::new();
//! let mut client_side: FrameCodec = FrameCodec::new();
//!
//! let request = Request::new(1, "Calculator", "add", vec!["int".into(), "int".into()], vec![json!(2), json!(3)]);
//! let bytes = client_side.encode_request(&request).unwrap();
//! let decoded = server_side.decode_requests(&bytes).unwrap();
//! assert_eq!(decoded, vec![request]);
//!
//! let bytes = server_side.encode_response(&Response::ok(1, json!(5))).unwrap();
//! let decoded = client_side.decode_responses(&bytes).unwrap();
//! assert_eq!(decoded[0].result(), Some(&json!(5)));
//! ```

use std::marker::PhantomData;

use bytes::{BufMut, Bytes, BytesMut};
use serde::de::DeserializeOwned;
use serde::Serialize;

use super::wire_format::{LengthPrefix, DEFAULT_MAX_FRAME_SIZE, LENGTH_PREFIX_SIZE};
use super::{FrameBuffer, Request, Response};
use crate::codec::{MsgPackCodec, PayloadCodec};
use crate::error::Result;

/// Length-prefixed message codec, generic over the payload grammar.
pub struct FrameCodec<C: PayloadCodec = MsgPackCodec> {
    buffer: FrameBuffer,
    max_frame_size: u32,
    _codec: PhantomData<fn() -> C>,
}

impl<C: PayloadCodec> FrameCodec<C> {
    /// Create a codec with the default maximum frame size.
    pub fn new() -> Self {
        Self::with_max_frame_size(DEFAULT_MAX_FRAME_SIZE)
    }

    /// Create a codec with a custom maximum frame size (applies both ways).
    pub fn with_max_frame_size(max_frame_size: u32) -> Self {
        Self {
            buffer: FrameBuffer::with_max_frame_size(max_frame_size),
            max_frame_size,
            _codec: PhantomData,
        }
    }

    /// Feed a chunk and decode every complete request in it, in order.
    pub fn decode_requests(&mut self, chunk: &[u8]) -> Result<Vec<Request>> {
        self.decode_all(chunk)
    }

    /// Feed a chunk and decode every complete response in it, in order.
    pub fn decode_responses(&mut self, chunk: &[u8]) -> Result<Vec<Response>> {
        self.decode_all(chunk)
    }

    /// Append a chunk without decoding it. Pair with [`next_request`](Self::next_request).
    pub fn feed(&mut self, chunk: &[u8]) {
        self.buffer.extend(chunk);
    }

    /// Decode the next buffered request.
    ///
    /// Requests ahead of a malformed frame are returned before its error, so
    /// a caller can answer them before closing the stream.
    pub fn next_request(&mut self) -> Result<Option<Request>> {
        self.next_message()
    }

    /// Decode the next buffered response.
    pub fn next_response(&mut self) -> Result<Option<Response>> {
        self.next_message()
    }

    /// Encode a request into a complete frame.
    pub fn encode_request(&self, request: &Request) -> Result<Bytes> {
        self.encode(request)
    }

    /// Encode a response into a complete frame.
    pub fn encode_response(&self, response: &Response) -> Result<Bytes> {
        self.encode(response)
    }

    /// Encode a response payload only (no prefix), validated against the limit.
    ///
    /// The writer stage adds the prefix itself so it can use vectored writes.
    pub fn encode_response_payload(&self, response: &Response) -> Result<Bytes> {
        let payload = C::encode(response)?;
        LengthPrefix::for_payload(&payload, self.max_frame_size)?;
        Ok(Bytes::from(payload))
    }

    /// True when a frame has been started but not completed.
    pub fn has_partial_frame(&self) -> bool {
        self.buffer.has_partial()
    }

    /// Maximum payload size accepted and produced.
    pub fn max_frame_size(&self) -> u32 {
        self.max_frame_size
    }

    fn decode_all<T: DeserializeOwned>(&mut self, chunk: &[u8]) -> Result<Vec<T>> {
        self.feed(chunk);

        let mut out = Vec::new();
        while let Some(message) = self.next_message()? {
            out.push(message);
        }
        Ok(out)
    }

    fn next_message<T: DeserializeOwned>(&mut self) -> Result<Option<T>> {
        match self.buffer.next_frame()? {
            Some(frame) => C::decode(frame.payload()).map(Some),
            None => Ok(None),
        }
    }

    fn encode<T: Serialize>(&self, message: &T) -> Result<Bytes> {
        let payload = C::encode(message)?;
        let prefix = LengthPrefix::for_payload(&payload, self.max_frame_size)?;

        let mut buf = BytesMut::with_capacity(LENGTH_PREFIX_SIZE + payload.len());
        buf.put_slice(&prefix.encode());
        buf.put_slice(&payload);
        Ok(buf.freeze())
    }
}

impl<C: PayloadCodec> Default for FrameCodec<C> {
    fn default() -> Self {
        Self::new()
    }
}
