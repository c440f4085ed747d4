//! Frame struct.
//!
//! A frame is the unit of transport: a length prefix and exactly that many
//! payload bytes. It knows nothing about requests or responses.
//!
//! # Example
//!
//! ```
//! use netwire_server::protocol::Frame;
//! use bytes::Bytes;
//!
//! let frame = Frame::new(Bytes::from_static(b"hello"));
//! assert_eq!(frame.payload(), b"hello");
//! assert_eq!(frame.prefix().unwrap().payload_length, 5);
//! ```

use bytes::Bytes;

use super::wire_format::{LengthPrefix, ABSOLUTE_MAX_FRAME_SIZE, LENGTH_PREFIX_SIZE};
use crate::error::Result;

/// A complete protocol frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Payload bytes (zero-copy via `bytes::Bytes`).
    pub payload: Bytes,
}

impl Frame {
    /// Create a new frame from a payload.
    pub fn new(payload: Bytes) -> Self {
        Self { payload }
    }

    /// Create a frame from raw bytes (copies data).
    pub fn from_slice(payload: &[u8]) -> Self {
        Self {
            payload: Bytes::copy_from_slice(payload),
        }
    }

    /// Get a reference to the payload bytes.
    #[inline]
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Get the payload length.
    #[inline]
    pub fn payload_len(&self) -> usize {
        self.payload.len()
    }

    /// Length prefix matching this payload.
    ///
    /// Fails if the payload is larger than [`ABSOLUTE_MAX_FRAME_SIZE`].
    pub fn prefix(&self) -> Result<LengthPrefix> {
        LengthPrefix::for_payload(&self.payload, ABSOLUTE_MAX_FRAME_SIZE)
    }

    /// Total encoded size (prefix + payload).
    #[inline]
    pub fn wire_size(&self) -> usize {
        LENGTH_PREFIX_SIZE + self.payload.len()
    }
}

/// Build a complete frame as a single byte vector.
///
/// Fails if the payload is larger than [`ABSOLUTE_MAX_FRAME_SIZE`].
///
/// # Example
///
/// ```
/// use netwire_server::protocol::build_frame;
///
/// let bytes = build_frame(b"hello").unwrap();
/// assert_eq!(bytes.len(), 4 + 5);
/// assert_eq!(&bytes[..4], &[0, 0, 0, 5]);
/// ```
pub fn build_frame(payload: &[u8]) -> Result<Vec<u8>> {
    let prefix = LengthPrefix::for_payload(payload, ABSOLUTE_MAX_FRAME_SIZE)?;

    let mut buf = Vec::with_capacity(LENGTH_PREFIX_SIZE + payload.len());
    buf.extend_from_slice(&prefix.encode());
    buf.extend_from_slice(payload);
    Ok(buf)
}
