//! Wire format encoding and decoding.
//!
//! Every frame starts with a 4-byte length prefix:
//! ```text
//! ┌──────────┬──────────────────────────┐
//! │ Length   │ Payload                  │
//! │ 4 bytes  │ `Length` bytes           │
//! │ uint32 BE│ serialized message       │
//! └──────────┴──────────────────────────┘
//! ```
//!
//! The prefix carries no message semantics. Requests and responses are told
//! apart by direction only.

use crate::error::{NetwireError, Result};

/// Length prefix size in bytes (fixed, exactly 4).
pub const LENGTH_PREFIX_SIZE: usize = 4;

/// Default maximum payload size (16 MiB).
pub const DEFAULT_MAX_FRAME_SIZE: u32 = 16 * 1024 * 1024;

/// Absolute maximum payload size (~2 GB, max i32).
pub const ABSOLUTE_MAX_FRAME_SIZE: u32 = 2_147_483_647;

/// Decoded length prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LengthPrefix {
    /// Payload length in bytes.
    pub payload_length: u32,
}

impl LengthPrefix {
    /// Create a new length prefix.
    pub fn new(payload_length: u32) -> Self {
        Self { payload_length }
    }

    /// Build the prefix for a payload, rejecting payloads above `max_frame_size`.
    pub fn for_payload(payload: &[u8], max_frame_size: u32) -> Result<Self> {
        let len = u32::try_from(payload.len()).map_err(|_| {
            NetwireError::Protocol(format!(
                "Payload size {} does not fit a 32-bit length prefix",
                payload.len()
            ))
        })?;
        let prefix = Self::new(len);
        prefix.validate(max_frame_size)?;
        Ok(prefix)
    }

    /// Encode prefix to bytes (Big Endian).
    ///
    /// # Example
    ///
    /// ```
    /// use netwire_server::protocol::LengthPrefix;
    ///
    /// let bytes = LengthPrefix::new(258).encode();
    /// assert_eq!(bytes, [0, 0, 1, 2]);
    /// ```
    pub fn encode(&self) -> [u8; LENGTH_PREFIX_SIZE] {
        self.payload_length.to_be_bytes()
    }

    /// Decode prefix from bytes (Big Endian).
    ///
    /// Returns `None` if buffer is too short.
    ///
    /// # Example
    ///
    /// ```
    /// use netwire_server::protocol::LengthPrefix;
    ///
    /// let prefix = LengthPrefix::decode(&[0, 0, 0, 42, 0xFF]).unwrap();
    /// assert_eq!(prefix.payload_length, 42);
    /// ```
    pub fn decode(buf: &[u8]) -> Option<Self> {
        if buf.len() < LENGTH_PREFIX_SIZE {
            return None;
        }
        Some(Self {
            payload_length: u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]),
        })
    }

    /// Validate the declared length against the configured maximum.
    pub fn validate(&self, max_frame_size: u32) -> Result<()> {
        if self.payload_length > max_frame_size {
            return Err(NetwireError::Protocol(format!(
                "Payload size {} exceeds maximum {}",
                self.payload_length, max_frame_size
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prefix_big_endian_byte_order() {
        let bytes = LengthPrefix::new(0x0102_0304).encode();
        assert_eq!(bytes, [0x01, 0x02, 0x03, 0x04]);
    }

    #[test]
    fn test_prefix_roundtrip() {
        let original = LengthPrefix::new(123_456);
        let decoded = LengthPrefix::decode(&original.encode()).unwrap();
        assert_eq!(original, decoded);
    }

    #[test]
    fn test_decode_too_short_buffer() {
        assert!(LengthPrefix::decode(&[0, 0, 1]).is_none());
    }

    #[test]
    fn test_validate_payload_too_large() {
        let result = LengthPrefix::new(1_000).validate(100);
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("exceeds maximum"));
    }

    #[test]
    fn test_validate_at_limit() {
        assert!(LengthPrefix::new(100).validate(100).is_ok());
        assert!(LengthPrefix::new(0).validate(DEFAULT_MAX_FRAME_SIZE).is_ok());
    }

    #[test]
    fn test_for_payload_matches_length() {
        let prefix = LengthPrefix::for_payload(b"hello", DEFAULT_MAX_FRAME_SIZE).unwrap();
        assert_eq!(prefix.payload_length, 5);
    }

    #[test]
    fn test_for_payload_rejects_oversize() {
        let payload = vec![0u8; 17];
        assert!(LengthPrefix::for_payload(&payload, 16).is_err());
    }
}
