//! Codec module - serialization of frame payloads.
//!
//! - [`MsgPackCodec`] - MessagePack using `rmp-serde` (struct-as-map), the default
//! - [`JsonCodec`] - JSON using `serde_json`, handy for debugging with plain tools
//!
//! # Design
//!
//! Codecs are marker structs implementing [`PayloadCodec`] with static methods
//! rather than trait objects. The frame codec is generic over the payload codec,
//! so the choice is made at compile time.
//!
//! # Example
//!
//! ```
//! use netwire_server::codec::{JsonCodec, MsgPackCodec, PayloadCodec};
//!
//! let encoded = MsgPackCodec::encode(&"hello").unwrap();
//! let decoded: String = MsgPackCodec::decode(&encoded).unwrap();
//! assert_eq!(decoded, "hello");
//!
//! let encoded = JsonCodec::encode(&vec![1, 2]).unwrap();
//! assert_eq!(encoded, b"[1,2]");
//! ```

mod json;
mod msgpack;

pub use json::JsonCodec;
pub use msgpack::MsgPackCodec;

use std::fmt;
use std::str::FromStr;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{NetwireError, Result};

/// Payload codec chosen at runtime, e.g. from configuration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CodecKind {
    #[default]
    MsgPack,
    Json,
}

impl CodecKind {
    pub fn name(&self) -> &'static str {
        match self {
            Self::MsgPack => MsgPackCodec::NAME,
            Self::Json => JsonCodec::NAME,
        }
    }
}

impl fmt::Display for CodecKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for CodecKind {
    type Err = NetwireError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "msgpack" => Ok(Self::MsgPack),
            "json" => Ok(Self::Json),
            other => Err(NetwireError::Protocol(format!("Unknown codec: {}", other))),
        }
    }
}

/// Serialization grammar used inside a frame payload.
///
/// Implementations must round-trip: `decode(encode(x)) == x` for every
/// request and response.
pub trait PayloadCodec: Send + Sync + 'static {
    /// Short name used in logs.
    const NAME: &'static str;

    /// Encode a value to payload bytes.
    fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>>;

    /// Decode payload bytes to a value.
    fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T>;
}
