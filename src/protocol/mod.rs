//! Protocol module - wire format, framing, and messages.
//!
//! This module implements the data plane of the server:
//! - 4-byte big-endian length prefix
//! - Frame buffer for accumulating partial reads
//! - Request/Response messages and the frame codec tying them together

mod frame;
mod frame_buffer;
mod frame_codec;
mod message;
mod wire_format;

pub use frame::{build_frame, Frame};
pub use frame_buffer::FrameBuffer;
pub use frame_codec::FrameCodec;
pub use message::{ErrorKind, Outcome, Request, Response, RpcError};
pub use wire_format::{
    LengthPrefix, ABSOLUTE_MAX_FRAME_SIZE, DEFAULT_MAX_FRAME_SIZE, LENGTH_PREFIX_SIZE,
};
