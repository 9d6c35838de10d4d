//! Length-prefixed frame codec.
//!
//! Format: 4-byte little-endian payload length, then a bincode-encoded
//! frame. Partial input returns `Ok(None)` so callers can keep reading;
//! the buffer is only consumed once a complete frame decodes.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

/// Length of the frame header.
pub const FRAME_HEADER_LEN: usize = 4;

/// Upper bound on a single frame's payload.
///
/// Large transfers are chunked well below this; the bound exists so a
/// corrupt or hostile length prefix cannot trigger an unbounded
/// allocation.
pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Errors arising on the framed stream.
#[derive(Debug, Error)]
pub enum WireError {
    /// The peer closed the stream.
    #[error("stream closed")]
    Closed,

    /// A frame declared a payload beyond [`MAX_FRAME_SIZE`].
    #[error("frame of {len} bytes exceeds maximum {max}")]
    Oversized { len: usize, max: usize },

    /// The payload did not decode as the expected frame type.
    #[error("malformed frame: {0}")]
    Malformed(String),

    /// Underlying stream I/O failed.
    #[error("stream i/o failed: {0}")]
    Io(#[from] std::io::Error),
}

/// Encodes a frame with its length prefix.
pub fn encode<T: Serialize>(frame: &T) -> Result<Bytes, WireError> {
    let payload =
        bincode::serialize(frame).map_err(|e| WireError::Malformed(e.to_string()))?;

    if payload.len() > MAX_FRAME_SIZE {
        return Err(WireError::Oversized {
            len: payload.len(),
            max: MAX_FRAME_SIZE,
        });
    }

    let mut buf = BytesMut::with_capacity(FRAME_HEADER_LEN + payload.len());
    buf.put_u32_le(payload.len() as u32);
    buf.put_slice(&payload);
    Ok(buf.freeze())
}

/// Decodes one frame from the front of `buf`.
///
/// Returns `Ok(None)` when more bytes are needed; the buffer is advanced
/// only on a successful decode. An oversized length prefix fails eagerly,
/// before waiting for the (bogus) remainder.
pub fn decode<T: DeserializeOwned>(buf: &mut BytesMut) -> Result<Option<T>, WireError> {
    if buf.len() < FRAME_HEADER_LEN {
        return Ok(None);
    }

    let len = u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;
    if len > MAX_FRAME_SIZE {
        return Err(WireError::Oversized {
            len,
            max: MAX_FRAME_SIZE,
        });
    }

    if buf.len() < FRAME_HEADER_LEN + len {
        return Ok(None);
    }

    buf.advance(FRAME_HEADER_LEN);
    let payload = buf.split_to(len);
    let frame =
        bincode::deserialize(&payload).map_err(|e| WireError::Malformed(e.to_string()))?;
    Ok(Some(frame))
}
