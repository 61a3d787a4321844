use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{FrameError, MessageError, Result};
use crate::types::DATA;

/// Frame header: type (1) + length (4) = 5 bytes.
pub const HEADER_SIZE: usize = 5;

/// Data body prefix: JSON header length (4) + payload length (4) = 8 bytes.
pub const DATA_PREFIX_SIZE: usize = 8;

/// Maximum body length: 100 MiB.
pub const MAX_FRAME_LENGTH: usize = 100 * 1024 * 1024;

/// A type-tagged frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// The message type tag.
    pub frame_type: u8,
    /// The frame body.
    pub body: Bytes,
}

impl Frame {
    /// Create a new frame.
    pub fn new(frame_type: u8, body: impl Into<Bytes>) -> Self {
        Self {
            frame_type,
            body: body.into(),
        }
    }

    /// The total wire size of this frame (header + body).
    pub fn wire_size(&self) -> usize {
        HEADER_SIZE + self.body.len()
    }
}

/// Encode a frame into the wire format.
///
/// Wire format:
/// ```text
/// ┌──────────┬──────────────┬──────────────────┐
/// │ Type     │ Length       │ Body             │
/// │ (1B)     │ (4B LE, i32) │ (Length bytes)   │
/// └──────────┴──────────────┴──────────────────┘
/// ```
pub fn encode_frame(frame_type: u8, body: &[u8], dst: &mut BytesMut) -> Result<()> {
    check_length(body.len(), MAX_FRAME_LENGTH)?;
    dst.reserve(HEADER_SIZE + body.len());
    dst.put_u8(frame_type);
    dst.put_i32_le(body.len() as i32);
    dst.put_slice(body);
    Ok(())
}

/// Encode a data frame: a JSON header segment followed by a raw payload.
///
/// Body layout:
/// ```text
/// ┌───────────┬───────────┬─────────────────┬──────────────────┐
/// │ JsonLen   │ BinLen    │ Header          │ Payload          │
/// │ (4B LE)   │ (4B LE)   │ (JsonLen bytes) │ (BinLen bytes)   │
/// └───────────┴───────────┴─────────────────┴──────────────────┘
/// ```
/// The frame length is `JsonLen + BinLen + 8`.
pub fn encode_data_frame(header: &[u8], payload: &[u8], dst: &mut BytesMut) -> Result<()> {
    let length = DATA_PREFIX_SIZE + header.len() + payload.len();
    check_length(length, MAX_FRAME_LENGTH)?;
    dst.reserve(HEADER_SIZE + length);
    dst.put_u8(DATA);
    dst.put_i32_le(length as i32);
    dst.put_i32_le(header.len() as i32);
    dst.put_i32_le(payload.len() as i32);
    dst.put_slice(header);
    dst.put_slice(payload);
    Ok(())
}

/// Decode a frame from a buffer.
///
/// Returns `Ok(None)` if the buffer doesn't contain a complete frame yet.
/// The length is validated as soon as the header is available, before any
/// body bytes are required. On success, consumes the frame bytes.
pub fn decode_frame(src: &mut BytesMut, max_length: usize) -> Result<Option<Frame>> {
    let Some(length) = peek_length(src, max_length)? else {
        return Ok(None); // Need more data
    };

    let total = HEADER_SIZE + length;
    if src.len() < total {
        return Ok(None); // Need more data
    }

    let frame_type = src[0];
    src.advance(HEADER_SIZE);
    let body = src.split_to(length).freeze();

    Ok(Some(Frame { frame_type, body }))
}

/// Validate the header at the front of `src` and return the body length.
///
/// Returns `Ok(None)` while fewer than [`HEADER_SIZE`] bytes are buffered.
pub(crate) fn peek_length(src: &[u8], max_length: usize) -> Result<Option<usize>> {
    if src.len() < HEADER_SIZE {
        return Ok(None);
    }

    let mut raw = [0u8; 4];
    raw.copy_from_slice(&src[1..HEADER_SIZE]);
    let length = i32::from_le_bytes(raw);

    if length < 0 || length as usize > max_length {
        return Err(FrameError::LengthOutOfRange {
            length: i64::from(length),
            max: max_length,
        });
    }

    Ok(Some(length as usize))
}

/// Split a data frame body into its JSON header and raw payload segments.
///
/// Both segments share the body's allocation.
pub fn split_data_body(body: &Bytes) -> std::result::Result<(Bytes, Bytes), MessageError> {
    if body.len() < DATA_PREFIX_SIZE {
        return Err(MessageError::DataLayout(format!(
            "body of {} bytes is shorter than the {DATA_PREFIX_SIZE}-byte prefix",
            body.len()
        )));
    }

    let mut prefix = &body[..DATA_PREFIX_SIZE];
    let json_len = prefix.get_i32_le();
    let bin_len = prefix.get_i32_le();

    if json_len < 0 || bin_len < 0 {
        return Err(MessageError::DataLayout(format!(
            "negative segment length (header {json_len}, payload {bin_len})"
        )));
    }

    let expected = DATA_PREFIX_SIZE as u64 + json_len as u64 + bin_len as u64;
    if expected != body.len() as u64 {
        return Err(MessageError::DataLayout(format!(
            "segments declare {expected} bytes, body has {}",
            body.len()
        )));
    }

    let header_end = DATA_PREFIX_SIZE + json_len as usize;
    Ok((
        body.slice(DATA_PREFIX_SIZE..header_end),
        body.slice(header_end..),
    ))
}

fn check_length(length: usize, max: usize) -> Result<()> {
    if length > max {
        return Err(FrameError::LengthOutOfRange {
            length: length as i64,
            max,
        });
    }
    Ok(())
}

/// Configuration for frame readers and writers.
#[derive(Debug, Clone)]
pub struct FrameConfig {
    /// Maximum body length in bytes. Default: 100 MiB.
    pub max_payload_size: usize,
    /// Read timeout for blocking operations.
    pub read_timeout: Option<std::time::Duration>,
    /// Write timeout for blocking operations.
    pub write_timeout: Option<std::time::Duration>,
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            max_payload_size: MAX_FRAME_LENGTH,
            read_timeout: None,
            write_timeout: None,
        }
    }
}
