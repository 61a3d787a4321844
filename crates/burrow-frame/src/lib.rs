//! Type-tagged, length-prefixed framing and the tunnel message set.
//!
//! Every unit on the wire is framed as:
//! - a 1-byte message type tag (see [`types`])
//! - a 4-byte little-endian signed body length, at most [`MAX_FRAME_LENGTH`]
//! - the body
//!
//! Control messages carry a JSON body. Data frames carry a two-segment body
//! (JSON header + raw payload) so stream bytes are never re-encoded.
//!
//! Callers always get complete frames; partial reads are handled by
//! [`FrameReader`].

pub mod codec;
pub mod error;
pub mod message;
pub mod reader;
pub mod types;
pub mod writer;

pub use codec::{
    decode_frame, encode_data_frame, encode_frame, split_data_body, Frame, FrameConfig,
    DATA_PREFIX_SIZE, HEADER_SIZE, MAX_FRAME_LENGTH,
};
pub use error::{FrameError, MessageError, Result};
pub use message::{
    CloseRequest, ConnectRequest, ConnectResponse, DataFrame, DataHeader, HeartbeatRequest,
    HeartbeatResponse, Message, ServiceBody, ServiceRequest, ServiceResponse,
};
pub use reader::FrameReader;
pub use types::{
    CLOSE_REQUEST, CONNECT_REQUEST, CONNECT_RESPONSE, DATA, HEARTBEAT_REQUEST,
    HEARTBEAT_RESPONSE, SERVICE_REQUEST, SERVICE_RESPONSE,
};
pub use writer::FrameWriter;
