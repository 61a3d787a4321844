use burrow_frame::{FrameError, MessageError};
use burrow_transport::TransportError;

/// Errors raised by sessions and engines.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// Transport-level error (bind, dial, accept).
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// Frame-level error on the control connection.
    #[error("frame error: {0}")]
    Frame(#[from] FrameError),

    /// A frame did not carry a valid message.
    #[error("message error: {0}")]
    Message(#[from] MessageError),

    /// Login exchange failed.
    #[error("handshake failed: {0}")]
    HandshakeFailed(String),

    /// Peer disconnected.
    #[error("peer disconnected: {0}")]
    Disconnected(String),

    /// The session has been torn down; the send was rejected.
    #[error("session closed")]
    Closed,

    /// Blocking operation timed out.
    #[error("timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// Invalid configuration.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// I/O error outside the frame layer (socket options, thread spawn, config file).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error outside the frame layer (config file).
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, SessionError>;
