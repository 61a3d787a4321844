/// Errors that can occur during frame encoding/decoding.
///
/// Any of these on a control connection is fatal to that connection.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// The declared body length is negative or above the configured maximum.
    #[error("frame length {length} outside [0, {max}]")]
    LengthOutOfRange { length: i64, max: usize },

    /// An I/O error occurred while reading or writing frames.
    #[error("frame I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The connection was closed before a complete frame was received.
    #[error("connection closed (incomplete frame)")]
    ConnectionClosed,

    /// A message body could not be serialized.
    #[error("message serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Errors raised when a well-formed frame does not carry a valid message.
///
/// These are recoverable: the frame boundary is intact, so the connection
/// can keep reading.
#[derive(Debug, thiserror::Error)]
pub enum MessageError {
    /// The frame's type tag is outside the known message set.
    #[error("unknown message type {0}")]
    UnknownType(u8),

    /// The JSON body does not match the message type.
    #[error("malformed {name} body: {source}")]
    Json {
        name: &'static str,
        #[source]
        source: serde_json::Error,
    },

    /// The data frame's segment lengths do not match its body.
    #[error("malformed data frame: {0}")]
    DataLayout(String),
}

pub type Result<T> = std::result::Result<T, FrameError>;
