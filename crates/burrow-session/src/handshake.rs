//! The login exchange.
//!
//! The client sends one `ServiceRequest` and the server answers with one
//! `ServiceResponse`. Both sides read exactly one frame; anything else on
//! the wire at that point fails the attempt.

use std::io::{ErrorKind, Read, Write};
use std::time::{Duration, Instant};

use burrow_frame::{FrameError, FrameReader, FrameWriter, Message, ServiceRequest, ServiceResponse};
use tracing::debug;

use crate::config::HandshakeConfig;
use crate::error::{Result, SessionError};

/// Client side: send `request` and wait for the server's reply.
///
/// Returns the reply even when it reports `success: false`; the caller
/// decides whether a partial registration is acceptable.
pub fn client_login<R: Read, W: Write>(
    reader: &mut FrameReader<R>,
    writer: &mut FrameWriter<W>,
    request: &ServiceRequest,
    config: &HandshakeConfig,
) -> Result<ServiceResponse> {
    writer.write_message(&Message::ServiceRequest(request.clone()))?;
    debug!(request_id = %request.id, services = request.service_list.len(), "service request sent");

    match recv_message(reader, config.timeout)? {
        Message::ServiceResponse(response) => Ok(response),
        other => Err(SessionError::HandshakeFailed(format!(
            "expected SERVICE_RESPONSE, got {}",
            other.type_name()
        ))),
    }
}

/// Server side: wait for the client's service request.
pub fn server_accept<R: Read>(
    reader: &mut FrameReader<R>,
    config: &HandshakeConfig,
) -> Result<ServiceRequest> {
    match recv_message(reader, config.timeout)? {
        Message::ServiceRequest(request) => Ok(request),
        other => Err(SessionError::HandshakeFailed(format!(
            "expected SERVICE_REQUEST, got {}",
            other.type_name()
        ))),
    }
}

fn recv_message<R: Read>(reader: &mut FrameReader<R>, timeout: Duration) -> Result<Message> {
    let deadline = Instant::now() + timeout;
    loop {
        if Instant::now() >= deadline {
            return Err(SessionError::Timeout(timeout));
        }

        match reader.read_frame() {
            Ok(frame) => {
                return Message::parse(&frame).map_err(|err| {
                    SessionError::HandshakeFailed(format!("invalid login frame: {err}"))
                });
            }
            Err(FrameError::Io(err))
                if err.kind() == ErrorKind::WouldBlock || err.kind() == ErrorKind::TimedOut =>
            {
                continue;
            }
            Err(FrameError::ConnectionClosed) => {
                return Err(SessionError::Disconnected(
                    "connection closed during login".to_string(),
                ));
            }
            Err(err) => return Err(SessionError::Frame(err)),
        }
    }
}
