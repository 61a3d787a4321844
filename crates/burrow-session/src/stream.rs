use std::fmt;
use std::io::{self, ErrorKind, Read, Write};
use std::net::{Shutdown, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use burrow_frame::{CloseRequest, DataFrame};
use burrow_transport::is_expected;
use bytes::Bytes;
use tracing::{debug, warn};

use crate::session::ControlSession;

/// One proxied TCP connection, keyed by stream id within its session.
///
/// Clones share the socket. The handle that [`close`](Self::close)s first
/// shuts the socket down; later calls are no-ops.
#[derive(Clone)]
pub struct StreamHandle {
    id: String,
    service: String,
    socket: Arc<TcpStream>,
    closed: Arc<AtomicBool>,
}

impl StreamHandle {
    pub fn new(id: impl Into<String>, service: impl Into<String>, socket: TcpStream) -> Self {
        Self {
            id: id.into(),
            service: service.into(),
            socket: Arc::new(socket),
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    /// Write the whole payload to the socket (blocking).
    pub fn write_all(&self, payload: &[u8]) -> io::Result<()> {
        (&*self.socket).write_all(payload)
    }

    /// Read whatever is available into `buf` (blocking).
    pub fn read(&self, buf: &mut [u8]) -> io::Result<usize> {
        (&*self.socket).read(buf)
    }

    /// Shut the socket down in both directions. Returns true for the call
    /// that actually closed it.
    pub fn close(&self) -> bool {
        if self.closed.swap(true, Ordering::SeqCst) {
            return false;
        }
        match self.socket.shutdown(Shutdown::Both) {
            Ok(()) => {}
            Err(err) if err.kind() == ErrorKind::NotConnected => {}
            Err(err) => debug!(stream_id = %self.id, error = %err, "stream shutdown failed"),
        }
        true
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl fmt::Debug for StreamHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamHandle")
            .field("id", &self.id)
            .field("service", &self.service)
            .field("peer", &self.socket.peer_addr().ok())
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Forward everything read from the stream's socket as data frames.
///
/// Runs until the socket reaches EOF or fails, or the session rejects a
/// send. On socket EOF/failure the stream is removed from the registry; if
/// this pump was the remover it closes the socket and tells the peer.
pub(crate) fn pump_stream(session: &ControlSession, handle: StreamHandle) {
    let chunk_size = session.config().stream_chunk_size.max(1);
    let mut buf = vec![0u8; chunk_size];

    loop {
        match handle.read(&mut buf) {
            Ok(0) => {
                debug!(session_id = %session.id(), stream_id = %handle.id(), "stream reached eof");
                break;
            }
            Ok(n) => {
                let data = DataFrame::new(handle.id(), handle.service(), Bytes::copy_from_slice(&buf[..n]));
                if session.send(data.into()).is_err() {
                    debug!(session_id = %session.id(), stream_id = %handle.id(), "session closed, stopping stream pump");
                    return;
                }
            }
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) => {
                if is_expected(&err) || handle.is_closed() {
                    debug!(session_id = %session.id(), stream_id = %handle.id(), error = %err, "stream read ended");
                } else {
                    warn!(session_id = %session.id(), stream_id = %handle.id(), error = %err, "stream read failed");
                }
                break;
            }
        }
    }

    if let Some(removed) = session.remove_stream(handle.id()) {
        removed.close();
        let _ = session.send(CloseRequest::new(removed.id(), removed.service()).into());
    }
}

/// Write a data frame to its stream, answering with a close if the stream is
/// unknown or the write fails.
pub(crate) fn forward_data(session: &ControlSession, data: DataFrame) {
    let Some(handle) = session.lookup_stream(&data.id) else {
        debug!(session_id = %session.id(), stream_id = %data.id, "data for unknown stream");
        let _ = session.send(CloseRequest::new(data.id, data.name).into());
        return;
    };

    if let Err(err) = handle.write_all(&data.content) {
        if is_expected(&err) {
            debug!(session_id = %session.id(), stream_id = %data.id, error = %err, "stream write ended");
        } else {
            warn!(session_id = %session.id(), stream_id = %data.id, error = %err, "stream write failed");
        }
        let _ = session.send(CloseRequest::new(data.id.clone(), data.name).into());
        session.close_stream(&data.id);
    }
}
