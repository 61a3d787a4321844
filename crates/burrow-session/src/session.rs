use std::collections::HashMap;
use std::fmt;
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::sync::mpsc::{self, Receiver, SyncSender};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use burrow_frame::{FrameError, FrameReader, FrameWriter, Message};
use burrow_transport::{is_expected, TcpAcceptor};
use tracing::{debug, info, warn};

use crate::config::SessionConfig;
use crate::error::{Result, SessionError};
use crate::registry::StreamRegistry;
use crate::signal::ShutdownSignal;
use crate::stream::{pump_stream, StreamHandle};

/// Which end of the tunnel a session belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Client,
    Server,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Client => f.write_str("client"),
            Role::Server => f.write_str("server"),
        }
    }
}

/// What the dispatch loop receives from the session's inbound queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// A message read from the control connection.
    Message(Message),
    /// The heartbeat ticker fired.
    HeartbeatTick,
}

struct SessionShared {
    closed: bool,
    streams: StreamRegistry,
    listeners: HashMap<String, Arc<TcpAcceptor>>,
    outbound: Option<SyncSender<Message>>,
    inbound: Option<SyncSender<SessionEvent>>,
}

/// One control connection and everything multiplexed over it.
///
/// The closed flag, the stream registry, the listener map and the queue
/// senders all live behind a single lock that is never held across socket
/// I/O. [`close`](Self::close) takes the senders out, which seals both
/// queues: later sends fail with [`SessionError::Closed`] and the pumps and
/// the dispatch loop drain and exit.
pub struct ControlSession {
    id: String,
    role: Role,
    peer_addr: Option<SocketAddr>,
    conn: TcpStream,
    config: SessionConfig,
    shared: Mutex<SessionShared>,
    closed: ShutdownSignal,
}

impl ControlSession {
    /// Start the read and write pumps over an already logged-in connection.
    ///
    /// `reader` must be the reader used for the login so no buffered bytes
    /// are lost. Returns the session and the receiving end of its inbound
    /// queue, which the caller's dispatch loop drains until it disconnects.
    pub fn start(
        id: impl Into<String>,
        role: Role,
        reader: FrameReader<TcpStream>,
        writer: FrameWriter<TcpStream>,
        config: SessionConfig,
    ) -> Result<(Arc<Self>, Receiver<SessionEvent>)> {
        let capacity = config.queue_capacity.max(1);
        let (outbound_tx, outbound_rx) = mpsc::sync_channel(capacity);
        let (inbound_tx, inbound_rx) = mpsc::sync_channel(capacity);

        let conn = writer.get_ref().try_clone()?;
        let session = Arc::new(Self {
            id: id.into(),
            role,
            peer_addr: conn.peer_addr().ok(),
            conn,
            config,
            shared: Mutex::new(SessionShared {
                closed: false,
                streams: StreamRegistry::new(),
                listeners: HashMap::new(),
                outbound: Some(outbound_tx),
                inbound: Some(inbound_tx),
            }),
            closed: ShutdownSignal::new(),
        });

        let spawned = session
            .spawn_named("write", {
                let session = Arc::clone(&session);
                move || session.write_pump(writer, outbound_rx)
            })
            .and_then(|_| {
                session.spawn_named("read", {
                    let session = Arc::clone(&session);
                    move || session.read_pump(reader)
                })
            });
        if let Err(err) = spawned {
            session.close();
            return Err(err);
        }

        info!(session_id = %session.id, role = %role, peer = ?session.peer_addr, "session started");
        Ok((session, inbound_rx))
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer_addr
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Queue a message for the write pump. Blocks while the queue is full.
    pub fn send(&self, message: Message) -> Result<()> {
        let tx = self.shared().outbound.clone().ok_or(SessionError::Closed)?;
        tx.send(message).map_err(|_| SessionError::Closed)
    }

    /// Queue an event for the dispatch loop. Blocks while the queue is full.
    pub fn deliver(&self, event: SessionEvent) -> Result<()> {
        let tx = self.shared().inbound.clone().ok_or(SessionError::Closed)?;
        tx.send(event).map_err(|_| SessionError::Closed)
    }

    /// Add a stream to the registry. Fails, closing the stream, once the
    /// session is closed.
    pub fn register_stream(&self, handle: StreamHandle) -> Result<()> {
        let displaced = {
            let mut shared = self.shared();
            if shared.closed {
                drop(shared);
                handle.close();
                return Err(SessionError::Closed);
            }
            shared.streams.register(handle)
        };
        if let Some(old) = displaced {
            warn!(session_id = %self.id, stream_id = %old.id(), "stream id reused, closing previous stream");
            old.close();
        }
        Ok(())
    }

    pub fn lookup_stream(&self, id: &str) -> Option<StreamHandle> {
        self.shared().streams.lookup(id)
    }

    /// Get-and-delete. The caller owns closing the returned stream.
    pub fn remove_stream(&self, id: &str) -> Option<StreamHandle> {
        self.shared().streams.remove(id)
    }

    /// Remove and close a stream. Returns false if it was already gone.
    pub fn close_stream(&self, id: &str) -> bool {
        match self.remove_stream(id) {
            Some(handle) => {
                handle.close();
                true
            }
            None => false,
        }
    }

    pub fn stream_count(&self) -> usize {
        self.shared().streams.len()
    }

    /// Attach a public listener owned by this session. Fails, closing the
    /// listener, once the session is closed.
    pub fn add_listener(&self, name: impl Into<String>, acceptor: Arc<TcpAcceptor>) -> Result<()> {
        let displaced = {
            let mut shared = self.shared();
            if shared.closed {
                drop(shared);
                acceptor.close();
                return Err(SessionError::Closed);
            }
            shared.listeners.insert(name.into(), acceptor)
        };
        if let Some(old) = displaced {
            old.close();
        }
        Ok(())
    }

    /// Ports of the public listeners attached to this session, ascending.
    pub fn listener_ports(&self) -> Vec<u16> {
        let mut ports: Vec<u16> = self
            .shared()
            .listeners
            .values()
            .map(|acceptor| acceptor.port())
            .collect();
        ports.sort_unstable();
        ports
    }

    /// Start a pump thread forwarding `handle`'s socket into the session.
    pub fn spawn_stream_pump(self: &Arc<Self>, handle: StreamHandle) -> Result<JoinHandle<()>> {
        let session = Arc::clone(self);
        let name = format!("stream-{}", handle.id());
        thread::Builder::new()
            .name(name)
            .spawn(move || pump_stream(&session, handle))
            .map_err(SessionError::from)
    }

    pub fn is_closed(&self) -> bool {
        self.shared().closed
    }

    /// Block until the session is closed.
    pub fn wait_closed(&self) {
        self.closed.wait();
    }

    /// Block until the session is closed or `timeout` elapses. Returns true if closed.
    pub fn wait_closed_timeout(&self, timeout: Duration) -> bool {
        self.closed.wait_timeout(timeout)
    }

    /// Tear the session down. Idempotent; only the first call does the work,
    /// and every caller returns only once that teardown has finished.
    ///
    /// Seals both queues, closes every registered stream and every attached
    /// listener, then shuts the control connection down.
    pub fn close(&self) {
        let (mut streams, listeners) = {
            let mut shared = self.shared();
            if shared.closed {
                drop(shared);
                self.closed.wait();
                return;
            }
            shared.closed = true;
            shared.outbound = None;
            shared.inbound = None;
            (
                std::mem::take(&mut shared.streams),
                std::mem::take(&mut shared.listeners),
            )
        };

        let closed_streams = streams.close_all();
        for acceptor in listeners.values() {
            acceptor.close();
        }
        if let Err(err) = self.conn.shutdown(Shutdown::Both) {
            debug!(session_id = %self.id, error = %err, "control connection shutdown failed");
        }

        self.closed.trigger();
        info!(
            session_id = %self.id,
            role = %self.role,
            streams = closed_streams,
            listeners = listeners.len(),
            "session closed"
        );
    }

    fn write_pump(&self, mut writer: FrameWriter<TcpStream>, outbound: Receiver<Message>) {
        for message in outbound {
            if let Err(err) = writer.write_message(&message) {
                log_frame_error(&self.id, "write", &err);
                break;
            }
        }
        self.close();
    }

    fn read_pump(&self, mut reader: FrameReader<TcpStream>) {
        loop {
            let frame = match reader.read_frame() {
                Ok(frame) => frame,
                Err(err) => {
                    log_frame_error(&self.id, "read", &err);
                    break;
                }
            };

            match Message::parse(&frame) {
                Ok(message) => {
                    if self.deliver(SessionEvent::Message(message)).is_err() {
                        break;
                    }
                }
                Err(err) => {
                    warn!(
                        session_id = %self.id,
                        frame_type = frame.frame_type,
                        length = frame.body.len(),
                        error = %err,
                        "skipping malformed frame"
                    );
                }
            }
        }
        self.close();
    }

    fn spawn_named<F>(&self, pump: &str, f: F) -> Result<JoinHandle<()>>
    where
        F: FnOnce() + Send + 'static,
    {
        thread::Builder::new()
            .name(format!("{}-{pump}-{}", self.role, self.id))
            .spawn(f)
            .map_err(SessionError::from)
    }

    fn shared(&self) -> MutexGuard<'_, SessionShared> {
        self.shared.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for ControlSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ControlSession")
            .field("id", &self.id)
            .field("role", &self.role)
            .field("peer_addr", &self.peer_addr)
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Whether a control-connection failure is routine (peer hung up, reset, timeout).
pub(crate) fn frame_error_is_expected(err: &FrameError) -> bool {
    match err {
        FrameError::ConnectionClosed => true,
        FrameError::Io(io) => is_expected(io),
        _ => false,
    }
}

fn log_frame_error(session_id: &str, pump: &str, err: &FrameError) {
    if frame_error_is_expected(err) {
        debug!(session_id, pump, error = %err, "control connection ended");
    } else {
        warn!(session_id, pump, error = %err, "control connection failed");
    }
}

#[cfg(test)]
mod tests {
    use std::io::ErrorKind;
    use std::net::TcpListener;
    use std::sync::mpsc::RecvTimeoutError;

    use burrow_frame::{CloseRequest, HeartbeatRequest, CLOSE_REQUEST};

    use super::*;

    fn tcp_pair() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").expect("listener should bind");
        let client =
            TcpStream::connect(listener.local_addr().expect("addr")).expect("client should connect");
        let (server, _) = listener.accept().expect("listener should accept");
        (client, server)
    }

    fn start_session(
        conn: TcpStream,
        config: SessionConfig,
    ) -> (Arc<ControlSession>, Receiver<SessionEvent>) {
        let reader = FrameReader::new(conn.try_clone().expect("clone should succeed"));
        let writer = FrameWriter::new(conn);
        ControlSession::start("sess", Role::Server, reader, writer, config)
            .expect("session should start")
    }

    #[test]
    fn messages_flow_both_ways() {
        let (local, remote) = tcp_pair();
        let (session, events) = start_session(local, SessionConfig::default());

        let mut peer_writer = FrameWriter::new(remote.try_clone().expect("clone"));
        let mut peer_reader = FrameReader::new(remote);

        peer_writer
            .write_message(&CloseRequest::new("s1", "web").into())
            .expect("peer write should succeed");
        let event = events
            .recv_timeout(Duration::from_secs(2))
            .expect("event should arrive");
        assert_eq!(
            event,
            SessionEvent::Message(CloseRequest::new("s1", "web").into())
        );

        session
            .send(CloseRequest::new("s2", "ssh").into())
            .expect("send should succeed");
        let frame = peer_reader.read_frame().expect("peer should read");
        assert_eq!(frame.frame_type, CLOSE_REQUEST);
        assert_eq!(
            Message::parse(&frame).expect("frame should parse"),
            CloseRequest::new("s2", "ssh").into()
        );

        session.close();
    }

    #[test]
    fn close_seals_queues_and_disconnects_events() {
        let (local, _remote) = tcp_pair();
        let (session, events) = start_session(local, SessionConfig::default());

        session.close();
        assert!(session.is_closed());
        assert!(matches!(
            session.send(HeartbeatRequest::now().into()),
            Err(SessionError::Closed)
        ));
        assert!(matches!(
            session.deliver(SessionEvent::HeartbeatTick),
            Err(SessionError::Closed)
        ));

        // The read pump holds no sender once it exits, so the queue disconnects.
        let deadline = std::time::Instant::now() + Duration::from_secs(2);
        loop {
            match events.recv_timeout(Duration::from_millis(50)) {
                Err(RecvTimeoutError::Disconnected) => break,
                _ if std::time::Instant::now() > deadline => panic!("events never disconnected"),
                _ => {}
            }
        }
    }

    #[test]
    fn peer_hangup_closes_session() {
        let (local, remote) = tcp_pair();
        let (session, _events) = start_session(local, SessionConfig::default());

        drop(remote);
        assert!(session.wait_closed_timeout(Duration::from_secs(2)));
    }

    #[test]
    fn close_twice_closes_each_stream_once() {
        let (local, _remote) = tcp_pair();
        let (session, _events) = start_session(local, SessionConfig::default());

        let mut handles = Vec::new();
        let mut peers = Vec::new();
        for i in 0..3 {
            let (a, b) = tcp_pair();
            let handle = StreamHandle::new(format!("s{i}"), "web", a);
            handles.push(handle.clone());
            session.register_stream(handle).expect("register should succeed");
            peers.push(b);
        }
        assert_eq!(session.stream_count(), 3);

        let racers: Vec<_> = (0..4)
            .map(|_| {
                let session = Arc::clone(&session);
                thread::spawn(move || session.close())
            })
            .collect();
        for racer in racers {
            racer.join().expect("close should not panic");
        }
        session.close();

        assert_eq!(session.stream_count(), 0);
        for handle in &handles {
            assert!(handle.is_closed());
            assert!(!handle.close(), "socket must already be closed exactly once");
        }
    }

    #[test]
    fn concurrent_close_returns_after_teardown() {
        for _ in 0..10 {
            let (local, _remote) = tcp_pair();
            let (session, _events) = start_session(local, SessionConfig::default());

            let listener = TcpListener::bind("127.0.0.1:0").expect("listener should bind");
            let mut handles = Vec::new();
            let mut peers = Vec::new();
            for i in 0..200 {
                let a = TcpStream::connect(listener.local_addr().expect("addr"))
                    .expect("client should connect");
                let (b, _) = listener.accept().expect("listener should accept");
                let handle = StreamHandle::new(format!("s{i}"), "web", a);
                handles.push(handle.clone());
                session.register_stream(handle).expect("register should succeed");
                peers.push(b);
            }
            let handles = Arc::new(handles);

            let barrier = Arc::new(std::sync::Barrier::new(2));
            let racer = {
                let session = Arc::clone(&session);
                let handles = Arc::clone(&handles);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    session.close();
                    handles.iter().filter(|h| !h.is_closed()).count()
                })
            };

            barrier.wait();
            session.close();
            let open_here = handles.iter().filter(|h| !h.is_closed()).count();
            let open_there = racer.join().expect("racer should not panic");

            assert_eq!(open_here, 0, "close returned with streams still open");
            assert_eq!(open_there, 0, "close returned with streams still open");
            assert!(session.wait_closed_timeout(Duration::ZERO));
        }
    }

    #[test]
    fn register_after_close_is_rejected() {
        let (local, _remote) = tcp_pair();
        let (session, _events) = start_session(local, SessionConfig::default());
        session.close();

        let (a, _b) = tcp_pair();
        let handle = StreamHandle::new("late", "web", a);
        let err = session.register_stream(handle.clone()).unwrap_err();
        assert!(matches!(err, SessionError::Closed));
        assert!(handle.is_closed());
    }

    #[test]
    fn close_closes_listeners() {
        let (local, _remote) = tcp_pair();
        let (session, _events) = start_session(local, SessionConfig::default());

        let acceptor = Arc::new(TcpAcceptor::bind("127.0.0.1:0").expect("bind"));
        let port = acceptor.port();
        session
            .add_listener("web", Arc::clone(&acceptor))
            .expect("listener should attach");
        assert_eq!(session.listener_ports(), vec![port]);

        session.close();
        assert!(acceptor.is_closed());
        assert!(session.listener_ports().is_empty());
    }

    #[test]
    fn malformed_frame_is_skipped() {
        let (local, remote) = tcp_pair();
        let (session, events) = start_session(local, SessionConfig::default());

        let mut peer = FrameWriter::new(remote);
        peer.send(42, br#"{"id":"x"}"#).expect("write unknown tag");
        peer.send(CLOSE_REQUEST, b"{broken").expect("write bad json");
        peer.write_message(&CloseRequest::new("s1", "web").into())
            .expect("write valid frame");

        let event = events
            .recv_timeout(Duration::from_secs(2))
            .expect("valid frame should arrive");
        assert_eq!(
            event,
            SessionEvent::Message(CloseRequest::new("s1", "web").into())
        );
        assert!(!session.is_closed());
        session.close();
    }

    #[test]
    fn oversized_frame_closes_session() {
        let (local, remote) = tcp_pair();
        let (session, _events) = start_session(local, SessionConfig::default());

        let mut raw = remote;
        let mut header = vec![5u8];
        header.extend_from_slice(&(-1i32).to_le_bytes());
        std::io::Write::write_all(&mut raw, &header).expect("write header");

        assert!(session.wait_closed_timeout(Duration::from_secs(2)));
    }

    #[test]
    fn expected_errors_are_classified() {
        assert!(frame_error_is_expected(&FrameError::ConnectionClosed));
        assert!(frame_error_is_expected(&FrameError::Io(
            std::io::Error::from(ErrorKind::ConnectionReset)
        )));
        assert!(!frame_error_is_expected(&FrameError::LengthOutOfRange {
            length: -1,
            max: 1
        }));
    }
}
