//! Server engine: accept agents, open their public ports, bridge public
//! connections back through each agent's session.

use std::collections::HashMap;
use std::net::{SocketAddr, TcpStream};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::Receiver;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;

use burrow_frame::{
    CloseRequest, ConnectRequest, ConnectResponse, FrameReader, FrameWriter, HeartbeatResponse,
    Message, ServiceRequest, ServiceResponse,
};
use burrow_transport::{TcpAcceptor, TransportError};
use tracing::{debug, info, warn};

use crate::config::ServerConfig;
use crate::error::{Result, SessionError};
use crate::handshake::server_accept;
use crate::id::new_id;
use crate::session::{frame_error_is_expected, ControlSession, Role, SessionEvent};
use crate::stream::{forward_data, StreamHandle};

/// `ServiceResponse.message` when every requested port was opened.
pub const BIND_SUCCESS_MESSAGE: &str = "服务启动成功.";
/// `ServiceResponse.message` when a requested port could not be opened.
pub const BIND_FAILURE_MESSAGE: &str = "服务启动失败，端口被占用.";

/// Accepts agent control connections; one isolated session per connection.
#[derive(Debug)]
pub struct ServerEngine {
    config: ServerConfig,
    acceptor: TcpAcceptor,
    sessions: Mutex<HashMap<u64, Arc<ControlSession>>>,
    next_conn: AtomicU64,
}

/// Public listeners opened for one service request.
struct Provisioned {
    listeners: Vec<(String, Arc<TcpAcceptor>)>,
    success: bool,
    message: String,
}

impl ServerEngine {
    /// Bind the control listener. Failure here is the server's only fatal error.
    pub fn bind(config: ServerConfig) -> Result<Self> {
        let acceptor = TcpAcceptor::bind(&config.listen_addr)?;
        Ok(Self {
            config,
            acceptor,
            sessions: Mutex::new(HashMap::new()),
            next_conn: AtomicU64::new(1),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.acceptor.local_addr()
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Number of live sessions.
    pub fn session_count(&self) -> usize {
        self.sessions().len()
    }

    /// Snapshot of the live sessions.
    pub fn sessions_snapshot(&self) -> Vec<Arc<ControlSession>> {
        self.sessions().values().cloned().collect()
    }

    /// Accept control connections until [`shutdown`](Self::shutdown).
    ///
    /// Each connection is served on its own thread; `run` returns once every
    /// one of them has finished.
    pub fn run(&self) -> Result<()> {
        info!(addr = %self.local_addr(), "server accepting agents");
        thread::scope(|scope| loop {
            let (conn, peer) = match self.acceptor.accept() {
                Ok(accepted) => accepted,
                Err(TransportError::Shutdown) => break,
                Err(err) => {
                    warn!(error = %err, "control accept failed");
                    continue;
                }
            };

            let conn_id = self.next_conn.fetch_add(1, Ordering::Relaxed);
            let spawned = thread::Builder::new()
                .name(format!("server-conn-{conn_id}"))
                .spawn_scoped(scope, move || self.serve_connection(conn_id, conn, peer));
            if let Err(err) = spawned {
                warn!(%peer, error = %err, "connection thread failed to start");
            }
        });
        info!("server stopped");
        Ok(())
    }

    /// Stop accepting and close every live session.
    pub fn shutdown(&self) {
        self.acceptor.close();
        for session in self.sessions_snapshot() {
            session.close();
        }
    }

    fn serve_connection(&self, conn_id: u64, conn: TcpStream, peer: SocketAddr) {
        match self.handle_connection(conn_id, conn, peer) {
            Ok(()) => {}
            Err(SessionError::Frame(err)) if frame_error_is_expected(&err) => {
                debug!(%peer, error = %err, "agent left before login");
            }
            Err(SessionError::Disconnected(reason)) => {
                debug!(%peer, %reason, "agent left before login");
            }
            Err(err) => warn!(%peer, error = %err, "agent connection failed"),
        }
    }

    fn handle_connection(&self, conn_id: u64, conn: TcpStream, peer: SocketAddr) -> Result<()> {
        let frame_config = self.config.handshake.frame_config();
        let mut reader = FrameReader::with_config_tcp(conn.try_clone()?, frame_config.clone())?;
        let mut writer = FrameWriter::with_config_tcp(conn, frame_config)?;

        let request = server_accept(&mut reader, &self.config.handshake)?;
        info!(%peer, session_id = %request.id, services = request.service_list.len(), "service request received");

        let provisioned = self.provision(&request);
        let response = ServiceResponse {
            id: request.id.clone(),
            success: provisioned.success,
            message: provisioned.message.clone(),
        };
        if let Err(err) = writer.write_message(&response.into()) {
            for (_, acceptor) in &provisioned.listeners {
                acceptor.close();
            }
            return Err(err.into());
        }

        reader.set_read_timeout(None)?;
        writer.get_ref().set_write_timeout(None)?;

        let (session, events) = ControlSession::start(
            request.id,
            Role::Server,
            reader,
            writer,
            self.config.session.clone(),
        )?;
        self.sessions().insert(conn_id, Arc::clone(&session));
        if self.acceptor.is_closed() {
            session.close();
        }

        for (name, acceptor) in provisioned.listeners {
            if session.add_listener(name.clone(), Arc::clone(&acceptor)).is_err() {
                continue;
            }
            let spawned = {
                let session = Arc::clone(&session);
                thread::Builder::new()
                    .name(format!("accept-{}-{}", session.id(), acceptor.port()))
                    .spawn(move || accept_public(&session, &name, &acceptor))
            };
            if let Err(err) = spawned {
                warn!(session_id = %session.id(), error = %err, "accept thread failed to start");
                session.close();
            }
        }

        dispatch(&session, events);

        session.close();
        self.sessions().remove(&conn_id);
        Ok(())
    }

    /// Open one public listener per requested service, in request order.
    ///
    /// Stops at the first bind failure. Listeners opened before the failure
    /// stay open and keep serving.
    fn provision(&self, request: &ServiceRequest) -> Provisioned {
        let mut listeners = Vec::with_capacity(request.service_list.len());
        for service in &request.service_list {
            let addr = self.config.public_addr(service.remote_port);
            match TcpAcceptor::bind(&addr) {
                Ok(acceptor) => {
                    info!(session_id = %request.id, service = %service.name, port = acceptor.port(), "public listener opened");
                    listeners.push((service.name.clone(), Arc::new(acceptor)));
                }
                Err(err) => {
                    warn!(session_id = %request.id, service = %service.name, %addr, error = %err, "public listener failed");
                    return Provisioned {
                        listeners,
                        success: false,
                        message: BIND_FAILURE_MESSAGE.to_string(),
                    };
                }
            }
        }
        Provisioned {
            listeners,
            success: true,
            message: BIND_SUCCESS_MESSAGE.to_string(),
        }
    }

    fn sessions(&self) -> MutexGuard<'_, HashMap<u64, Arc<ControlSession>>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Accept public connections for one service and announce each to the agent.
fn accept_public(session: &Arc<ControlSession>, name: &str, acceptor: &TcpAcceptor) {
    loop {
        let (socket, peer) = match acceptor.accept() {
            Ok(accepted) => accepted,
            Err(TransportError::Shutdown) => break,
            Err(err) => {
                warn!(session_id = %session.id(), service = name, error = %err, "public accept failed");
                if acceptor.is_closed() || session.is_closed() {
                    break;
                }
                continue;
            }
        };

        let id = new_id();
        if session
            .register_stream(StreamHandle::new(id.clone(), name, socket))
            .is_err()
        {
            break;
        }
        debug!(session_id = %session.id(), stream_id = %id, service = name, %peer, "public connection accepted");

        let request = ConnectRequest {
            id,
            name: name.to_string(),
            ip: peer.to_string(),
        };
        if session.send(request.into()).is_err() {
            break;
        }
    }
    debug!(session_id = %session.id(), service = name, "public accept loop stopped");
}

fn dispatch(session: &Arc<ControlSession>, events: Receiver<SessionEvent>) {
    for event in events {
        let message = match event {
            SessionEvent::Message(message) => message,
            SessionEvent::HeartbeatTick => continue,
        };

        match message {
            Message::ConnectResponse(response) => start_public_pump(session, response),
            Message::Data(data) => forward_data(session, data),
            Message::Close(close) => {
                if session.close_stream(&close.id) {
                    debug!(session_id = %session.id(), stream_id = %close.id, "stream closed by agent");
                }
            }
            Message::HeartbeatRequest(_) => {
                let response = HeartbeatResponse {
                    cid: session.id().to_string(),
                };
                let _ = session.send(response.into());
            }
            other => {
                debug!(session_id = %session.id(), message = other.type_name(), "ignoring message");
            }
        }
    }
}

fn start_public_pump(session: &Arc<ControlSession>, response: ConnectResponse) {
    if !response.success {
        session.close_stream(&response.id);
        return;
    }

    let Some(handle) = session.lookup_stream(&response.id) else {
        debug!(session_id = %session.id(), stream_id = %response.id, "connect response for unknown stream");
        let _ = session.send(CloseRequest::new(response.id, response.name).into());
        return;
    };

    if let Err(err) = session.spawn_stream_pump(handle) {
        warn!(session_id = %session.id(), stream_id = %response.id, error = %err, "stream pump failed to start");
        let _ = session.send(CloseRequest::new(response.id.clone(), response.name).into());
        session.close_stream(&response.id);
    }
}
