//! Client engine: dial, log in, keep the tunnel alive, bridge local services.

use std::collections::HashMap;
use std::fmt;
use std::net::TcpStream;
use std::sync::mpsc::Receiver;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Instant;

use burrow_frame::{
    CloseRequest, ConnectRequest, ConnectResponse, FrameReader, FrameWriter, HeartbeatRequest,
    Message, ServiceRequest,
};
use burrow_transport::{connect, is_expected, TransportError};
use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::config::ClientConfig;
use crate::error::{Result, SessionError};
use crate::handshake::client_login;
use crate::id::new_id;
use crate::session::{ControlSession, Role, SessionEvent};
use crate::signal::ShutdownSignal;
use crate::stream::{forward_data, pump_stream, StreamHandle};

/// Client engine lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    Disconnected,
    Dialing,
    LoggingIn,
    Active,
    Restarting,
}

impl fmt::Display for ClientState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ClientState::Disconnected => "disconnected",
            ClientState::Dialing => "dialing",
            ClientState::LoggingIn => "logging-in",
            ClientState::Active => "active",
            ClientState::Restarting => "restarting",
        };
        f.write_str(name)
    }
}

#[derive(Debug)]
struct ClientStatus {
    state: ClientState,
    session: Option<Arc<ControlSession>>,
    session_id: Option<String>,
    last_heartbeat: Option<DateTime<Utc>>,
}

/// Drives the agent side of the tunnel.
///
/// [`run`](Self::run) blocks for the engine's lifetime. It returns an error
/// only when the very first dial fails; every later failure tears the
/// session down and redials after `reconnect_delay`.
#[derive(Debug)]
pub struct ClientEngine {
    config: ClientConfig,
    local_addrs: HashMap<String, String>,
    status: Mutex<ClientStatus>,
    shutdown: ShutdownSignal,
}

impl ClientEngine {
    pub fn new(config: ClientConfig) -> Result<Self> {
        config.validate()?;
        let local_addrs = config
            .service_list
            .iter()
            .map(|service| (service.name.clone(), service.local_addr.clone()))
            .collect();

        Ok(Self {
            config,
            local_addrs,
            status: Mutex::new(ClientStatus {
                state: ClientState::Disconnected,
                session: None,
                session_id: None,
                last_heartbeat: None,
            }),
            shutdown: ShutdownSignal::new(),
        })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn state(&self) -> ClientState {
        self.status().state
    }

    /// Id of the current (or most recent) session.
    pub fn session_id(&self) -> Option<String> {
        self.status().session_id.clone()
    }

    /// When the last heartbeat response arrived.
    pub fn last_heartbeat(&self) -> Option<DateTime<Utc>> {
        self.status().last_heartbeat
    }

    /// The live session, if any.
    pub fn session(&self) -> Option<Arc<ControlSession>> {
        self.status().session.clone()
    }

    /// Stop the engine: close the live session and leave the reconnect loop.
    pub fn shutdown(&self) {
        if self.shutdown.trigger() {
            info!("client shutdown requested");
        }
        if let Some(session) = self.session() {
            session.close();
        }
    }

    /// Run until shut down. Fails only if the first dial fails.
    pub fn run(&self) -> Result<()> {
        let mut first_attempt = true;

        while !self.shutdown.is_triggered() {
            self.set_state(ClientState::Dialing);
            let addr = &self.config.server_addr;
            let conn = match connect(addr) {
                Ok(conn) => conn,
                Err(err) if first_attempt => {
                    warn!(server = %addr, error = %err, "initial dial failed");
                    self.set_state(ClientState::Disconnected);
                    return Err(err.into());
                }
                Err(err) => {
                    log_dial_error(addr, &err);
                    self.restart();
                    continue;
                }
            };
            first_attempt = false;
            info!(server = %addr, "connected to server");

            match self.run_session(conn) {
                Ok(()) => debug!("session ended"),
                Err(err) => warn!(error = %err, "session attempt failed"),
            }

            if self.shutdown.is_triggered() {
                break;
            }
            self.restart();
        }

        self.set_state(ClientState::Disconnected);
        info!("client stopped");
        Ok(())
    }

    /// Log in over `conn`, then serve the session until it closes.
    fn run_session(&self, conn: TcpStream) -> Result<()> {
        self.set_state(ClientState::LoggingIn);

        let frame_config = self.config.handshake.frame_config();
        let mut reader = FrameReader::with_config_tcp(conn.try_clone()?, frame_config.clone())?;
        let mut writer = FrameWriter::with_config_tcp(conn, frame_config)?;

        let request = ServiceRequest {
            id: new_id(),
            service_list: self.config.service_list.iter().map(|s| s.body()).collect(),
            req_time: Utc::now(),
        };
        let response = client_login(&mut reader, &mut writer, &request, &self.config.handshake)?;

        if response.success {
            info!(session_id = %response.id, message = %response.message, "services registered");
        } else {
            warn!(session_id = %response.id, message = %response.message, "service registration incomplete");
            if self.config.require_all_services {
                return Err(SessionError::HandshakeFailed(response.message));
            }
        }

        // Once active, liveness comes from I/O failure and heartbeats only.
        reader.set_read_timeout(None)?;
        writer.get_ref().set_write_timeout(None)?;

        let (session, events) = ControlSession::start(
            response.id.clone(),
            Role::Client,
            reader,
            writer,
            self.config.session.clone(),
        )?;

        {
            let mut status = self.status();
            status.session = Some(Arc::clone(&session));
            status.session_id = Some(response.id);
            status.last_heartbeat = None;
        }
        // Shutdown may have raced the login.
        if self.shutdown.is_triggered() {
            session.close();
        }
        self.set_state(ClientState::Active);

        let ticker = self.spawn_ticker(&session);
        if let Err(err) = &ticker {
            warn!(error = %err, "heartbeat ticker failed to start");
            session.close();
        }

        self.dispatch(&session, events);

        session.close();
        if let Ok(ticker) = ticker {
            let _ = ticker.join();
        }
        self.status().session = None;
        Ok(())
    }

    fn spawn_ticker(&self, session: &Arc<ControlSession>) -> Result<thread::JoinHandle<()>> {
        let session = Arc::clone(session);
        let interval = self.config.heartbeat_interval;
        thread::Builder::new()
            .name(format!("client-heartbeat-{}", session.id()))
            .spawn(move || {
                while !session.wait_closed_timeout(interval) {
                    if session.deliver(SessionEvent::HeartbeatTick).is_err() {
                        break;
                    }
                }
            })
            .map_err(SessionError::from)
    }

    fn dispatch(&self, session: &Arc<ControlSession>, events: Receiver<SessionEvent>) {
        let mut last_seen = Instant::now();

        for event in events {
            match event {
                SessionEvent::HeartbeatTick => {
                    if let Some(timeout) = self.config.heartbeat_timeout {
                        if last_seen.elapsed() > timeout {
                            warn!(session_id = %session.id(), ?timeout, "heartbeat timed out, reconnecting");
                            session.close();
                            continue;
                        }
                    }
                    let _ = session.send(HeartbeatRequest::now().into());
                }
                SessionEvent::Message(Message::ConnectRequest(request)) => {
                    self.open_local(session, request);
                }
                SessionEvent::Message(Message::Data(data)) => forward_data(session, data),
                SessionEvent::Message(Message::Close(close)) => {
                    if session.close_stream(&close.id) {
                        debug!(session_id = %session.id(), stream_id = %close.id, "stream closed by peer");
                    }
                }
                SessionEvent::Message(Message::HeartbeatResponse(response)) => {
                    last_seen = Instant::now();
                    self.status().last_heartbeat = Some(Utc::now());
                    debug!(session_id = %session.id(), cid = %response.cid, "heartbeat response");
                }
                SessionEvent::Message(other) => {
                    debug!(session_id = %session.id(), message = other.type_name(), "ignoring message");
                }
            }
        }
    }

    /// Dial the local service for a new stream on its own thread.
    fn open_local(&self, session: &Arc<ControlSession>, request: ConnectRequest) {
        let Some(local_addr) = self.local_addrs.get(&request.name).cloned() else {
            warn!(session_id = %session.id(), service = %request.name, "connect request for unknown service");
            let _ = session.send(CloseRequest::new(request.id, request.name).into());
            return;
        };

        let worker = {
            let session = Arc::clone(session);
            let request = request.clone();
            thread::Builder::new()
                .name(format!("stream-{}", request.id))
                .spawn(move || bridge_local(&session, request, &local_addr))
        };
        if let Err(err) = worker {
            warn!(session_id = %session.id(), stream_id = %request.id, error = %err, "stream thread failed to start");
            let _ = session.send(CloseRequest::new(request.id, request.name).into());
        }
    }

    fn restart(&self) {
        self.set_state(ClientState::Restarting);
        let delay = self.config.reconnect_delay;
        info!(?delay, "reconnecting after delay");
        self.shutdown.wait_timeout(delay);
    }

    fn set_state(&self, state: ClientState) {
        let mut status = self.status();
        if status.state != state {
            debug!(from = %status.state, to = %state, "client state");
            status.state = state;
        }
    }

    fn status(&self) -> MutexGuard<'_, ClientStatus> {
        self.status.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn bridge_local(session: &Arc<ControlSession>, request: ConnectRequest, local_addr: &str) {
    let socket = match connect(local_addr) {
        Ok(socket) => socket,
        Err(err) => {
            log_dial_error(local_addr, &err);
            let _ = session.send(CloseRequest::new(request.id, request.name).into());
            return;
        }
    };

    let handle = StreamHandle::new(request.id.clone(), request.name.clone(), socket);
    if session.register_stream(handle.clone()).is_err() {
        return;
    }
    debug!(session_id = %session.id(), stream_id = %request.id, service = %request.name, peer = %request.ip, "local stream opened");

    let response = ConnectResponse {
        id: request.id,
        name: request.name,
        success: true,
    };
    if session.send(response.into()).is_err() {
        return;
    }
    pump_stream(session, handle);
}

fn log_dial_error(addr: &str, err: &TransportError) {
    match err.io_error() {
        Some(io) if is_expected(io) => debug!(%addr, error = %err, "dial failed"),
        _ => warn!(%addr, error = %err, "dial failed"),
    }
}
