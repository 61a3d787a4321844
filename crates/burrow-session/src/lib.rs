//! Control sessions and the tunnel engines.
//!
//! A [`ControlSession`] owns one control connection and multiplexes any
//! number of proxied TCP streams over it. [`ClientEngine`] drives a session
//! from the agent side (login, heartbeats, reconnect) and bridges streams to
//! local services. [`ServerEngine`] accepts agents, opens one public listener
//! per declared service, and bridges public connections back through the
//! agent's session.

pub mod client;
pub mod config;
pub mod error;
pub mod handshake;
pub mod id;
pub mod registry;
pub mod server;
pub mod session;
pub mod signal;
pub mod stream;

pub use client::{ClientEngine, ClientState};
pub use config::{
    ClientConfig, HandshakeConfig, ServerConfig, ServiceConfig, SessionConfig,
    DEFAULT_CONTROL_ADDR,
};
pub use error::{Result, SessionError};
pub use handshake::{client_login, server_accept};
pub use id::new_id;
pub use registry::StreamRegistry;
pub use server::{ServerEngine, BIND_FAILURE_MESSAGE, BIND_SUCCESS_MESSAGE};
pub use session::{ControlSession, Role, SessionEvent};
pub use signal::ShutdownSignal;
pub use stream::StreamHandle;
