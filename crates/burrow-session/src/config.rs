//! Engine configuration.
//!
//! The client reads a JSON file whose required keys are `server_addr` and
//! `service_list`; the timing keys are optional and default to the values
//! below.

use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use burrow_frame::{FrameConfig, ServiceBody};
use serde::{Deserialize, Serialize};

use crate::error::{Result, SessionError};

/// Well-known control address the server listens on.
pub const DEFAULT_CONTROL_ADDR: &str = "0.0.0.0:8092";

const DEFAULT_PUBLIC_HOST: &str = "0.0.0.0";
const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(10);
const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(15);

/// Timeout applied to the login exchange only.
#[derive(Debug, Clone)]
pub struct HandshakeConfig {
    pub timeout: Duration,
}

impl Default for HandshakeConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(5),
        }
    }
}

impl HandshakeConfig {
    /// Frame configuration used while logging in.
    pub fn frame_config(&self) -> FrameConfig {
        FrameConfig {
            read_timeout: Some(self.timeout),
            write_timeout: Some(self.timeout),
            ..FrameConfig::default()
        }
    }
}

/// Per-session tuning.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Capacity of each direction's message queue. A full outbound queue
    /// blocks the producing stream pump.
    pub queue_capacity: usize,
    /// Read size for stream socket pumps; one chunk becomes one data frame.
    pub stream_chunk_size: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 100,
            stream_chunk_size: 32 * 1024,
        }
    }
}

/// A service the client exposes through the server.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ServiceConfig {
    pub name: String,
    pub remote_port: u16,
    pub local_addr: String,
}

impl ServiceConfig {
    pub fn new(name: impl Into<String>, remote_port: u16, local_addr: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            remote_port,
            local_addr: local_addr.into(),
        }
    }

    /// The part of the descriptor the server sees.
    pub fn body(&self) -> ServiceBody {
        ServiceBody {
            name: self.name.clone(),
            remote_port: self.remote_port,
        }
    }
}

/// Client engine configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub server_addr: String,
    pub service_list: Vec<ServiceConfig>,
    pub heartbeat_interval: Duration,
    pub reconnect_delay: Duration,
    /// Reconnect when no heartbeat response arrives for this long. `None`
    /// leaves recovery to I/O failures alone.
    pub heartbeat_timeout: Option<Duration>,
    /// Treat a partially failed service registration as a failed login.
    pub require_all_services: bool,
    pub handshake: HandshakeConfig,
    pub session: SessionConfig,
}

impl ClientConfig {
    pub fn new(server_addr: impl Into<String>, service_list: Vec<ServiceConfig>) -> Self {
        Self {
            server_addr: server_addr.into(),
            service_list,
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
            heartbeat_timeout: None,
            require_all_services: false,
            handshake: HandshakeConfig::default(),
            session: SessionConfig::default(),
        }
    }

    /// Load and validate a JSON config file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|err| {
            SessionError::Config(format!("cannot read {}: {err}", path.display()))
        })?;
        Self::from_json(&content)
    }

    /// Parse and validate a JSON config document.
    pub fn from_json(content: &str) -> Result<Self> {
        let file: ClientConfigFile = serde_json::from_str(content)?;
        let mut config = Self::new(file.server_addr, file.service_list);
        if let Some(secs) = file.heartbeat_interval_secs {
            config.heartbeat_interval = Duration::from_secs(secs);
        }
        if let Some(secs) = file.reconnect_delay_secs {
            config.reconnect_delay = Duration::from_secs(secs);
        }
        config.heartbeat_timeout = file.heartbeat_timeout_secs.map(Duration::from_secs);
        config.require_all_services = file.require_all_services;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.server_addr.trim().is_empty() {
            return Err(SessionError::Config("server_addr is empty".to_string()));
        }
        if self.heartbeat_interval.is_zero() {
            return Err(SessionError::Config(
                "heartbeat interval must be positive".to_string(),
            ));
        }

        let mut names = HashSet::with_capacity(self.service_list.len());
        for service in &self.service_list {
            if service.name.is_empty() {
                return Err(SessionError::Config("service name is empty".to_string()));
            }
            if !names.insert(service.name.as_str()) {
                return Err(SessionError::Config(format!(
                    "duplicate service name '{}'",
                    service.name
                )));
            }
            if service.local_addr.trim().is_empty() {
                return Err(SessionError::Config(format!(
                    "service '{}' has an empty local_addr",
                    service.name
                )));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct ClientConfigFile {
    server_addr: String,
    #[serde(default)]
    service_list: Vec<ServiceConfig>,
    heartbeat_interval_secs: Option<u64>,
    reconnect_delay_secs: Option<u64>,
    heartbeat_timeout_secs: Option<u64>,
    #[serde(default)]
    require_all_services: bool,
}

/// Server engine configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Control listener address.
    pub listen_addr: String,
    /// Host that public service listeners bind on.
    pub public_host: String,
    pub handshake: HandshakeConfig,
    pub session: SessionConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: DEFAULT_CONTROL_ADDR.to_string(),
            public_host: DEFAULT_PUBLIC_HOST.to_string(),
            handshake: HandshakeConfig::default(),
            session: SessionConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Address a public listener for `port` binds on.
    pub fn public_addr(&self, port: u16) -> String {
        if self.public_host.contains(':') && !self.public_host.starts_with('[') {
            format!("[{}]:{port}", self.public_host)
        } else {
            format!("{}:{port}", self.public_host)
        }
    }
}
