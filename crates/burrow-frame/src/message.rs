//! The tunnel message set.
//!
//! One variant per wire tag. Control messages are JSON bodies whose keys
//! match the established wire format; data frames use the two-segment
//! layout from [`crate::codec`].

use bytes::{Bytes, BytesMut};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::codec::{encode_data_frame, encode_frame, split_data_body, Frame};
use crate::error::{MessageError, Result};
use crate::types::{
    type_name, CLOSE_REQUEST, CONNECT_REQUEST, CONNECT_RESPONSE, DATA, HEARTBEAT_REQUEST,
    HEARTBEAT_RESPONSE, SERVICE_REQUEST, SERVICE_RESPONSE,
};

/// A service the client asks the server to expose.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ServiceBody {
    /// Unique service name within the session.
    pub name: String,
    /// Public port the server should listen on.
    pub remote_port: u16,
}

/// Login request. Its `id` becomes the session id on both ends.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ServiceRequest {
    pub id: String,
    pub service_list: Vec<ServiceBody>,
    pub req_time: DateTime<Utc>,
}

/// Login reply.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ServiceResponse {
    pub id: String,
    pub success: bool,
    pub message: String,
}

/// A public connection was accepted for service `name`; `id` is its stream id.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConnectRequest {
    pub id: String,
    pub name: String,
    /// Remote address of the public peer.
    pub ip: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConnectResponse {
    pub id: String,
    pub name: String,
    pub success: bool,
}

/// JSON header segment of a data frame.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DataHeader {
    pub id: String,
    pub name: String,
}

/// Stream bytes for stream `id`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataFrame {
    pub id: String,
    pub name: String,
    pub content: Bytes,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CloseRequest {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HeartbeatRequest {
    pub send_time: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HeartbeatResponse {
    /// Session id of the responding server session.
    #[serde(rename = "Cid", alias = "cid")]
    pub cid: String,
}

/// A decoded tunnel message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    ServiceRequest(ServiceRequest),
    ServiceResponse(ServiceResponse),
    ConnectRequest(ConnectRequest),
    ConnectResponse(ConnectResponse),
    Data(DataFrame),
    Close(CloseRequest),
    HeartbeatRequest(HeartbeatRequest),
    HeartbeatResponse(HeartbeatResponse),
}

impl Message {
    /// The wire tag for this message.
    pub fn message_type(&self) -> u8 {
        match self {
            Message::ServiceRequest(_) => SERVICE_REQUEST,
            Message::ServiceResponse(_) => SERVICE_RESPONSE,
            Message::ConnectRequest(_) => CONNECT_REQUEST,
            Message::ConnectResponse(_) => CONNECT_RESPONSE,
            Message::Data(_) => DATA,
            Message::Close(_) => CLOSE_REQUEST,
            Message::HeartbeatRequest(_) => HEARTBEAT_REQUEST,
            Message::HeartbeatResponse(_) => HEARTBEAT_RESPONSE,
        }
    }

    /// Human-readable name of the message type.
    pub fn type_name(&self) -> &'static str {
        type_name(self.message_type())
    }

    /// The stream id for stream-scoped messages.
    pub fn stream_id(&self) -> Option<&str> {
        match self {
            Message::ConnectRequest(m) => Some(&m.id),
            Message::ConnectResponse(m) => Some(&m.id),
            Message::Data(m) => Some(&m.id),
            Message::Close(m) => Some(&m.id),
            _ => None,
        }
    }

    /// Append the framed encoding of this message to `dst`.
    pub fn encode(&self, dst: &mut BytesMut) -> Result<()> {
        let tag = self.message_type();
        match self {
            Message::Data(data) => {
                let header = serde_json::to_vec(&DataHeader {
                    id: data.id.clone(),
                    name: data.name.clone(),
                })?;
                encode_data_frame(&header, &data.content, dst)
            }
            Message::ServiceRequest(m) => encode_json(tag, m, dst),
            Message::ServiceResponse(m) => encode_json(tag, m, dst),
            Message::ConnectRequest(m) => encode_json(tag, m, dst),
            Message::ConnectResponse(m) => encode_json(tag, m, dst),
            Message::Close(m) => encode_json(tag, m, dst),
            Message::HeartbeatRequest(m) => encode_json(tag, m, dst),
            Message::HeartbeatResponse(m) => encode_json(tag, m, dst),
        }
    }

    /// Decode the message carried by `frame`.
    ///
    /// Pure: depends only on the frame.
    pub fn parse(frame: &Frame) -> std::result::Result<Self, MessageError> {
        let body = frame.body.as_ref();
        match frame.frame_type {
            SERVICE_REQUEST => parse_json(SERVICE_REQUEST, body).map(Message::ServiceRequest),
            SERVICE_RESPONSE => parse_json(SERVICE_RESPONSE, body).map(Message::ServiceResponse),
            CONNECT_REQUEST => parse_json(CONNECT_REQUEST, body).map(Message::ConnectRequest),
            CONNECT_RESPONSE => parse_json(CONNECT_RESPONSE, body).map(Message::ConnectResponse),
            DATA => {
                let (header, content) = split_data_body(&frame.body)?;
                let header: DataHeader = parse_json(DATA, &header)?;
                Ok(Message::Data(DataFrame {
                    id: header.id,
                    name: header.name,
                    content,
                }))
            }
            CLOSE_REQUEST => parse_json(CLOSE_REQUEST, body).map(Message::Close),
            HEARTBEAT_REQUEST => {
                parse_json(HEARTBEAT_REQUEST, body).map(Message::HeartbeatRequest)
            }
            HEARTBEAT_RESPONSE => {
                parse_json(HEARTBEAT_RESPONSE, body).map(Message::HeartbeatResponse)
            }
            other => Err(MessageError::UnknownType(other)),
        }
    }
}

impl DataFrame {
    /// Build a data frame for stream `id` of service `name`.
    pub fn new(id: impl Into<String>, name: impl Into<String>, content: impl Into<Bytes>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            content: content.into(),
        }
    }
}

impl CloseRequest {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }
}

impl HeartbeatRequest {
    /// A heartbeat stamped with the current time.
    pub fn now() -> Self {
        Self {
            send_time: Utc::now(),
        }
    }
}

macro_rules! impl_from_variant {
    ($($ty:ident => $variant:ident),* $(,)?) => {
        $(
            impl From<$ty> for Message {
                fn from(value: $ty) -> Self {
                    Message::$variant(value)
                }
            }
        )*
    };
}

impl_from_variant! {
    ServiceRequest => ServiceRequest,
    ServiceResponse => ServiceResponse,
    ConnectRequest => ConnectRequest,
    ConnectResponse => ConnectResponse,
    DataFrame => Data,
    CloseRequest => Close,
    HeartbeatRequest => HeartbeatRequest,
    HeartbeatResponse => HeartbeatResponse,
}

fn encode_json<T: Serialize>(tag: u8, value: &T, dst: &mut BytesMut) -> Result<()> {
    let body = serde_json::to_vec(value)?;
    encode_frame(tag, &body, dst)
}

fn parse_json<T: DeserializeOwned>(tag: u8, body: &[u8]) -> std::result::Result<T, MessageError> {
    serde_json::from_slice(body).map_err(|source| MessageError::Json {
        name: type_name(tag),
        source,
    })
}
