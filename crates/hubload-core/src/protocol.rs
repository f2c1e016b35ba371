//! Hub protocol message types

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use crate::{Error, PROTOCOL_VERSION};

/// Message type codes
pub mod kind {
    pub const INVOCATION: u64 = 1;
    pub const PING: u64 = 6;
    pub const CLOSE: u64 = 7;
}

/// Application-level encoding negotiated for a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    /// Textual JSON encoding, units delimited by the record separator
    #[default]
    Json,
    /// Compact binary MessagePack encoding, units prefixed with a varint length
    #[serde(alias = "binary")]
    MessagePack,
}

impl Protocol {
    /// Name used on the wire during negotiation
    pub fn name(&self) -> &'static str {
        match self {
            Protocol::Json => "json",
            Protocol::MessagePack => "messagepack",
        }
    }

    /// Whether units of this protocol are binary (length-prefixed)
    pub fn is_binary(&self) -> bool {
        matches!(self, Protocol::MessagePack)
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Protocol {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(Protocol::Json),
            "messagepack" | "binary" => Ok(Protocol::MessagePack),
            other => Err(Error::UnknownProtocol(other.to_string())),
        }
    }
}

/// Negotiation block sent by the client right after connecting
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HandshakeRequest {
    pub protocol: String,
    #[serde(default = "default_version")]
    pub version: u32,
}

fn default_version() -> u32 {
    PROTOCOL_VERSION
}

impl HandshakeRequest {
    pub fn new(protocol: Protocol) -> Self {
        Self {
            protocol: protocol.name().to_string(),
            version: PROTOCOL_VERSION,
        }
    }
}

/// Server answer to a [`HandshakeRequest`]; an empty object means accepted
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HandshakeResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl HandshakeResponse {
    pub fn accepted() -> Self {
        Self { error: None }
    }

    pub fn rejected(reason: impl Into<String>) -> Self {
        Self {
            error: Some(reason.into()),
        }
    }
}

/// A named call with positional arguments
#[derive(Debug, Clone, PartialEq)]
pub struct InvocationMessage {
    /// Absent for fire-and-forget invocations
    pub invocation_id: Option<String>,
    pub target: String,
    pub arguments: Vec<Value>,
    pub headers: HashMap<String, String>,
}

impl InvocationMessage {
    /// Fire-and-forget invocation without headers
    pub fn new(target: impl Into<String>, arguments: Vec<Value>) -> Self {
        Self {
            invocation_id: None,
            target: target.into(),
            arguments,
            headers: HashMap::new(),
        }
    }
}

/// Sent by either side before it closes the connection
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CloseMessage {
    pub error: Option<String>,
}

/// All hub protocol messages
#[derive(Debug, Clone, PartialEq)]
pub enum HubMessage {
    Invocation(InvocationMessage),
    Ping,
    Close(CloseMessage),
}

impl HubMessage {
    pub fn invocation(target: impl Into<String>, arguments: Vec<Value>) -> Self {
        HubMessage::Invocation(InvocationMessage::new(target, arguments))
    }

    /// Type code on the wire
    pub fn kind(&self) -> u64 {
        match self {
            HubMessage::Invocation(_) => kind::INVOCATION,
            HubMessage::Ping => kind::PING,
            HubMessage::Close(_) => kind::CLOSE,
        }
    }
}
