//! Hub protocol codec
//!
//! Encodes [`HubMessage`]s for the negotiated [`Protocol`] and wraps them in
//! the matching unit framing. Decoding works on a single, already de-framed
//! unit as produced by [`FrameBuffer`](crate::FrameBuffer).
//!
//! JSON units are objects keyed by name:
//! `{"type":1,"target":"Echo","arguments":[11]}`.
//! MessagePack units are positional arrays:
//! `[1, {headers}, invocationId | nil, target, [arguments]]`, `[6]`, `[7, error | nil]`.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;

use crate::framing::frame;
use crate::protocol::kind;
use crate::{
    CloseMessage, Error, HandshakeRequest, HandshakeResponse, HubMessage, InvocationMessage,
    Protocol, Result,
};

// ============================================================================
// PUBLIC API
// ============================================================================

/// Encode and frame a message
pub fn encode_message(protocol: Protocol, message: &HubMessage) -> Result<Bytes> {
    let payload = match protocol {
        Protocol::Json => encode_json(message)?,
        Protocol::MessagePack => encode_msgpack(message)?,
    };
    frame(protocol, &payload)
}

/// Decode a single de-framed unit
pub fn decode_message(protocol: Protocol, unit: &[u8]) -> Result<HubMessage> {
    match protocol {
        Protocol::Json => decode_json(unit),
        Protocol::MessagePack => decode_msgpack(unit),
    }
}

/// Encode the negotiation block (always JSON text)
pub fn encode_handshake_request(request: &HandshakeRequest) -> Result<Bytes> {
    let payload = serde_json::to_vec(request).map_err(|e| Error::EncodeError(e.to_string()))?;
    frame(Protocol::Json, &payload)
}

pub fn decode_handshake_request(unit: &[u8]) -> Result<HandshakeRequest> {
    Ok(serde_json::from_slice(unit)?)
}

/// Encode the negotiation answer (always JSON text)
pub fn encode_handshake_response(response: &HandshakeResponse) -> Result<Bytes> {
    let payload = serde_json::to_vec(response).map_err(|e| Error::EncodeError(e.to_string()))?;
    frame(Protocol::Json, &payload)
}

pub fn decode_handshake_response(unit: &[u8]) -> Result<HandshakeResponse> {
    Ok(serde_json::from_slice(unit)?)
}

// ============================================================================
// JSON
// ============================================================================

#[derive(Debug, Serialize, Deserialize)]
struct JsonEnvelope {
    #[serde(rename = "type")]
    kind: u64,
    #[serde(
        rename = "invocationId",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    invocation_id: Option<String>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    headers: HashMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    target: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    arguments: Option<Vec<Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

fn encode_json(message: &HubMessage) -> Result<Vec<u8>> {
    let mut envelope = JsonEnvelope {
        kind: message.kind(),
        invocation_id: None,
        headers: HashMap::new(),
        target: None,
        arguments: None,
        error: None,
    };

    match message {
        HubMessage::Invocation(inv) => {
            envelope.invocation_id = inv.invocation_id.clone();
            envelope.headers = inv.headers.clone();
            envelope.target = Some(inv.target.clone());
            envelope.arguments = Some(inv.arguments.clone());
        }
        HubMessage::Ping => {}
        HubMessage::Close(close) => {
            envelope.error = close.error.clone();
        }
    }

    serde_json::to_vec(&envelope).map_err(|e| Error::EncodeError(e.to_string()))
}

fn decode_json(unit: &[u8]) -> Result<HubMessage> {
    let envelope: JsonEnvelope = serde_json::from_slice(unit)?;

    match envelope.kind {
        kind::INVOCATION => {
            let target = envelope
                .target
                .ok_or_else(|| Error::DecodeError("invocation without target".into()))?;
            Ok(HubMessage::Invocation(InvocationMessage {
                invocation_id: envelope.invocation_id,
                target,
                arguments: envelope.arguments.unwrap_or_default(),
                headers: envelope.headers,
            }))
        }
        kind::PING => Ok(HubMessage::Ping),
        kind::CLOSE => Ok(HubMessage::Close(CloseMessage {
            error: envelope.error,
        })),
        other => Err(Error::UnknownMessageType(other)),
    }
}

// ============================================================================
// MESSAGEPACK
// ============================================================================

fn encode_msgpack(message: &HubMessage) -> Result<Vec<u8>> {
    let array = match message {
        HubMessage::Invocation(inv) => {
            let headers: Map<String, Value> = inv
                .headers
                .iter()
                .map(|(k, v)| (k.clone(), Value::String(v.clone())))
                .collect();
            vec![
                Value::from(kind::INVOCATION),
                Value::Object(headers),
                inv.invocation_id.clone().map_or(Value::Null, Value::String),
                Value::String(inv.target.clone()),
                Value::Array(inv.arguments.clone()),
            ]
        }
        HubMessage::Ping => vec![Value::from(kind::PING)],
        HubMessage::Close(close) => vec![
            Value::from(kind::CLOSE),
            close.error.clone().map_or(Value::Null, Value::String),
        ],
    };

    Ok(rmp_serde::to_vec(&Value::Array(array))?)
}

fn decode_msgpack(unit: &[u8]) -> Result<HubMessage> {
    let value: Value = rmp_serde::from_slice(unit)?;
    let mut items = match value {
        Value::Array(items) if !items.is_empty() => items.into_iter(),
        _ => return Err(Error::DecodeError("expected non-empty array".into())),
    };

    let code = items
        .next()
        .and_then(|v| v.as_u64())
        .ok_or_else(|| Error::DecodeError("missing message type".into()))?;

    match code {
        kind::INVOCATION => {
            let headers = match items.next() {
                Some(Value::Object(map)) => map
                    .into_iter()
                    .filter_map(|(k, v)| v.as_str().map(|s| (k, s.to_string())))
                    .collect(),
                Some(Value::Null) | None => HashMap::new(),
                Some(_) => return Err(Error::DecodeError("headers must be a map".into())),
            };
            let invocation_id = match items.next() {
                Some(Value::String(id)) => Some(id),
                _ => None,
            };
            let target = match items.next() {
                Some(Value::String(target)) => target,
                _ => return Err(Error::DecodeError("invocation without target".into())),
            };
            let arguments = match items.next() {
                Some(Value::Array(args)) => args,
                Some(Value::Null) | None => Vec::new(),
                Some(_) => return Err(Error::DecodeError("arguments must be an array".into())),
            };
            Ok(HubMessage::Invocation(InvocationMessage {
                invocation_id,
                target,
                arguments,
                headers,
            }))
        }
        kind::PING => Ok(HubMessage::Ping),
        kind::CLOSE => Ok(HubMessage::Close(CloseMessage {
            error: items.next().and_then(|v| v.as_str().map(str::to_string)),
        })),
        other => Err(Error::UnknownMessageType(other)),
    }
}
