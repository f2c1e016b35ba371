//! hubload Core
//!
//! Protocol primitives shared by the hubload driver, hub client and echo target.
//!
//! This crate provides:
//! - Hub protocol messages ([`HubMessage`], [`InvocationMessage`])
//! - Handshake payloads ([`HandshakeRequest`], [`HandshakeResponse`])
//! - Per-protocol encoding ([`Protocol`], [`codec`])
//! - Unit framing for text and binary protocols ([`framing`])
//! - Timing utilities ([`Timestamp`])

pub mod codec;
pub mod error;
pub mod framing;
pub mod protocol;
pub mod time;

pub use codec::{decode_message, encode_message};
pub use error::{Error, Result};
pub use framing::{FrameBuffer, RECORD_SEPARATOR};
pub use protocol::{
    CloseMessage, HandshakeRequest, HandshakeResponse, HubMessage, InvocationMessage, Protocol,
};
pub use time::Timestamp;

/// Hub protocol version advertised during negotiation
pub const PROTOCOL_VERSION: u32 = 1;

/// Invocation the driver issues to start the echo stream
pub const ECHO_TARGET: &str = "Echo";

/// Invocation that stops the echo stream
pub const STOP_TARGET: &str = "Stop";

/// Target name of the pushes sent back by the echo endpoint
pub const ECHO_PUSH_TARGET: &str = "echo";

/// Default echo endpoint port
pub const DEFAULT_ECHO_PORT: u16 = 5000;
