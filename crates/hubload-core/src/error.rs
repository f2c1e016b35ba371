//! Error types for hubload

use thiserror::Error;

/// Result type alias for hubload protocol operations
pub type Result<T> = std::result::Result<T, Error>;

/// Protocol error types
#[derive(Error, Debug)]
pub enum Error {
    /// Protocol name not recognised
    #[error("unknown protocol: {0}")]
    UnknownProtocol(String),

    /// Encoding error (JSON or MessagePack)
    #[error("encode error: {0}")]
    EncodeError(String),

    /// Decoding error (JSON or MessagePack)
    #[error("decode error: {0}")]
    DecodeError(String),

    /// Message type code not part of the hub protocol
    #[error("unknown message type: {0}")]
    UnknownMessageType(u64),

    /// Unit framing could not be parsed
    #[error("framing error: {0}")]
    Framing(String),

    /// Single unit larger than allowed
    #[error("unit too large: {0} bytes (max {1})")]
    UnitTooLarge(usize, usize),

    /// Peer refused the handshake
    #[error("handshake rejected: {0}")]
    HandshakeRejected(String),

    /// Generic protocol error
    #[error("protocol error: {0}")]
    Protocol(String),
}

impl From<rmp_serde::encode::Error> for Error {
    fn from(e: rmp_serde::encode::Error) -> Self {
        Error::EncodeError(e.to_string())
    }
}

impl From<rmp_serde::decode::Error> for Error {
    fn from(e: rmp_serde::decode::Error) -> Self {
        Error::DecodeError(e.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::DecodeError(e.to_string())
    }
}
