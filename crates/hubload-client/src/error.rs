//! Client error types

use thiserror::Error;

pub type Result<T> = std::result::Result<T, ClientError>;

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    #[error("handshake rejected: {0}")]
    HandshakeRejected(String),

    #[error("not connected")]
    NotConnected,

    #[error("already started")]
    AlreadyStarted,

    #[error("send failed: {0}")]
    SendFailed(String),

    #[error("handshake timed out")]
    Timeout,

    #[error("protocol error: {0}")]
    Protocol(#[from] hubload_core::Error),

    #[error("transport error: {0}")]
    Transport(#[from] hubload_transport::TransportError),
}
