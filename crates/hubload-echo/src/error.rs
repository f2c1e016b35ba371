//! Echo server error types

use thiserror::Error;

pub type Result<T> = std::result::Result<T, EchoError>;

#[derive(Error, Debug)]
pub enum EchoError {
    #[error("handshake failed: {0}")]
    Handshake(String),

    #[error("session not found: {0}")]
    SessionNotFound(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("transport error: {0}")]
    Transport(#[from] hubload_transport::TransportError),

    #[error("core protocol error: {0}")]
    Core(#[from] hubload_core::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
