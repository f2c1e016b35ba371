//! Transport error types

use thiserror::Error;

pub type Result<T> = std::result::Result<T, TransportError>;

#[derive(Error, Debug)]
pub enum TransportError {
    /// TCP connect or WebSocket upgrade failed
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    #[error("send failed: {0}")]
    SendFailed(String),

    #[error("invalid url: {0}")]
    InvalidUrl(String),

    /// A configured upgrade header is not a valid HTTP header
    #[error("invalid header: {0}")]
    InvalidHeader(String),

    #[error("bind failed: {0}")]
    BindFailed(String),

    #[error("accept failed: {0}")]
    AcceptFailed(String),

    /// Connect plus upgrade exceeded the configured bound
    #[error("connect timed out")]
    Timeout,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Send attempted after close, or after the peer went away
    #[error("not connected")]
    NotConnected,
}
