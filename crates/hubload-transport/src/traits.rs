//! Transport seams
//!
//! A connection is split into a cloneable-by-reference sender half and an
//! exclusively owned receiver half, so a receive loop can run on its own task
//! while the owner keeps sending and closing.

use async_trait::async_trait;
use bytes::Bytes;
use std::net::SocketAddr;

use crate::error::Result;

/// What a receiver half observes
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// First event of every connection
    Connected,
    /// Last event of every connection; `reason` carries the close code and
    /// text, or the read error
    Disconnected { reason: Option<String> },
    /// One opaque block as sent by the peer
    Data(Bytes),
    /// Read failure, always followed by `Disconnected`
    Error(String),
}

#[async_trait]
pub trait TransportSender: Send + Sync {
    /// Send one opaque block
    async fn send(&self, data: Bytes) -> Result<()>;

    /// False once either side has closed
    fn is_connected(&self) -> bool;

    /// Send a normal-closure signal; calling it again is a no-op
    async fn close(&self) -> Result<()>;
}

#[async_trait]
pub trait TransportReceiver: Send {
    /// Next event, `None` once the connection is gone
    async fn recv(&mut self) -> Option<TransportEvent>;
}

/// Dialing side
#[async_trait]
pub trait Transport: Send + Sync {
    type Sender: TransportSender;
    type Receiver: TransportReceiver;

    async fn connect(&self, url: &str) -> Result<(Self::Sender, Self::Receiver)>;
}

/// Listening side
#[async_trait]
pub trait TransportServer: Send + Sync {
    type Sender: TransportSender;
    type Receiver: TransportReceiver;

    async fn accept(&mut self) -> Result<(Self::Sender, Self::Receiver, SocketAddr)>;

    fn local_addr(&self) -> Result<SocketAddr>;
}
