//! Session management

use bytes::Bytes;
use hubload_core::{codec, HubMessage, Protocol};
use hubload_transport::{TransportError, TransportSender};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use uuid::Uuid;

/// Session identifier
pub type SessionId = String;

/// A negotiated peer connection
pub struct Session {
    /// Unique session ID
    pub id: SessionId,
    /// Protocol chosen during negotiation
    pub protocol: Protocol,
    /// Remote address
    pub addr: SocketAddr,
    /// Upgrade request headers
    pub headers: HashMap<String, String>,
    sender: Arc<dyn TransportSender>,
    /// Units pushed to this peer
    sent: AtomicU64,
    pub created_at: Instant,
}

/// Read-only view of a session
#[derive(Debug, Clone)]
pub struct SessionInfo {
    pub id: SessionId,
    pub protocol: Protocol,
    pub addr: SocketAddr,
    pub headers: HashMap<String, String>,
    pub sent: u64,
}

impl Session {
    pub fn new(
        sender: Arc<dyn TransportSender>,
        protocol: Protocol,
        addr: SocketAddr,
        headers: HashMap<String, String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            protocol,
            addr,
            headers,
            sender,
            sent: AtomicU64::new(0),
            created_at: Instant::now(),
        }
    }

    /// Send one already framed unit
    pub async fn send(&self, data: Bytes) -> Result<(), TransportError> {
        self.sender.send(data).await?;
        self.sent.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Encode and send a hub message in this session's protocol
    pub async fn send_message(&self, message: &HubMessage) -> crate::Result<()> {
        let data = codec::encode_message(self.protocol, message)?;
        self.send(data).await?;
        Ok(())
    }

    /// Close the underlying socket with a normal closure
    pub async fn close(&self) {
        let _ = self.sender.close().await;
    }

    pub fn is_connected(&self) -> bool {
        self.sender.is_connected()
    }

    pub fn sent(&self) -> u64 {
        self.sent.load(Ordering::Relaxed)
    }

    pub fn info(&self) -> SessionInfo {
        SessionInfo {
            id: self.id.clone(),
            protocol: self.protocol,
            addr: self.addr,
            headers: self.headers.clone(),
            sent: self.sent(),
        }
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("protocol", &self.protocol)
            .field("addr", &self.addr)
            .finish()
    }
}
