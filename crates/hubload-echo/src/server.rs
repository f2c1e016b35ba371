//! Echo server implementation
//!
//! Accepts WebSocket connections, negotiates the hub protocol on each of
//! them and answers the two invocations the load driver uses:
//!
//! - `Echo(duration?)` starts a push loop broadcasting `echo(now_micros)`
//!   to every session, each in its own negotiated protocol
//! - `Stop()` ends the push loop
//!
//! The push loop also ends once its duration elapses or the last session
//! goes away. Only one push loop runs at a time.

use bytes::Bytes;
use dashmap::DashMap;
use hubload_core::{
    codec, FrameBuffer, HandshakeResponse, HubMessage, InvocationMessage, Protocol, Timestamp,
    ECHO_PUSH_TARGET, ECHO_TARGET, STOP_TARGET,
};
use hubload_transport::{
    TransportEvent, TransportReceiver, TransportSender, TransportServer, WebSocketReceiver,
    WebSocketSender, WebSocketServer,
};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::error::{EchoError, Result};
use crate::session::{Session, SessionId, SessionInfo};

/// Echo server configuration
#[derive(Debug, Clone)]
pub struct EchoConfig {
    /// Pause between two broadcast rounds; `None` pushes back to back
    pub push_interval: Option<Duration>,
    /// Handshakes beyond this many live sessions are rejected
    pub max_connections: Option<usize>,
    /// Time a new connection has to send its negotiation block
    pub handshake_timeout: Duration,
}

impl Default for EchoConfig {
    fn default() -> Self {
        Self {
            push_interval: None,
            max_connections: None,
            handshake_timeout: Duration::from_secs(10),
        }
    }
}

struct Shared {
    config: EchoConfig,
    sessions: DashMap<SessionId, Arc<Session>>,
    /// Negotiated sessions, including ones still being registered
    live: AtomicUsize,
    invocations: AtomicU64,
    rounds: AtomicU64,
    push_task: Mutex<Option<JoinHandle<()>>>,
    shutdown: watch::Sender<bool>,
}

/// Echo hub endpoint. Cloning yields another handle to the same server.
#[derive(Clone)]
pub struct EchoServer {
    shared: Arc<Shared>,
}

enum Negotiation {
    Accepted(Protocol),
    Rejected(String),
    Gone,
}

impl EchoServer {
    pub fn new(config: EchoConfig) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            shared: Arc::new(Shared {
                config,
                sessions: DashMap::new(),
                live: AtomicUsize::new(0),
                invocations: AtomicU64::new(0),
                rounds: AtomicU64::new(0),
                push_task: Mutex::new(None),
                shutdown,
            }),
        }
    }

    pub fn config(&self) -> &EchoConfig {
        &self.shared.config
    }

    /// Bind `addr` and serve until [`EchoServer::shutdown`]
    pub async fn serve(&self, addr: &str) -> Result<()> {
        let server = WebSocketServer::bind(addr).await?;
        self.serve_on(server).await
    }

    /// Serve on an already bound listener until [`EchoServer::shutdown`]
    pub async fn serve_on(&self, mut server: WebSocketServer) -> Result<()> {
        let mut shutdown = self.shared.shutdown.subscribe();
        if *shutdown.borrow() {
            return Ok(());
        }

        info!("Echo server accepting connections on {}", server.local_addr()?);

        loop {
            tokio::select! {
                accepted = server.accept_with_headers() => match accepted {
                    Ok((sender, receiver, addr, headers)) => {
                        debug!("New connection from {}", addr);
                        self.handle_connection(sender, receiver, addr, headers);
                    }
                    Err(e) => {
                        error!("Accept error: {}", e);
                    }
                },
                _ = shutdown.changed() => break,
            }
        }

        info!("Echo server stopped");
        Ok(())
    }

    fn handle_connection(
        &self,
        sender: WebSocketSender,
        mut receiver: WebSocketReceiver,
        addr: SocketAddr,
        headers: HashMap<String, String>,
    ) {
        let shared = Arc::clone(&self.shared);

        tokio::spawn(async move {
            let sender: Arc<dyn TransportSender> = Arc::new(sender);
            let mut frames = FrameBuffer::text();
            let mut shutdown = shared.shutdown.subscribe();

            let outcome = tokio::time::timeout(
                shared.config.handshake_timeout,
                shared.negotiate(&sender, &mut receiver, &mut frames),
            )
            .await
            .unwrap_or_else(|_| Negotiation::Rejected("handshake timed out".to_string()));

            let protocol = match outcome {
                Negotiation::Accepted(protocol) => protocol,
                Negotiation::Rejected(reason) => {
                    warn!("Rejecting handshake from {}: {}", addr, reason);
                    if let Ok(data) =
                        codec::encode_handshake_response(&HandshakeResponse::rejected(reason))
                    {
                        let _ = sender.send(data).await;
                    }
                    let _ = sender.close().await;
                    return;
                }
                Negotiation::Gone => {
                    debug!("Connection from {} closed during handshake", addr);
                    let _ = sender.close().await;
                    return;
                }
            };

            frames.set_protocol(protocol);
            let session = Arc::new(Session::new(sender, protocol, addr, headers));
            let id = session.id.clone();
            shared.sessions.insert(id.clone(), Arc::clone(&session));
            info!("Session {} connected from {} ({})", id, addr, protocol);

            // Units that arrived together with the negotiation block
            let mut open = shared.drain(&session, &mut frames) && !*shutdown.borrow();

            while open {
                tokio::select! {
                    event = receiver.recv() => match event {
                        Some(TransportEvent::Data(data)) => {
                            frames.extend(&data);
                            open = shared.drain(&session, &mut frames);
                        }
                        Some(TransportEvent::Disconnected { reason }) => {
                            debug!("Session {} disconnected: {:?}", id, reason);
                            open = false;
                        }
                        Some(TransportEvent::Error(e)) => {
                            debug!("Session {} transport error: {}", id, e);
                        }
                        Some(TransportEvent::Connected) => {}
                        None => open = false,
                    },
                    _ = shutdown.changed() => open = false,
                }
            }

            shared.sessions.remove(&id);
            shared.live.fetch_sub(1, Ordering::SeqCst);
            session.close().await;
            info!("Session {} closed after {} units", id, session.sent());
        });
    }

    /// Live negotiated sessions
    pub fn connection_count(&self) -> usize {
        self.shared.live.load(Ordering::SeqCst)
    }

    /// Invocations received from all sessions
    pub fn invocation_count(&self) -> u64 {
        self.shared.invocations.load(Ordering::SeqCst)
    }

    /// Completed broadcast rounds
    pub fn push_count(&self) -> u64 {
        self.shared.rounds.load(Ordering::SeqCst)
    }

    pub fn is_pushing(&self) -> bool {
        self.shared
            .push_task
            .lock()
            .as_ref()
            .map_or(false, |task| !task.is_finished())
    }

    pub fn sessions(&self) -> Vec<SessionInfo> {
        self.shared
            .sessions
            .iter()
            .map(|entry| entry.value().info())
            .collect()
    }

    /// Close one session from the server side, as if its socket was lost
    pub async fn drop_session(&self, id: &str) -> Result<()> {
        let (_, session) = self
            .shared
            .sessions
            .remove(id)
            .ok_or_else(|| EchoError::SessionNotFound(id.to_string()))?;
        warn!("Dropping session {}", id);
        session.close().await;
        Ok(())
    }

    /// Drop an arbitrary session, returning its id
    pub async fn drop_any(&self) -> Option<SessionId> {
        let id = self
            .shared
            .sessions
            .iter()
            .next()
            .map(|entry| entry.key().clone())?;
        self.drop_session(&id).await.ok()?;
        Some(id)
    }

    /// End the push loop, close every session and stop accepting
    pub fn shutdown(&self) {
        self.shared.stop_pushing();
        self.shared.shutdown.send_replace(true);
    }
}

impl Default for EchoServer {
    fn default() -> Self {
        Self::new(EchoConfig::default())
    }
}

impl Shared {
    async fn negotiate(
        &self,
        sender: &Arc<dyn TransportSender>,
        receiver: &mut WebSocketReceiver,
        frames: &mut FrameBuffer,
    ) -> Negotiation {
        let unit = loop {
            match receiver.recv().await {
                Some(TransportEvent::Data(data)) => {
                    frames.extend(&data);
                    match frames.next_unit() {
                        Ok(Some(unit)) => break unit,
                        Ok(None) => continue,
                        Err(e) => return Negotiation::Rejected(e.to_string()),
                    }
                }
                Some(TransportEvent::Connected) | Some(TransportEvent::Error(_)) => continue,
                Some(TransportEvent::Disconnected { .. }) | None => return Negotiation::Gone,
            }
        };

        let request = match codec::decode_handshake_request(&unit) {
            Ok(request) => request,
            Err(e) => return Negotiation::Rejected(format!("invalid negotiation block: {}", e)),
        };

        let protocol: Protocol = match request.protocol.parse() {
            Ok(protocol) => protocol,
            Err(_) => {
                return Negotiation::Rejected(format!(
                    "The protocol '{}' is not supported.",
                    request.protocol
                ))
            }
        };

        let cap = self.config.max_connections;
        let reserved = self
            .live
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |live| match cap {
                Some(max) if live >= max => None,
                _ => Some(live + 1),
            })
            .is_ok();
        if !reserved {
            return Negotiation::Rejected("connection limit reached".to_string());
        }

        let accepted = match codec::encode_handshake_response(&HandshakeResponse::accepted()) {
            Ok(data) => sender.send(data).await.is_ok(),
            Err(_) => false,
        };
        if !accepted {
            self.live.fetch_sub(1, Ordering::SeqCst);
            return Negotiation::Gone;
        }

        Negotiation::Accepted(protocol)
    }

    /// Handle every complete unit; `false` ends the session
    fn drain(self: &Arc<Self>, session: &Session, frames: &mut FrameBuffer) -> bool {
        loop {
            let unit = match frames.next_unit() {
                Ok(Some(unit)) => unit,
                Ok(None) => return true,
                Err(e) => {
                    warn!("Framing error from session {}: {}", session.id, e);
                    return false;
                }
            };

            match codec::decode_message(session.protocol, &unit) {
                Ok(HubMessage::Invocation(invocation)) => {
                    self.invocations.fetch_add(1, Ordering::SeqCst);
                    self.invoke(session, &invocation);
                }
                // Keep-alive only
                Ok(HubMessage::Ping) => {}
                Ok(HubMessage::Close(close)) => {
                    debug!("Session {} sent close: {:?}", session.id, close.error);
                    return false;
                }
                Err(e) => {
                    warn!("Malformed unit from session {}: {}", session.id, e);
                    return false;
                }
            }
        }
    }

    fn invoke(self: &Arc<Self>, session: &Session, invocation: &InvocationMessage) {
        if invocation.target.eq_ignore_ascii_case(ECHO_TARGET) {
            let duration = invocation
                .arguments
                .first()
                .and_then(Value::as_f64)
                .filter(|secs| *secs > 0.0)
                .and_then(|secs| Duration::try_from_secs_f64(secs).ok());
            info!("Echo requested by session {} for {:?}", session.id, duration);
            self.start_pushing(duration);
        } else if invocation.target.eq_ignore_ascii_case(STOP_TARGET) {
            info!("Stop requested by session {}", session.id);
            self.stop_pushing();
        } else {
            debug!("Ignoring invocation {} from {}", invocation.target, session.id);
        }
    }

    fn start_pushing(self: &Arc<Self>, duration: Option<Duration>) {
        let mut task = self.push_task.lock();
        if task.as_ref().map_or(false, |t| !t.is_finished()) {
            debug!("Echo already running");
            return;
        }
        let shared = Arc::clone(self);
        *task = Some(tokio::spawn(shared.push_loop(duration)));
    }

    fn stop_pushing(&self) {
        if let Some(task) = self.push_task.lock().take() {
            task.abort();
        }
    }

    async fn push_loop(self: Arc<Self>, duration: Option<Duration>) {
        let deadline = duration.map(|d| Instant::now() + d);
        let started = self.rounds.load(Ordering::SeqCst);

        loop {
            if deadline.map_or(false, |d| Instant::now() >= d) {
                break;
            }
            if self.sessions.is_empty() {
                break;
            }

            self.broadcast_echo().await;

            match self.config.push_interval {
                Some(interval) => tokio::time::sleep(interval).await,
                None => tokio::task::yield_now().await,
            }
        }

        info!(
            "Echo exited after {} rounds",
            self.rounds.load(Ordering::SeqCst) - started
        );
    }

    /// Push `echo(now)` to every session, encoding once per protocol
    async fn broadcast_echo(&self) {
        let sessions: Vec<Arc<Session>> = self
            .sessions
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();

        let message = HubMessage::invocation(ECHO_PUSH_TARGET, vec![Timestamp::now().to_value()]);
        let mut json: Option<Bytes> = None;
        let mut msgpack: Option<Bytes> = None;

        for session in sessions {
            let slot = match session.protocol {
                Protocol::Json => &mut json,
                Protocol::MessagePack => &mut msgpack,
            };
            let data = match slot.as_ref() {
                Some(data) => data.clone(),
                None => match codec::encode_message(session.protocol, &message) {
                    Ok(data) => slot.insert(data).clone(),
                    Err(e) => {
                        error!("Failed to encode echo for {}: {}", session.protocol, e);
                        continue;
                    }
                },
            };

            if let Err(e) = session.send(data).await {
                debug!("Push to session {} failed: {}", session.id, e);
            }
        }

        self.rounds.fetch_add(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = EchoConfig::default();
        assert!(config.push_interval.is_none());
        assert!(config.max_connections.is_none());
        assert_eq!(config.handshake_timeout, Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_new_server_is_idle() {
        let server = EchoServer::default();
        assert_eq!(server.connection_count(), 0);
        assert_eq!(server.invocation_count(), 0);
        assert_eq!(server.push_count(), 0);
        assert!(!server.is_pushing());
        assert!(server.sessions().is_empty());
    }

    #[tokio::test]
    async fn test_drop_unknown_session() {
        let server = EchoServer::default();
        assert!(matches!(
            server.drop_session("missing").await,
            Err(EchoError::SessionNotFound(_))
        ));
        assert!(server.drop_any().await.is_none());
    }

    #[tokio::test]
    async fn test_serve_after_shutdown_returns() {
        let server = EchoServer::default();
        server.shutdown();
        let listener = WebSocketServer::bind("127.0.0.1:0").await.unwrap();
        server.serve_on(listener).await.unwrap();
    }
}
