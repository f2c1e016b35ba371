//! Hub connection implementation

use dashmap::DashMap;
use hubload_core::{codec, FrameBuffer, HandshakeRequest, HubMessage, Protocol, Timestamp};
use hubload_transport::{
    Transport, TransportEvent, TransportReceiver, TransportSender, WebSocketConfig,
    WebSocketReceiver, WebSocketSender, WebSocketTransport,
};
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::builder::HubConnectionBuilder;
use crate::error::{ClientError, Result};

/// Buffered invocations per registered target
const HANDLER_CAPACITY: usize = 4096;

/// Connection lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HubState {
    Disconnected,
    Connecting,
    Connected,
    /// Stopped locally or closed by the peer; terminal
    Stopped,
}

/// One inbound invocation, stamped when its block came off the socket
#[derive(Debug, Clone, PartialEq)]
pub struct Invocation {
    pub arguments: Vec<Value>,
    pub received_at: Timestamp,
}

/// Every inbound invocation for one target
pub struct InvocationStream {
    rx: mpsc::Receiver<Invocation>,
}

impl InvocationStream {
    /// Next invocation's arguments, `None` once the connection is gone
    pub async fn next(&mut self) -> Option<Vec<Value>> {
        self.rx.recv().await.map(|invocation| invocation.arguments)
    }

    /// Next invocation with its receive time
    pub async fn next_invocation(&mut self) -> Option<Invocation> {
        self.rx.recv().await
    }
}

/// A message-oriented connection to a hub
pub struct HubConnection {
    url: String,
    protocol: Protocol,
    headers: Vec<(String, String)>,
    handshake_timeout: Duration,
    log_frames: bool,

    state: Arc<RwLock<HubState>>,

    /// Sender for outgoing units (set after negotiation)
    sender: RwLock<Option<Arc<WebSocketSender>>>,

    /// Inbound invocation handlers keyed by lower-cased target
    handlers: Arc<DashMap<String, mpsc::Sender<Invocation>>>,

    /// Why the connection ended without a local stop
    close_reason: Arc<Mutex<Option<String>>>,
}

impl HubConnection {
    pub(crate) fn new(
        url: String,
        protocol: Protocol,
        headers: Vec<(String, String)>,
        handshake_timeout: Duration,
        log_frames: bool,
    ) -> Self {
        Self {
            url,
            protocol,
            headers,
            handshake_timeout,
            log_frames,
            state: Arc::new(RwLock::new(HubState::Disconnected)),
            sender: RwLock::new(None),
            handlers: Arc::new(DashMap::new()),
            close_reason: Arc::new(Mutex::new(None)),
        }
    }

    /// Create a builder
    pub fn builder(url: &str) -> HubConnectionBuilder {
        HubConnectionBuilder::new(url)
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn protocol(&self) -> Protocol {
        self.protocol
    }

    pub fn state(&self) -> HubState {
        *self.state.read()
    }

    /// Reason the peer or the network ended the connection, if it did
    pub fn close_reason(&self) -> Option<String> {
        self.close_reason.lock().clone()
    }

    /// Register for invocations of `target` (case-insensitive).
    ///
    /// The stream ends when the connection stops or the handler is replaced.
    pub fn on(&self, target: &str) -> InvocationStream {
        let (tx, rx) = mpsc::channel(HANDLER_CAPACITY);
        let key = target.to_ascii_lowercase();
        self.handlers.insert(key.clone(), tx);

        // The dispatcher marks the state before clearing handlers
        if self.state() == HubState::Stopped {
            self.handlers.remove(&key);
        }

        InvocationStream { rx }
    }

    /// Connect and negotiate the protocol
    pub async fn start(&self) -> Result<()> {
        {
            let mut state = self.state.write();
            if *state != HubState::Disconnected {
                return Err(ClientError::AlreadyStarted);
            }
            *state = HubState::Connecting;
        }

        match self.connect_and_negotiate().await {
            Ok(()) => Ok(()),
            Err(e) => {
                let mut state = self.state.write();
                if *state == HubState::Connecting {
                    *state = HubState::Disconnected;
                }
                Err(e)
            }
        }
    }

    async fn connect_and_negotiate(&self) -> Result<()> {
        let transport = WebSocketTransport::with_config(WebSocketConfig {
            headers: self.headers.clone(),
            connect_timeout: self.handshake_timeout,
            ..Default::default()
        });

        let (sender, mut receiver) = transport.connect(&self.url).await?;

        let request = codec::encode_handshake_request(&HandshakeRequest::new(self.protocol))?;
        sender.send(request).await?;

        let mut frames = FrameBuffer::text();
        let negotiated = tokio::time::timeout(
            self.handshake_timeout,
            read_handshake(&mut receiver, &mut frames),
        )
        .await
        .unwrap_or(Err(ClientError::Timeout));

        if let Err(e) = negotiated {
            let _ = sender.close().await;
            return Err(e);
        }
        frames.set_protocol(self.protocol);

        let sender = Arc::new(sender);
        let still_connecting = {
            let mut state = self.state.write();
            if *state == HubState::Connecting {
                *state = HubState::Connected;
                true
            } else {
                false
            }
        };
        if !still_connecting {
            let _ = sender.close().await;
            return Err(ClientError::NotConnected);
        }

        *self.sender.write() = Some(sender.clone());
        info!("Hub connected to {} ({})", self.url, self.protocol);

        let dispatcher = Dispatcher {
            protocol: self.protocol,
            log_frames: self.log_frames,
            sender,
            state: Arc::clone(&self.state),
            handlers: Arc::clone(&self.handlers),
            close_reason: Arc::clone(&self.close_reason),
        };
        tokio::spawn(dispatcher.run(receiver, frames));

        Ok(())
    }

    /// Fire-and-forget invocation
    pub async fn send(&self, target: &str, arguments: Vec<Value>) -> Result<()> {
        if self.state() != HubState::Connected {
            return Err(ClientError::NotConnected);
        }
        let sender = self
            .sender
            .read()
            .clone()
            .ok_or(ClientError::NotConnected)?;

        let data = codec::encode_message(self.protocol, &HubMessage::invocation(target, arguments))?;
        if self.log_frames {
            debug!("Hub send {} ({} bytes)", target, data.len());
        }

        sender
            .send(data)
            .await
            .map_err(|e| ClientError::SendFailed(e.to_string()))
    }

    /// Send a normal closure to the hub. Repeated calls are no-ops.
    pub async fn stop(&self) -> Result<()> {
        let previous = std::mem::replace(&mut *self.state.write(), HubState::Stopped);
        if previous != HubState::Connected {
            return Ok(());
        }

        let sender = self.sender.read().clone();
        if let Some(sender) = sender {
            sender.close().await?;
        }
        Ok(())
    }

    /// Stop and release the transport handle and all handlers
    pub async fn dispose(&self) {
        let _ = self.stop().await;
        self.handlers.clear();
        self.sender.write().take();
    }
}

async fn read_handshake(
    receiver: &mut WebSocketReceiver,
    frames: &mut FrameBuffer,
) -> Result<()> {
    loop {
        match receiver.recv().await {
            Some(TransportEvent::Data(data)) => {
                frames.extend(&data);
                if let Some(unit) = frames.next_unit()? {
                    let response = codec::decode_handshake_response(&unit)?;
                    return match response.error {
                        Some(error) => Err(ClientError::HandshakeRejected(error)),
                        None => Ok(()),
                    };
                }
            }
            Some(TransportEvent::Connected) => {}
            Some(TransportEvent::Error(e)) => {
                return Err(ClientError::ConnectionFailed(e));
            }
            Some(TransportEvent::Disconnected { reason }) => {
                return Err(ClientError::ConnectionFailed(
                    reason.unwrap_or_else(|| "closed during handshake".to_string()),
                ));
            }
            None => {
                return Err(ClientError::ConnectionFailed(
                    "closed during handshake".to_string(),
                ));
            }
        }
    }
}

/// Receive side of a started connection
struct Dispatcher {
    protocol: Protocol,
    log_frames: bool,
    sender: Arc<WebSocketSender>,
    state: Arc<RwLock<HubState>>,
    handlers: Arc<DashMap<String, mpsc::Sender<Invocation>>>,
    close_reason: Arc<Mutex<Option<String>>>,
}

impl Dispatcher {
    async fn run(self, mut receiver: WebSocketReceiver, mut frames: FrameBuffer) {
        // Units that arrived together with the handshake response
        let mut reason = self.drain(&mut frames, Timestamp::now()).await.err();

        while reason.is_none() {
            match receiver.recv().await {
                Some(TransportEvent::Data(data)) => {
                    let received_at = Timestamp::now();
                    frames.extend(&data);
                    reason = self.drain(&mut frames, received_at).await.err();
                }
                Some(TransportEvent::Connected) => {}
                Some(TransportEvent::Error(e)) => {
                    debug!("Hub transport error: {}", e);
                }
                Some(TransportEvent::Disconnected { reason: r }) => {
                    reason = Some(r.unwrap_or_else(|| "connection closed".to_string()));
                }
                None => {
                    reason = Some("connection closed".to_string());
                }
            }
        }

        let stopped_locally = {
            let mut state = self.state.write();
            let local = *state == HubState::Stopped;
            *state = HubState::Stopped;
            local
        };

        if !stopped_locally {
            warn!("Hub connection lost: {}", reason.as_deref().unwrap_or("unknown"));
            *self.close_reason.lock() = reason;
        }

        let _ = self.sender.close().await;
        self.handlers.clear();
    }

    /// Dispatch every complete unit; `Err` carries the reason to stop
    async fn drain(
        &self,
        frames: &mut FrameBuffer,
        received_at: Timestamp,
    ) -> std::result::Result<(), String> {
        loop {
            let unit = match frames.next_unit() {
                Ok(Some(unit)) => unit,
                Ok(None) => return Ok(()),
                Err(e) => return Err(format!("malformed unit: {}", e)),
            };

            let message = codec::decode_message(self.protocol, &unit)
                .map_err(|e| format!("malformed unit: {}", e))?;

            match message {
                HubMessage::Invocation(invocation) => {
                    let key = invocation.target.to_ascii_lowercase();
                    let handler = self.handlers.get(&key).map(|h| h.value().clone());
                    match handler {
                        Some(tx) => {
                            let invocation = Invocation {
                                arguments: invocation.arguments,
                                received_at,
                            };
                            if tx.send(invocation).await.is_err() {
                                self.handlers.remove(&key);
                            }
                        }
                        None if self.log_frames => {
                            debug!("No handler for invocation {}", invocation.target);
                        }
                        None => {}
                    }
                }
                HubMessage::Ping => {
                    if self.log_frames {
                        debug!("Hub ping");
                    }
                    let pong = codec::encode_message(self.protocol, &HubMessage::Ping)
                        .map_err(|e| e.to_string())?;
                    if let Err(e) = self.sender.send(pong).await {
                        debug!("Ping answer failed: {}", e);
                    }
                }
                HubMessage::Close(close) => {
                    return Err(match close.error {
                        Some(error) => format!("server closed the connection: {}", error),
                        None => "server closed the connection".to_string(),
                    });
                }
            }
        }
    }
}
