//! WebSocket transport implementation

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio_tungstenite::{
    connect_async,
    tungstenite::{
        client::IntoClientRequest,
        handshake::server::{Request as HsRequest, Response as HsResponse},
        http::{HeaderName, HeaderValue},
        protocol::{frame::coding::CloseCode, CloseFrame, Message as WsMessage},
    },
    WebSocketStream,
};
use tracing::{debug, error, info, warn};

use crate::error::{Result, TransportError};
use crate::traits::{
    Transport, TransportEvent, TransportReceiver, TransportSender, TransportServer,
};

/// Default per-connection channel capacity
const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

/// WebSocket configuration
#[derive(Debug, Clone)]
pub struct WebSocketConfig {
    /// Extra request headers sent with the upgrade request
    pub headers: Vec<(String, String)>,
    /// Bound of the inbound/outbound channels
    pub channel_capacity: usize,
    /// Upper bound for TCP connect plus upgrade; servers apply it to the
    /// upgrade of each accepted socket
    pub connect_timeout: Duration,
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self {
            headers: Vec::new(),
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            connect_timeout: Duration::from_secs(10),
        }
    }
}

/// WebSocket transport
pub struct WebSocketTransport {
    config: WebSocketConfig,
}

impl WebSocketTransport {
    pub fn new() -> Self {
        Self {
            config: WebSocketConfig::default(),
        }
    }

    pub fn with_config(config: WebSocketConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &WebSocketConfig {
        &self.config
    }
}

impl Default for WebSocketTransport {
    fn default() -> Self {
        Self::new()
    }
}

/// WebSocket sender
pub struct WebSocketSender {
    tx: mpsc::Sender<WsMessage>,
    connected: Arc<Mutex<bool>>,
}

#[async_trait]
impl TransportSender for WebSocketSender {
    async fn send(&self, data: Bytes) -> Result<()> {
        if !self.is_connected() {
            return Err(TransportError::NotConnected);
        }

        self.tx
            .send(WsMessage::Binary(data.to_vec()))
            .await
            .map_err(|e| TransportError::SendFailed(e.to_string()))
    }

    fn is_connected(&self) -> bool {
        *self.connected.lock()
    }

    async fn close(&self) -> Result<()> {
        let was_connected = std::mem::replace(&mut *self.connected.lock(), false);
        if was_connected {
            let frame = CloseFrame {
                code: CloseCode::Normal,
                reason: "".into(),
            };
            let _ = self.tx.send(WsMessage::Close(Some(frame))).await;
        }
        Ok(())
    }
}

/// WebSocket receiver
pub struct WebSocketReceiver {
    rx: mpsc::Receiver<TransportEvent>,
}

#[async_trait]
impl TransportReceiver for WebSocketReceiver {
    async fn recv(&mut self) -> Option<TransportEvent> {
        self.rx.recv().await
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    type Sender = WebSocketSender;
    type Receiver = WebSocketReceiver;

    async fn connect(&self, url: &str) -> Result<(Self::Sender, Self::Receiver)> {
        debug!("Connecting to WebSocket: {}", url);

        let mut request = url
            .into_client_request()
            .map_err(|e| TransportError::InvalidUrl(format!("{}: {}", url, e)))?;

        for (name, value) in &self.config.headers {
            let header = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| TransportError::InvalidHeader(format!("{}: {}", name, e)))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| TransportError::InvalidHeader(format!("{}: {}", name, e)))?;
            request.headers_mut().insert(header, value);
        }

        let (ws_stream, response) =
            tokio::time::timeout(self.config.connect_timeout, connect_async(request))
                .await
                .map_err(|_| TransportError::Timeout)?
                .map_err(|e| TransportError::ConnectionFailed(e.to_string()))?;

        debug!("WebSocket connected, response: {:?}", response.status());

        Ok(spawn_io(ws_stream, self.config.channel_capacity))
    }
}

/// Split a WebSocket stream into a writer task and a reader task
fn spawn_io<S>(
    ws_stream: WebSocketStream<S>,
    capacity: usize,
) -> (WebSocketSender, WebSocketReceiver)
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (write, read) = ws_stream.split();

    let (send_tx, mut send_rx) = mpsc::channel::<WsMessage>(capacity);
    let (event_tx, event_rx) = mpsc::channel::<TransportEvent>(capacity);

    let connected = Arc::new(Mutex::new(true));
    let connected_write = connected.clone();
    let connected_read = connected.clone();

    tokio::spawn(async move {
        let mut write = write;
        while let Some(msg) = send_rx.recv().await {
            let closing = matches!(msg, WsMessage::Close(_));
            if let Err(e) = write.send(msg).await {
                error!("WebSocket write error: {}", e);
                break;
            }
            if closing {
                break;
            }
        }
        *connected_write.lock() = false;
    });

    tokio::spawn(async move {
        let mut read = read;
        let _ = event_tx.send(TransportEvent::Connected).await;

        let mut reason = None;
        while let Some(result) = read.next().await {
            let data = match result {
                Ok(WsMessage::Binary(data)) => Bytes::from(data),
                Ok(WsMessage::Text(text)) => Bytes::from(text),
                // tungstenite answers pings itself
                Ok(WsMessage::Ping(_)) | Ok(WsMessage::Pong(_)) | Ok(WsMessage::Frame(_)) => {
                    continue
                }
                Ok(WsMessage::Close(frame)) => {
                    reason = frame.map(|f| format!("{} {}", u16::from(f.code), f.reason));
                    debug!("WebSocket closed by peer: {:?}", reason);
                    break;
                }
                Err(e) => {
                    warn!("WebSocket read error: {}", e);
                    let _ = event_tx.send(TransportEvent::Error(e.to_string())).await;
                    reason = Some(e.to_string());
                    break;
                }
            };

            if event_tx.send(TransportEvent::Data(data)).await.is_err() {
                break;
            }
        }

        *connected_read.lock() = false;
        let _ = event_tx
            .send(TransportEvent::Disconnected { reason })
            .await;
    });

    let sender = WebSocketSender {
        tx: send_tx,
        connected,
    };

    let receiver = WebSocketReceiver { rx: event_rx };

    (sender, receiver)
}

/// WebSocket server
pub struct WebSocketServer {
    listener: tokio::net::TcpListener,
    config: WebSocketConfig,
}

impl WebSocketServer {
    pub async fn bind(addr: &str) -> Result<Self> {
        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .map_err(|e| TransportError::BindFailed(e.to_string()))?;

        info!("WebSocket server listening on {}", addr);

        Ok(Self {
            listener,
            config: WebSocketConfig::default(),
        })
    }

    pub fn with_config(mut self, config: WebSocketConfig) -> Self {
        self.config = config;
        self
    }

    /// Accept a connection and report the upgrade request headers.
    ///
    /// A client that does not finish the upgrade within `connect_timeout`
    /// is dropped with [`TransportError::Timeout`].
    pub async fn accept_with_headers(
        &mut self,
    ) -> Result<(
        WebSocketSender,
        WebSocketReceiver,
        SocketAddr,
        HashMap<String, String>,
    )> {
        let (stream, addr) = self
            .listener
            .accept()
            .await
            .map_err(|e| TransportError::AcceptFailed(e.to_string()))?;

        debug!("Accepted TCP connection from {}", addr);

        let mut headers = HashMap::new();
        let upgrade = tokio_tungstenite::accept_hdr_async(
            stream,
            |req: &HsRequest, response: HsResponse| {
                for (name, value) in req.headers() {
                    if let Ok(value) = value.to_str() {
                        headers.insert(name.as_str().to_string(), value.to_string());
                    }
                }
                Ok(response)
            },
        );
        let ws_stream = tokio::time::timeout(self.config.connect_timeout, upgrade)
            .await
            .map_err(|_| {
                warn!("Upgrade from {} timed out", addr);
                TransportError::Timeout
            })?
            .map_err(|e| TransportError::ConnectionFailed(e.to_string()))?;

        debug!("WebSocket client connected from {}", addr);

        let (sender, receiver) = spawn_io(ws_stream, self.config.channel_capacity);
        Ok((sender, receiver, addr, headers))
    }
}

#[async_trait]
impl TransportServer for WebSocketServer {
    type Sender = WebSocketSender;
    type Receiver = WebSocketReceiver;

    async fn accept(&mut self) -> Result<(Self::Sender, Self::Receiver, SocketAddr)> {
        let (sender, receiver, addr, _) = self.accept_with_headers().await?;
        Ok((sender, receiver, addr))
    }

    fn local_addr(&self) -> Result<SocketAddr> {
        self.listener.local_addr().map_err(TransportError::Io)
    }
}
