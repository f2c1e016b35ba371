//! Connections to the endpoint under test
//!
//! A [`Connection`] is either a hub connection (negotiation, framing and
//! dispatch handled by `hubload-client`) or a raw WebSocket on which the
//! worker negotiates and frames units itself. Both expose the same
//! open / send / receive / close contract.

use hubload_client::{HubConnection, HubConnectionBuilder, InvocationStream};
use hubload_core::{
    codec, FrameBuffer, HandshakeRequest, HubMessage, Protocol, Timestamp, ECHO_PUSH_TARGET,
};
use hubload_transport::{
    Transport, TransportEvent, TransportReceiver, TransportSender, WebSocketConfig,
    WebSocketReceiver, WebSocketSender, WebSocketTransport,
};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use crate::error::{Result, WorkerError};
use crate::job::{ErrorLog, JobDescriptor, TransportKind};
use crate::samples::ConnectionSamples;

/// One connection of a run, identified by its ordinal
pub enum Connection {
    Hub(HubLink),
    Socket(SocketLink),
}

pub struct HubLink {
    index: usize,
    hub: Arc<HubConnection>,
    echoes: Option<InvocationStream>,
}

pub struct SocketLink {
    index: usize,
    url: String,
    protocol: Protocol,
    config: WebSocketConfig,
    handshake_timeout: Duration,
    sender: Option<WebSocketSender>,
    inbound: Option<(WebSocketReceiver, FrameBuffer)>,
}

/// Inbound side of an open connection, consumed by its receive loop
pub enum Inbound {
    Hub {
        echoes: InvocationStream,
        hub: Arc<HubConnection>,
    },
    Socket {
        receiver: WebSocketReceiver,
        /// May already hold units that arrived with the handshake response
        frames: FrameBuffer,
        protocol: Protocol,
    },
}

impl Connection {
    /// Build connection `index` for `job`, targeting the WebSocket `url`
    pub fn new(index: usize, job: &JobDescriptor, url: &str) -> Self {
        match job.transport {
            TransportKind::WebSockets => {
                let mut builder = HubConnectionBuilder::new(url)
                    .with_protocol(job.protocol)
                    .with_headers(job.headers.clone())
                    .handshake_timeout(job.handshake_timeout());
                if let Some(level) = job.log_level() {
                    builder = builder.log_level(level);
                }

                let hub = builder.build();
                let echoes = hub.on(ECHO_PUSH_TARGET);
                Connection::Hub(HubLink {
                    index,
                    hub: Arc::new(hub),
                    echoes: Some(echoes),
                })
            }
            TransportKind::Sockets => Connection::Socket(SocketLink {
                index,
                url: url.to_string(),
                protocol: job.protocol,
                config: WebSocketConfig {
                    headers: job
                        .headers
                        .iter()
                        .map(|(k, v)| (k.clone(), v.clone()))
                        .collect(),
                    connect_timeout: job.handshake_timeout(),
                    ..Default::default()
                },
                handshake_timeout: job.handshake_timeout(),
                sender: None,
                inbound: None,
            }),
        }
    }

    pub fn index(&self) -> usize {
        match self {
            Connection::Hub(link) => link.index,
            Connection::Socket(link) => link.index,
        }
    }

    /// Connect and negotiate the protocol
    pub async fn open(&mut self) -> Result<()> {
        match self {
            Connection::Hub(link) => link
                .hub
                .start()
                .await
                .map_err(|e| WorkerError::connection(link.index, e)),
            Connection::Socket(link) => link.open().await,
        }
    }

    /// Send one invocation
    pub async fn send(&self, target: &str, arguments: Vec<Value>) -> Result<()> {
        match self {
            Connection::Hub(link) => link
                .hub
                .send(target, arguments)
                .await
                .map_err(|e| WorkerError::connection(link.index, e)),
            Connection::Socket(link) => link.send(target, arguments).await,
        }
    }

    /// Hand the inbound side to a receive loop; `None` if already taken or not open
    pub fn take_inbound(&mut self) -> Option<Inbound> {
        match self {
            Connection::Hub(link) => link.echoes.take().map(|echoes| Inbound::Hub {
                echoes,
                hub: Arc::clone(&link.hub),
            }),
            Connection::Socket(link) => {
                let protocol = link.protocol;
                link.inbound
                    .take()
                    .map(|(receiver, frames)| Inbound::Socket {
                        receiver,
                        frames,
                        protocol,
                    })
            }
        }
    }

    /// Send a normal closure. Repeated calls, or calls after a failed open, are no-ops.
    pub async fn close(&self) -> Result<()> {
        match self {
            Connection::Hub(link) => link
                .hub
                .stop()
                .await
                .map_err(|e| WorkerError::connection(link.index, e)),
            Connection::Socket(link) => match &link.sender {
                Some(sender) => sender
                    .close()
                    .await
                    .map_err(|e| WorkerError::connection(link.index, e)),
                None => Ok(()),
            },
        }
    }

    /// Close and release the transport handle
    pub async fn dispose(&mut self) {
        match self {
            Connection::Hub(link) => {
                link.hub.dispose().await;
                link.echoes = None;
            }
            Connection::Socket(link) => {
                if let Some(sender) = link.sender.take() {
                    let _ = sender.close().await;
                }
                link.inbound = None;
            }
        }
    }
}

impl SocketLink {
    async fn open(&mut self) -> Result<()> {
        let index = self.index;
        let transport = WebSocketTransport::with_config(self.config.clone());
        let (sender, mut receiver) = transport
            .connect(&self.url)
            .await
            .map_err(|e| WorkerError::connection(index, e))?;

        let negotiated = tokio::time::timeout(
            self.handshake_timeout,
            negotiate(self.protocol, &sender, &mut receiver),
        )
        .await
        .unwrap_or_else(|_| Err("handshake timed out".to_string()));

        match negotiated {
            Ok(frames) => {
                debug!("Socket {} negotiated {}", index, self.protocol);
                self.sender = Some(sender);
                self.inbound = Some((receiver, frames));
                Ok(())
            }
            Err(reason) => {
                let _ = sender.close().await;
                Err(WorkerError::connection(index, reason))
            }
        }
    }

    async fn send(&self, target: &str, arguments: Vec<Value>) -> Result<()> {
        let sender = self
            .sender
            .as_ref()
            .ok_or_else(|| WorkerError::connection(self.index, "not open"))?;

        let data = codec::encode_message(self.protocol, &HubMessage::invocation(target, arguments))?;
        sender
            .send(data)
            .await
            .map_err(|e| WorkerError::connection(self.index, e))
    }
}

/// Send the negotiation block and wait for the response.
///
/// Returns the frame buffer switched to `protocol`, keeping any bytes that
/// followed the response.
async fn negotiate(
    protocol: Protocol,
    sender: &WebSocketSender,
    receiver: &mut WebSocketReceiver,
) -> std::result::Result<FrameBuffer, String> {
    let request =
        codec::encode_handshake_request(&HandshakeRequest::new(protocol)).map_err(|e| e.to_string())?;
    sender.send(request).await.map_err(|e| e.to_string())?;

    let mut frames = FrameBuffer::text();
    loop {
        match receiver.recv().await {
            Some(TransportEvent::Data(data)) => {
                frames.extend(&data);
                if let Some(unit) = frames.next_unit().map_err(|e| e.to_string())? {
                    let response =
                        codec::decode_handshake_response(&unit).map_err(|e| e.to_string())?;
                    if let Some(error) = response.error {
                        return Err(format!("handshake rejected: {}", error));
                    }
                    frames.set_protocol(protocol);
                    return Ok(frames);
                }
            }
            Some(TransportEvent::Connected) => {}
            Some(TransportEvent::Error(e)) => return Err(e),
            Some(TransportEvent::Disconnected { reason }) => {
                return Err(reason.unwrap_or_else(|| "closed during handshake".to_string()))
            }
            None => return Err("closed during handshake".to_string()),
        }
    }
}

/// State shared between a run and its receive loops
#[derive(Debug, Clone, Default)]
pub struct LoopContext {
    errors: ErrorLog,
    stopping: Arc<AtomicBool>,
}

impl LoopContext {
    pub fn new(errors: ErrorLog, stopping: Arc<AtomicBool>) -> Self {
        Self { errors, stopping }
    }

    /// A loop ended on its own; noted unless the run is already stopping
    fn closed_early(&self, index: usize, reason: &str) {
        if self.stopping.load(Ordering::SeqCst) {
            debug!("Connection {} closed during shutdown: {}", index, reason);
            return;
        }
        warn!("Connection {} closed early: {}", index, reason);
        self.errors
            .append(format!("Connection {} closed early: {}", index, reason));
    }
}

/// A running receive loop that owns one connection's sample slot
pub struct ReceiveLoop {
    index: usize,
    shutdown: Option<oneshot::Sender<()>>,
    handle: JoinHandle<ConnectionSamples>,
}

impl ReceiveLoop {
    pub fn spawn(inbound: Inbound, samples: ConnectionSamples, context: LoopContext) -> Self {
        let index = samples.index();
        let (shutdown, signal) = oneshot::channel();
        let handle = tokio::spawn(receive(inbound, samples, signal, context));
        Self {
            index,
            shutdown: Some(shutdown),
            handle,
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    /// Tear the loop down and take back its samples; `None` if the task panicked
    pub async fn join(mut self) -> Option<ConnectionSamples> {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        match self.handle.await {
            Ok(samples) => Some(samples),
            Err(e) => {
                error!("Receive loop {} failed: {}", self.index, e);
                None
            }
        }
    }
}

async fn receive(
    inbound: Inbound,
    mut samples: ConnectionSamples,
    mut shutdown: oneshot::Receiver<()>,
    context: LoopContext,
) -> ConnectionSamples {
    let index = samples.index();

    match inbound {
        Inbound::Hub { mut echoes, hub } => loop {
            tokio::select! {
                biased;
                _ = &mut shutdown => break,
                next = echoes.next_invocation() => match next {
                    Some(echo) => record_echo(&mut samples, &echo.arguments, echo.received_at),
                    None => {
                        let reason = hub
                            .close_reason()
                            .unwrap_or_else(|| "hub connection closed".to_string());
                        context.closed_early(index, &reason);
                        break;
                    }
                },
            }
        },
        Inbound::Socket {
            mut receiver,
            mut frames,
            protocol,
        } => {
            // Units that arrived with the handshake response
            let received_at = Timestamp::now();
            if let Err(e) = drain_units(index, protocol, &mut frames, &mut samples, received_at) {
                context.closed_early(index, &e.to_string());
                return samples;
            }

            loop {
                let event = tokio::select! {
                    biased;
                    _ = &mut shutdown => break,
                    event = receiver.recv() => event,
                };

                match event {
                    Some(TransportEvent::Data(data)) => {
                        let received_at = Timestamp::now();
                        frames.extend(&data);
                        if let Err(e) =
                            drain_units(index, protocol, &mut frames, &mut samples, received_at)
                        {
                            context.closed_early(index, &e.to_string());
                            break;
                        }
                    }
                    Some(TransportEvent::Connected) => {}
                    Some(TransportEvent::Error(e)) => {
                        context.closed_early(index, &e);
                        break;
                    }
                    Some(TransportEvent::Disconnected { reason }) => {
                        context.closed_early(
                            index,
                            reason.as_deref().unwrap_or("connection closed"),
                        );
                        break;
                    }
                    None => {
                        context.closed_early(index, "connection closed");
                        break;
                    }
                }
            }
        }
    }

    samples
}

/// Decode every complete unit, recording `echo` pushes as received at `received_at`
fn drain_units(
    index: usize,
    protocol: Protocol,
    frames: &mut FrameBuffer,
    samples: &mut ConnectionSamples,
    received_at: Timestamp,
) -> Result<()> {
    let framing = |e: hubload_core::Error| WorkerError::Framing {
        index,
        message: e.to_string(),
    };

    while let Some(unit) = frames.next_unit().map_err(framing)? {
        match codec::decode_message(protocol, &unit).map_err(framing)? {
            HubMessage::Invocation(invocation)
                if invocation.target.eq_ignore_ascii_case(ECHO_PUSH_TARGET) =>
            {
                record_echo(samples, &invocation.arguments, received_at);
            }
            HubMessage::Invocation(invocation) => {
                debug!("Connection {} ignoring {}", index, invocation.target);
            }
            HubMessage::Ping => {}
            HubMessage::Close(close) => {
                return Err(WorkerError::connection(
                    index,
                    format!(
                        "server closed the connection{}",
                        close.error.map(|e| format!(": {}", e)).unwrap_or_default()
                    ),
                ));
            }
        }
    }
    Ok(())
}

fn record_echo(samples: &mut ConnectionSamples, arguments: &[Value], received_at: Timestamp) {
    match arguments.first().and_then(Timestamp::from_value) {
        Some(sent_at) => samples.record_at(sent_at, received_at),
        None => debug!("Echo without a timestamp on connection {}", samples.index()),
    }
}
