//! Echo Server Tests
//!
//! Behaviour of the echo target as seen by hub clients:
//! - Negotiation for both protocols and rejection of unknown ones
//! - Connection counting and the connection cap
//! - Broadcast of `echo` pushes to every session
//! - Push loop termination (duration, Stop, no peers)

use bytes::Bytes;
use hubload_client::HubConnectionBuilder;
use hubload_core::{codec, FrameBuffer, HandshakeRequest, Protocol};
use hubload_echo::{EchoConfig, EchoServer};
use hubload_test_utils::{collect_invocations, wait_for, TestEchoServer, DEFAULT_CHECK_INTERVAL};
use hubload_transport::{
    Transport, TransportEvent, TransportReceiver, TransportSender, WebSocketTransport,
};
use serde_json::json;
use std::time::Duration;
use tokio::time::timeout;

async fn wait_until<F>(server: &EchoServer, check: F) -> bool
where
    F: Fn(&EchoServer) -> bool,
{
    wait_for(
        || {
            let ok = check(server);
            async move { ok }
        },
        DEFAULT_CHECK_INTERVAL,
        Duration::from_secs(5),
    )
    .await
}

#[tokio::test]
async fn test_connection_count_tracks_sessions() {
    let server = TestEchoServer::start().await;

    let a = server.connect(Protocol::Json).await.unwrap();
    let b = server.connect(Protocol::MessagePack).await.unwrap();
    assert!(server.wait_for_connections(2, Duration::from_secs(5)).await);

    a.stop().await.unwrap();
    assert!(server.wait_for_connections(1, Duration::from_secs(5)).await);

    b.stop().await.unwrap();
    assert!(server.wait_for_connections(0, Duration::from_secs(5)).await);
}

#[tokio::test]
async fn test_echo_reaches_every_session_in_its_protocol() {
    let server = TestEchoServer::start().await;

    let json_hub = HubConnectionBuilder::new(&server.url()).build();
    let mut json_echoes = json_hub.on("echo");
    json_hub.start().await.unwrap();

    let binary_hub = HubConnectionBuilder::new(&server.url())
        .with_protocol(Protocol::MessagePack)
        .build();
    let mut binary_echoes = binary_hub.on("echo");
    binary_hub.start().await.unwrap();

    assert!(wait_until(server.server(), |s| s.sessions().len() == 2).await);

    // Only one peer asks; everyone receives
    json_hub.send("Echo", vec![json!(5)]).await.unwrap();

    let from_json = collect_invocations(&mut json_echoes, 10, Duration::from_secs(5)).await;
    let from_binary = collect_invocations(&mut binary_echoes, 10, Duration::from_secs(5)).await;
    assert_eq!(from_json.len(), 10);
    assert_eq!(from_binary.len(), 10);
    assert!(from_binary.iter().all(|args| args[0].is_u64()));

    json_hub.dispose().await;
    binary_hub.dispose().await;
}

#[tokio::test]
async fn test_echo_duration_elapses() {
    let server = TestEchoServer::start().await;
    let hub = server.connect(Protocol::Json).await.unwrap();

    hub.send("Echo", vec![json!(0.2)]).await.unwrap();
    assert!(wait_until(server.server(), |s| s.push_count() > 0).await);
    assert!(wait_until(server.server(), |s| !s.is_pushing()).await);

    let rounds = server.server().push_count();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(server.server().push_count(), rounds, "pushing continued past the duration");

    hub.dispose().await;
}

#[tokio::test]
async fn test_echo_ends_when_no_peers_remain() {
    let server = TestEchoServer::start().await;
    let hub = server.connect(Protocol::Json).await.unwrap();

    hub.send("Echo", vec![json!(60)]).await.unwrap();
    assert!(wait_until(server.server(), |s| s.is_pushing()).await);

    hub.stop().await.unwrap();
    assert!(wait_until(server.server(), |s| !s.is_pushing()).await);
}

#[tokio::test]
async fn test_connection_cap() {
    let server = TestEchoServer::start_with_config(EchoConfig {
        max_connections: Some(2),
        ..Default::default()
    })
    .await;

    let _a = server.connect(Protocol::Json).await.unwrap();
    let _b = server.connect(Protocol::Json).await.unwrap();
    assert!(server.connect(Protocol::Json).await.is_err());
    assert_eq!(server.server().connection_count(), 2);
    assert_eq!(server.server().invocation_count(), 0);
}

#[tokio::test]
async fn test_unknown_protocol_rejected() {
    let server = TestEchoServer::start().await;

    let (sender, mut receiver) = WebSocketTransport::new()
        .connect(&server.url())
        .await
        .unwrap();

    let request = HandshakeRequest {
        protocol: "xml".to_string(),
        version: 1,
    };
    sender
        .send(codec::encode_handshake_request(&request).unwrap())
        .await
        .unwrap();

    let mut frames = FrameBuffer::text();
    let unit = loop {
        match timeout(Duration::from_secs(5), receiver.recv()).await {
            Ok(Some(TransportEvent::Data(data))) => {
                frames.extend(&data);
                if let Some(unit) = frames.next_unit().unwrap() {
                    break unit;
                }
            }
            Ok(Some(TransportEvent::Connected)) => continue,
            other => panic!("no handshake response: {:?}", other),
        }
    };

    let response = codec::decode_handshake_response(&unit).unwrap();
    let error = response.error.expect("expected a rejection");
    assert!(error.contains("xml"), "unexpected rejection text: {}", error);
    assert_eq!(server.server().connection_count(), 0);
}

#[tokio::test]
async fn test_malformed_unit_closes_session() {
    let server = TestEchoServer::start().await;

    let (sender, mut receiver) = WebSocketTransport::new()
        .connect(&server.url())
        .await
        .unwrap();
    sender
        .send(codec::encode_handshake_request(&HandshakeRequest::new(Protocol::Json)).unwrap())
        .await
        .unwrap();
    assert!(server.wait_for_connections(1, Duration::from_secs(5)).await);

    sender
        .send(Bytes::from_static(b"definitely not json\x1e"))
        .await
        .unwrap();
    assert!(server.wait_for_connections(0, Duration::from_secs(5)).await);

    let mut disconnected = false;
    while let Ok(Some(event)) = timeout(Duration::from_secs(5), receiver.recv()).await {
        if matches!(event, TransportEvent::Disconnected { .. }) {
            disconnected = true;
            break;
        }
    }
    assert!(disconnected);
}

#[tokio::test]
async fn test_shutdown_closes_sessions() {
    let mut server = TestEchoServer::start().await;
    let hub = HubConnectionBuilder::new(&server.url()).build();
    let mut echoes = hub.on("echo");
    hub.start().await.unwrap();

    server.stop();

    let next = timeout(Duration::from_secs(5), echoes.next())
        .await
        .expect("stream never ended");
    assert!(next.is_none());
    assert!(hub.close_reason().is_some());
}
