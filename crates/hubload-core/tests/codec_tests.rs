//! Codec tests for hubload core

use hubload_core::codec::{
    decode_handshake_request, decode_handshake_response, encode_handshake_request,
    encode_handshake_response,
};
use hubload_core::{
    decode_message, encode_message, CloseMessage, FrameBuffer, HandshakeRequest,
    HandshakeResponse, HubMessage, InvocationMessage, Protocol, Timestamp,
};
use serde_json::json;

fn roundtrip(protocol: Protocol, msg: &HubMessage) -> HubMessage {
    let encoded = encode_message(protocol, msg).expect("encode failed");
    let mut frames = FrameBuffer::for_protocol(protocol);
    frames.extend(&encoded);
    let unit = frames
        .next_unit()
        .expect("framing failed")
        .expect("incomplete unit");
    assert_eq!(frames.buffered(), 0);
    decode_message(protocol, &unit).expect("decode failed")
}

#[test]
fn test_echo_invocation_both_protocols() {
    let msg = HubMessage::invocation("Echo", vec![json!(11)]);

    for protocol in [Protocol::Json, Protocol::MessagePack] {
        match roundtrip(protocol, &msg) {
            HubMessage::Invocation(inv) => {
                assert_eq!(inv.target, "Echo");
                assert_eq!(inv.arguments, vec![json!(11)]);
                assert!(inv.invocation_id.is_none());
                assert!(inv.headers.is_empty());
            }
            other => panic!("Expected Invocation, got {:?}", other),
        }
    }
}

#[test]
fn test_timestamp_push_survives_msgpack() {
    let sent = Timestamp::from_micros(1_700_000_123_456_789);
    let msg = HubMessage::invocation("echo", vec![sent.to_value()]);

    match roundtrip(Protocol::MessagePack, &msg) {
        HubMessage::Invocation(inv) => {
            assert_eq!(Timestamp::from_value(&inv.arguments[0]), Some(sent));
        }
        other => panic!("Expected Invocation, got {:?}", other),
    }
}

#[test]
fn test_invocation_with_id_and_headers() {
    let mut inv = InvocationMessage::new("Broadcast", vec![json!("hello"), json!(3)]);
    inv.invocation_id = Some("7".to_string());
    inv.headers.insert("x-run".to_string(), "abc".to_string());
    let msg = HubMessage::Invocation(inv.clone());

    for protocol in [Protocol::Json, Protocol::MessagePack] {
        assert_eq!(roundtrip(protocol, &msg), HubMessage::Invocation(inv.clone()));
    }
}

#[test]
fn test_ping_and_close() {
    for protocol in [Protocol::Json, Protocol::MessagePack] {
        assert_eq!(roundtrip(protocol, &HubMessage::Ping), HubMessage::Ping);

        let close = HubMessage::Close(CloseMessage {
            error: Some("server shutting down".to_string()),
        });
        assert_eq!(roundtrip(protocol, &close), close);
    }
}

#[test]
fn test_json_accepts_foreign_fields() {
    let unit = br#"{"type":1,"target":"echo","arguments":[5],"streamIds":[]}"#;
    let msg = decode_message(Protocol::Json, unit).unwrap();
    assert!(matches!(msg, HubMessage::Invocation(inv) if inv.target == "echo"));
}

#[test]
fn test_invocation_without_target_rejected() {
    assert!(decode_message(Protocol::Json, br#"{"type":1,"arguments":[]}"#).is_err());
}

#[test]
fn test_garbage_rejected() {
    assert!(decode_message(Protocol::Json, b"not json").is_err());
    assert!(decode_message(Protocol::MessagePack, &[0xc1]).is_err());
}

#[test]
fn test_handshake_roundtrip() {
    let request = HandshakeRequest::new(Protocol::MessagePack);
    let encoded = encode_handshake_request(&request).unwrap();

    let mut frames = FrameBuffer::text();
    frames.extend(&encoded);
    let unit = frames.next_unit().unwrap().unwrap();
    let decoded = decode_handshake_request(&unit).unwrap();
    assert_eq!(decoded.protocol, "messagepack");

    let accepted = encode_handshake_response(&HandshakeResponse::accepted()).unwrap();
    assert_eq!(&accepted[..], b"{}\x1e");
    let decoded = decode_handshake_response(&accepted[..accepted.len() - 1]).unwrap();
    assert!(decoded.error.is_none());
}
